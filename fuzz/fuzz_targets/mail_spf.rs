/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

#![no_main]
use libfuzzer_sys::fuzz_target;

use mail_spf::{
    common::parse::TxtRecordParser,
    spf::{Macro, Spf},
};

static SPF_ALPHABET: &[u8] = b"v=spf1 +-~?aAmxMXpt:/.%{}_ri4n6clude0123456789";
static MACRO_ALPHABET: &[u8] = b"%{}slodiphcrtv.-+,/_=0123456789 ";

fuzz_target!(|data: &[u8]| {
    let data_spf = into_alphabet(data, SPF_ALPHABET);
    let data_macro = into_alphabet(data, MACRO_ALPHABET);

    Spf::parse(data).ok();
    Spf::parse(&data_spf).ok();

    let mut record = b"v=spf1 ".to_vec();
    record.extend_from_slice(&data_spf);
    Spf::parse(&record).ok();

    Macro::parse(data).ok();
    Macro::parse(&data_macro).ok();
});

fn into_alphabet(data: &[u8], alphabet: &[u8]) -> Vec<u8> {
    data.iter()
        .map(|&byte| alphabet[byte as usize % alphabet.len()])
        .collect()
}
