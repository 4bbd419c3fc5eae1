/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use crate::{
    common::{parse::TxtRecordParser, transport::DnsTransport},
    Error, Resolver,
};

use super::{Macro, Spf};

/// Returns `true` for records starting with `v=spf1` followed by a space or
/// the end of the record.
pub(crate) fn is_spf_record(record: &[u8]) -> bool {
    record.len() >= 6
        && record[..6].eq_ignore_ascii_case(b"v=spf1")
        && record.get(6).map_or(true, |&ch| ch == b' ')
}

/// Selects and parses the only SPF record out of the TXT records of a name.
pub(crate) fn select_spf_record(records: &[Vec<u8>]) -> crate::Result<Spf> {
    let mut spf_records = records.iter().filter(|record| is_spf_record(record));
    match (spf_records.next(), spf_records.next()) {
        (Some(record), None) => Spf::parse(record),
        (Some(_), Some(_)) => Err(Error::MultipleRecords),
        (None, _) => Err(Error::InvalidRecordType),
    }
}

impl<T: DnsTransport> Resolver<T> {
    /// Fetches and parses the SPF policy of `domain`. Returns
    /// `Error::InvalidRecordType` when the domain does not publish one.
    pub async fn spf_lookup(&self, domain: &str) -> crate::Result<Spf> {
        let txt_records = match self.txt_lookup(domain).await {
            Ok(records) => Some(records),
            Err(Error::DnsRecordNotFound(_)) => None,
            Err(err) => return Err(err),
        };

        match txt_records.as_deref().map(|records| select_spf_record(records)) {
            Some(Err(Error::InvalidRecordType)) | None if self.config.query_spf_rr => {
                match self.spf_rr_lookup(domain).await {
                    Ok(records) => select_spf_record(&records),
                    Err(Error::DnsRecordNotFound(_)) => Err(Error::InvalidRecordType),
                    Err(err) => Err(err),
                }
            }
            Some(result) => result,
            None => Err(Error::InvalidRecordType),
        }
    }

    /// Fetches the explanation string published at `name`, exactly one TXT
    /// record is expected.
    pub(crate) async fn explanation_lookup(&self, name: &str) -> crate::Result<Macro> {
        let records = self.txt_lookup(name).await?;
        match records.as_slice() {
            [record] => Macro::parse(record),
            _ => Err(Error::MultipleRecords),
        }
    }
}
