/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::Instant,
};

use trust_dns_resolver::{
    error::{ResolveError, ResolveErrorKind},
    proto::{
        op::ResponseCode,
        rr::{RData, RecordType},
    },
    AsyncResolver, TokioAsyncResolver,
};

use crate::{Error, MX};

/// Records returned by a DNS query along with their expiration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer<T> {
    pub records: T,
    pub valid_until: Instant,
}

/// DNS resolution capability used by the SPF evaluator.
///
/// Names are passed fully qualified (with a trailing dot). Host names
/// returned in MX and PTR answers are expected lowercased and without the
/// trailing dot. Failures must be classified as:
///
/// - [`Error::DnsRecordNotFound`] for NXDOMAIN or empty answers,
/// - [`Error::DnsTimeout`] when the query timed out,
/// - [`Error::DnsServerFailure`] for SERVFAIL and other error response codes,
/// - [`Error::DnsError`] for any other fault, including malformed responses.
pub trait DnsTransport: Send + Sync {
    /// TXT records, each one with its character-strings concatenated.
    fn query_txt(
        &self,
        name: &str,
    ) -> impl Future<Output = crate::Result<DnsAnswer<Vec<Vec<u8>>>>> + Send;

    /// Obsolete SPF (type 99) records, concatenated like TXT records.
    fn query_spf(
        &self,
        name: &str,
    ) -> impl Future<Output = crate::Result<DnsAnswer<Vec<Vec<u8>>>>> + Send;

    fn query_mx(&self, name: &str) -> impl Future<Output = crate::Result<DnsAnswer<Vec<MX>>>> + Send;

    fn query_a(
        &self,
        name: &str,
    ) -> impl Future<Output = crate::Result<DnsAnswer<Vec<Ipv4Addr>>>> + Send;

    fn query_aaaa(
        &self,
        name: &str,
    ) -> impl Future<Output = crate::Result<DnsAnswer<Vec<Ipv6Addr>>>> + Send;

    fn query_ptr(
        &self,
        addr: IpAddr,
    ) -> impl Future<Output = crate::Result<DnsAnswer<Vec<String>>>> + Send;
}

impl DnsTransport for TokioAsyncResolver {
    async fn query_txt(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Vec<u8>>>> {
        let txt_lookup = AsyncResolver::txt_lookup(self, name).await?;
        let records = txt_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| Some(concat_strings(r.data()?.as_txt()?.txt_data())))
            .collect();

        Ok(DnsAnswer {
            records,
            valid_until: txt_lookup.valid_until(),
        })
    }

    async fn query_spf(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Vec<u8>>>> {
        let spf_lookup =
            AsyncResolver::lookup(self, name, RecordType::Unknown(SPF_RR_TYPE)).await?;
        let records = spf_lookup
            .record_iter()
            .filter_map(|r| match r.data()? {
                RData::Unknown { code, rdata } if *code == SPF_RR_TYPE => {
                    decode_character_strings(rdata.anything())
                        .map(|strings| concat_strings(&strings))
                }
                _ => None,
            })
            .collect();

        Ok(DnsAnswer {
            records,
            valid_until: spf_lookup.valid_until(),
        })
    }

    async fn query_mx(&self, name: &str) -> crate::Result<DnsAnswer<Vec<MX>>> {
        let mx_lookup = AsyncResolver::mx_lookup(self, name).await?;
        let mut records = mx_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| {
                let mx = r.data()?.as_mx()?;
                Some(MX {
                    exchange: normalize_name(&mx.exchange().to_string()),
                    preference: mx.preference(),
                })
            })
            .collect::<Vec<_>>();
        records.sort_by_key(|mx| mx.preference);

        Ok(DnsAnswer {
            records,
            valid_until: mx_lookup.valid_until(),
        })
    }

    async fn query_a(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Ipv4Addr>>> {
        let ipv4_lookup = AsyncResolver::ipv4_lookup(self, name).await?;
        let records = ipv4_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| (*r.data()?.as_a()?).into())
            .collect();

        Ok(DnsAnswer {
            records,
            valid_until: ipv4_lookup.valid_until(),
        })
    }

    async fn query_aaaa(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Ipv6Addr>>> {
        let ipv6_lookup = AsyncResolver::ipv6_lookup(self, name).await?;
        let records = ipv6_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| (*r.data()?.as_aaaa()?).into())
            .collect();

        Ok(DnsAnswer {
            records,
            valid_until: ipv6_lookup.valid_until(),
        })
    }

    async fn query_ptr(&self, addr: IpAddr) -> crate::Result<DnsAnswer<Vec<String>>> {
        let ptr_lookup = AsyncResolver::reverse_lookup(self, addr).await?;
        let records = ptr_lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| {
                let name = normalize_name(&r.data()?.as_ptr()?.to_string());
                if !name.is_empty() {
                    Some(name)
                } else {
                    None
                }
            })
            .collect();

        Ok(DnsAnswer {
            records,
            valid_until: ptr_lookup.valid_until(),
        })
    }
}

/// RR type 99, not known to the resolver.
const SPF_RR_TYPE: u16 = 99;

/// Splits raw RDATA into its length-prefixed character-strings. Returns
/// `None` when a length runs past the end of the data.
pub(crate) fn decode_character_strings(mut rdata: &[u8]) -> Option<Vec<&[u8]>> {
    let mut strings = Vec::new();
    while let Some((&len, rest)) = rdata.split_first() {
        let len = len as usize;
        if rest.len() < len {
            return None;
        }
        let (string, rest) = rest.split_at(len);
        strings.push(string);
        rdata = rest;
    }
    Some(strings)
}

pub(crate) fn concat_strings<T: AsRef<[u8]>>(strings: &[T]) -> Vec<u8> {
    match strings {
        [string] => string.as_ref().to_vec(),
        _ => {
            let mut entry = Vec::with_capacity(255 * strings.len());
            for string in strings {
                entry.extend_from_slice(string.as_ref());
            }
            entry
        }
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => match response_code {
                ResponseCode::NXDomain | ResponseCode::NoError => {
                    Error::DnsRecordNotFound(*response_code)
                }
                _ => Error::DnsServerFailure(*response_code),
            },
            ResolveErrorKind::Timeout => Error::DnsTimeout,
            _ => Error::DnsError(err.to_string()),
        }
    }
}

#[cfg(any(test, feature = "test"))]
pub use zone::StaticZone;

#[cfg(any(test, feature = "test"))]
mod zone {
    use std::{
        collections::HashMap,
        net::{IpAddr, Ipv4Addr, Ipv6Addr},
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    use parking_lot::Mutex;
    use trust_dns_resolver::proto::op::ResponseCode;

    use crate::{Error, MX};

    use super::{concat_strings, normalize_name, DnsAnswer, DnsTransport};

    /// In-memory zone used to exercise the evaluator without network access.
    #[derive(Default)]
    pub struct StaticZone {
        txt: Mutex<HashMap<String, Vec<Vec<u8>>>>,
        spf: Mutex<HashMap<String, Vec<Vec<u8>>>>,
        mx: Mutex<HashMap<String, Vec<MX>>>,
        ipv4: Mutex<HashMap<String, Vec<Ipv4Addr>>>,
        ipv6: Mutex<HashMap<String, Vec<Ipv6Addr>>>,
        ptr: Mutex<HashMap<IpAddr, Vec<String>>>,
        errors: Mutex<HashMap<String, Error>>,
        ptr_errors: Mutex<HashMap<IpAddr, Error>>,
        delays: Mutex<HashMap<String, Duration>>,
        queries: AtomicUsize,
    }

    impl StaticZone {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_txt(self, name: &str, record: &str) -> Self {
            self.add_txt(name, record);
            self
        }

        pub fn with_ip(self, name: &str, addr: &str) -> Self {
            self.add_ip(name, addr.parse().expect("invalid IP address"));
            self
        }

        pub fn with_mx(self, name: &str, preference: u16, exchange: &str) -> Self {
            self.add_mx(name, preference, exchange);
            self
        }

        pub fn with_ptr(self, addr: &str, name: &str) -> Self {
            self.add_ptr(addr.parse().expect("invalid IP address"), name);
            self
        }

        pub fn with_error(self, name: &str, err: Error) -> Self {
            self.add_error(name, err);
            self
        }

        pub fn with_delay(self, name: &str, delay: Duration) -> Self {
            self.delays.lock().insert(key(name), delay);
            self
        }

        pub fn add_txt(&self, name: &str, record: &str) {
            self.add_txt_strings(name, &[record]);
        }

        /// Adds a TXT record made of multiple character-strings.
        pub fn add_txt_strings(&self, name: &str, strings: &[&str]) {
            self.txt
                .lock()
                .entry(key(name))
                .or_default()
                .push(concat_strings(strings));
        }

        pub fn add_spf_rr(&self, name: &str, record: &str) {
            self.spf
                .lock()
                .entry(key(name))
                .or_default()
                .push(record.as_bytes().to_vec());
        }

        pub fn add_ip(&self, name: &str, addr: IpAddr) {
            match addr {
                IpAddr::V4(addr) => self.ipv4.lock().entry(key(name)).or_default().push(addr),
                IpAddr::V6(addr) => self.ipv6.lock().entry(key(name)).or_default().push(addr),
            }
        }

        pub fn add_mx(&self, name: &str, preference: u16, exchange: &str) {
            let mut mx = self.mx.lock();
            let records = mx.entry(key(name)).or_default();
            records.push(MX::new(normalize_name(exchange), preference));
            records.sort_by_key(|mx| mx.preference);
        }

        pub fn add_ptr(&self, addr: IpAddr, name: &str) {
            self.ptr
                .lock()
                .entry(addr)
                .or_default()
                .push(normalize_name(name));
        }

        pub fn add_error(&self, name: &str, err: Error) {
            self.errors.lock().insert(key(name), err);
        }

        /// Makes reverse lookups of `addr` fail with `err`.
        pub fn add_ptr_error(&self, addr: IpAddr, err: Error) {
            self.ptr_errors.lock().insert(addr, err);
        }

        /// Number of queries received so far.
        pub fn queries(&self) -> usize {
            self.queries.load(Ordering::Relaxed)
        }

        async fn answer<T: Clone + Send>(
            &self,
            name: &str,
            records: &Mutex<HashMap<String, Vec<T>>>,
        ) -> crate::Result<DnsAnswer<Vec<T>>> {
            self.queries.fetch_add(1, Ordering::Relaxed);
            let name = key(name);
            let delay = self.delays.lock().get(&name).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.errors.lock().get(&name) {
                return Err(err.clone());
            }
            match records.lock().get(&name) {
                Some(records) if !records.is_empty() => Ok(DnsAnswer {
                    records: records.clone(),
                    valid_until: Instant::now() + Duration::from_secs(300),
                }),
                _ => Err(Error::DnsRecordNotFound(ResponseCode::NXDomain)),
            }
        }
    }

    fn key(name: &str) -> String {
        let name = name.to_lowercase();
        if name.ends_with('.') {
            name
        } else {
            format!("{name}.")
        }
    }

    impl DnsTransport for StaticZone {
        async fn query_txt(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Vec<u8>>>> {
            self.answer(name, &self.txt).await
        }

        async fn query_spf(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Vec<u8>>>> {
            self.answer(name, &self.spf).await
        }

        async fn query_mx(&self, name: &str) -> crate::Result<DnsAnswer<Vec<MX>>> {
            self.answer(name, &self.mx).await
        }

        async fn query_a(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Ipv4Addr>>> {
            self.answer(name, &self.ipv4).await
        }

        async fn query_aaaa(&self, name: &str) -> crate::Result<DnsAnswer<Vec<Ipv6Addr>>> {
            self.answer(name, &self.ipv6).await
        }

        async fn query_ptr(&self, addr: IpAddr) -> crate::Result<DnsAnswer<Vec<String>>> {
            self.queries.fetch_add(1, Ordering::Relaxed);
            if let Some(err) = self.ptr_errors.lock().get(&addr) {
                return Err(err.clone());
            }
            match self.ptr.lock().get(&addr) {
                Some(names) => Ok(DnsAnswer {
                    records: names.clone(),
                    valid_until: Instant::now() + Duration::from_secs(300),
                }),
                None => Err(Error::DnsRecordNotFound(ResponseCode::NXDomain)),
            }
        }
    }
}
