/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

//! # mail-spf
//!
//! _mail-spf_ is a Sender Policy Framework (SPF, [RFC 7208](https://datatracker.ietf.org/doc/html/rfc7208))
//! verification library for Rust. Given the IP address of an SMTP client, the
//! `MAIL FROM` identity and the `HELO`/`EHLO` domain, it retrieves the SPF
//! policy published by the sending domain and evaluates it, following
//! `include` and `redirect` chains within the lookup limits mandated by the RFC.
//!
//! DNS resolution is performed through the [`DnsTransport`](common::transport::DnsTransport)
//! capability, implemented out of the box for the asynchronous `trust-dns`
//! resolver. Answers are cached in LRU caches that honour the record TTLs.
//!
//! ```rust,ignore
//! let resolver = Resolver::new_cloudflare_tls().unwrap();
//!
//! let output = resolver
//!     .verify_spf(SpfParameters::verify_mail_from(
//!         "192.0.2.1".parse().unwrap(),
//!         "mx.example.org",
//!         "sender@example.org",
//!     ))
//!     .await;
//! println!("spf={}", output.result());
//! ```

use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use common::{cache::ResolverCache, config::SpfConfig};
use serde::{Deserialize, Serialize};
use trust_dns_resolver::{proto::op::ResponseCode, TokioAsyncResolver};

pub mod common;
pub mod spf;

pub use common::config;
pub use spf::verify::SpfParameters;
pub use trust_dns_resolver;

/// Concatenated character-strings of every TXT record found for a name.
pub type TxtRecords = Arc<Vec<Vec<u8>>>;

/// SPF verifier. Holds the DNS transport, the answer caches and the
/// evaluation limits. A single instance can be shared by any number of
/// concurrent verifications.
pub struct Resolver<T = TokioAsyncResolver> {
    pub(crate) transport: T,
    pub(crate) cache_txt: Box<dyn ResolverCache<String, TxtRecords>>,
    pub(crate) cache_mx: Box<dyn ResolverCache<String, Arc<Vec<MX>>>>,
    pub(crate) cache_ipv4: Box<dyn ResolverCache<String, Arc<Vec<Ipv4Addr>>>>,
    pub(crate) cache_ipv6: Box<dyn ResolverCache<String, Arc<Vec<Ipv6Addr>>>>,
    pub(crate) cache_ptr: Box<dyn ResolverCache<IpAddr, Arc<Vec<String>>>>,
    pub(crate) config: SpfConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MX {
    pub(crate) exchange: String,
    pub(crate) preference: u16,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpfResult {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    TempError,
    PermError,
    None,
    /// Malformed input supplied by the caller, no DNS query was issued.
    Invalid,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct SpfOutput {
    pub(crate) result: SpfResult,
    pub(crate) domain: String,
    pub(crate) explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
// Authentication-Results header
pub struct AuthenticationResults<'x> {
    pub(crate) hostname: &'x str,
    pub(crate) auth_results: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
// Received-SPF header
pub struct ReceivedSpf {
    pub(crate) received_spf: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ParseError,
    InvalidRecordType,
    MultipleRecords,
    InvalidParameters(&'static str),

    DnsError(String),
    DnsRecordNotFound(ResponseCode),
    DnsServerFailure(ResponseCode),
    DnsTimeout,

    LookupLimitExceeded,
    VoidLookupLimitExceeded,
    IncludeDepthExceeded,

    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::ParseError => write!(f, "Failed to parse SPF record."),
            Error::InvalidRecordType => write!(f, "Invalid record."),
            Error::MultipleRecords => write!(f, "More than one SPF record published."),
            Error::InvalidParameters(reason) => write!(f, "Invalid parameters: {reason}."),
            Error::DnsError(err) => write!(f, "DNS resolution error: {err}"),
            Error::DnsRecordNotFound(code) => write!(f, "DNS record not found: {code}."),
            Error::DnsServerFailure(code) => write!(f, "DNS server failure: {code}."),
            Error::DnsTimeout => write!(f, "DNS query timed out."),
            Error::LookupLimitExceeded => write!(f, "Too many DNS lookups."),
            Error::VoidLookupLimitExceeded => write!(f, "Too many void DNS lookups."),
            Error::IncludeDepthExceeded => write!(f, "Too many nested includes."),
            Error::Cancelled => write!(f, "SPF verification cancelled."),
        }
    }
}

impl std::error::Error for Error {}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::DnsTimeout
    }
}

impl MX {
    pub fn new(exchange: impl Into<String>, preference: u16) -> Self {
        MX {
            exchange: exchange.into(),
            preference,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn preference(&self) -> u16 {
        self.preference
    }
}

impl SpfOutput {
    pub(crate) fn new(domain: impl Into<String>) -> Self {
        SpfOutput {
            result: SpfResult::None,
            domain: domain.into(),
            explanation: None,
        }
    }

    pub(crate) fn with_result(mut self, result: SpfResult) -> Self {
        self.result = result;
        self
    }

    pub(crate) fn with_explanation(mut self, explanation: String) -> Self {
        self.explanation = explanation.into();
        self
    }

    pub fn result(&self) -> SpfResult {
        self.result
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

impl ReceivedSpf {
    pub fn as_str(&self) -> &str {
        &self.received_spf
    }
}
