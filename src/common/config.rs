/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Evaluation limits and local settings used by [`Resolver`](crate::Resolver).
///
/// Every field has a default matching the values recommended by RFC 7208,
/// so a partial configuration (for example loaded from a JSON or TOML file)
/// only needs to list the settings it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpfConfig {
    /// Maximum number of DNS-querying terms per verification.
    pub max_lookups: u32,
    /// Maximum number of lookups returning no answer (NXDOMAIN or no data).
    pub max_void_lookups: u32,
    /// Maximum nesting of `include` mechanisms.
    pub max_include_depth: u32,
    /// Timeout applied to every individual DNS query.
    #[serde(with = "duration_ms")]
    pub dns_timeout: Duration,
    /// Upper bound on the wall-clock time spent on a single verification.
    #[serde(with = "duration_ms")]
    pub evaluation_timeout: Duration,
    /// Also query the obsolete SPF (type 99) resource record.
    pub query_spf_rr: bool,
    /// Name of the host performing the check, expanded by `%{r}`.
    pub host_domain: String,
}

impl Default for SpfConfig {
    fn default() -> Self {
        SpfConfig {
            max_lookups: 10,
            max_void_lookups: 2,
            max_include_depth: 10,
            dns_timeout: Duration::from_secs(5),
            evaluation_timeout: Duration::from_secs(20),
            query_spf_rr: false,
            host_domain: "unknown".to_string(),
        }
    }
}

impl SpfConfig {
    pub fn with_host_domain(mut self, host_domain: impl Into<String>) -> Self {
        self.host_domain = host_domain.into();
        self
    }

    pub fn with_max_lookups(mut self, max_lookups: u32) -> Self {
        self.max_lookups = max_lookups;
        self
    }

    pub fn with_max_void_lookups(mut self, max_void_lookups: u32) -> Self {
        self.max_void_lookups = max_void_lookups;
        self
    }

    pub fn with_max_include_depth(mut self, max_include_depth: u32) -> Self {
        self.max_include_depth = max_include_depth;
        self
    }

    pub fn with_dns_timeout(mut self, dns_timeout: Duration) -> Self {
        self.dns_timeout = dns_timeout;
        self
    }

    pub fn with_evaluation_timeout(mut self, evaluation_timeout: Duration) -> Self {
        self.evaluation_timeout = evaluation_timeout;
        self
    }

    pub fn with_spf_rr(mut self, query_spf_rr: bool) -> Self {
        self.query_spf_rr = query_spf_rr;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
