/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::{
    common::{parse::is_valid_domain, transport::DnsTransport},
    config::SpfConfig,
    Error, Resolver,
};

use super::{Macro, Mechanism, Variables};

/// Maximum number of PTR names that are forward-validated.
const MAX_PTR_NAMES: usize = 10;

/// Per-request evaluation state shared by every record visited through
/// `include` and `redirect`.
pub(crate) struct EvaluationContext<'x> {
    pub(crate) ip: IpAddr,
    pub(crate) domain: String,
    pub(crate) vars: Variables<'x>,
    pub(crate) limits: LookupLimit,
}

/// DNS lookup budget of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LookupLimit {
    lookups: u32,
    void_lookups: u32,
    max_lookups: u32,
    max_void_lookups: u32,
}

impl LookupLimit {
    pub(crate) fn new(config: &SpfConfig) -> Self {
        LookupLimit {
            lookups: 0,
            void_lookups: 0,
            max_lookups: config.max_lookups,
            max_void_lookups: config.max_void_lookups,
        }
    }

    /// Accounts for a DNS-querying term.
    pub(crate) fn consume(&mut self) -> crate::Result<()> {
        if self.lookups < self.max_lookups {
            self.lookups += 1;
            Ok(())
        } else {
            Err(Error::LookupLimitExceeded)
        }
    }

    /// Accounts for a lookup that returned NXDOMAIN or no answers.
    pub(crate) fn void_lookup(&mut self) -> crate::Result<()> {
        self.void_lookups += 1;
        if self.void_lookups <= self.max_void_lookups {
            Ok(())
        } else {
            Err(Error::VoidLookupLimitExceeded)
        }
    }

    pub(crate) fn lookups(&self) -> u32 {
        self.lookups
    }
}

impl<'x> EvaluationContext<'x> {
    pub(crate) fn new(ip: IpAddr, domain: &str, vars: Variables<'x>, config: &SpfConfig) -> Self {
        let mut ctx = EvaluationContext {
            ip,
            domain: String::new(),
            vars,
            limits: LookupLimit::new(config),
        };
        ctx.set_domain(domain.to_string());
        ctx
    }

    /// Replaces the current domain, returning the previous one.
    pub(crate) fn set_domain(&mut self, domain: String) -> String {
        self.vars.set_domain(domain.as_bytes().to_vec());
        std::mem::replace(&mut self.domain, domain)
    }

    /// Expands a domain-spec against the current domain.
    pub(crate) fn target_name(&self, macro_string: &Macro) -> String {
        macro_string.eval(&self.vars, &self.domain)
    }
}

impl<T: DnsTransport> Resolver<T> {
    /// Tests a mechanism against the client IP. `include` is handled by the
    /// evaluator and never matches here.
    pub(crate) async fn match_mechanism(
        &self,
        mechanism: &Mechanism,
        ctx: &mut EvaluationContext<'_>,
    ) -> crate::Result<bool> {
        if mechanism.needs_ptr() {
            self.set_validated_domain(ctx).await;
        }

        match mechanism {
            Mechanism::All => Ok(true),
            Mechanism::Ip4 { addr, mask } => Ok(ctx.ip.matches_ipv4_mask(addr, *mask)),
            Mechanism::Ip6 { addr, mask } => Ok(ctx.ip.matches_ipv6_mask(addr, *mask)),
            Mechanism::A {
                macro_string,
                ip4_mask,
                ip6_mask,
            } => {
                ctx.limits.consume()?;
                let target_name = ctx.target_name(macro_string);
                if !is_valid_domain(&target_name) {
                    return Ok(false);
                }
                match self
                    .ip_matches(&target_name, ctx.ip, *ip4_mask, *ip6_mask)
                    .await
                {
                    Ok(matches) => Ok(matches),
                    Err(Error::DnsRecordNotFound(_)) => {
                        ctx.limits.void_lookup()?;
                        Ok(false)
                    }
                    Err(err) => Err(err),
                }
            }
            Mechanism::Mx {
                macro_string,
                ip4_mask,
                ip6_mask,
            } => {
                ctx.limits.consume()?;
                let target_name = ctx.target_name(macro_string);
                if !is_valid_domain(&target_name) {
                    return Ok(false);
                }
                let records = match self.mx_lookup(&target_name).await {
                    Ok(records) => records,
                    Err(Error::DnsRecordNotFound(_)) => {
                        ctx.limits.void_lookup()?;
                        return Ok(false);
                    }
                    Err(err) => return Err(err),
                };

                for record in records.iter() {
                    // Null MX
                    if record.exchange.is_empty() {
                        continue;
                    }
                    ctx.limits.consume()?;
                    match self
                        .ip_matches(&record.exchange, ctx.ip, *ip4_mask, *ip6_mask)
                        .await
                    {
                        Ok(true) => return Ok(true),
                        Ok(false) | Err(Error::DnsRecordNotFound(_)) => (),
                        Err(err) => return Err(err),
                    }
                }
                Ok(false)
            }
            Mechanism::Ptr { macro_string } => {
                ctx.limits.consume()?;
                let target_name = ctx.target_name(macro_string).to_lowercase();
                let names = match self.validated_names(ctx.ip).await {
                    Ok(names) => names,
                    Err(Error::DnsRecordNotFound(_)) => {
                        ctx.limits.void_lookup()?;
                        return Ok(false);
                    }
                    Err(err) => return Err(err),
                };
                Ok(names
                    .iter()
                    .any(|name| is_same_or_subdomain(name, &target_name)))
            }
            Mechanism::Exists { macro_string } => {
                ctx.limits.consume()?;
                let target_name = ctx.target_name(macro_string);
                if !is_valid_domain(&target_name) {
                    return Ok(false);
                }
                if self.exists(target_name).await? {
                    Ok(true)
                } else {
                    ctx.limits.void_lookup()?;
                    Ok(false)
                }
            }
            Mechanism::Include { .. } => Ok(false),
        }
    }

    /// Sets `%{p}` for the current domain: the domain itself if validated,
    /// then a validated subdomain of it, then any validated name, and
    /// `unknown` otherwise. These lookups are not counted.
    pub(crate) async fn set_validated_domain(&self, ctx: &mut EvaluationContext<'_>) {
        let names = self.validated_names(ctx.ip).await.unwrap_or_default();
        let domain = ctx.domain.to_lowercase();
        let validated = names
            .iter()
            .find(|name| **name == domain)
            .or_else(|| {
                names
                    .iter()
                    .find(|name| is_same_or_subdomain(name, &domain))
            })
            .or_else(|| names.first())
            .map_or("unknown", |name| name.as_str());
        ctx.vars
            .set_validated_domain(validated.as_bytes().to_vec());
    }

    /// Reverse resolves the client IP and keeps the names that resolve back
    /// to it.
    async fn validated_names(&self, ip: IpAddr) -> crate::Result<Vec<String>> {
        let names = self.ptr_lookup(ip).await?;
        let mut validated = Vec::with_capacity(names.len());
        for name in names.iter().take(MAX_PTR_NAMES) {
            match self.ip_matches(name, ip, u32::MAX, u128::MAX).await {
                Ok(true) => validated.push(name.to_lowercase()),
                Ok(false) | Err(Error::DnsRecordNotFound(_)) => (),
                Err(err) => return Err(err),
            }
        }
        Ok(validated)
    }

    async fn ip_matches(
        &self,
        target_name: &str,
        ip: IpAddr,
        ip4_mask: u32,
        ip6_mask: u128,
    ) -> crate::Result<bool> {
        Ok(match ip {
            IpAddr::V4(ip) => self
                .ipv4_lookup(target_name)
                .await?
                .iter()
                .any(|addr| ip.matches_ipv4_mask(addr, ip4_mask)),
            IpAddr::V6(ip) => self
                .ipv6_lookup(target_name)
                .await?
                .iter()
                .any(|addr| ip.matches_ipv6_mask(addr, ip6_mask)),
        })
    }
}

fn is_same_or_subdomain(name: &str, domain: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    name.eq_ignore_ascii_case(domain)
        || (name.len() > domain.len()
            && name.as_bytes()[name.len() - domain.len() - 1] == b'.'
            && name[name.len() - domain.len()..].eq_ignore_ascii_case(domain))
}

pub(crate) trait IpMask {
    fn matches_ipv4_mask(&self, addr: &Ipv4Addr, mask: u32) -> bool;
    fn matches_ipv6_mask(&self, addr: &Ipv6Addr, mask: u128) -> bool;
}

impl IpMask for IpAddr {
    fn matches_ipv4_mask(&self, addr: &Ipv4Addr, mask: u32) -> bool {
        match self {
            IpAddr::V4(ip) => ip.matches_ipv4_mask(addr, mask),
            IpAddr::V6(ip) => ip
                .to_ipv4_mapped()
                .is_some_and(|ip| ip.matches_ipv4_mask(addr, mask)),
        }
    }

    fn matches_ipv6_mask(&self, addr: &Ipv6Addr, mask: u128) -> bool {
        match self {
            IpAddr::V6(ip) if ip.to_ipv4_mapped().is_none() => ip.matches_ipv6_mask(addr, mask),
            _ => false,
        }
    }
}

impl IpMask for Ipv4Addr {
    fn matches_ipv4_mask(&self, addr: &Ipv4Addr, mask: u32) -> bool {
        u32::from_be_bytes(self.octets()) & mask == u32::from_be_bytes(addr.octets()) & mask
    }

    fn matches_ipv6_mask(&self, _addr: &Ipv6Addr, _mask: u128) -> bool {
        false
    }
}

impl IpMask for Ipv6Addr {
    fn matches_ipv4_mask(&self, _addr: &Ipv4Addr, _mask: u32) -> bool {
        false
    }

    fn matches_ipv6_mask(&self, addr: &Ipv6Addr, mask: u128) -> bool {
        u128::from_be_bytes(self.octets()) & mask == u128::from_be_bytes(addr.octets()) & mask
    }
}
