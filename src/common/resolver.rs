/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    borrow::Cow,
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveError,
    proto::op::ResponseCode,
    system_conf::read_system_conf,
    AsyncResolver, TokioAsyncResolver,
};

use crate::{config::SpfConfig, Error, Resolver, TxtRecords, MX};

use super::{
    cache::{NoCache, ResolverCache},
    lru::LruCache,
    transport::{DnsAnswer, DnsTransport},
};

impl Resolver<TokioAsyncResolver> {
    pub fn new_cloudflare_tls() -> Result<Self, ResolveError> {
        Self::with_capacity(
            ResolverConfig::cloudflare_tls(),
            ResolverOpts::default(),
            128,
        )
    }

    pub fn new_cloudflare() -> Result<Self, ResolveError> {
        Self::with_capacity(ResolverConfig::cloudflare(), ResolverOpts::default(), 128)
    }

    pub fn new_google() -> Result<Self, ResolveError> {
        Self::with_capacity(ResolverConfig::google(), ResolverOpts::default(), 128)
    }

    pub fn new_quad9() -> Result<Self, ResolveError> {
        Self::with_capacity(ResolverConfig::quad9(), ResolverOpts::default(), 128)
    }

    pub fn new_quad9_tls() -> Result<Self, ResolveError> {
        Self::with_capacity(ResolverConfig::quad9_tls(), ResolverOpts::default(), 128)
    }

    pub fn new_system_conf() -> Result<Self, ResolveError> {
        let (config, options) = read_system_conf()?;
        Self::with_capacity(config, options, 128)
    }

    pub fn with_capacity(
        config: ResolverConfig,
        options: ResolverOpts,
        capacity: usize,
    ) -> Result<Self, ResolveError> {
        Ok(Self::with_transport_capacity(
            AsyncResolver::tokio(config, options)?,
            capacity,
        ))
    }
}

impl<T: DnsTransport> Resolver<T> {
    pub fn with_transport(transport: T) -> Self {
        Self::with_transport_capacity(transport, 128)
    }

    pub fn with_transport_capacity(transport: T, capacity: usize) -> Self {
        Resolver {
            transport,
            cache_txt: Box::new(LruCache::with_capacity(capacity)),
            cache_mx: Box::new(LruCache::with_capacity(capacity)),
            cache_ipv4: Box::new(LruCache::with_capacity(capacity)),
            cache_ipv6: Box::new(LruCache::with_capacity(capacity)),
            cache_ptr: Box::new(LruCache::with_capacity(capacity)),
            config: SpfConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SpfConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_txt_cache(mut self, cache: impl ResolverCache<String, TxtRecords> + 'static) -> Self {
        self.cache_txt = Box::new(cache);
        self
    }

    pub fn with_mx_cache(
        mut self,
        cache: impl ResolverCache<String, Arc<Vec<MX>>> + 'static,
    ) -> Self {
        self.cache_mx = Box::new(cache);
        self
    }

    pub fn with_ipv4_cache(
        mut self,
        cache: impl ResolverCache<String, Arc<Vec<Ipv4Addr>>> + 'static,
    ) -> Self {
        self.cache_ipv4 = Box::new(cache);
        self
    }

    pub fn with_ipv6_cache(
        mut self,
        cache: impl ResolverCache<String, Arc<Vec<Ipv6Addr>>> + 'static,
    ) -> Self {
        self.cache_ipv6 = Box::new(cache);
        self
    }

    pub fn with_ptr_cache(
        mut self,
        cache: impl ResolverCache<IpAddr, Arc<Vec<String>>> + 'static,
    ) -> Self {
        self.cache_ptr = Box::new(cache);
        self
    }

    /// Disables answer caching, every lookup is sent to the transport.
    pub fn without_cache(self) -> Self {
        self.with_txt_cache(NoCache::new())
            .with_mx_cache(NoCache::new())
            .with_ipv4_cache(NoCache::new())
            .with_ipv6_cache(NoCache::new())
            .with_ptr_cache(NoCache::new())
    }

    pub fn config(&self) -> &SpfConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn txt_lookup<'x>(&self, key: impl IntoFqdn<'x>) -> crate::Result<TxtRecords> {
        let key = key.into_fqdn().into_owned();
        if let Some(value) = self.cache_txt.get(&key) {
            return Ok(value);
        }

        let answer = self.query(self.transport.query_txt(&key)).await?;
        let records = Arc::new(answer.records);
        self.cache_txt
            .insert(key, records.clone(), answer.valid_until);
        Ok(records)
    }

    /// Looks up the obsolete SPF resource record. Answers are not cached.
    pub async fn spf_rr_lookup<'x>(&self, key: impl IntoFqdn<'x>) -> crate::Result<TxtRecords> {
        let key = key.into_fqdn();
        self.query(self.transport.query_spf(key.as_ref()))
            .await
            .map(|answer| Arc::new(answer.records))
    }

    pub async fn mx_lookup<'x>(&self, key: impl IntoFqdn<'x>) -> crate::Result<Arc<Vec<MX>>> {
        let key = key.into_fqdn().into_owned();
        if let Some(value) = self.cache_mx.get(&key) {
            return Ok(value);
        }

        let answer = self.query(self.transport.query_mx(&key)).await?;
        let records = Arc::new(answer.records);
        self.cache_mx.insert(key, records.clone(), answer.valid_until);
        Ok(records)
    }

    pub async fn ipv4_lookup<'x>(
        &self,
        key: impl IntoFqdn<'x>,
    ) -> crate::Result<Arc<Vec<Ipv4Addr>>> {
        let key = key.into_fqdn().into_owned();
        if let Some(value) = self.cache_ipv4.get(&key) {
            return Ok(value);
        }

        let answer = self.query(self.transport.query_a(&key)).await?;
        let records = Arc::new(answer.records);
        self.cache_ipv4
            .insert(key, records.clone(), answer.valid_until);
        Ok(records)
    }

    pub async fn ipv6_lookup<'x>(
        &self,
        key: impl IntoFqdn<'x>,
    ) -> crate::Result<Arc<Vec<Ipv6Addr>>> {
        let key = key.into_fqdn().into_owned();
        if let Some(value) = self.cache_ipv6.get(&key) {
            return Ok(value);
        }

        let answer = self.query(self.transport.query_aaaa(&key)).await?;
        let records = Arc::new(answer.records);
        self.cache_ipv6
            .insert(key, records.clone(), answer.valid_until);
        Ok(records)
    }

    pub async fn ptr_lookup(&self, addr: IpAddr) -> crate::Result<Arc<Vec<String>>> {
        if let Some(value) = self.cache_ptr.get(&addr) {
            return Ok(value);
        }

        let answer = self.query(self.transport.query_ptr(addr)).await?;
        let records = Arc::new(answer.records);
        self.cache_ptr
            .insert(addr, records.clone(), answer.valid_until);
        Ok(records)
    }

    /// Returns whether the name has at least one A record.
    pub async fn exists<'x>(&self, key: impl IntoFqdn<'x>) -> crate::Result<bool> {
        match self.ipv4_lookup(key).await {
            Ok(_) => Ok(true),
            Err(Error::DnsRecordNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn query<R>(
        &self,
        lookup: impl Future<Output = crate::Result<DnsAnswer<Vec<R>>>>,
    ) -> crate::Result<DnsAnswer<Vec<R>>> {
        let answer = tokio::time::timeout(self.config.dns_timeout, lookup).await??;
        if !answer.records.is_empty() {
            Ok(answer)
        } else {
            Err(Error::DnsRecordNotFound(ResponseCode::NoError))
        }
    }
}

pub trait IntoFqdn<'x> {
    fn into_fqdn(self) -> Cow<'x, str>;
}

impl<'x> IntoFqdn<'x> for String {
    fn into_fqdn(self) -> Cow<'x, str> {
        if self.ends_with('.') {
            self.to_lowercase().into()
        } else {
            format!("{}.", self.to_lowercase()).into()
        }
    }
}

impl<'x> IntoFqdn<'x> for &'x str {
    fn into_fqdn(self) -> Cow<'x, str> {
        if self.ends_with('.') {
            self.to_lowercase().into()
        } else {
            format!("{}.", self.to_lowercase()).into()
        }
    }
}

impl<'x> IntoFqdn<'x> for &String {
    fn into_fqdn(self) -> Cow<'x, str> {
        self.as_str().to_string().into_fqdn()
    }
}
