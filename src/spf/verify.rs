/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{future::Future, net::IpAddr};

use crate::{
    common::{parse::is_valid_domain, transport::DnsTransport},
    Error, Resolver, SpfOutput, SpfResult,
};

use super::{mechanism::EvaluationContext, Macro, Mechanism, Qualifier, Spf, Variables};

/// Identity checked by [`Resolver::verify_spf`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfParameters {
    ip: IpAddr,
    domain: String,
    helo_domain: String,
    sender: String,
}

impl SpfParameters {
    /// Checks the `HELO`/`EHLO` identity, using `postmaster@<helo_domain>`
    /// as the sender.
    pub fn verify_ehlo(ip: IpAddr, helo_domain: impl Into<String>) -> Self {
        let helo_domain = helo_domain.into();
        SpfParameters {
            ip: normalize_ip(ip),
            domain: helo_domain.clone(),
            sender: format!("postmaster@{helo_domain}"),
            helo_domain,
        }
    }

    /// Checks the `MAIL FROM` identity. A null reverse-path (`<>`) checks
    /// `postmaster@<helo_domain>` instead and a missing local part is
    /// replaced by `postmaster`.
    pub fn verify_mail_from(
        ip: IpAddr,
        helo_domain: impl Into<String>,
        sender: impl AsRef<str>,
    ) -> Self {
        let helo_domain = helo_domain.into();
        let sender = sender.as_ref().trim();
        let sender = sender
            .strip_prefix('<')
            .and_then(|sender| sender.strip_suffix('>'))
            .unwrap_or(sender);

        if sender.is_empty() {
            return Self::verify_ehlo(ip, helo_domain);
        }

        let (sender, domain) = match sender.rsplit_once('@') {
            Some(("", domain)) => (format!("postmaster@{domain}"), domain.to_string()),
            Some((_, domain)) => (sender.to_string(), domain.to_string()),
            None => (format!("postmaster@{sender}"), sender.to_string()),
        };

        SpfParameters {
            ip: normalize_ip(ip),
            domain,
            helo_domain,
            sender,
        }
    }

    /// Builds a request for an explicit target domain. At least one of
    /// `helo_domain` and `sender` has to be provided, an empty `domain` is
    /// derived from them.
    pub fn new(
        ip: IpAddr,
        domain: impl AsRef<str>,
        helo_domain: impl AsRef<str>,
        sender: impl AsRef<str>,
    ) -> crate::Result<Self> {
        let (domain, helo_domain, sender) =
            (domain.as_ref().trim(), helo_domain.as_ref().trim(), sender.as_ref());
        let has_sender = !matches!(sender.trim(), "" | "<>");
        if helo_domain.is_empty() && !has_sender {
            return Err(Error::InvalidParameters(
                "either a HELO domain or an envelope sender is required",
            ));
        }

        let mut params = Self::verify_mail_from(ip, helo_domain, sender);
        if !domain.is_empty() {
            params.domain = domain.to_string();
        }
        Ok(params)
    }

    /// Same as [`SpfParameters::new`] with the client IP in text form.
    pub fn parse(
        ip: &str,
        domain: impl AsRef<str>,
        helo_domain: impl AsRef<str>,
        sender: impl AsRef<str>,
    ) -> crate::Result<Self> {
        let ip = ip
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| Error::InvalidParameters("malformed client IP address"))?;
        Self::new(ip, domain, helo_domain, sender)
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn helo_domain(&self) -> &str {
        &self.helo_domain
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }
}

/// IPv4-mapped IPv6 addresses are checked as IPv4.
fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(ip) => ip
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(ip), IpAddr::V4),
        ip => ip,
    }
}

impl<T: DnsTransport> Resolver<T> {
    /// Verifies the `HELO`/`EHLO` identity.
    pub async fn verify_spf_helo(&self, ip: IpAddr, helo_domain: &str) -> SpfOutput {
        self.verify_spf(SpfParameters::verify_ehlo(ip, helo_domain))
            .await
    }

    /// Verifies the `MAIL FROM` identity.
    pub async fn verify_spf_sender(&self, ip: IpAddr, helo_domain: &str, sender: &str) -> SpfOutput {
        self.verify_spf(SpfParameters::verify_mail_from(ip, helo_domain, sender))
            .await
    }

    /// Checks the `HELO` identity first and the `MAIL FROM` identity only when
    /// the former is not a `fail`. Null reverse-paths only check `HELO`.
    pub async fn verify_spf_session(&self, ip: IpAddr, helo_domain: &str, sender: &str) -> SpfOutput {
        let params = SpfParameters::verify_mail_from(ip, helo_domain, sender);
        if is_valid_domain(helo_domain) {
            let output = self.verify_spf_helo(ip, helo_domain).await;
            if output.result() == SpfResult::Fail || params.domain() == helo_domain {
                return output;
            }
        }
        self.verify_spf(params).await
    }

    /// Evaluates a request given in text form. Malformed input yields
    /// [`SpfResult::Invalid`] without any DNS query.
    pub async fn evaluate(
        &self,
        target_domain: &str,
        client_ip: &str,
        envelope_from: &str,
        helo_domain: &str,
    ) -> SpfOutput {
        match SpfParameters::parse(client_ip, target_domain, helo_domain, envelope_from) {
            Ok(params) => self.verify_spf(params).await,
            Err(err) => {
                tracing::debug!(domain = target_domain, ip = client_ip, reason = %err, "Invalid SPF request");
                SpfOutput::new(target_domain).with_result(SpfResult::Invalid)
            }
        }
    }

    /// Runs `check_host()` for the request, bounded by the configured
    /// evaluation timeout.
    pub async fn verify_spf(&self, params: SpfParameters) -> SpfOutput {
        match tokio::time::timeout(self.config.evaluation_timeout, self.check_host(&params)).await {
            Ok(output) => output,
            Err(_) => {
                tracing::debug!(domain = %params.domain, ip = %params.ip, "SPF evaluation timed out");
                SpfOutput::new(params.domain).with_result(SpfResult::TempError)
            }
        }
    }

    /// Same as [`Resolver::verify_spf`], aborting the evaluation and any
    /// outstanding DNS query as soon as `signal` completes.
    pub async fn verify_spf_cancellable(
        &self,
        params: SpfParameters,
        signal: impl Future<Output = ()>,
    ) -> crate::Result<SpfOutput> {
        tokio::select! {
            biased;
            _ = signal => {
                tracing::debug!("SPF evaluation cancelled");
                Err(Error::Cancelled)
            }
            output = self.verify_spf(params) => Ok(output),
        }
    }

    async fn check_host(&self, params: &SpfParameters) -> SpfOutput {
        let output = SpfOutput::new(params.domain.as_str());
        if !is_valid_domain(&params.domain) {
            tracing::debug!(domain = %params.domain, "Invalid SPF domain");
            return output.with_result(SpfResult::None);
        }

        let mut vars = Variables::new();
        vars.set_ip(&params.ip);
        vars.set_sender(params.sender.as_bytes());
        vars.set_helo_domain(params.helo_domain.as_bytes());
        vars.set_host_domain(self.config.host_domain.as_bytes());
        let mut ctx = EvaluationContext::new(params.ip, &params.domain, vars, &self.config);

        let mut spf = match self.spf_lookup(&params.domain).await {
            Ok(spf) => spf,
            Err(err) => {
                tracing::debug!(domain = %params.domain, reason = %err, "No SPF policy");
                return output.with_result(err.into());
            }
        };
        tracing::debug!(domain = %params.domain, ip = %params.ip, "Evaluating SPF record");

        let mut include_stack: Vec<(Spf, usize, String)> = Vec::new();
        let mut pos = 0;

        let result = 'eval: loop {
            let mut matched = None;

            while let Some(directive) = spf.directives.get(pos) {
                if let Mechanism::Include { macro_string } = &directive.mechanism {
                    if let Err(err) = ctx.limits.consume() {
                        return output.with_result(err.into());
                    }
                    if include_stack.len() >= self.config.max_include_depth as usize {
                        return output.with_result(Error::IncludeDepthExceeded.into());
                    }
                    if macro_string.needs_ptr() {
                        self.set_validated_domain(&mut ctx).await;
                    }

                    let target_name = ctx.target_name(macro_string);
                    match self.fetch_target(&target_name).await {
                        Ok(included_spf) => {
                            tracing::debug!(domain = %ctx.domain, include = %target_name, "Following include");
                            let parent_spf = std::mem::replace(&mut spf, included_spf);
                            let parent_domain = ctx.set_domain(target_name);
                            include_stack.push((parent_spf, pos, parent_domain));
                            pos = 0;
                            continue;
                        }
                        Err(result) => return output.with_result(result),
                    }
                }

                match self.match_mechanism(&directive.mechanism, &mut ctx).await {
                    Ok(true) => {
                        tracing::trace!(domain = %ctx.domain, directive = pos, "Directive matched");
                        matched = Some(directive.qualifier);
                        break;
                    }
                    Ok(false) => pos += 1,
                    Err(err) => {
                        tracing::debug!(domain = %ctx.domain, directive = pos, reason = %err, "Directive failed");
                        return output.with_result(err.into());
                    }
                }
            }

            let mut result = match matched {
                Some(qualifier) => SpfResult::from(qualifier),
                None => {
                    if let Some(redirect) = spf.redirect() {
                        if let Err(err) = ctx.limits.consume() {
                            return output.with_result(err.into());
                        }
                        if redirect.needs_ptr() {
                            self.set_validated_domain(&mut ctx).await;
                        }

                        let target_name = ctx.target_name(redirect);
                        match self.fetch_target(&target_name).await {
                            Ok(redirect_spf) => {
                                tracing::debug!(domain = %ctx.domain, redirect = %target_name, "Following redirect");
                                spf = redirect_spf;
                                ctx.set_domain(target_name);
                                pos = 0;
                                continue 'eval;
                            }
                            Err(result) => return output.with_result(result),
                        }
                    }
                    SpfResult::Neutral
                }
            };

            // Only a pass from an included record matches the include directive.
            loop {
                let Some((parent_spf, parent_pos, parent_domain)) = include_stack.pop() else {
                    break 'eval result;
                };
                spf = parent_spf;
                ctx.set_domain(parent_domain);

                if result == SpfResult::Pass {
                    result = spf
                        .directives
                        .get(parent_pos)
                        .map_or(result, |directive| directive.qualifier.into());
                } else {
                    pos = parent_pos + 1;
                    continue 'eval;
                }
            }
        };

        tracing::debug!(
            domain = %params.domain,
            ip = %params.ip,
            result = %result,
            lookups = ctx.limits.lookups(),
            "SPF evaluation finished"
        );

        let mut output = output.with_result(result);
        if result == SpfResult::Fail {
            if let Some(exp) = spf.exp() {
                if let Some(explanation) = self.explanation(exp, &mut ctx).await {
                    output = output.with_explanation(explanation);
                }
            }
        }
        output
    }

    /// Fetches the record of an `include` or `redirect` target. A missing
    /// record is a permanent error here.
    async fn fetch_target(&self, target_name: &str) -> std::result::Result<Spf, SpfResult> {
        if !is_valid_domain(target_name) {
            return Err(SpfResult::PermError);
        }
        self.spf_lookup(target_name)
            .await
            .map_err(|err| match SpfResult::from(err) {
                SpfResult::None => SpfResult::PermError,
                result => result,
            })
    }

    async fn explanation(&self, exp: &Macro, ctx: &mut EvaluationContext<'_>) -> Option<String> {
        if exp.needs_ptr() {
            self.set_validated_domain(ctx).await;
        }
        let target_name = ctx.target_name(exp);
        if !is_valid_domain(&target_name) {
            return None;
        }

        let text = self.explanation_lookup(&target_name).await.ok()?;
        if text.needs_ptr() {
            self.set_validated_domain(ctx).await;
        }
        Some(text.eval_text(&ctx.vars))
    }
}

impl From<Qualifier> for SpfResult {
    fn from(qualifier: Qualifier) -> Self {
        match qualifier {
            Qualifier::Pass => SpfResult::Pass,
            Qualifier::Fail => SpfResult::Fail,
            Qualifier::SoftFail => SpfResult::SoftFail,
            Qualifier::Neutral => SpfResult::Neutral,
        }
    }
}

impl From<Error> for SpfResult {
    fn from(err: Error) -> Self {
        match err {
            Error::DnsRecordNotFound(_) | Error::InvalidRecordType => SpfResult::None,
            Error::ParseError
            | Error::MultipleRecords
            | Error::LookupLimitExceeded
            | Error::VoidLookupLimitExceeded
            | Error::IncludeDepthExceeded => SpfResult::PermError,
            Error::InvalidParameters(_) => SpfResult::Invalid,
            Error::DnsError(_)
            | Error::DnsServerFailure(_)
            | Error::DnsTimeout
            | Error::Cancelled => SpfResult::TempError,
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        fs,
        net::{IpAddr, Ipv4Addr},
        path::PathBuf,
        time::Duration,
    };

    use trust_dns_resolver::proto::op::ResponseCode;

    use crate::{
        common::transport::StaticZone, config::SpfConfig, Error, Resolver, SpfParameters,
        SpfResult,
    };

    fn resolver(records: &[(&str, &str)]) -> Resolver<StaticZone> {
        let zone = StaticZone::new();
        for (name, record) in records {
            zone.add_txt(name, record);
        }
        Resolver::with_transport(zone)
    }

    async fn check(resolver: &Resolver<StaticZone>, domain: &str, ip: &str) -> SpfResult {
        resolver
            .verify_spf(SpfParameters::verify_mail_from(
                ip.parse().unwrap(),
                "mx.example.net",
                format!("user@{domain}"),
            ))
            .await
            .result()
    }

    #[test]
    fn request_parameters() {
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        let params = SpfParameters::verify_mail_from(ip, "mx.example.org", "<user@Example.com>");
        assert_eq!(params.domain(), "Example.com");
        assert_eq!(params.sender(), "user@Example.com");
        assert_eq!(params.helo_domain(), "mx.example.org");

        for sender in ["", "<>", " <> "] {
            let params = SpfParameters::verify_mail_from(ip, "mx.example.org", sender);
            assert_eq!(params.domain(), "mx.example.org");
            assert_eq!(params.sender(), "postmaster@mx.example.org");
        }

        let params = SpfParameters::verify_mail_from(ip, "mx.example.org", "@example.com");
        assert_eq!(params.domain(), "example.com");
        assert_eq!(params.sender(), "postmaster@example.com");

        let params = SpfParameters::verify_ehlo(ip, "mx.example.org");
        assert_eq!(params.domain(), "mx.example.org");
        assert_eq!(params.sender(), "postmaster@mx.example.org");

        let params = SpfParameters::verify_ehlo("::ffff:192.0.2.1".parse().unwrap(), "a.org");
        assert_eq!(params.ip(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));

        let params =
            SpfParameters::parse("192.0.2.1", "other.org", "mx.example.org", "user@example.com")
                .unwrap();
        assert_eq!(params.domain(), "other.org");
        assert_eq!(params.sender(), "user@example.com");

        assert!(matches!(
            SpfParameters::parse("192.0.2.300", "", "mx.example.org", ""),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            SpfParameters::parse("192.0.2.1", "example.org", "", "<>"),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn qualifiers() {
        for (record, expected) in [
            ("v=spf1 -all", SpfResult::Fail),
            ("v=spf1 ~all", SpfResult::SoftFail),
            ("v=spf1 ?all", SpfResult::Neutral),
            ("v=spf1 +all", SpfResult::Pass),
            ("v=spf1 all", SpfResult::Pass),
            ("v=spf1", SpfResult::Neutral),
            ("v=spf1 ip4:198.51.100.0/24", SpfResult::Neutral),
            ("v=spf1 unknown=value -all", SpfResult::Fail),
        ] {
            let resolver = resolver(&[("example.org", record)]);
            assert_eq!(
                check(&resolver, "example.org", "192.0.2.1").await,
                expected,
                "{record}"
            );
        }
    }

    #[tokio::test]
    async fn ip4_network() {
        let resolver = resolver(&[("example.org", "v=spf1 ip4:203.0.113.0/24 -all")]);
        for (ip, expected) in [
            ("203.0.113.5", SpfResult::Pass),
            ("198.51.100.5", SpfResult::Fail),
            ("::ffff:203.0.113.5", SpfResult::Pass),
            ("2001:db8::1", SpfResult::Fail),
        ] {
            assert_eq!(check(&resolver, "example.org", ip).await, expected, "{ip}");
        }
    }

    #[tokio::test]
    async fn first_match_wins() {
        let resolver = resolver(&[(
            "example.org",
            "v=spf1 ip4:192.0.2.1/32 include:missing.example.org -all",
        )]);
        assert_eq!(
            check(&resolver, "example.org", "192.0.2.1").await,
            SpfResult::Pass
        );
        assert_eq!(
            check(&resolver, "example.org", "192.0.2.2").await,
            SpfResult::PermError
        );
        assert_eq!(resolver.transport().queries(), 2);
    }

    #[tokio::test]
    async fn idempotence() {
        let resolver = resolver(&[
            ("example.org", "v=spf1 a mx include:_spf.example.org ~all"),
            ("_spf.example.org", "v=spf1 ip4:192.0.2.0/24 -all"),
        ]);
        for ip in ["192.0.2.10", "198.51.100.1"] {
            let first = resolver.evaluate("example.org", ip, "user@example.org", "mx.example.org").await;
            let second = resolver.evaluate("example.org", ip, "user@example.org", "mx.example.org").await;
            assert_eq!(first, second, "{ip}");
        }
    }

    #[tokio::test]
    async fn include() {
        let resolver = resolver(&[
            ("example.com", "v=spf1 include:_spf.example.com ~all"),
            ("_spf.example.com", "v=spf1 ip4:192.0.2.0/24 -all"),
            ("neutral.example.com", "v=spf1 -include:_spf.example.com ?all"),
            ("nested.example.com", "v=spf1 include:example.com -all"),
            ("missing.example.com", "v=spf1 include:nowhere.example.com +all"),
            ("broken.example.com", "v=spf1 include:bad.example.com +all"),
            ("bad.example.com", "v=spf1 bogus"),
            ("timeout.example.com", "v=spf1 include:slow.example.com +all"),
        ]);
        resolver
            .transport()
            .add_error("slow.example.com", Error::DnsTimeout);

        for (domain, ip, expected) in [
            ("example.com", "192.0.2.10", SpfResult::Pass),
            ("example.com", "198.51.100.1", SpfResult::SoftFail),
            ("neutral.example.com", "192.0.2.10", SpfResult::Fail),
            ("neutral.example.com", "198.51.100.1", SpfResult::Neutral),
            ("nested.example.com", "192.0.2.10", SpfResult::Pass),
            ("nested.example.com", "198.51.100.1", SpfResult::Fail),
            ("missing.example.com", "192.0.2.10", SpfResult::PermError),
            ("broken.example.com", "192.0.2.10", SpfResult::PermError),
            ("timeout.example.com", "192.0.2.10", SpfResult::TempError),
        ] {
            assert_eq!(
                check(&resolver, domain, ip).await,
                expected,
                "{domain} {ip}"
            );
        }
    }

    #[tokio::test]
    async fn redirect() {
        let resolver = resolver(&[
            ("example.org", "v=spf1 ip4:198.51.100.1 redirect=_spf.example.org"),
            ("_spf.example.org", "v=spf1 ip4:192.0.2.0/24 -all"),
            ("all.example.org", "v=spf1 ~all redirect=_spf.example.org"),
            ("missing.example.org", "v=spf1 redirect=nowhere.example.org"),
            ("included.example.org", "v=spf1 include:example.org -all"),
        ]);
        for (domain, ip, expected) in [
            ("example.org", "198.51.100.1", SpfResult::Pass),
            ("example.org", "192.0.2.10", SpfResult::Pass),
            ("example.org", "203.0.113.1", SpfResult::Fail),
            ("all.example.org", "192.0.2.10", SpfResult::SoftFail),
            ("missing.example.org", "192.0.2.10", SpfResult::PermError),
            ("included.example.org", "192.0.2.10", SpfResult::Pass),
            ("included.example.org", "203.0.113.1", SpfResult::Fail),
        ] {
            assert_eq!(
                check(&resolver, domain, ip).await,
                expected,
                "{domain} {ip}"
            );
        }
    }

    #[tokio::test]
    async fn ptr_temporary_errors() {
        let resolver = resolver(&[("example.org", "v=spf1 ptr -all")]);
        let zone = resolver.transport();
        zone.add_ptr("192.0.2.7".parse().unwrap(), "mail.example.org");
        zone.add_error("mail.example.org", Error::DnsTimeout);
        zone.add_ptr_error("192.0.2.8".parse().unwrap(), Error::DnsTimeout);

        for ip in ["192.0.2.7", "192.0.2.8"] {
            assert_eq!(
                check(&resolver, "example.org", ip).await,
                SpfResult::TempError,
                "{ip}"
            );
        }
    }

    #[tokio::test]
    async fn record_selection() {
        let resolver = resolver(&[
            ("two.example.org", "v=spf1 +all"),
            ("two.example.org", "v=spf1 -all"),
            ("other.example.org", "some verification token"),
            ("invalid.example.org", "v=spf1 ip4:192.0.2.1/33 -all"),
        ]);
        for (domain, expected) in [
            ("two.example.org", SpfResult::PermError),
            ("other.example.org", SpfResult::None),
            ("missing.example.org", SpfResult::None),
            ("invalid.example.org", SpfResult::PermError),
        ] {
            assert_eq!(
                check(&resolver, domain, "192.0.2.1").await,
                expected,
                "{domain}"
            );
        }

        resolver.transport().add_error(
            "servfail.example.org",
            Error::DnsServerFailure(ResponseCode::ServFail),
        );
        assert_eq!(
            check(&resolver, "servfail.example.org", "192.0.2.1").await,
            SpfResult::TempError
        );
    }

    #[tokio::test]
    async fn lookup_limit() {
        let mut records = vec![];
        for num in 0..11 {
            records.push((format!("i{num}.example.org"), "v=spf1 -all".to_string()));
        }
        let includes = |count: usize| {
            (0..count)
                .map(|num| format!(" include:i{num}.example.org"))
                .collect::<String>()
        };
        records.push((
            "ten.example.org".to_string(),
            format!("v=spf1{} -all", includes(10)),
        ));
        records.push((
            "eleven.example.org".to_string(),
            format!("v=spf1{} -all", includes(11)),
        ));
        records.push((
            "nested.example.org".to_string(),
            "v=spf1 include:ten.example.org -all".to_string(),
        ));
        let records = records
            .iter()
            .map(|(name, record)| (name.as_str(), record.as_str()))
            .collect::<Vec<_>>();
        let resolver = resolver(&records);

        for (domain, expected) in [
            ("ten.example.org", SpfResult::Fail),
            ("eleven.example.org", SpfResult::PermError),
            ("nested.example.org", SpfResult::PermError),
        ] {
            assert_eq!(
                check(&resolver, domain, "192.0.2.1").await,
                expected,
                "{domain}"
            );
        }
    }

    #[tokio::test]
    async fn include_depth() {
        let mut records = (0..4)
            .map(|num| {
                (
                    format!("d{num}.example.org"),
                    format!("v=spf1 include:d{}.example.org -all", num + 1),
                )
            })
            .collect::<Vec<_>>();
        records.push(("d4.example.org".to_string(), "v=spf1 +all".to_string()));
        let records = records
            .iter()
            .map(|(name, record)| (name.as_str(), record.as_str()))
            .collect::<Vec<_>>();

        let resolver = resolver(&records);
        assert_eq!(
            check(&resolver, "d0.example.org", "192.0.2.1").await,
            SpfResult::Pass
        );

        let resolver = resolver
            .with_config(SpfConfig::default().with_max_include_depth(3));
        assert_eq!(
            check(&resolver, "d0.example.org", "192.0.2.1").await,
            SpfResult::PermError
        );

        // Self-referencing records run out of lookups
        let resolver = self::resolver(&[("loop.example.org", "v=spf1 include:loop.example.org -all")])
            .with_config(SpfConfig::default().with_max_include_depth(50));
        assert_eq!(
            check(&resolver, "loop.example.org", "192.0.2.1").await,
            SpfResult::PermError
        );
    }

    #[tokio::test]
    async fn explanation() {
        let resolver = resolver(&[
            ("example.org", "v=spf1 ip4:192.0.2.0/24 -all exp=explain._spf.%{d}"),
            (
                "explain._spf.example.org",
                "%{i} is not one of %{d}'s designated mail servers.",
            ),
            ("soft.example.org", "v=spf1 ~all exp=explain._spf.example.org"),
            ("missing.example.org", "v=spf1 -all exp=nowhere.example.org"),
            ("outer.example.org", "v=spf1 include:example.org -all"),
        ]);

        let output = resolver
            .verify_spf_sender("198.51.100.1".parse().unwrap(), "mx.example.net", "user@example.org")
            .await;
        assert_eq!(output.result(), SpfResult::Fail);
        assert_eq!(
            output.explanation(),
            Some("198.51.100.1 is not one of example.org's designated mail servers.")
        );

        let output = resolver
            .verify_spf_sender("192.0.2.1".parse().unwrap(), "mx.example.net", "user@example.org")
            .await;
        assert_eq!(output.result(), SpfResult::Pass);
        assert_eq!(output.explanation(), None);

        for domain in ["soft.example.org", "missing.example.org", "outer.example.org"] {
            let output = resolver
                .verify_spf_sender(
                    "198.51.100.1".parse().unwrap(),
                    "mx.example.net",
                    &format!("user@{domain}"),
                )
                .await;
            assert_ne!(output.result(), SpfResult::Pass, "{domain}");
            assert_eq!(output.explanation(), None, "{domain}");
        }
    }

    #[tokio::test]
    async fn helo_and_sender() {
        let resolver = resolver(&[
            ("mx.example.org", "v=spf1 ip4:192.0.2.1 -all"),
            ("example.org", "v=spf1 ip4:192.0.2.0/24 -all"),
            ("example.com", "v=spf1 -all"),
        ]);
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        let output = resolver.verify_spf_helo(ip, "mx.example.org").await;
        assert_eq!(output.result(), SpfResult::Pass);
        assert_eq!(output.domain(), "mx.example.org");

        let output = resolver
            .verify_spf_session(ip, "mx.example.org", "user@example.com")
            .await;
        assert_eq!(output.result(), SpfResult::Fail);
        assert_eq!(output.domain(), "example.com");

        let output = resolver.verify_spf_session(ip, "mx.example.org", "<>").await;
        assert_eq!(output.result(), SpfResult::Pass);
        assert_eq!(output.domain(), "mx.example.org");

        let ip: IpAddr = "192.0.2.2".parse().unwrap();
        let output = resolver
            .verify_spf_session(ip, "mx.example.org", "user@example.org")
            .await;
        assert_eq!(output.result(), SpfResult::Fail);
        assert_eq!(output.domain(), "mx.example.org");

        let output = resolver
            .verify_spf_session(ip, "[192.0.2.2]", "user@example.org")
            .await;
        assert_eq!(output.result(), SpfResult::Pass);
        assert_eq!(output.domain(), "example.org");
    }

    #[tokio::test]
    async fn invalid_requests() {
        let resolver = resolver(&[("example.org", "v=spf1 +all")]);
        for (domain, ip, sender, helo) in [
            ("example.org", "not-an-ip", "user@example.org", "mx.example.org"),
            ("example.org", "", "user@example.org", "mx.example.org"),
            ("example.org", "192.0.2.1", "", ""),
        ] {
            assert_eq!(
                resolver.evaluate(domain, ip, sender, helo).await.result(),
                SpfResult::Invalid,
                "{ip:?} {sender:?} {helo:?}"
            );
        }
        assert_eq!(resolver.transport().queries(), 0);

        assert_eq!(
            resolver
                .evaluate("example.org", "192.0.2.1", "", "mx.example.org")
                .await
                .result(),
            SpfResult::Pass
        );
        assert_eq!(
            resolver
                .evaluate("localhost", "192.0.2.1", "user@localhost", "")
                .await
                .result(),
            SpfResult::None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts() {
        let zone = StaticZone::new()
            .with_txt("example.org", "v=spf1 a:slow.example.org -all")
            .with_ip("slow.example.org", "192.0.2.1")
            .with_delay("slow.example.org", Duration::from_secs(30));
        let config = |dns_timeout: u64, evaluation_timeout: u64| {
            SpfConfig::default()
                .with_dns_timeout(Duration::from_secs(dns_timeout))
                .with_evaluation_timeout(Duration::from_secs(evaluation_timeout))
        };

        // Per-query timeout
        let resolver = Resolver::with_transport(zone).with_config(config(2, 60));
        assert_eq!(
            check(&resolver, "example.org", "192.0.2.1").await,
            SpfResult::TempError
        );

        // Overall evaluation deadline
        let resolver = resolver.with_config(config(60, 10));
        assert_eq!(
            check(&resolver, "example.org", "192.0.2.1").await,
            SpfResult::TempError
        );

        let resolver = resolver.with_config(config(60, 120));
        assert_eq!(
            check(&resolver, "example.org", "192.0.2.1").await,
            SpfResult::Pass
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation() {
        let resolver = Resolver::with_transport(
            StaticZone::new()
                .with_txt("example.org", "v=spf1 a:slow.example.org -all")
                .with_ip("slow.example.org", "192.0.2.1")
                .with_delay("slow.example.org", Duration::from_secs(3)),
        );
        let params =
            SpfParameters::verify_mail_from("192.0.2.1".parse().unwrap(), "mx.example.org", "user@example.org");

        assert_eq!(
            resolver
                .verify_spf_cancellable(params.clone(), tokio::time::sleep(Duration::from_secs(1)))
                .await,
            Err(Error::Cancelled)
        );
        assert_eq!(
            resolver
                .verify_spf_cancellable(params, std::future::pending())
                .await
                .map(|output| output.result()),
            Ok(SpfResult::Pass)
        );
    }

    #[tokio::test]
    async fn spf_verify() {
        let mut test_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        test_dir.push("resources");
        test_dir.push("spf");

        for file_name in fs::read_dir(&test_dir).unwrap() {
            let file_name = file_name.unwrap().path();
            println!("===== {} =====", file_name.display());
            let test_suite = String::from_utf8(fs::read(&file_name).unwrap()).unwrap();

            for test in test_suite.split("---\n") {
                let zone = StaticZone::new();
                let mut test_name = "";
                let mut helo = "";
                let mut sender = "";
                let mut client_ip = "127.0.0.1".parse::<IpAddr>().unwrap();
                let mut expectations = Vec::new();

                for line in test.lines() {
                    let line = line.trim();
                    let line = line.strip_prefix('-').map_or(line, |line| line.trim());
                    let Some((key, value)) = line.split_once(':') else {
                        continue;
                    };
                    let value = value.trim();
                    let record = || value.split_once(' ').map(|(name, record)| (name, record.trim()));

                    match key {
                        "name" => test_name = value,
                        "spf" | "txt" | "exp" => {
                            let (name, record) = record().unwrap();
                            zone.add_txt(name, record);
                        }
                        "a" | "aaaa" => {
                            let (name, addrs) = record().unwrap();
                            for addr in addrs.split(',') {
                                zone.add_ip(name, addr.trim().parse().unwrap());
                            }
                        }
                        "mx" => {
                            let (name, addrs) = record().unwrap();
                            for (pos, addr) in addrs.split(',').enumerate() {
                                let exchange = format!("mx{pos}.{name}");
                                zone.add_mx(name, (pos + 1) as u16, &exchange);
                                zone.add_ip(&exchange, addr.trim().parse().unwrap());
                            }
                        }
                        "ptr" => {
                            let (addr, names) = record().unwrap();
                            for name in names.split(',') {
                                zone.add_ptr(addr.parse().unwrap(), name.trim());
                            }
                        }
                        "helo" => helo = value,
                        "sender" => sender = value,
                        "ip" => client_ip = value.parse().unwrap(),
                        "expect" => {
                            let (result, exp) = value.split_once(' ').unwrap_or((value, ""));
                            expectations.push((
                                client_ip,
                                helo,
                                sender,
                                SpfResult::try_from(result).unwrap(),
                                exp.trim(),
                            ));
                        }
                        _ => panic!("Unknown key {key:?} in {}", file_name.display()),
                    }
                }

                let resolver = Resolver::with_transport(zone)
                    .with_config(SpfConfig::default().with_host_domain("mx.example.net"));
                for (test_num, (ip, helo, sender, result, exp)) in
                    expectations.into_iter().enumerate()
                {
                    let output = resolver.verify_spf_sender(ip, helo, sender).await;
                    assert_eq!(
                        output.result(),
                        result,
                        "Failed for {test_name:?}, test {}.",
                        test_num + 1
                    );
                    if !exp.is_empty() {
                        assert_eq!(output.explanation(), Some(exp), "{test_name:?}");
                    }
                }
                println!("Passed test {test_name:?}");
            }
        }
    }
}
