/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub trait TxtRecordParser: Sized {
    fn parse(record: &[u8]) -> crate::Result<Self>;
}

pub(crate) trait HasLabels {
    fn has_labels(&self) -> bool;
}

impl HasLabels for &str {
    fn has_labels(&self) -> bool {
        let mut has_dots = false;
        let mut has_chars = false;
        for ch in self.chars() {
            if ch.is_alphanumeric() {
                has_chars = true;
            } else if ch == '.' {
                has_dots = true;
            }
            if has_chars && has_dots {
                return true;
            }
        }
        false
    }
}

/// Validates a domain name as used for SPF queries: at least two labels,
/// no empty labels (a single trailing dot is allowed), labels of at most
/// 63 octets and a total length of at most 253 octets.
pub(crate) fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() || domain.len() > 253 || !domain.has_labels() {
        return false;
    }
    domain
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= 63)
}

#[cfg(test)]
mod test {
    use super::is_valid_domain;

    #[test]
    fn domain_validation() {
        for (domain, expected) in [
            ("example.org", true),
            ("example.org.", true),
            ("mail.sub.example.org", true),
            ("localhost", false),
            ("", false),
            (".", false),
            ("example..org", false),
            (".example.org", false),
            ("....", false),
        ] {
            assert_eq!(is_valid_domain(domain), expected, "{domain:?}");
        }
        assert!(!is_valid_domain(&format!("{}.org", "a".repeat(64))));
        assert!(is_valid_domain(&format!("{}.org", "a".repeat(63))));
    }
}
