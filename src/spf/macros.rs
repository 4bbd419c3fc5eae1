/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{borrow::Cow, net::IpAddr, time::SystemTime};

use super::{Macro, Variable, Variables};

/// Delimiter set used when a macro does not list any delimiters.
pub(crate) const DEFAULT_DELIMITER: u64 = 1u64 << (b'.' - b'+');

const MAX_DOMAIN_LEN: usize = 253;

impl Macro {
    /// Expands a domain-spec. `Macro::None` expands to `default`. Trailing
    /// dots are removed and names longer than 253 octets lose labels from
    /// the left until they fit.
    pub(crate) fn eval(&self, vars: &Variables<'_>, default: &str) -> String {
        let mut result = match self {
            Macro::None => return default.to_string(),
            _ => self.expand(vars),
        };

        while result.ends_with('.') {
            result.pop();
        }

        if result.len() > MAX_DOMAIN_LEN {
            let start = result.len() - MAX_DOMAIN_LEN - 1;
            let mut cut = result.as_bytes()[start..]
                .iter()
                .position(|&ch| ch == b'.')
                .map_or(start + 1, |pos| start + pos + 1);
            while !result.is_char_boundary(cut) {
                cut += 1;
            }
            result.drain(..cut);
        }

        result
    }

    /// Expands an explanation string.
    pub(crate) fn eval_text(&self, vars: &Variables<'_>) -> String {
        self.expand(vars)
    }

    fn expand(&self, vars: &Variables<'_>) -> String {
        let mut result = Vec::with_capacity(32);
        self.expand_into(vars, &mut result);
        String::from_utf8(result)
            .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
    }

    fn expand_into(&self, vars: &Variables<'_>, result: &mut Vec<u8>) {
        match self {
            Macro::Literal(literal) => result.extend_from_slice(literal),
            Macro::Variable {
                letter,
                num_parts,
                reverse,
                escape,
                delimiters,
            } => result.extend_from_slice(
                vars.get(*letter, *num_parts, *reverse, *escape, *delimiters)
                    .as_ref(),
            ),
            Macro::List(list) => {
                for item in list {
                    item.expand_into(vars, result);
                }
            }
            Macro::None => (),
        }
    }

    pub(crate) fn needs_ptr(&self) -> bool {
        match self {
            Macro::Variable { letter, .. } => *letter == Variable::ValidatedDomain,
            Macro::List(list) => list.iter().any(|m| m.needs_ptr()),
            Macro::Literal(_) | Macro::None => false,
        }
    }
}

impl<'x> Variables<'x> {
    pub(crate) fn new() -> Self {
        let mut vars = Variables::default();
        vars.vars[Variable::CurrentTime as usize] = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string()
            .into_bytes()
            .into();
        vars
    }

    pub(crate) fn set_ip(&mut self, value: &IpAddr) {
        let (version, ip) = match value {
            IpAddr::V4(ip) => ("in-addr", ip.to_string().into_bytes()),
            IpAddr::V6(ip) => {
                let mut nibbles = Vec::with_capacity(63);
                for byte in ip.octets() {
                    for nibble in [byte >> 4, byte & 0x0f] {
                        if !nibbles.is_empty() {
                            nibbles.push(b'.');
                        }
                        nibbles.push(char::from_digit(nibble as u32, 16).unwrap_or('0') as u8);
                    }
                }
                ("ip6", nibbles)
            }
        };
        self.vars[Variable::IpVersion as usize] = version.as_bytes().into();
        self.vars[Variable::Ip as usize] = ip.into();
        self.vars[Variable::SmtpIp as usize] = value.to_string().into_bytes().into();
    }

    /// Sets `s`, `l` and `o`. The sender must contain a local part.
    pub(crate) fn set_sender(&mut self, value: impl Into<Cow<'x, [u8]>>) {
        let value = value.into();
        if let Some(pos) = value.iter().rposition(|&ch| ch == b'@') {
            let (local_part, domain_part) = (&value[..pos], &value[pos + 1..]);
            self.vars[Variable::SenderLocalPart as usize] = if !local_part.is_empty() {
                local_part.to_vec().into()
            } else {
                b"postmaster".as_slice().into()
            };
            self.vars[Variable::SenderDomainPart as usize] = domain_part.to_vec().into();
        } else {
            self.vars[Variable::SenderLocalPart as usize] = b"postmaster".as_slice().into();
            self.vars[Variable::SenderDomainPart as usize] = value.to_vec().into();
        }
        self.vars[Variable::Sender as usize] = value;
    }

    pub(crate) fn set_helo_domain(&mut self, value: impl Into<Cow<'x, [u8]>>) {
        self.vars[Variable::HeloDomain as usize] = value.into();
    }

    pub(crate) fn set_host_domain(&mut self, value: impl Into<Cow<'x, [u8]>>) {
        self.vars[Variable::HostDomain as usize] = value.into();
    }

    pub(crate) fn set_validated_domain(&mut self, value: impl Into<Cow<'x, [u8]>>) {
        self.vars[Variable::ValidatedDomain as usize] = value.into();
    }

    pub(crate) fn set_domain(&mut self, value: impl Into<Cow<'x, [u8]>>) {
        self.vars[Variable::Domain as usize] = value.into();
    }

    pub(crate) fn get(
        &self,
        name: Variable,
        num_parts: u32,
        reverse: bool,
        escape: bool,
        delimiters: u64,
    ) -> Cow<'_, [u8]> {
        let var = self.vars[name as usize].as_ref();
        if var.is_empty()
            || (num_parts == 0 && !reverse && !escape && delimiters == DEFAULT_DELIMITER)
        {
            return var.into();
        }

        let mut parts = var
            .split(|ch| (b'+'..=b'_').contains(ch) && (delimiters & (1u64 << (*ch - b'+'))) != 0)
            .collect::<Vec<_>>();
        if reverse {
            parts.reverse();
        }
        if num_parts > 0 && (num_parts as usize) < parts.len() {
            parts.drain(..parts.len() - num_parts as usize);
        }

        let mut result = Vec::with_capacity(var.len() + 8);
        for (pos, part) in parts.iter().enumerate() {
            if pos > 0 {
                result.push(b'.');
            }
            if !escape {
                result.extend_from_slice(part);
            } else {
                url_encode(&mut result, part);
            }
        }
        result.into()
    }
}

fn url_encode(result: &mut Vec<u8>, part: &[u8]) {
    for &ch in part {
        if ch.is_ascii_alphanumeric() || [b'-', b'.', b'_', b'~'].contains(&ch) {
            result.push(ch);
        } else {
            result.extend_from_slice(format!("%{ch:02x}").as_bytes());
        }
    }
}
