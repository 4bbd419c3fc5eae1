/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::{common::parse::TxtRecordParser, Error};

use super::{
    macros::DEFAULT_DELIMITER, Directive, Macro, Mechanism, Modifier, Qualifier, Spf, Variable,
    Version,
};

impl TxtRecordParser for Spf {
    fn parse(bytes: &[u8]) -> crate::Result<Spf> {
        let mut terms = bytes
            .split(|ch| ch.is_ascii_whitespace())
            .filter(|term| !term.is_empty());

        if !terms
            .next()
            .is_some_and(|version| version.eq_ignore_ascii_case(b"v=spf1"))
        {
            return Err(Error::InvalidRecordType);
        }

        let mut spf = Spf {
            version: Version::V1,
            directives: Vec::new(),
            modifiers: Vec::new(),
        };

        for term in terms {
            match term.parse_term()? {
                Term::Directive(directive) => spf.directives.push(directive),
                Term::Modifier(modifier) => {
                    let is_duplicate = match &modifier {
                        Modifier::Redirect(_) => spf.redirect().is_some(),
                        Modifier::Explanation(_) => spf.exp().is_some(),
                        Modifier::Unknown { .. } => false,
                    };
                    if is_duplicate {
                        return Err(Error::ParseError);
                    }
                    spf.modifiers.push(modifier);
                }
            }
        }

        Ok(spf)
    }
}

impl TxtRecordParser for Macro {
    fn parse(record: &[u8]) -> crate::Result<Self> {
        parse_macro_string(record, true)
    }
}

enum Term {
    Directive(Directive),
    Modifier(Modifier),
}

trait SpfTermParser {
    fn parse_term(&self) -> crate::Result<Term>;
}

impl SpfTermParser for [u8] {
    fn parse_term(&self) -> crate::Result<Term> {
        let (qualifier, term) = match self.first() {
            Some(b'+') => (Some(Qualifier::Pass), &self[1..]),
            Some(b'-') => (Some(Qualifier::Fail), &self[1..]),
            Some(b'~') => (Some(Qualifier::SoftFail), &self[1..]),
            Some(b'?') => (Some(Qualifier::Neutral), &self[1..]),
            _ => (None, self),
        };

        let name_end = term
            .iter()
            .position(|ch| matches!(ch, b':' | b'/' | b'='))
            .unwrap_or(term.len());
        let (name, args) = term.split_at(name_end);

        if args.first() == Some(&b'=') {
            return if qualifier.is_none() && is_modifier_name(name) {
                parse_modifier(name, &args[1..]).map(Term::Modifier)
            } else {
                Err(Error::ParseError)
            };
        }

        let qualifier = qualifier.unwrap_or(Qualifier::Pass);
        let name = name.to_ascii_lowercase();
        let mechanism = match name.as_slice() {
            b"all" if args.is_empty() => Mechanism::All,
            b"include" => Mechanism::Include {
                macro_string: required_domain_spec(args)?,
            },
            b"exists" => Mechanism::Exists {
                macro_string: required_domain_spec(args)?,
            },
            b"ptr" => Mechanism::Ptr {
                macro_string: optional_domain_spec(args)?,
            },
            b"a" | b"mx" => {
                // Macro delimiters may contain '/', the CIDR follows the last macro.
                let cidr_from = args
                    .iter()
                    .rposition(|&ch| ch == b'}')
                    .map_or(0, |pos| pos + 1);
                let (domain, cidr) = match args[cidr_from..].iter().position(|&ch| ch == b'/') {
                    Some(pos) => args.split_at(cidr_from + pos),
                    None => (args, &[][..]),
                };
                let macro_string = optional_domain_spec(domain)?;
                let (ip4_cidr, ip6_cidr) = if !cidr.is_empty() {
                    dual_cidr_length(&cidr[1..])?
                } else {
                    (32, 128)
                };
                let (ip4_mask, ip6_mask) = (ip4_mask(ip4_cidr), ip6_mask(ip6_cidr));
                if name == b"a" {
                    Mechanism::A {
                        macro_string,
                        ip4_mask,
                        ip6_mask,
                    }
                } else {
                    Mechanism::Mx {
                        macro_string,
                        ip4_mask,
                        ip6_mask,
                    }
                }
            }
            b"ip4" => {
                let (addr, cidr) = address_and_cidr(args)?;
                Mechanism::Ip4 {
                    addr: addr.parse::<Ipv4Addr>().map_err(|_| Error::ParseError)?,
                    mask: ip4_mask(cidr.map_or(Ok(32), |cidr| cidr_length(cidr, 32))?),
                }
            }
            b"ip6" => {
                let (addr, cidr) = address_and_cidr(args)?;
                let cidr = match cidr {
                    Some(cidr) => cidr_length(cidr.strip_prefix(b"/").unwrap_or(cidr), 128)?,
                    None => 128,
                };
                Mechanism::Ip6 {
                    addr: addr.parse::<Ipv6Addr>().map_err(|_| Error::ParseError)?,
                    mask: ip6_mask(cidr),
                }
            }
            _ => return Err(Error::ParseError),
        };

        Ok(Term::Directive(Directive::new(qualifier, mechanism)))
    }
}

fn parse_modifier(name: &[u8], value: &[u8]) -> crate::Result<Modifier> {
    if name.eq_ignore_ascii_case(b"redirect") {
        parse_domain_spec(value).map(Modifier::Redirect)
    } else if name.eq_ignore_ascii_case(b"exp") {
        parse_domain_spec(value).map(Modifier::Explanation)
    } else {
        parse_macro_string(value, false)?;
        Ok(Modifier::Unknown {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
        })
    }
}

/*
    name             = ALPHA *( ALPHA / DIGIT / "-" / "_" / "." )
*/
fn is_modifier_name(name: &[u8]) -> bool {
    name.first().is_some_and(|ch| ch.is_ascii_alphabetic())
        && name
            .iter()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, b'-' | b'_' | b'.'))
}

fn required_domain_spec(args: &[u8]) -> crate::Result<Macro> {
    match args.strip_prefix(b":") {
        Some(domain) if !domain.is_empty() => parse_domain_spec(domain),
        _ => Err(Error::ParseError),
    }
}

fn optional_domain_spec(args: &[u8]) -> crate::Result<Macro> {
    if args.is_empty() {
        Ok(Macro::None)
    } else {
        required_domain_spec(args)
    }
}

fn address_and_cidr(args: &[u8]) -> crate::Result<(&str, Option<&[u8]>)> {
    let args = args
        .strip_prefix(b":")
        .filter(|args| !args.is_empty())
        .ok_or(Error::ParseError)?;
    let (addr, cidr) = match args.iter().position(|&ch| ch == b'/') {
        Some(pos) => (&args[..pos], Some(&args[pos + 1..])),
        None => (args, None),
    };
    std::str::from_utf8(addr)
        .map(|addr| (addr, cidr))
        .map_err(|_| Error::ParseError)
}

/*
   domain-spec      = macro-string domain-end
   domain-end       = ( "." toplabel [ "." ] ) / macro-expand
*/
fn parse_domain_spec(value: &[u8]) -> crate::Result<Macro> {
    let macro_string = parse_macro_string(value, false)?;
    let tail = match &macro_string {
        Macro::Literal(literal) => Some((literal.as_slice(), false)),
        Macro::List(list) => match list.last() {
            Some(Macro::Literal(literal)) => Some((literal.as_slice(), true)),
            _ => None,
        },
        Macro::Variable { .. } => None,
        Macro::None => return Err(Error::ParseError),
    };

    if let Some((literal, follows_macro)) = tail {
        let literal = literal.strip_suffix(b".").unwrap_or(literal);
        let is_valid = match literal.iter().rposition(|&ch| ch == b'.') {
            Some(pos) => is_toplabel(&literal[pos + 1..]),
            None => follows_macro && literal.is_empty(),
        };
        if !is_valid {
            return Err(Error::ParseError);
        }
    }

    Ok(macro_string)
}

/*
   toplabel         = ( *alphanum ALPHA *alphanum ) /
                      ( 1*alphanum "-" *( alphanum / "-" ) alphanum )
*/
fn is_toplabel(label: &[u8]) -> bool {
    match (label.first(), label.last()) {
        (Some(first), Some(last)) if first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric() => {
            label
                .iter()
                .all(|ch| ch.is_ascii_alphanumeric() || *ch == b'-')
                && label
                    .iter()
                    .any(|ch| ch.is_ascii_alphabetic() || *ch == b'-')
        }
        _ => false,
    }
}

/*
   dual-cidr-length = [ ip4-cidr-length ] [ "/" ip6-cidr-length ]
*/
fn dual_cidr_length(cidr: &[u8]) -> crate::Result<(u32, u32)> {
    if let Some(ip6_cidr) = cidr.strip_prefix(b"/") {
        Ok((32, cidr_length(ip6_cidr, 128)?))
    } else if let Some(pos) = cidr.windows(2).position(|w| w == b"//") {
        Ok((
            cidr_length(&cidr[..pos], 32)?,
            cidr_length(&cidr[pos + 2..], 128)?,
        ))
    } else {
        Ok((cidr_length(cidr, 32)?, 128))
    }
}

fn cidr_length(cidr: &[u8], max: u32) -> crate::Result<u32> {
    if cidr.is_empty()
        || cidr.len() > 3
        || (cidr.len() > 1 && cidr[0] == b'0')
        || !cidr.iter().all(|ch| ch.is_ascii_digit())
    {
        return Err(Error::ParseError);
    }
    let length = cidr
        .iter()
        .fold(0u32, |acc, ch| acc * 10 + (ch - b'0') as u32);
    if length <= max {
        Ok(length)
    } else {
        Err(Error::ParseError)
    }
}

fn ip4_mask(cidr: u32) -> u32 {
    u32::MAX.checked_shl(32 - cidr).unwrap_or(0)
}

fn ip6_mask(cidr: u32) -> u128 {
    u128::MAX.checked_shl(128 - cidr).unwrap_or(0)
}

/*
   macro-string     = *( macro-expand / macro-literal )
   macro-expand     = ( "%{" macro-letter transformers *delimiter "}" )
                      / "%%" / "%_" / "%-"
   macro-literal    = %x21-24 / %x26-7E
*/
pub(crate) fn parse_macro_string(value: &[u8], is_exp: bool) -> crate::Result<Macro> {
    let mut items = Vec::new();
    let mut literal = Vec::new();
    let mut iter = value.iter();

    while let Some(&ch) = iter.next() {
        if ch != b'%' {
            if is_exp || (0x21..=0x7e).contains(&ch) {
                literal.push(ch);
                continue;
            } else {
                return Err(Error::ParseError);
            }
        }

        match iter.next() {
            Some(b'%') => literal.push(b'%'),
            Some(b'_') => literal.push(b' '),
            Some(b'-') => literal.extend_from_slice(b"%20"),
            Some(b'{') => {
                if !literal.is_empty() {
                    items.push(Macro::Literal(std::mem::take(&mut literal)));
                }

                let (letter, escape) = iter
                    .next()
                    .and_then(|&ch| {
                        if is_exp {
                            Variable::parse_exp(ch)
                        } else {
                            Variable::parse(ch)
                        }
                    })
                    .ok_or(Error::ParseError)?;
                let mut num_parts: Option<u32> = None;
                let mut reverse = false;
                let mut delimiters = 0;
                let mut is_closed = false;

                for &ch in iter.by_ref() {
                    match ch {
                        b'0'..=b'9' if !reverse && delimiters == 0 => {
                            num_parts = Some(
                                num_parts
                                    .unwrap_or(0)
                                    .saturating_mul(10)
                                    .saturating_add((ch - b'0') as u32),
                            );
                        }
                        b'r' | b'R' if !reverse && delimiters == 0 => {
                            reverse = true;
                        }
                        b'.' | b'-' | b'+' | b',' | b'/' | b'_' | b'=' => {
                            delimiters |= 1u64 << (ch - b'+');
                        }
                        b'}' => {
                            is_closed = true;
                            break;
                        }
                        _ => return Err(Error::ParseError),
                    }
                }

                if !is_closed || num_parts == Some(0) {
                    return Err(Error::ParseError);
                }

                items.push(Macro::Variable {
                    letter,
                    num_parts: num_parts.unwrap_or(0),
                    reverse,
                    escape,
                    delimiters: if delimiters != 0 {
                        delimiters
                    } else {
                        DEFAULT_DELIMITER
                    },
                });
            }
            _ => return Err(Error::ParseError),
        }
    }

    if !literal.is_empty() {
        items.push(Macro::Literal(literal));
    }

    Ok(if items.len() > 1 {
        Macro::List(items)
    } else {
        items.pop().unwrap_or(Macro::None)
    })
}

impl Variable {
    fn parse(ch: u8) -> Option<(Self, bool)> {
        let letter = match ch.to_ascii_lowercase() {
            b's' => Variable::Sender,
            b'l' => Variable::SenderLocalPart,
            b'o' => Variable::SenderDomainPart,
            b'd' => Variable::Domain,
            b'i' => Variable::Ip,
            b'p' => Variable::ValidatedDomain,
            b'v' => Variable::IpVersion,
            b'h' => Variable::HeloDomain,
            _ => return None,
        };
        Some((letter, ch.is_ascii_uppercase()))
    }

    fn parse_exp(ch: u8) -> Option<(Self, bool)> {
        let letter = match ch.to_ascii_lowercase() {
            b'c' => Variable::SmtpIp,
            b'r' => Variable::HostDomain,
            b't' => Variable::CurrentTime,
            _ => return Variable::parse(ch),
        };
        Some((letter, ch.is_ascii_uppercase()))
    }
}
