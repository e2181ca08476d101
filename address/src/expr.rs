//! Rule address expression parsing.
//!
//! Grammar:
//!
//! ```text
//! expr := elem (',' elem)*
//! elem := ['!'] ( '[' expr ']' | atom )
//! atom := 'any' | cidr | range | host
//! ```
//!
//! One pass splits the expression into top-level elements, tracking
//! bracket depth; nested groups recurse. Negation composes by parity
//! across nesting, and each leaf atom lands in the positive or negative
//! container accordingly. Negation itself is resolved later, by the
//! container's merge step.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::range::AddrRange;
use crate::rules::RuleSet;
use crate::set::AddressSet;
use crate::AddressError;

pub(crate) fn parse_into(
    positive: &mut AddressSet,
    negative: &mut AddressSet,
    text: &str,
    negated: bool,
    rules: &RuleSet,
) -> Result<(), AddressError> {
    for element in split_elements(text)? {
        let (body, flip) = strip_negation(element);
        let negated = negated ^ flip;
        if let Some(inner) = body.strip_prefix('[') {
            let inner = inner
                .strip_suffix(']')
                .ok_or_else(|| AddressError::UnbalancedBrackets(text.to_string()))?;
            parse_into(positive, negative, inner, negated, rules)?;
        } else {
            let range = parse_atom(body)?;
            let target = if negated { &mut *negative } else { &mut *positive };
            target.add_range(range, rules)?;
        }
    }
    Ok(())
}

/// Splits on commas at bracket depth zero, trimming each element.
fn split_elements(text: &str) -> Result<Vec<&str>, AddressError> {
    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AddressError::UnbalancedBrackets(text.to_string()))?;
            }
            ',' if depth == 0 => {
                elements.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(AddressError::UnbalancedBrackets(text.to_string()));
    }
    elements.push(text[start..].trim());
    if elements.iter().any(|e| e.is_empty()) {
        return Err(AddressError::EmptyElement);
    }
    Ok(elements)
}

/// Peels leading `!` markers, returning the remainder and whether the
/// element's polarity flips.
fn strip_negation(element: &str) -> (&str, bool) {
    let mut rest = element;
    let mut flip = false;
    while let Some(stripped) = rest.strip_prefix('!') {
        flip = !flip;
        rest = stripped.trim_start();
    }
    (rest, flip)
}

/// Parses one leaf: `any`, a host, a CIDR or dotted-mask network, or an
/// inclusive `low-high` range. The family is picked by the presence of
/// `:` in the text, so a mixed-family range fails as a malformed literal
/// of the chosen family.
fn parse_atom(text: &str) -> Result<AddrRange, AddressError> {
    if text.eq_ignore_ascii_case("any") {
        return Ok(AddrRange::Any);
    }
    if text.contains(':') {
        parse_v6_atom(text)
    } else {
        parse_v4_atom(text)
    }
}

fn parse_v4_atom(text: &str) -> Result<AddrRange, AddressError> {
    if let Some((ip, mask)) = text.split_once('/') {
        let addr = parse_v4_literal(ip, text)?;
        let mask = if mask.contains('.') {
            parse_v4_literal(mask, text)?
        } else {
            let prefix: u32 = mask
                .trim()
                .parse()
                .map_err(|_| AddressError::InvalidPrefix(text.to_string()))?;
            if prefix > 32 {
                return Err(AddressError::InvalidPrefix(text.to_string()));
            }
            v4_mask(prefix)
        };
        let low = addr & mask;
        AddrRange::v4(low, low | !mask)
    } else if let Some((first, second)) = text.split_once('-') {
        let low = parse_v4_literal(first, text)?;
        let high = parse_v4_literal(second, text)?;
        if low > high {
            return Err(AddressError::ReversedRange(text.to_string()));
        }
        AddrRange::v4(low, high)
    } else {
        let addr = parse_v4_literal(text, text)?;
        AddrRange::v4(addr, addr)
    }
}

fn parse_v6_atom(text: &str) -> Result<AddrRange, AddressError> {
    if let Some((ip, prefix)) = text.split_once('/') {
        let addr = parse_v6_literal(ip, text)?;
        let prefix: u32 = prefix
            .trim()
            .parse()
            .map_err(|_| AddressError::InvalidPrefix(text.to_string()))?;
        if prefix > 128 {
            return Err(AddressError::InvalidPrefix(text.to_string()));
        }
        let mask = v6_mask(prefix);
        let low = addr & mask;
        AddrRange::v6(low, low | !mask)
    } else if let Some((first, second)) = text.split_once('-') {
        let low = parse_v6_literal(first, text)?;
        let high = parse_v6_literal(second, text)?;
        if low > high {
            return Err(AddressError::ReversedRange(text.to_string()));
        }
        AddrRange::v6(low, high)
    } else {
        let addr = parse_v6_literal(text, text)?;
        AddrRange::v6(addr, addr)
    }
}

fn parse_v4_literal(part: &str, context: &str) -> Result<u32, AddressError> {
    part.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| AddressError::MalformedAddress(context.to_string()))
}

fn parse_v6_literal(part: &str, context: &str) -> Result<u128, AddressError> {
    part.trim()
        .parse::<Ipv6Addr>()
        .map(u128::from)
        .map_err(|_| AddressError::MalformedAddress(context.to_string()))
}

fn v4_mask(prefix: u32) -> u32 {
    if prefix == 0 {
        0
    } else {
        !0u32 << (32 - prefix)
    }
}

fn v6_mask(prefix: u32) -> u128 {
    if prefix == 0 {
        0
    } else {
        !0u128 << (128 - prefix)
    }
}
