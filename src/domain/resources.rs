//! Resource Quantities
//!
//! Exact comparison and arithmetic over Kubernetes resource quantities.
//! Quantities are parsed into signed nano-units so values like `100m` CPU and
//! `16Gi` memory compare without floating point error.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Resource name -> quantity
pub type ResourceList = BTreeMap<String, Quantity>;

const NANO: i128 = 1_000_000_000;

/// Parse a quantity into nano-units
pub fn parse_nanos(quantity: &Quantity) -> Result<i128> {
    let raw = quantity.0.trim();
    if raw.is_empty() {
        return Err(Error::QuantityParse("empty quantity".into()));
    }

    let (negative, unsigned) = match raw.as_bytes()[0] {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);
    if number.is_empty() || number.matches('.').count() > 1 {
        return Err(Error::QuantityParse(format!("invalid number in {:?}", raw)));
    }

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let digits = format!("{}{}", whole, fraction);
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| Error::QuantityParse(format!("invalid number in {:?}", raw)))?;
    // mantissa * 10^-scale is the literal number
    let scale = i32::try_from(fraction.len())
        .map_err(|_| Error::QuantityParse(format!("invalid number in {:?}", raw)))?;

    let (multiplier, exponent) = suffix_factor(suffix)
        .ok_or_else(|| Error::QuantityParse(format!("invalid suffix in {:?}", raw)))?;

    let overflow = || Error::QuantityParse(format!("quantity overflows: {:?}", raw));

    // nanos = mantissa * multiplier * 10^(exponent + 9 - scale)
    let power = exponent
        .checked_add(9)
        .and_then(|p| p.checked_sub(scale))
        .ok_or_else(overflow)?;
    let base = mantissa.checked_mul(multiplier).ok_or_else(overflow)?;
    let value = if power >= 0 {
        u32::try_from(power)
            .ok()
            .and_then(|p| 10i128.checked_pow(p))
            .and_then(|p| base.checked_mul(p))
            .ok_or_else(overflow)?
    } else {
        // Sub-nano precision rounds up, matching how the API server rounds
        match u32::try_from(power.unsigned_abs())
            .ok()
            .and_then(|p| 10i128.checked_pow(p))
        {
            Some(divisor) => match base.checked_add(divisor - 1) {
                Some(rounded) => rounded / divisor,
                None => base / divisor + i128::from(base % divisor != 0),
            },
            // Divisor exceeds any mantissa: a non-zero value is below one nano-unit
            None => i128::from(base != 0),
        }
    };

    Ok(if negative { -value } else { value })
}

/// Map a suffix to (binary multiplier, decimal exponent)
fn suffix_factor(suffix: &str) -> Option<(i128, i32)> {
    let factor = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        _ => {
            let exp = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
            (1, exp.parse().ok()?)
        }
    };
    Some(factor)
}

/// Format nano-units back into a canonical quantity string
pub fn format_nanos(nanos: i128) -> Quantity {
    if nanos % NANO == 0 {
        Quantity(format!("{}", nanos / NANO))
    } else if nanos % 1_000_000 == 0 {
        Quantity(format!("{}m", nanos / 1_000_000))
    } else {
        Quantity(format!("{}n", nanos))
    }
}

/// Check whether a quantity is zero. Unparseable quantities are not zero.
pub fn is_zero(quantity: &Quantity) -> bool {
    matches!(parse_nanos(quantity), Ok(0))
}

/// Drop every resource whose quantity is zero
pub fn filter_zero(resources: &ResourceList) -> ResourceList {
    resources
        .iter()
        .filter(|(_, quantity)| !is_zero(quantity))
        .map(|(name, quantity)| (name.clone(), quantity.clone()))
        .collect()
}

/// Check that every requested quantity fits within `total`.
///
/// A request for a resource `total` does not expose only fits when it is zero.
pub fn fits(requests: &ResourceList, total: &ResourceList) -> bool {
    requests.iter().all(|(name, requested)| {
        let Ok(requested) = parse_nanos(requested) else {
            return false;
        };
        let available = match total.get(name) {
            Some(quantity) => match parse_nanos(quantity) {
                Ok(available) => available,
                Err(_) => return false,
            },
            None => 0,
        };
        requested <= available
    })
}

/// Subtract every overhead list from `base`, clamping each resource at zero
pub fn subtract(base: &ResourceList, overheads: &[&ResourceList]) -> Result<ResourceList> {
    let mut result = ResourceList::new();
    for (name, quantity) in base {
        let mut remaining = parse_nanos(quantity)?;
        for overhead in overheads {
            if let Some(reserved) = overhead.get(name) {
                remaining = remaining.saturating_sub(parse_nanos(reserved)?);
            }
        }
        result.insert(name.clone(), format_nanos(remaining.max(0)));
    }
    Ok(result)
}

/// Sum resource lists, keyed by resource name
pub fn merge(lists: &[&ResourceList]) -> Result<ResourceList> {
    let mut totals: BTreeMap<String, i128> = BTreeMap::new();
    for list in lists {
        for (name, quantity) in list.iter() {
            let total = totals.entry(name.clone()).or_default();
            *total = total
                .checked_add(parse_nanos(quantity)?)
                .ok_or_else(|| Error::QuantityParse(format!("{} total overflows", name)))?;
        }
    }
    Ok(totals
        .into_iter()
        .map(|(name, nanos)| (name, format_nanos(nanos)))
        .collect())
}
