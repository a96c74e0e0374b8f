//! Ward-division precinct codes derived from free-text asset fields.

use regex::Regex;
use std::sync::LazyLock;

/// `12-3`, `4 - 15`: ward, then division.
static WARD_DIVISION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s*-\s*(\d{1,2})").expect("valid regex"));

static ONE_OR_TWO_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}").expect("valid regex"));

/// Derive a `WW-DD` precinct code.
///
/// The first ward-division pair in `itemname` wins. A missing ward falls back
/// to the first number in `manufacturer`, a missing division to the first
/// number in `model`. Returns `None` unless both parts resolve.
pub fn extract_precinct(
    itemname: Option<&str>,
    manufacturer: Option<&str>,
    model: Option<&str>,
) -> Option<String> {
    let pair = itemname.and_then(|name| WARD_DIVISION.captures(name));
    let ward = pair
        .as_ref()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .or_else(|| first_number(manufacturer))?;
    let division = pair
        .as_ref()
        .and_then(|c| c.get(2))
        .map(|m| m.as_str())
        .or_else(|| first_number(model))?;
    Some(format!("{ward:0>2}-{division:0>2}"))
}

fn first_number(field: Option<&str>) -> Option<&str> {
    field
        .and_then(|text| ONE_OR_TWO_DIGITS.find(text))
        .map(|m| m.as_str())
}
