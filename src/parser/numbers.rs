use crate::error::InvalidNumber;

/// Localized abbreviation for "thousand" used on the stats pages.
const THOUSANDS_SUFFIX: &str = "tys.";

/// Integer with optional space thousands separators: `"12 345"` → 12345.
pub fn parse_plain(text: &str) -> Result<i64, InvalidNumber> {
    let digits: String = text
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}')
        .collect();
    digits
        .parse::<i64>()
        .map_err(|_| InvalidNumber(text.to_string()))
}

/// Integer followed by a percent sign: `"87%"` → 87.
pub fn parse_percent(text: &str) -> Result<i64, InvalidNumber> {
    let trimmed = text.trim().trim_end_matches('%').trim_end();
    trimmed
        .parse::<i64>()
        .map_err(|_| InvalidNumber(text.to_string()))
}

/// Decimal with a "thousands" suffix: `"3.2tys."` → 3200. Text without the
/// suffix goes through [`parse_plain`].
pub fn parse_suffixed(text: &str) -> Result<i64, InvalidNumber> {
    let trimmed = text.trim();
    let Some(number) = trimmed.strip_suffix(THOUSANDS_SUFFIX) else {
        return parse_plain(trimmed);
    };
    thousands(number.trim()).ok_or_else(|| InvalidNumber(text.to_string()))
}

// Exact decimal scaling: "3.2" → 3200, "0.2999" → 299.
fn thousands(number: &str) -> Option<i64> {
    let number = number.replace(',', ".");
    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut milli = 0i64;
    for (i, digit) in frac.chars().take(3).enumerate() {
        let d = digit.to_digit(10)? as i64;
        milli += d * 10i64.pow(2 - i as u32);
    }
    whole.checked_mul(1000)?.checked_add(milli)
}
