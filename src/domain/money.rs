use thiserror::Error;

/// Balances and amounts are fixed-point integers with two decimal places.
/// `10000` is `100.00`.
pub type Cents = i64;

const SCALE: i64 = 100;

/// Render cents as a decimal string, e.g. `-1234` -> `"-12.34"`.
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / SCALE as u64, abs % SCALE as u64)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmountError {
    #[error("amount is empty")]
    Empty,

    #[error("invalid amount format: {0}")]
    InvalidFormat(String),

    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

/// Parse a decimal string into cents.
///
/// Accepts `"50"`, `"50.5"`, `"50.05"` and `".5"`. Digits past the second
/// decimal place are truncated.
pub fn parse_cents(input: &str) -> Result<Cents, ParseAmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseAmountError::Empty);
    }

    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    let invalid = || ParseAmountError::InvalidFormat(input.to_string());

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let units: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| ParseAmountError::OutOfRange(input.to_string()))?
    };

    let mut fraction_cents = 0;
    for (position, digit) in fraction.bytes().take(2).enumerate() {
        let weight = if position == 0 { 10 } else { 1 };
        fraction_cents += i64::from(digit - b'0') * weight;
    }

    let cents = units
        .checked_mul(SCALE)
        .and_then(|c| c.checked_add(fraction_cents))
        .ok_or_else(|| ParseAmountError::OutOfRange(input.to_string()))?;

    Ok(if negative { -cents } else { cents })
}
