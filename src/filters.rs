use std::borrow::Borrow;

/// Cents as Brazilian reais, e.g. `3500` -> `R$ 35,00`.
pub fn brl<T: Borrow<i64>>(cents: T) -> askama::Result<String> {
    Ok(format!("R$ {}", decimal_br(*cents.borrow())))
}

/// `2024-06-10` -> `10/06/2024`; anything else is passed through.
pub fn data_br<T: std::fmt::Display>(value: T) -> askama::Result<String> {
    let raw = value.to_string();
    Ok(match chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(date) => date.format("%d/%m/%Y").to_string(),
        Err(_) => raw,
    })
}

/// `(11) 91234-5678` style for stored digits.
pub fn telefone<T: std::fmt::Display>(value: T) -> askama::Result<String> {
    let digits = value.to_string();
    Ok(match digits.len() {
        11 => format!("({}) {}-{}", &digits[..2], &digits[2..7], &digits[7..]),
        10 => format!("({}) {}-{}", &digits[..2], &digits[2..6], &digits[6..]),
        _ => digits,
    })
}

pub fn decimal_br(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{},{:02}", cents / 100, cents % 100)
}

/// Accepts `35`, `35,5`, `35,00` or `35.00`.
pub fn parse_price_cents(raw: &str) -> Option<i64> {
    let normalized = raw.trim().trim_start_matches("R$").trim().replace(',', ".");
    let (whole, fraction) = match normalized.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (normalized.as_str(), ""),
    };
    if whole.is_empty() || fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok().filter(|value| *value >= 0)?;
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(fraction)
}
