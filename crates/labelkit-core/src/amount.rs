use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

const IGNORED: [char; 4] = ['€', ' ', '\u{a0}', '\u{202f}'];

/// Parse a paid amount written with `,` or `.` as the fractional separator.
///
/// Currency signs and (non-breaking) spaces are ignored. Text that is empty
/// or not a number yields `None`.
#[must_use]
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned = text
        .trim()
        .chars()
        .filter(|ch| !IGNORED.contains(ch))
        .map(|ch| if ch == ',' { '.' } else { ch })
        .collect::<String>();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

#[must_use]
pub fn format_amount(value: Decimal) -> String {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(2);
    rounded.to_string()
}

/// Two-fractional-digit rendering of `text`, or empty when it is not an amount.
#[must_use]
pub fn normalize_amount(text: &str) -> String {
    parse_amount(text).map(format_amount).unwrap_or_default()
}

/// Amount as shown on documents, suffixed with the euro sign.
#[must_use]
pub fn display_amount(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.ends_with('€') {
        return trimmed.to_string();
    }
    format!("{trimmed} €")
}
