use time::{Date, Duration, Month};

#[derive(Clone, Copy)]
enum Layout {
    DayFirst,
    YearFirst,
}

const ACCEPTED: [(char, Layout); 4] = [
    ('/', Layout::DayFirst),
    ('-', Layout::YearFirst),
    ('-', Layout::DayFirst),
    ('/', Layout::YearFirst),
];

/// Parse one of `DD/MM/YYYY`, `YYYY-MM-DD`, `DD-MM-YYYY`, `YYYY/MM/DD`.
///
/// A trailing time component (`2026-12-31 00:00:00`, `2026-12-31T00:00:00`)
/// is ignored, which is how spreadsheet exports usually render date cells.
#[must_use]
pub fn parse_date(text: &str) -> Option<Date> {
    let trimmed = text.trim();
    let date_part = trimmed.split(|ch: char| ch == ' ' || ch == 'T').next().unwrap_or_default();
    ACCEPTED.iter().find_map(|(separator, layout)| parse_with(date_part, *separator, *layout))
}

fn parse_with(text: &str, separator: char, layout: Layout) -> Option<Date> {
    let parts = text.split(separator).collect::<Vec<_>>();
    let [first, second, third] = parts.as_slice() else {
        return None;
    };
    let (day, month, year) = match layout {
        Layout::DayFirst => (*first, *second, *third),
        Layout::YearFirst => (*third, *second, *first),
    };
    if year.len() != 4 || day.is_empty() || day.len() > 2 || month.is_empty() || month.len() > 2 {
        return None;
    }
    let year = year.parse::<i32>().ok()?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day = day.parse::<u8>().ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

#[must_use]
pub fn format_date(date: Date) -> String {
    format!("{:02}/{:02}/{:04}", date.day(), u8::from(date.month()), date.year())
}

/// Reformat a date-bearing field to `DD/MM/YYYY`.
///
/// Unparseable text is passed through trimmed rather than blanked.
#[must_use]
pub fn normalize_date(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    parse_date(trimmed).map_or_else(|| trimmed.to_string(), format_date)
}

/// Convert a spreadsheet serial day number (1900 date system).
#[must_use]
pub fn from_excel_serial(serial: f64) -> Option<Date> {
    if !serial.is_finite() || serial < 1.0 || serial > 2_958_465.0 {
        return None;
    }
    let epoch = Date::from_calendar_date(1899, Month::December, 30).ok()?;
    #[allow(clippy::cast_possible_truncation)]
    let days = serial.floor() as i64;
    epoch.checked_add(Duration::days(days))
}

/// Season covered by a membership expiring on `expiration`, e.g. `2025/2026`.
#[must_use]
pub fn season_label(expiration: &str, separator: &str) -> Option<String> {
    let date = parse_date(expiration)?;
    Some(format!("{}{separator}{}", date.year() - 1, date.year()))
}
