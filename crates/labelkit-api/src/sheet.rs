//! Turn spreadsheet and delimited-text files into rows of trimmed strings.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use encoding_rs::WINDOWS_1252;
use labelkit_core::{format_date, from_excel_serial};

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const CANDIDATE_SEPARATORS: [char; 3] = [';', ',', '\t'];

#[must_use]
pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SPREADSHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Rows of the first worksheet, or of a delimited text file.
///
/// # Errors
/// Returns an error when the file cannot be opened or the workbook has no sheet.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    if is_spreadsheet(path) {
        return read_workbook(path);
    }
    let text = read_text(path)?;
    Ok(parse_delimited(&text, sniff_separator(&text)))
}

/// Non-blank lines of a text file; spreadsheet rows are joined with spaces.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if is_spreadsheet(path) {
        let rows = read_workbook(path)?;
        return Ok(rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .filter(|cell| !cell.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .filter(|line| !line.trim().is_empty())
            .collect());
    }

    let text = read_text(path)?;
    Ok(text
        .lines()
        .map(|line| line.trim().trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("workbook {} has no sheet", path.display()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("failed to read sheet `{sheet}` of {}", path.display()))?;

    Ok(range.rows().map(|row| row.iter().map(cell_to_string).collect()).collect())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(text) | Data::DateTimeIso(text) | Data::DurationIso(text) => {
            text.trim().to_string()
        }
        Data::Float(value) => {
            if value.fract() == 0.0 {
                format!("{value:.0}")
            } else {
                value.to_string()
            }
        }
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => {
            from_excel_serial(value.as_f64()).map(format_date).unwrap_or_default()
        }
    }
}

/// UTF-8 (with or without BOM), falling back to Windows-1252.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    Ok(match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
    })
}

/// Separator occurring most often on the first non-blank line; `;` on ties.
#[must_use]
pub fn sniff_separator(text: &str) -> char {
    let Some(first) = text.lines().find(|line| !line.trim().is_empty()) else {
        return ';';
    };
    let mut best = (';', 0);
    for separator in CANDIDATE_SEPARATORS {
        let count = first.matches(separator).count();
        if count > best.1 {
            best = (separator, count);
        }
    }
    best.0
}

/// Split delimited text into rows, honouring double-quoted fields that may
/// contain separators, doubled quotes and line breaks.
#[must_use]
pub fn parse_delimited(text: &str, separator: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            '\r' => {}
            '\n' => {
                row.push(field.trim().to_string());
                field.clear();
                rows.push(std::mem::take(&mut row));
            }
            _ if ch == separator => {
                row.push(field.trim().to_string());
                field.clear();
            }
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field.trim().to_string());
        rows.push(row);
    }
    rows
}

/// Render rows as `;`-separated text, quoting fields when needed.
#[must_use]
pub fn write_delimited(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(|field| {
                if field.contains([';', '"', '\n', '\r']) {
                    format!("\"{}\"", field.replace('"', "\"\""))
                } else {
                    field.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(";");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
