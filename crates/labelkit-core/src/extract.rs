//! Pull validation records out of semi-structured payment exports.
//!
//! [`LineExtractor`] reads the text layout where each member spans three
//! lines (name, payment, amount). [`BlockExtractor`] reads the spreadsheet
//! layout where the same block spans consecutive rows.

use std::collections::BTreeSet;

use regex_lite::Regex;

use crate::amount::normalize_amount;
use crate::dates::normalize_date;
use crate::reconcile::ValidationRecord;
use crate::splitter::NameSplitter;
use crate::CoreError;

const PAYMENT_MARKERS: [&str; 3] = ["paid", "payé", "paye"];

const AMOUNT_PATTERN: &str = r"(?i)(?:montant|amount)\s*:?\s*(-?\d+(?:[.,]\d+)?)\s*€?";
const VALIDATOR_PATTERN: &str = r"(?i)\b(?:par|by)\s+([^\s\d,;:.]+(?:[ \t]+[^\s\d,;:.]+)?)";
const CONFIRMATION_PATTERN: &str = r"(?i)(?:confirm(?:é|É|e)e?|confirmed)\s+(?:le|on)\s+(\d{1,2}[/.-]\d{1,2}[/.-]\d{4}|\d{4}-\d{2}-\d{2})\s+(?:par|by)\s+([^,;\n]+)";

const HEADER_TOKENS: [&str; 10] = [
    "nom",
    "prenom",
    "prénom",
    "nom prenom",
    "nom prénom",
    "adherent",
    "adhérent",
    "membre",
    "name",
    "member",
];

fn compile(pattern: &str) -> Result<Regex, CoreError> {
    Regex::new(pattern).map_err(|err| CoreError::Pattern(err.to_string()))
}

fn has_payment_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    PAYMENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Drop exact `(surname, given, validator, amount)` repeats, keeping the first.
fn dedup(records: Vec<ValidationRecord>) -> Vec<ValidationRecord> {
    let mut seen = BTreeSet::new();
    records
        .into_iter()
        .filter(|record| {
            seen.insert((
                record.surname.clone(),
                record.given_name.clone(),
                record.validated_by.clone(),
                record.amount.clone(),
            ))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Patterns {
    amount: Regex,
    validator: Regex,
}

impl Patterns {
    fn new() -> Result<Self, CoreError> {
        Ok(Self { amount: compile(AMOUNT_PATTERN)?, validator: compile(VALIDATOR_PATTERN)? })
    }

    fn amount(&self, text: &str) -> Option<String> {
        let raw = self.amount.captures(text)?.get(1)?.as_str();
        Some(normalize_amount(raw)).filter(|amount| !amount.is_empty())
    }

    /// Validator rendered as `Given SURNAME`.
    fn validator(&self, splitter: &NameSplitter, text: &str) -> Option<String> {
        let phrase = self.validator.captures(text)?.get(1)?.as_str();
        let tokens = phrase.split_whitespace().collect::<Vec<_>>();
        let rendered = match tokens.as_slice() {
            [first, second] if NameSplitter::is_uppercase_name(first)
                && !NameSplitter::is_uppercase_name(second) =>
            {
                format!("{second} {first}")
            }
            [first, second] if !NameSplitter::is_uppercase_name(first)
                && NameSplitter::is_uppercase_name(second) =>
            {
                format!("{first} {second}")
            }
            _ => {
                let (surname, given) = splitter.split(phrase);
                format!("{given} {surname}").trim().to_string()
            }
        };
        Some(rendered).filter(|name| !name.is_empty())
    }
}

/// Whether `text` reads like `SURNAME Given`: an uppercase run (or particle)
/// first, at least one more name token, and nothing that looks like data.
fn looks_like_member(splitter: &NameSplitter, text: &str) -> bool {
    let text = text.trim();
    if text.is_empty()
        || text.chars().any(|ch| ch.is_ascii_digit() || ch == '@' || ch == ':')
        || has_payment_marker(text)
    {
        return false;
    }
    let lower = text.to_lowercase();
    if lower.starts_with("total") || HEADER_TOKENS.contains(&lower.as_str()) {
        return false;
    }
    let tokens = text.split_whitespace().collect::<Vec<_>>();
    let Some(first) = tokens.first() else {
        return false;
    };
    if tokens.len() < 2 || !(NameSplitter::is_uppercase_name(first) || splitter.is_particle(first)) {
        return false;
    }
    let (surname, given) = splitter.split(text);
    !surname.is_empty() && given.chars().next().is_some_and(char::is_uppercase)
}

/// Three-line-per-member text layout.
#[derive(Debug, Clone)]
pub struct LineExtractor {
    splitter: NameSplitter,
    patterns: Patterns,
}

impl LineExtractor {
    /// # Errors
    /// Returns `CoreError::Pattern` when an extraction pattern fails to compile.
    pub fn new(splitter: NameSplitter) -> Result<Self, CoreError> {
        Ok(Self { splitter, patterns: Patterns::new()? })
    }

    #[must_use]
    pub fn is_member_start(&self, line: &str) -> bool {
        looks_like_member(&self.splitter, line)
    }

    #[must_use]
    pub fn extract_members(&self, raw_lines: &[String]) -> Vec<ValidationRecord> {
        let lines = raw_lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        let mut records = Vec::new();
        let mut index = 0;
        while index < lines.len() {
            if !self.is_member_start(lines[index]) {
                index += 1;
                continue;
            }
            let Some((record, consumed)) = self.block_at(&lines, index) else {
                index += 1;
                continue;
            };
            records.push(record);
            index += consumed;
            while index < lines.len() && !self.is_member_start(lines[index]) {
                index += 1;
            }
        }
        dedup(records)
    }

    /// Try to read a member whose name sits at `start`. Returns the record and
    /// the number of lines it spans.
    fn block_at(&self, lines: &[&str], start: usize) -> Option<(ValidationRecord, usize)> {
        let mut details = Vec::new();
        for line in lines.iter().skip(start + 1).take(2) {
            if self.is_member_start(line) {
                break;
            }
            details.push(*line);
            let joined = details.join("\n");
            if has_payment_marker(&joined) {
                if let Some(amount) = self.patterns.amount(&joined) {
                    let validator =
                        self.patterns.validator(&self.splitter, &joined).unwrap_or_default();
                    let (surname, given) = self.splitter.split(lines[start]);
                    let record = ValidationRecord::new(&surname, &given, &validator, &amount)?;
                    return Some((record, details.len() + 1));
                }
            }
        }
        None
    }
}

/// Multi-row spreadsheet layout: name row, confirmation row, amount row.
#[derive(Debug, Clone)]
pub struct BlockExtractor {
    splitter: NameSplitter,
    patterns: Patterns,
    confirmation: Regex,
}

struct Block<'a> {
    name: String,
    rows: Vec<&'a [String]>,
}

impl BlockExtractor {
    /// # Errors
    /// Returns `CoreError::Pattern` when an extraction pattern fails to compile.
    pub fn new(splitter: NameSplitter) -> Result<Self, CoreError> {
        Ok(Self {
            splitter,
            patterns: Patterns::new()?,
            confirmation: compile(CONFIRMATION_PATTERN)?,
        })
    }

    /// Name carried by a block's first row, if the row starts a block.
    ///
    /// A lone uppercase surname in the first cell is joined with a given name
    /// in the second cell.
    #[must_use]
    pub fn member_name(&self, row: &[String]) -> Option<String> {
        let first = row.first().map(|cell| cell.trim()).unwrap_or_default();
        let mut name = first.to_string();
        if first.split_whitespace().count() == 1 {
            if let Some(second) = row.get(1).map(|cell| cell.trim()).filter(|cell| !cell.is_empty())
            {
                name = format!("{first} {second}");
            }
        }
        looks_like_member(&self.splitter, &name).then_some(name)
    }

    #[must_use]
    pub fn extract_blocks(&self, rows: &[Vec<String>]) -> Vec<ValidationRecord> {
        let mut blocks = Vec::new();
        let mut current: Option<Block<'_>> = None;
        for row in rows {
            let first = row.first().map(|cell| cell.trim().to_lowercase()).unwrap_or_default();
            if first.starts_with("total") || row.iter().all(|cell| cell.trim().is_empty()) {
                blocks.extend(current.take());
                continue;
            }
            if let Some(name) = self.member_name(row) {
                blocks.extend(current.replace(Block { name, rows: vec![row.as_slice()] }));
                continue;
            }
            if let Some(block) = current.as_mut() {
                block.rows.push(row.as_slice());
            }
        }
        blocks.extend(current);

        let records = blocks.iter().filter_map(|block| self.read_block(block)).collect();
        dedup(records)
    }

    fn read_block(&self, block: &Block<'_>) -> Option<ValidationRecord> {
        let text = block
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.trim())
                    .filter(|cell| !cell.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");

        let confirmation = self.confirmation.captures(&text);
        let confirmed_on = confirmation
            .as_ref()
            .and_then(|caps| caps.get(1))
            .map(|date| normalize_date(date.as_str()));
        let confirmed_by = confirmation
            .as_ref()
            .and_then(|caps| caps.get(2))
            .map(|name| name.as_str().trim().trim_end_matches('.').trim().to_string());

        let amount = self.patterns.amount(&text).or_else(|| Self::numeric_cell(&block.rows))?;
        let validator = confirmed_by
            .clone()
            .or_else(|| self.patterns.validator(&self.splitter, &text))
            .unwrap_or_default();

        let (surname, given) = self.splitter.split(&block.name);
        let record = ValidationRecord::new(&surname, &given, &validator, &amount)?;
        Some(record.with_confirmation(confirmed_on, confirmed_by))
    }

    /// Last bare number found below the name row.
    fn numeric_cell(rows: &[&[String]]) -> Option<String> {
        rows.iter().skip(1).rev().find_map(|row| {
            row.iter().rev().find_map(|cell| {
                let cell = cell.trim();
                if cell.is_empty() || cell.chars().any(char::is_alphabetic) {
                    return None;
                }
                Some(normalize_amount(cell)).filter(|amount| !amount.is_empty())
            })
        })
    }
}
