//! File-backed inputs: rosters, validation exports, pre-registrations and
//! name-only "already printed" lists.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use labelkit_core::{
    explode_multiline_row, format_amount, normalize_header_label, parse_amount, BlockExtractor,
    HeaderMap, IdentityKey, LineExtractor, NameSplitter, RosterRecord, ValidationRecord,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::sheet::{parse_delimited, read_lines, read_rows, read_text, write_delimited};

pub const VALIDATION_EXPORT_SUFFIX: &str = "_validation.csv";
pub const VALIDATION_EXPORT_HEADER: [&str; 4] = ["nom", "prenom", "valide_par", "montant"];

/// Outcome of converting a payment listing into a validation export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionResult {
    pub records: Vec<ValidationRecord>,
    pub export_path: PathBuf,
}

/// One row of a name-only import file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameOnlyRow {
    pub surname: String,
    pub given_name: String,
    pub amount: String,
}

/// Read a roster spreadsheet (header located after banner rows).
///
/// # Errors
/// Returns an error when the file cannot be read or lacks the name columns.
pub fn load_roster(path: &Path, headers: &HeaderMap, scan_rows: usize) -> Result<Vec<RosterRecord>> {
    let rows = read_rows(path)?;
    let (header_index, columns) = headers
        .locate(&rows, scan_rows)
        .with_context(|| format!("roster {} has no usable header row", path.display()))?;

    let records = rows
        .iter()
        .skip(header_index + 1)
        .flat_map(|row| explode_multiline_row(row))
        .filter_map(|row| RosterRecord::from_row(&columns, &row))
        .collect::<Vec<_>>();
    info!(path = %path.display(), rows = records.len(), "loaded roster");
    Ok(records)
}

/// Newest `*_validation.csv` in `dir` by modification time.
#[must_use]
pub fn find_latest_validation_export(dir: &Path) -> Option<PathBuf> {
    newest_file(dir, |name| name.ends_with(VALIDATION_EXPORT_SUFFIX))
}

/// Newest `.csv` file in `dir` by modification time.
#[must_use]
pub fn find_latest_preregistration(dir: &Path) -> Option<PathBuf> {
    newest_file(dir, |name| name.to_ascii_lowercase().ends_with(".csv"))
}

fn newest_file(dir: &Path, accept: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .filter(|entry| entry.file_name().to_str().is_some_and(&accept))
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|meta| meta.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .max()
        .map(|(_, path)| path)
}

/// Amounts owed per identity from a pre-registration export
/// (`nom adherent`, `prenom adherent`, `montant tarif`), summed per person.
/// Files without those columns yield an empty map.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn load_preregistration_amounts(path: &Path) -> Result<BTreeMap<IdentityKey, Decimal>> {
    let rows = read_rows(path)?;
    let mut amounts = BTreeMap::new();
    let Some((header, body)) = rows.split_first() else {
        return Ok(amounts);
    };
    let position = |label: &str| header.iter().position(|cell| normalize_header_label(cell) == label);
    let (Some(surname), Some(given), Some(amount)) =
        (position("nom adherent"), position("prenom adherent"), position("montant tarif"))
    else {
        warn!(path = %path.display(), "pre-registration file lacks expected columns");
        return Ok(amounts);
    };

    for row in body {
        let cell = |index: usize| row.get(index).map_or("", String::as_str);
        let key = IdentityKey::new(cell(surname), cell(given));
        if key.is_empty() {
            continue;
        }
        let Some(value) = parse_amount(cell(amount)).filter(|value| !value.is_zero()) else {
            continue;
        };
        *amounts.entry(key).or_insert(Decimal::ZERO) += value;
    }
    Ok(amounts)
}

/// Read a validation export; a missing file is an empty export.
///
/// When `preregistration_dir` holds a pre-registration file, its amounts are
/// added to the exported amount of each matching member.
///
/// # Errors
/// Returns an error when an existing file cannot be read.
pub fn load_validation_export(
    path: &Path,
    preregistration_dir: Option<&Path>,
) -> Result<Vec<ValidationRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let body = read_text(path)
        .with_context(|| format!("failed to read validation export {}", path.display()))?;
    let rows = parse_delimited(&body, ';');
    let Some((header, data)) = rows.split_first() else {
        return Ok(Vec::new());
    };
    let column = |name: &str| header.iter().position(|cell| cell.trim() == name);
    let indices = VALIDATION_EXPORT_HEADER.map(column);

    let supplements = match preregistration_dir.and_then(find_latest_preregistration) {
        Some(file) => load_preregistration_amounts(&file)?,
        None => BTreeMap::new(),
    };

    let mut records = Vec::new();
    for row in data {
        let [surname, given, validated_by, amount] =
            indices.map(|index| index.and_then(|i| row.get(i)).map_or("", String::as_str));
        let Some(mut record) = ValidationRecord::new(surname, given, validated_by, amount) else {
            continue;
        };
        if let Some(extra) = supplements.get(&record.identity()) {
            let base = if record.amount.is_empty() {
                Some(Decimal::ZERO)
            } else {
                parse_amount(&record.amount)
            };
            if let Some(base) = base {
                record.amount = format_amount(base + *extra);
            }
        }
        records.push(record);
    }
    debug!(path = %path.display(), rows = records.len(), supplements = supplements.len(), "loaded validation export");
    Ok(records)
}

/// Write records as `nom;prenom;valide_par;montant`, header always present.
///
/// # Errors
/// Returns an error when the directory or file cannot be written.
pub fn write_validation_export(path: &Path, records: &[ValidationRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create export directory {}", parent.display()))?;
    }
    let mut rows = vec![VALIDATION_EXPORT_HEADER.map(ToString::to_string).to_vec()];
    rows.extend(records.iter().map(|record| {
        vec![
            record.surname.clone(),
            record.given_name.clone(),
            record.validated_by.clone(),
            record.amount.clone(),
        ]
    }));
    fs::write(path, write_delimited(&rows))
        .with_context(|| format!("failed to write validation export {}", path.display()))
}

/// Export file name for a source listing: `<stem>_validation.csv`.
#[must_use]
pub fn export_path_for(source: &Path, export_dir: &Path) -> PathBuf {
    let stem = source.file_stem().and_then(|stem| stem.to_str()).unwrap_or("validation");
    export_dir.join(format!("{stem}{VALIDATION_EXPORT_SUFFIX}"))
}

/// Extract members from a three-line payment listing and persist the export.
///
/// # Errors
/// Returns an error when the listing cannot be read, the extractor cannot be
/// built, or the export cannot be written.
pub fn extract_line_file(
    source: &Path,
    export_dir: &Path,
    splitter: NameSplitter,
) -> Result<ExtractionResult> {
    let lines = read_lines(source)?;
    let extractor = LineExtractor::new(splitter).context("failed to build line extractor")?;
    let records = extractor.extract_members(&lines);
    let export_path = export_path_for(source, export_dir);
    write_validation_export(&export_path, &records)?;
    info!(source = %source.display(), members = records.len(), export = %export_path.display(), "extracted payment listing");
    Ok(ExtractionResult { records, export_path })
}

/// Extract members from a multi-row block workbook and persist the export.
///
/// # Errors
/// Returns an error when the workbook cannot be read, the extractor cannot be
/// built, or the export cannot be written.
pub fn extract_block_file(
    source: &Path,
    export_dir: &Path,
    splitter: NameSplitter,
) -> Result<ExtractionResult> {
    let rows = read_rows(source)?;
    let extractor = BlockExtractor::new(splitter).context("failed to build block extractor")?;
    let records = extractor.extract_blocks(&rows);
    let export_path = export_path_for(source, export_dir);
    write_validation_export(&export_path, &records)?;
    info!(source = %source.display(), members = records.len(), export = %export_path.display(), "extracted block workbook");
    Ok(ExtractionResult { records, export_path })
}

/// Read `nom;prenom[;montant]` rows. A first row naming the columns and
/// blank lines are skipped; rows with both names blank are kept so callers
/// can count them.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn read_name_only_rows(path: &Path) -> Result<Vec<NameOnlyRow>> {
    let rows = read_rows(path)?;
    let mut out = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let cell = |i: usize| row.get(i).map_or("", |value| value.trim());
        if index == 0 && normalize_header_label(cell(0)) == "nom" {
            continue;
        }
        if row.len() <= 1 && cell(0).is_empty() {
            continue;
        }
        out.push(NameOnlyRow {
            surname: cell(0).to_string(),
            given_name: cell(1).to_string(),
            amount: cell(2).to_string(),
        });
    }
    Ok(out)
}
