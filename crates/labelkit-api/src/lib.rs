//! Facade tying the pure matching logic to the print ledger and to the files
//! operators hand in.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use labelkit_core::{
    build_ddn_lookup, normalize_amount, normalize_date, resolve_import_dob, AttestationContext,
    FilterMode, HeaderMap, IdentityKey, MergeSummary, PrintState, PrintStatus,
    Roster, RosterFilter, RosterRecord, ValidationLookup,
};
use labelkit_store_sqlite::{IntegrityReport, LedgerStore, NewPrintEvent, PrintEvent, SchemaStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

pub mod cache;
pub mod config;
pub mod sheet;
pub mod sources;

pub use cache::LastImport;
pub use config::AppConfig;
pub use sources::{ExtractionResult, NameOnlyRow};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordPrintRequest {
    pub surname: String,
    pub given_name: String,
    pub dob: String,
    /// Falls back to the configured default expiration when empty.
    pub expiration: String,
    pub email: String,
    pub amount: String,
    /// Generated label payload; only its checksum is stored.
    pub payload: Option<Vec<u8>>,
    pub status: PrintStatus,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshRequest {
    pub roster_path: PathBuf,
    /// Second roster whose rows are merged into the first.
    pub updates_path: Option<PathBuf>,
    /// Explicit validation export; otherwise the newest one in the export directory.
    pub validation_path: Option<PathBuf>,
    pub filter: RosterFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterRow {
    #[serde(flatten)]
    pub record: RosterRecord,
    pub status_label: String,
    pub print_state: Option<PrintState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshReport {
    pub total_rows: usize,
    pub merge: Option<MergeSummary>,
    pub validation_path: Option<PathBuf>,
    pub validation_rows: usize,
    pub amounts_backfilled: usize,
    pub mode: FilterMode,
    pub rows: Vec<RosterRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationPreview {
    pub context: AttestationContext,
    pub file_stem: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct LabelkitApi {
    config: AppConfig,
}

impl LabelkitApi {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn open_store(&self) -> Result<LedgerStore> {
        LedgerStore::open(&self.config.database_path)
    }

    fn ready_store(&self) -> Result<LedgerStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.open_store()?.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Append one print event.
    ///
    /// # Errors
    /// Returns an error when the ledger cannot be opened or written.
    pub fn record_print(&self, request: RecordPrintRequest) -> Result<i64> {
        let mut store = self.ready_store()?;
        let expiration = if request.expiration.trim().is_empty() {
            self.config.default_expiration.clone()
        } else {
            request.expiration
        };
        let mut event = NewPrintEvent::new(
            &request.surname,
            &request.given_name,
            &normalize_date(&request.dob),
            &normalize_date(&expiration),
            request.status,
        )
        .with_contact(&request.email, &normalize_amount(&request.amount));
        if let Some(payload) = request.payload.as_deref() {
            event = event.with_payload(payload);
        }
        store.record_event(&event)
    }

    /// # Errors
    /// Returns an error when the ledger cannot be opened or queried.
    pub fn list_prints(&self, expiration: Option<&str>) -> Result<Vec<PrintEvent>> {
        let expiration = expiration.map(normalize_date);
        self.ready_store()?.list_events(expiration.as_deref())
    }

    /// Record every row of a name-only list as already printed for `expiration`.
    ///
    /// Each row's date of birth comes from the ledger when it recorded exactly
    /// one, is left blank when it recorded several, and otherwise comes from
    /// `roster` when that holds a single value for the person. A missing file
    /// imports nothing.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or the ledger cannot be written.
    pub fn import_printed_names(
        &self,
        path: &Path,
        expiration: &str,
        roster: Option<&[RosterRecord]>,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        if !path.exists() {
            return Ok(summary);
        }

        let rows = sources::read_name_only_rows(path)?;
        let lookup = roster.map(build_ddn_lookup);
        let expiration = normalize_date(if expiration.trim().is_empty() {
            &self.config.default_expiration
        } else {
            expiration
        });
        let mut store = self.ready_store()?;

        for row in rows {
            let key = IdentityKey::new(&row.surname, &row.given_name);
            if key.is_empty() {
                summary.skipped += 1;
                continue;
            }
            let history = store.distinct_dobs_for(&key)?;
            let dob = resolve_import_dob(&history, lookup.as_ref(), &key);
            if dob.is_empty() {
                debug!(person = %key, recorded = history.len(), "importing without date of birth");
            }
            let event = NewPrintEvent::new(
                &row.surname,
                &row.given_name,
                &dob,
                &expiration,
                PrintStatus::Printed,
            )
            .with_contact("", &normalize_amount(&row.amount));
            store.record_event(&event)?;
            summary.imported += 1;
        }

        info!(path = %path.display(), imported = summary.imported, skipped = summary.skipped, "imported printed names");
        Ok(summary)
    }

    /// Import the configured auto-import file when it exists.
    ///
    /// # Errors
    /// Returns an error when an existing file cannot be imported.
    pub fn auto_import(&self, roster: Option<&[RosterRecord]>) -> Result<ImportSummary> {
        let path = self.config.auto_import_file.clone();
        self.import_printed_names(&path, "", roster)
    }

    /// # Errors
    /// Returns an error when the listing cannot be read or the export written.
    pub fn extract_line_file(&self, source: &Path) -> Result<ExtractionResult> {
        sources::extract_line_file(
            source,
            &self.config.validation_export_dir,
            self.config.name_splitter(),
        )
    }

    /// # Errors
    /// Returns an error when the workbook cannot be read or the export written.
    pub fn extract_block_file(&self, source: &Path) -> Result<ExtractionResult> {
        sources::extract_block_file(
            source,
            &self.config.validation_export_dir,
            self.config.name_splitter(),
        )
    }

    /// # Errors
    /// Returns an error when the roster cannot be read or lacks name columns.
    pub fn load_roster(&self, path: &Path) -> Result<Vec<RosterRecord>> {
        sources::load_roster(path, &HeaderMap::default(), self.config.header_scan_rows)
    }

    /// Load the roster, merge updates, attach history and validation, and
    /// return the rows selected by the filter.
    ///
    /// # Errors
    /// Returns an error when an input file cannot be read or the ledger fails.
    pub fn refresh(&self, request: &RefreshRequest) -> Result<RefreshReport> {
        let mut roster = Roster::new(self.load_roster(&request.roster_path)?);
        let merge = match request.updates_path.as_deref() {
            Some(path) => Some(roster.apply_updates(&self.load_roster(path)?)),
            None => None,
        };

        let validation_path = request
            .validation_path
            .clone()
            .or_else(|| sources::find_latest_validation_export(&self.config.validation_export_dir));
        let validation = match validation_path.as_deref() {
            Some(path) => ValidationLookup::build(sources::load_validation_export(
                path,
                Some(&self.config.preregistration_dir),
            )?),
            None => ValidationLookup::default(),
        };
        let amounts_backfilled = roster.backfill_amounts(&validation);

        let store = self.ready_store()?;
        roster.apply_person_stats(&store.aggregate_by_person()?);
        let history = store.latest_expiration_by_person()?;
        roster.apply_statuses(&self.config.reconciler(), &history, &validation);
        let counts = store.aggregate_by_person_and_expiration()?;

        let filter = request.filter.clone();
        let rows = roster
            .select(&filter, &counts)
            .into_iter()
            .filter_map(|id| {
                let record = roster.get(id)?.clone();
                let target = filter
                    .expiration
                    .as_deref()
                    .map_or_else(|| record.expiration.clone(), normalize_date);
                Some(RosterRow {
                    status_label: record.status.label().to_string(),
                    print_state: roster.classify(id, &target, &counts),
                    record,
                })
            })
            .collect::<Vec<_>>();

        info!(
            total = roster.len(),
            selected = rows.len(),
            validation_rows = validation.len(),
            "roster refreshed"
        );
        Ok(RefreshReport {
            total_rows: roster.len(),
            merge,
            validation_path,
            validation_rows: validation.len(),
            amounts_backfilled,
            mode: filter.mode,
            rows,
        })
    }

    /// Rendered attestation texts for a person, using the latest contact
    /// details recorded in the ledger. `None` when the person was never recorded.
    ///
    /// # Errors
    /// Returns an error when the ledger cannot be queried.
    pub fn attestation(
        &self,
        surname: &str,
        given_name: &str,
        dob: Option<&str>,
        expiration: Option<&str>,
    ) -> Result<Option<AttestationPreview>> {
        let dob = dob.map(normalize_date);
        let store = self.ready_store()?;
        let Some(contact) = store.latest_contact_for(surname, given_name, dob.as_deref())? else {
            return Ok(None);
        };
        let expiration = expiration.map_or_else(|| self.config.default_expiration.clone(), normalize_date);
        let mut context =
            AttestationContext::new(surname, given_name, &expiration, OffsetDateTime::now_utc().date())
                .with_contact(&contact);
        context.dob = dob.unwrap_or_default();

        Ok(Some(AttestationPreview {
            file_stem: context.file_stem(),
            subject: context.render(&self.config.attestation_subject),
            body: context.render(&self.config.attestation_body),
            context,
        }))
    }

    /// # Errors
    /// Returns an error when the copy or metadata cannot be written.
    pub fn cache_roster(&self, source: &Path) -> Result<LastImport> {
        cache::persist_last_import(
            source,
            &self.config.last_import_dir,
            &self.config.last_import_metadata,
        )
    }

    /// The cached roster, reloaded, when one is available.
    ///
    /// # Errors
    /// Returns an error when cached files exist but cannot be read.
    pub fn cached_roster(&self) -> Result<Option<(LastImport, Vec<RosterRecord>)>> {
        let Some(metadata) = cache::load_last_import(&self.config.last_import_metadata)? else {
            return Ok(None);
        };
        let records = self.load_roster(&metadata.cached_path)?;
        Ok(Some((metadata, records)))
    }

    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup(&self, out_file: &Path) -> Result<()> {
        self.ready_store()?
            .backup_database(out_file)
            .with_context(|| format!("backup to {} failed", out_file.display()))
    }

    /// # Errors
    /// Returns an error when the integrity probes fail to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.open_store()?.integrity_check()
    }
}
