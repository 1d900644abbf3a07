use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use labelkit_core::{
    normalize_name, ContactInfo, DbExpiration, ExpirationCounts, ExpirationLookup, IdentityKey,
    PersonKey, PersonStats, PersonStatsMap, PrintStatus,
};
use rusqlite::{params, Connection, DatabaseName, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{info, warn};

const LATEST_SCHEMA_VERSION: i64 = 3;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS prints (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  nom TEXT NOT NULL,
  prenom TEXT NOT NULL,
  ddn TEXT NOT NULL DEFAULT '',
  expire TEXT NOT NULL DEFAULT '',
  zpl_checksum TEXT,
  status TEXT NOT NULL DEFAULT 'printed' CHECK (status IN ('printed', 'simulated')),
  printed_at TEXT NOT NULL
);
";

const MIGRATION_003_SQL: &str = r"
DROP INDEX IF EXISTS ux_prints_person_expire;
CREATE INDEX IF NOT EXISTS ix_prints_person_expire ON prints(nom, prenom, ddn, expire);
CREATE INDEX IF NOT EXISTS ix_prints_person ON prints(nom, prenom, ddn);
CREATE INDEX IF NOT EXISTS ix_prints_status_time ON prints(status, printed_at);
DROP VIEW IF EXISTS v_person_stats;
CREATE VIEW v_person_stats AS
SELECT
  nom,
  prenom,
  ddn,
  MAX(CASE WHEN status = 'printed' THEN printed_at END) AS last_print,
  SUM(CASE WHEN status = 'printed' THEN 1 ELSE 0 END) AS cnt
FROM prints
GROUP BY nom, prenom, ddn;
";

const PERSON_STATS_INLINE_SQL: &str = r"
SELECT
  nom,
  prenom,
  ddn,
  MAX(CASE WHEN status = 'printed' THEN printed_at END) AS last_print,
  SUM(CASE WHEN status = 'printed' THEN 1 ELSE 0 END) AS cnt
FROM prints
GROUP BY nom, prenom, ddn
";

const PRINT_EVENT_COLUMNS: &str =
    "id, nom, prenom, ddn, expire, email, montant, zpl_checksum, status, printed_at";

/// Append-only ledger of label print events.
pub struct LedgerStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

/// Event to append. Names are normalized on write; other fields are trimmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPrintEvent {
    pub surname: String,
    pub given_name: String,
    pub dob: String,
    pub expiration: String,
    pub email: String,
    pub amount: String,
    pub payload_checksum: Option<String>,
    pub status: PrintStatus,
}

impl NewPrintEvent {
    #[must_use]
    pub fn new(
        surname: &str,
        given_name: &str,
        dob: &str,
        expiration: &str,
        status: PrintStatus,
    ) -> Self {
        Self {
            surname: surname.to_string(),
            given_name: given_name.to_string(),
            dob: dob.to_string(),
            expiration: expiration.to_string(),
            email: String::new(),
            amount: String::new(),
            payload_checksum: None,
            status,
        }
    }

    #[must_use]
    pub fn with_contact(mut self, email: &str, amount: &str) -> Self {
        self.email = email.to_string();
        self.amount = amount.to_string();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload_checksum = Some(payload_checksum(payload));
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrintEvent {
    pub id: i64,
    pub surname: String,
    pub given_name: String,
    pub dob: String,
    pub expiration: String,
    pub email: String,
    pub amount: String,
    pub payload_checksum: Option<String>,
    pub status: PrintStatus,
    pub printed_at: String,
}

impl PrintEvent {
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.surname, &self.given_name)
    }
}

/// `sha256:<hex>` digest of a generated label payload.
#[must_use]
pub fn payload_checksum(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    format!("sha256:{digest:x}")
}

impl LedgerStore {
    /// Open a SQLite-backed ledger and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            if path != Path::new(":memory:") {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create parent directory for {}", path.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Open the ledger and bring its schema up to date.
    ///
    /// # Errors
    /// Returns an error when opening or migrating fails.
    pub fn initialize(path: &Path) -> Result<Self> {
        let mut store = Self::open(path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations. Safe to run on every start: each step
    /// only adds what is missing and never touches existing rows.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        let starting_version = version;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version < 3 {
            self.apply_migration_3()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if starting_version != version {
            info!(from = starting_version, to = version, "ledger schema migrated");
        }
        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        if table_exists(&self.conn, "prints")? {
            // Ledger created before migrations were tracked.
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        let tx = self.conn.unchecked_transaction().context("failed to start migration 1")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration 1")?;
        Ok(1)
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration 2")?;
        for column in ["email", "montant"] {
            if !table_has_column(&tx, "prints", column)? {
                tx.execute_batch(&format!("ALTER TABLE prints ADD COLUMN {column} TEXT"))
                    .with_context(|| format!("failed to add prints.{column}"))?;
            }
        }
        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration 2")
    }

    fn apply_migration_3(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration 3")?;
        tx.execute_batch(MIGRATION_003_SQL).context("failed to apply migration 3")?;
        record_schema_version(&tx, 3)?;
        tx.commit().context("failed to commit migration 3")
    }

    /// Whether the `prints` table exists.
    ///
    /// # Errors
    /// Returns an error when the schema catalog cannot be queried.
    pub fn is_initialized(&self) -> Result<bool> {
        table_exists(&self.conn, "prints")
    }

    fn readable(&self, operation: &str) -> Result<bool> {
        if self.is_initialized()? {
            return Ok(true);
        }
        warn!(operation, "print ledger is not initialized; returning empty result");
        Ok(false)
    }

    /// Append one event in its own transaction and return its row id.
    ///
    /// Duplicates are accepted: every reprint is a distinct event.
    ///
    /// # Errors
    /// Returns an error when the ledger is not initialized or the insert fails.
    pub fn record_event(&mut self, event: &NewPrintEvent) -> Result<i64> {
        let printed_at = now_timestamp()?;
        let tx = self.conn.transaction().context("failed to start print event transaction")?;
        tx.execute(
            "INSERT INTO prints(nom, prenom, ddn, expire, email, montant, zpl_checksum, status, printed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                normalize_name(&event.surname),
                normalize_name(&event.given_name),
                event.dob.trim(),
                event.expiration.trim(),
                event.email.trim(),
                event.amount.trim(),
                event.payload_checksum,
                event.status.as_str(),
                printed_at,
            ],
        )
        .context("failed to insert print event")?;
        let id = tx.last_insert_rowid();
        tx.commit().context("failed to commit print event")?;
        Ok(id)
    }

    /// Events, newest first, optionally restricted to one expiration.
    ///
    /// # Errors
    /// Returns an error when the query fails or a row carries an unknown status.
    pub fn list_events(&self, expiration: Option<&str>) -> Result<Vec<PrintEvent>> {
        if !self.readable("list_events")? {
            return Ok(Vec::new());
        }

        let expiration = expiration.map(str::trim).filter(|value| !value.is_empty());
        let sql = match expiration {
            Some(_) => format!(
                "SELECT {PRINT_EVENT_COLUMNS} FROM prints WHERE expire = ?1 ORDER BY printed_at DESC, id DESC"
            ),
            None => format!("SELECT {PRINT_EVENT_COLUMNS} FROM prints ORDER BY printed_at DESC, id DESC"),
        };
        let mut stmt = self.conn.prepare(&sql).context("failed to prepare print event query")?;
        let mut rows = match expiration {
            Some(value) => stmt.query(params![value])?,
            None => stmt.query([])?,
        };

        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(print_event_from_row(row)?);
        }
        Ok(events)
    }

    /// Lifetime printed-only stats per identity and date of birth.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn aggregate_by_person(&self) -> Result<PersonStatsMap> {
        let mut stats = PersonStatsMap::default();
        if !self.readable("aggregate_by_person")? {
            return Ok(stats);
        }

        let sql = if view_exists(&self.conn, "v_person_stats")? {
            "SELECT nom, prenom, ddn, last_print, cnt FROM v_person_stats"
        } else {
            PERSON_STATS_INLINE_SQL
        };
        let mut stmt = self.conn.prepare(sql).context("failed to prepare person stats query")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key = person_key_from_row(row)?;
            let last_printed: Option<String> = row.get(3)?;
            let count: Option<i64> = row.get(4)?;
            stats.merge(
                key,
                PersonStats {
                    last_printed: last_printed.filter(|value| !value.trim().is_empty()),
                    print_count: count_from_sql(count)?,
                },
            );
        }
        Ok(stats)
    }

    /// Printed-only counts per identity, date of birth and expiration.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn aggregate_by_person_and_expiration(&self) -> Result<ExpirationCounts> {
        let mut counts = ExpirationCounts::default();
        if !self.readable("aggregate_by_person_and_expiration")? {
            return Ok(counts);
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT nom, prenom, ddn, expire,
                        SUM(CASE WHEN status = 'printed' THEN 1 ELSE 0 END) AS cnt
                 FROM prints
                 GROUP BY nom, prenom, ddn, expire",
            )
            .context("failed to prepare per-expiration count query")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key = person_key_from_row(row)?;
            let expiration: Option<String> = row.get(3)?;
            let count: Option<i64> = row.get(4)?;
            counts.add(key, expiration.as_deref().unwrap_or_default(), count_from_sql(count)?);
        }
        Ok(counts)
    }

    /// Expiration of the most recent event per identity, ties going to the
    /// later insert.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn latest_expiration_by_person(&self) -> Result<ExpirationLookup> {
        let mut lookup = ExpirationLookup::new();
        if !self.readable("latest_expiration_by_person")? {
            return Ok(lookup);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT nom, prenom, expire, printed_at FROM prints ORDER BY printed_at DESC, id DESC")
            .context("failed to prepare latest expiration query")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key = identity_from_row(row)?;
            if key.is_empty() || lookup.contains_key(&key) {
                continue;
            }
            let expiration: Option<String> = row.get(2)?;
            let printed_at: Option<String> = row.get(3)?;
            lookup.insert(
                key,
                DbExpiration {
                    expiration: expiration.unwrap_or_default().trim().to_string(),
                    printed_at: printed_at.unwrap_or_default().trim().to_string(),
                },
            );
        }
        Ok(lookup)
    }

    /// Distinct non-empty dates of birth ever recorded for `identity`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn distinct_dobs_for(&self, identity: &IdentityKey) -> Result<BTreeSet<String>> {
        let mut dobs = BTreeSet::new();
        if !self.readable("distinct_dobs_for")? {
            return Ok(dobs);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT nom, prenom, ddn FROM prints")
            .context("failed to prepare distinct dob query")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            if identity_from_row(row)? != *identity {
                continue;
            }
            let dob: Option<String> = row.get(2)?;
            let dob = dob.unwrap_or_default().trim().to_string();
            if !dob.is_empty() {
                dobs.insert(dob);
            }
        }
        Ok(dobs)
    }

    /// Most recent contact details for a person.
    ///
    /// Email and amount are each taken from the newest event carrying a
    /// non-empty value for that field, which may be two different events.
    /// A blank `dob` does not constrain the match.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn latest_contact_for(
        &self,
        surname: &str,
        given_name: &str,
        dob: Option<&str>,
    ) -> Result<Option<ContactInfo>> {
        if !self.readable("latest_contact_for")? {
            return Ok(None);
        }

        let identity = IdentityKey::new(surname, given_name);
        let dob = dob.map(str::trim).filter(|value| !value.is_empty());
        let mut stmt = self
            .conn
            .prepare(
                "SELECT nom, prenom, ddn, email, montant FROM prints ORDER BY printed_at DESC, id DESC",
            )
            .context("failed to prepare latest contact query")?;
        let mut rows = stmt.query([])?;

        let mut matched = false;
        let mut email: Option<String> = None;
        let mut amount: Option<String> = None;
        while let Some(row) = rows.next()? {
            if identity_from_row(row)? != identity {
                continue;
            }
            let row_dob: Option<String> = row.get(2)?;
            if dob.is_some_and(|wanted| row_dob.as_deref().map(str::trim) != Some(wanted)) {
                continue;
            }
            matched = true;
            if email.is_none() {
                email = non_empty(row.get(3)?);
            }
            if amount.is_none() {
                amount = non_empty(row.get(4)?);
            }
            if email.is_some() && amount.is_some() {
                break;
            }
        }

        Ok(matched.then(|| ContactInfo {
            email: email.unwrap_or_default(),
            amount: amount.unwrap_or_default(),
        }))
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

fn identity_from_row(row: &Row<'_>) -> Result<IdentityKey> {
    let surname: Option<String> = row.get(0)?;
    let given_name: Option<String> = row.get(1)?;
    Ok(IdentityKey::new(
        surname.as_deref().unwrap_or_default(),
        given_name.as_deref().unwrap_or_default(),
    ))
}

fn person_key_from_row(row: &Row<'_>) -> Result<PersonKey> {
    let identity = identity_from_row(row)?;
    let dob: Option<String> = row.get(2)?;
    Ok(PersonKey::new(identity, dob.as_deref().unwrap_or_default()))
}

fn count_from_sql(count: Option<i64>) -> Result<u32> {
    u32::try_from(count.unwrap_or(0)).context("print count out of range")
}

fn print_event_from_row(row: &Row<'_>) -> Result<PrintEvent> {
    let status_raw: String = row.get(8)?;
    let status = PrintStatus::parse(status_raw.trim())
        .ok_or_else(|| anyhow!("unknown print status in ledger: {status_raw}"))?;
    let text = |index: usize| -> Result<String> {
        let value: Option<String> = row.get(index)?;
        Ok(value.unwrap_or_default())
    };
    Ok(PrintEvent {
        id: row.get(0)?,
        surname: text(1)?,
        given_name: text(2)?,
        dob: text(3)?,
        expiration: text(4)?,
        email: text(5)?,
        amount: text(6)?,
        payload_checksum: row.get(7)?,
        status,
        printed_at: text(9)?,
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    schema_object_exists(conn, "table", table_name)
}

fn view_exists(conn: &Connection, view_name: &str) -> Result<bool> {
    schema_object_exists(conn, "view", view_name)
}

fn schema_object_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
            params![kind, name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if {kind} exists: {name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "prints")? {
        return Ok((0, false));
    }

    let has_contact_columns =
        table_has_column(conn, "prints", "email")? && table_has_column(conn, "prints", "montant")?;
    if has_contact_columns && view_exists(conn, "v_person_stats")? {
        return Ok((3, true));
    }
    if has_contact_columns {
        return Ok((2, true));
    }
    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

/// Naive UTC ISO-8601 timestamp with microseconds and no offset suffix.
fn now_timestamp() -> Result<String> {
    let format = time::format_description::parse(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]",
    )
    .context("invalid ledger timestamp format")?;
    OffsetDateTime::now_utc().format(&format).context("failed to format ledger timestamp")
}
