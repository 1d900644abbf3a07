//! Record matching and status reconciliation for membership label printing.
//!
//! Everything in this crate is pure: callers hand in plain records and get
//! plain records back. Persistence lives in `labelkit-store-sqlite`, file
//! reading in `labelkit-api`.

pub mod amount;
pub mod attestation;
pub mod columns;
pub mod dates;
pub mod extract;
pub mod history;
pub mod identity;
pub mod reconcile;
pub mod resolver;
pub mod roster;
pub mod splitter;

pub use amount::{display_amount, format_amount, normalize_amount, parse_amount};
pub use attestation::AttestationContext;
pub use columns::{explode_multiline_row, CanonicalField, ColumnMap, HeaderMap};
pub use dates::{format_date, from_excel_serial, normalize_date, parse_date, season_label};
pub use extract::{BlockExtractor, LineExtractor};
pub use history::{
    ContactInfo, DbExpiration, ExpirationCounts, ExpirationLookup, PersonKey, PersonStats,
    PersonStatsMap, PrintStatus,
};
pub use identity::{normalize_header_label, normalize_name, strip_accents, IdentityKey};
pub use reconcile::{
    parse_validator_names, ComplianceStatus, Reconciler, Ruleset, ValidationLookup,
    ValidationRecord,
};
pub use resolver::{build_ddn_lookup, resolve_import_dob, DobLookup, DobResolution, DobSource};
pub use roster::{
    FilterMode, MergeSummary, PrintState, Roster, RosterFilter, RosterRecord, RowId,
};
pub use splitter::{NameSplitter, SplitterConfig};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("missing required columns {missing:?}; available columns: {available:?}")]
    MissingColumns { missing: Vec<String>, available: Vec<String> },
    #[error("invalid extraction pattern: {0}")]
    Pattern(String),
}
