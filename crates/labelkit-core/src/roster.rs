//! The in-memory roster and the merge engine that folds updates into it.
//!
//! Rows live in an arena addressed by [`RowId`]; merges and refreshes are
//! explicit indexed updates.

use serde::{Deserialize, Serialize};

use crate::amount::normalize_amount;
use crate::columns::{CanonicalField, ColumnMap};
use crate::dates::normalize_date;
use crate::history::{ExpirationCounts, ExpirationLookup, PersonKey, PersonStatsMap};
use crate::identity::{normalize_name, IdentityKey};
use crate::reconcile::{ComplianceStatus, Reconciler, ValidationLookup};
use crate::resolver::DobSource;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RosterRecord {
    pub surname: String,
    pub given_name: String,
    /// `DD/MM/YYYY` when known, unparseable text verbatim, else empty.
    pub dob: String,
    pub expiration: String,
    pub email: String,
    pub amount: String,
    pub status: ComplianceStatus,
    pub last_printed: Option<String>,
    pub print_count: u32,
}

impl RosterRecord {
    #[must_use]
    pub fn new(surname: &str, given_name: &str, dob: &str, expiration: &str) -> Self {
        Self {
            surname: normalize_name(surname),
            given_name: normalize_name(given_name),
            dob: normalize_date(dob),
            expiration: normalize_date(expiration),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_contact(mut self, email: &str, amount: &str) -> Self {
        self.email = email.trim().to_string();
        self.amount = normalize_amount(amount);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ComplianceStatus) -> Self {
        self.status = status;
        self
    }

    /// Build a record from one data row; `None` for rows without any name.
    #[must_use]
    pub fn from_row(columns: &ColumnMap, row: &[String]) -> Option<Self> {
        let record = Self::new(
            columns.cell(row, CanonicalField::Surname),
            columns.cell(row, CanonicalField::GivenName),
            columns.cell(row, CanonicalField::BirthDate),
            columns.cell(row, CanonicalField::Expiration),
        )
        .with_contact(
            columns.cell(row, CanonicalField::Email),
            columns.cell(row, CanonicalField::Amount),
        )
        .with_status(ComplianceStatus::parse(columns.cell(row, CanonicalField::Status)));
        if record.identity().is_empty() {
            return None;
        }
        Some(record)
    }

    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.surname, &self.given_name)
    }

    #[must_use]
    pub fn person_key(&self) -> PersonKey {
        PersonKey::new(self.identity(), &self.dob)
    }

    /// A differing non-empty date of birth means a different person.
    #[must_use]
    pub fn same_person(&self, identity: &IdentityKey, dob: &str) -> bool {
        let dob = dob.trim();
        self.identity() == *identity && (self.dob.is_empty() || dob.is_empty() || self.dob == dob)
    }
}

impl DobSource for RosterRecord {
    fn identity(&self) -> IdentityKey {
        RosterRecord::identity(self)
    }

    fn dob(&self) -> &str {
        &self.dob
    }
}

/// Conflicting non-empty expirations flag red; otherwise the update's marker stands.
fn merged_status(current_expiration: &str, update: &RosterRecord) -> ComplianceStatus {
    if !current_expiration.is_empty()
        && !update.expiration.is_empty()
        && current_expiration != update.expiration
    {
        return ComplianceStatus::Red;
    }
    update.status
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RowId(pub usize);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct MergeSummary {
    pub updated: usize,
    pub added: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PrintState {
    ToPrint,
    AlreadyPrinted,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    ToPrint,
    AlreadyPrinted,
    All,
}

impl FilterMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToPrint => "to_print",
            Self::AlreadyPrinted => "already_printed",
            Self::All => "all",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "to_print" => Some(Self::ToPrint),
            "already_printed" => Some(Self::AlreadyPrinted),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RosterFilter {
    pub surname: Option<String>,
    pub given_name: Option<String>,
    pub expiration: Option<String>,
    pub mode: FilterMode,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    records: Vec<RosterRecord>,
}

impl Roster {
    #[must_use]
    pub fn new(records: Vec<RosterRecord>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: RowId) -> Option<&RosterRecord> {
        self.records.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowId, &RosterRecord)> {
        self.records.iter().enumerate().map(|(index, record)| (RowId(index), record))
    }

    #[must_use]
    pub fn records(&self) -> &[RosterRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<RosterRecord> {
        self.records
    }

    /// Row for `identity`, preferring an exact date-of-birth match over a
    /// row where either side has no date of birth.
    #[must_use]
    pub fn find(&self, identity: &IdentityKey, dob: &str) -> Option<RowId> {
        let dob = dob.trim();
        let exact = self
            .records
            .iter()
            .position(|record| record.identity() == *identity && record.dob == dob);
        exact
            .or_else(|| self.records.iter().position(|record| record.same_person(identity, dob)))
            .map(RowId)
    }

    /// Merge a batch of update records into the roster.
    ///
    /// Matching rows get their empty or differing fields overwritten by the
    /// update's non-empty values; unknown identities are appended with no
    /// print history and keep the update's status. An existing expiration is
    /// never overwritten; a conflicting one flags the row red. Applying the
    /// same batch twice changes nothing the second time.
    pub fn apply_updates(&mut self, updates: &[RosterRecord]) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for update in updates {
            let identity = update.identity();
            if identity.is_empty() {
                continue;
            }
            match self.find(&identity, &update.dob) {
                Some(id) => {
                    if self.merge_into(id, update) {
                        summary.updated += 1;
                    }
                }
                None => {
                    let mut record = update.clone();
                    record.last_printed = None;
                    record.print_count = 0;
                    self.records.push(record);
                    summary.added += 1;
                }
            }
        }
        summary
    }

    fn merge_into(&mut self, id: RowId, update: &RosterRecord) -> bool {
        let Some(row) = self.records.get_mut(id.0) else {
            return false;
        };
        let mut changed = false;

        let status = merged_status(&row.expiration, update);
        if status.is_set() && row.status != status {
            row.status = status;
            changed = true;
        }

        for (target, value) in [
            (&mut row.dob, &update.dob),
            (&mut row.email, &update.email),
            (&mut row.amount, &update.amount),
        ] {
            if !value.is_empty() && *target != *value {
                target.clone_from(value);
                changed = true;
            }
        }
        if row.expiration.is_empty() && !update.expiration.is_empty() {
            row.expiration.clone_from(&update.expiration);
            changed = true;
        }
        changed
    }

    /// Copy lifetime print stats onto each row (exact date-of-birth match).
    pub fn apply_person_stats(&mut self, stats: &PersonStatsMap) {
        for record in &mut self.records {
            let found = stats.get(&record.identity(), &record.dob);
            record.last_printed = found.last_printed;
            record.print_count = found.print_count;
        }
    }

    /// Recompute every row's status. Without any validation export loaded
    /// every status is cleared.
    pub fn apply_statuses(
        &mut self,
        reconciler: &Reconciler,
        history: &ExpirationLookup,
        validation: &ValidationLookup,
    ) {
        for record in &mut self.records {
            record.status = if validation.is_empty() {
                ComplianceStatus::Unset
            } else {
                reconciler.compute_status(&record.identity(), history, validation)
            };
        }
    }

    /// Fill empty amounts from the validation export. Returns the rows filled.
    pub fn backfill_amounts(&mut self, validation: &ValidationLookup) -> usize {
        let mut filled = 0;
        for record in &mut self.records {
            if !record.amount.is_empty() {
                continue;
            }
            if let Some(amount) = validation.amount_for(&record.identity()) {
                record.amount = amount.to_string();
                filled += 1;
            }
        }
        filled
    }

    #[must_use]
    pub fn classify(&self, id: RowId, expiration: &str, counts: &ExpirationCounts) -> Option<PrintState> {
        let record = self.get(id)?;
        let printed = counts.printed_count(&record.identity(), &record.dob, expiration);
        Some(if printed > 0 { PrintState::AlreadyPrinted } else { PrintState::ToPrint })
    }

    /// Rows matching `filter`, in roster order.
    #[must_use]
    pub fn select(&self, filter: &RosterFilter, counts: &ExpirationCounts) -> Vec<RowId> {
        let surname = filter.surname.as_deref().map(normalize_name).unwrap_or_default();
        let given_name = filter.given_name.as_deref().map(normalize_name).unwrap_or_default();
        let expiration = filter.expiration.as_deref().map(normalize_date).unwrap_or_default();

        self.iter()
            .filter(|(_, record)| surname.is_empty() || record.surname.contains(&surname))
            .filter(|(_, record)| given_name.is_empty() || record.given_name.contains(&given_name))
            .filter(|(_, record)| expiration.is_empty() || record.expiration == expiration)
            .filter(|(id, record)| {
                let target = if expiration.is_empty() { &record.expiration } else { &expiration };
                match (filter.mode, self.classify(*id, target, counts)) {
                    (FilterMode::All, _) => true,
                    (FilterMode::ToPrint, state) => state == Some(PrintState::ToPrint),
                    (FilterMode::AlreadyPrinted, state) => state == Some(PrintState::AlreadyPrinted),
                }
            })
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::history::{DbExpiration, PersonStats};
    use crate::reconcile::{Ruleset, ValidationRecord};

    fn roster() -> Roster {
        Roster::new(vec![
            RosterRecord::new("Dupont", "Elise", "01/02/1990", "31/12/2026")
                .with_contact("elise@example.org", ""),
            RosterRecord::new("Martin", "Paul", "", "31/12/2026"),
        ])
    }

    #[test]
    fn merge_updates_existing_and_appends_new() {
        let mut roster = roster();
        let updates = vec![
            RosterRecord::new("DUPONT", "élise", "", "31/12/2026").with_contact("", "45,5"),
            RosterRecord::new("Leroy", "Anne", "", "31/12/2026"),
        ];

        let first = roster.apply_updates(&updates);
        assert_eq!(first, MergeSummary { updated: 1, added: 1 });
        assert_eq!(roster.len(), 3);
        let dupont = roster.get(RowId(0)).cloned().unwrap_or_default();
        assert_eq!(dupont.amount, "45.50");
        assert_eq!(dupont.email, "elise@example.org");
        assert_eq!(dupont.status, ComplianceStatus::Unset);
        assert_eq!(roster.records()[2].status, ComplianceStatus::Unset);

        let second = roster.apply_updates(&updates);
        assert_eq!(second, MergeSummary { updated: 0, added: 0 });
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn appended_rows_keep_their_own_status() {
        let mut roster = Roster::default();
        let updates = vec![
            RosterRecord::new("Leroy", "Anne", "", "31/12/2026").with_status(ComplianceStatus::Red),
            RosterRecord::new("Morel", "Luc", "", "31/12/2026").with_status(ComplianceStatus::Orange),
        ];
        assert_eq!(roster.apply_updates(&updates), MergeSummary { updated: 0, added: 2 });
        assert_eq!(roster.records()[0].status, ComplianceStatus::Red);
        assert_eq!(roster.records()[1].status, ComplianceStatus::Orange);
        assert_eq!(roster.apply_updates(&updates), MergeSummary::default());
    }

    #[test]
    fn matching_update_carries_its_status_onto_the_row() {
        let mut roster = roster();
        let updates = vec![
            RosterRecord::new("Martin", "Paul", "", "31/12/2026").with_status(ComplianceStatus::Green),
        ];
        assert_eq!(roster.apply_updates(&updates).updated, 1);
        assert_eq!(roster.records()[1].status, ComplianceStatus::Green);
        assert_eq!(roster.apply_updates(&updates).updated, 0);
    }

    #[test]
    fn differing_dob_is_a_different_person() {
        let mut roster = roster();
        let updates = vec![RosterRecord::new("Dupont", "Elise", "05/05/2005", "31/12/2026")];
        assert_eq!(roster.apply_updates(&updates), MergeSummary { updated: 0, added: 1 });
        assert_eq!(roster.find(&IdentityKey::new("Dupont", "Elise"), "05/05/2005"), Some(RowId(2)));
        assert_eq!(roster.find(&IdentityKey::new("Dupont", "Elise"), "01/02/1990"), Some(RowId(0)));
    }

    #[test]
    fn conflicting_expiration_flags_red_without_overwriting() {
        let mut roster = roster();
        let updates = vec![RosterRecord::new("Martin", "Paul", "", "31/12/2025")];
        assert_eq!(roster.apply_updates(&updates).updated, 1);
        let martin = roster.get(RowId(1)).cloned().unwrap_or_default();
        assert_eq!(martin.status, ComplianceStatus::Red);
        assert_eq!(martin.expiration, "31/12/2026");
        assert_eq!(roster.apply_updates(&updates).updated, 0);
    }

    #[test]
    fn stats_statuses_and_amounts_refresh_in_place() {
        let mut roster = roster();
        let mut stats = PersonStatsMap::default();
        stats.insert(
            PersonKey::new(IdentityKey::new("Dupont", "Elise"), "01/02/1990"),
            PersonStats { last_printed: Some("2026-02-01T08:00:00.000000".into()), print_count: 2 },
        );
        roster.apply_person_stats(&stats);
        assert_eq!(roster.records()[0].print_count, 2);
        assert_eq!(roster.records()[1].print_count, 0);

        let mut history = ExpirationLookup::new();
        history.insert(
            IdentityKey::new("Dupont", "Elise"),
            DbExpiration { expiration: "31/12/2026".into(), printed_at: "2026-02-01T08:00:00".into() },
        );
        history.insert(
            IdentityKey::new("Martin", "Paul"),
            DbExpiration { expiration: "31/12/2026".into(), printed_at: "2026-02-01T08:00:00".into() },
        );
        let validation =
            ValidationLookup::build(ValidationRecord::new("Dupont", "Elise", "Yann AUBER", "60"));
        let reconciler = Reconciler::new(Ruleset::Baseline, "31/12/2026", BTreeSet::new());

        roster.apply_statuses(&reconciler, &history, &validation);
        assert_eq!(roster.records()[0].status, ComplianceStatus::Green);
        assert_eq!(roster.records()[1].status, ComplianceStatus::Red);

        assert_eq!(roster.backfill_amounts(&validation), 1);
        assert_eq!(roster.records()[0].amount, "60.00");

        roster.apply_statuses(&reconciler, &history, &ValidationLookup::default());
        assert!(roster.records().iter().all(|record| !record.status.is_set()));
    }

    #[test]
    fn select_uses_per_expiration_counts_with_wildcard() {
        let roster = roster();
        let mut counts = ExpirationCounts::default();
        counts.add(PersonKey::wildcard(IdentityKey::new("Martin", "Paul")), "31/12/2026", 1);

        let to_print = roster.select(&RosterFilter::default(), &counts);
        assert_eq!(to_print, vec![RowId(0)]);

        let printed = RosterFilter { mode: FilterMode::AlreadyPrinted, ..RosterFilter::default() };
        assert_eq!(roster.select(&printed, &counts), vec![RowId(1)]);

        let by_name = RosterFilter {
            surname: Some("dup".into()),
            mode: FilterMode::All,
            ..RosterFilter::default()
        };
        assert_eq!(roster.select(&by_name, &counts), vec![RowId(0)]);

        let other_season = RosterFilter {
            expiration: Some("2027-12-31".into()),
            mode: FilterMode::All,
            ..RosterFilter::default()
        };
        assert!(roster.select(&other_season, &counts).is_empty());
    }
}
