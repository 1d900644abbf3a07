//! Read-side views over the print ledger.
//!
//! The store computes these maps from its `prints` table; everything that
//! classifies roster rows consumes them without touching the database.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrintStatus {
    Printed,
    Simulated,
}

impl PrintStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Printed => "printed",
            Self::Simulated => "simulated",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "printed" => Some(Self::Printed),
            "simulated" => Some(Self::Simulated),
            _ => None,
        }
    }
}

/// Identity plus date of birth. An empty `dob` is the wildcard value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PersonKey {
    pub identity: IdentityKey,
    pub dob: String,
}

impl PersonKey {
    #[must_use]
    pub fn new(identity: IdentityKey, dob: &str) -> Self {
        Self { identity, dob: dob.trim().to_string() }
    }

    #[must_use]
    pub fn wildcard(identity: IdentityKey) -> Self {
        Self { identity, dob: String::new() }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.dob.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PersonStats {
    /// Latest `printed` timestamp; simulated events never set it.
    pub last_printed: Option<String>,
    pub print_count: u32,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PersonStatsMap {
    entries: BTreeMap<PersonKey, PersonStats>,
}

impl PersonStatsMap {
    pub fn insert(&mut self, key: PersonKey, stats: PersonStats) {
        self.entries.insert(key, stats);
    }

    /// Fold `stats` into an existing entry: counts add up, the latest
    /// timestamp wins.
    pub fn merge(&mut self, key: PersonKey, stats: PersonStats) {
        let entry = self.entries.entry(key).or_default();
        entry.print_count += stats.print_count;
        if stats.last_printed > entry.last_printed {
            entry.last_printed = stats.last_printed;
        }
    }

    /// Stats for the exact identity and date of birth; zero when never printed.
    #[must_use]
    pub fn get(&self, identity: &IdentityKey, dob: &str) -> PersonStats {
        self.entries
            .get(&PersonKey::new(identity.clone(), dob))
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PersonKey, &PersonStats)> {
        self.entries.iter()
    }
}

/// Printed-only counts per person and expiration.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ExpirationCounts {
    entries: BTreeMap<(PersonKey, String), u32>,
}

impl ExpirationCounts {
    pub fn add(&mut self, key: PersonKey, expiration: &str, count: u32) {
        *self.entries.entry((key, expiration.trim().to_string())).or_default() += count;
    }

    /// Count for the exact date of birth, falling back to the wildcard row.
    ///
    /// The fallback matches name-only imports recorded without a birth date,
    /// at the cost of merging homonyms that both lack one.
    #[must_use]
    pub fn printed_count(&self, identity: &IdentityKey, dob: &str, expiration: &str) -> u32 {
        let expiration = expiration.trim().to_string();
        let exact = self
            .entries
            .get(&(PersonKey::new(identity.clone(), dob), expiration.clone()))
            .copied()
            .unwrap_or(0);
        if exact > 0 {
            return exact;
        }
        self.entries
            .get(&(PersonKey::wildcard(identity.clone()), expiration))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expiration of the most recent ledger event for one identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DbExpiration {
    pub expiration: String,
    pub printed_at: String,
}

pub type ExpirationLookup = BTreeMap<IdentityKey, DbExpiration>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ContactInfo {
    pub email: String,
    pub amount: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dupont() -> IdentityKey {
        IdentityKey::new("Dupont", "Jean")
    }

    #[test]
    fn print_status_round_trips_through_text() {
        for status in [PrintStatus::Printed, PrintStatus::Simulated] {
            assert_eq!(PrintStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PrintStatus::parse("PRINTED"), None);
    }

    #[test]
    fn person_stats_default_to_zero() {
        let mut map = PersonStatsMap::default();
        map.insert(
            PersonKey::new(dupont(), "01/01/1990"),
            PersonStats { last_printed: Some("2026-01-02T10:00:00.000000".into()), print_count: 2 },
        );
        assert_eq!(map.get(&dupont(), " 01/01/1990 ").print_count, 2);
        assert_eq!(map.get(&dupont(), "").print_count, 0);
        assert!(map.get(&dupont(), "").last_printed.is_none());
    }

    #[test]
    fn merge_adds_counts_and_keeps_latest_timestamp() {
        let mut map = PersonStatsMap::default();
        let key = PersonKey::new(dupont(), "");
        map.merge(
            key.clone(),
            PersonStats { last_printed: Some("2026-03-01T00:00:00.000000".into()), print_count: 1 },
        );
        map.merge(key.clone(), PersonStats { last_printed: None, print_count: 0 });
        map.merge(
            key,
            PersonStats { last_printed: Some("2026-01-01T00:00:00.000000".into()), print_count: 2 },
        );
        let stats = map.get(&dupont(), "");
        assert_eq!(stats.print_count, 3);
        assert_eq!(stats.last_printed.as_deref(), Some("2026-03-01T00:00:00.000000"));
    }

    #[test]
    fn printed_count_falls_back_to_wildcard_dob() {
        let mut counts = ExpirationCounts::default();
        counts.add(PersonKey::wildcard(dupont()), "31/12/2026", 1);
        counts.add(PersonKey::new(dupont(), "01/01/1990"), "31/12/2025", 3);

        assert_eq!(counts.printed_count(&dupont(), "01/01/1990", "31/12/2026"), 1);
        assert_eq!(counts.printed_count(&dupont(), "", "31/12/2026"), 1);
        assert_eq!(counts.printed_count(&dupont(), "01/01/1990", "31/12/2025"), 3);
        assert_eq!(counts.printed_count(&dupont(), "", "31/12/2025"), 0);
    }

    #[test]
    fn zero_exact_count_still_consults_wildcard() {
        let mut counts = ExpirationCounts::default();
        counts.add(PersonKey::new(dupont(), "01/01/1990"), "31/12/2026", 0);
        counts.add(PersonKey::wildcard(dupont()), "31/12/2026", 2);
        assert_eq!(counts.printed_count(&dupont(), "01/01/1990", "31/12/2026"), 2);
    }
}
