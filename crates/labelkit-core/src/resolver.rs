use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identity::IdentityKey;

/// Anything carrying a person's names and an optional date of birth.
pub trait DobSource {
    fn identity(&self) -> IdentityKey;
    fn dob(&self) -> &str;
}

impl<T: DobSource + ?Sized> DobSource for &T {
    fn identity(&self) -> IdentityKey {
        (**self).identity()
    }

    fn dob(&self) -> &str {
        (**self).dob()
    }
}

impl DobSource for (&str, &str, &str) {
    fn identity(&self) -> IdentityKey {
        IdentityKey::new(self.0, self.1)
    }

    fn dob(&self) -> &str {
        self.2
    }
}

/// No distinction is made between "never observed" and "conflicting".
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DobResolution {
    Known(String),
    Unknown,
}

impl DobResolution {
    #[must_use]
    pub fn known(&self) -> Option<&str> {
        match self {
            Self::Known(value) => Some(value.as_str()),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DobLookup {
    entries: BTreeMap<IdentityKey, DobResolution>,
}

impl DobLookup {
    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&DobResolution> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn known(&self, key: &IdentityKey) -> Option<&str> {
        self.entries.get(key).and_then(DobResolution::known)
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

/// Resolve one date of birth per identity across `records`.
///
/// Exactly one distinct non-empty value resolves to `Known`; none or several
/// resolve to `Unknown`. Records without any name are ignored.
pub fn build_ddn_lookup<I, R>(records: I) -> DobLookup
where
    I: IntoIterator<Item = R>,
    R: DobSource,
{
    let mut observed: BTreeMap<IdentityKey, BTreeSet<String>> = BTreeMap::new();
    for record in records {
        let key = record.identity();
        if key.is_empty() {
            continue;
        }
        let values = observed.entry(key).or_default();
        let dob = record.dob().trim();
        if !dob.is_empty() {
            values.insert(dob.to_string());
        }
    }

    let entries = observed
        .into_iter()
        .map(|(key, values)| {
            let resolution = match values.len() {
                1 => values.into_iter().next().map_or(DobResolution::Unknown, DobResolution::Known),
                _ => DobResolution::Unknown,
            };
            (key, resolution)
        })
        .collect();
    DobLookup { entries }
}

/// Pick the date of birth to record for a name-only import row.
///
/// Ledger evidence outranks the loaded roster: a single recorded value wins,
/// several recorded values fall back to the empty wildcard, and only an
/// identity absent from the ledger consults the roster lookup.
#[must_use]
pub fn resolve_import_dob(
    history_dobs: &BTreeSet<String>,
    roster: Option<&DobLookup>,
    key: &IdentityKey,
) -> String {
    let recorded = history_dobs
        .iter()
        .map(|dob| dob.trim())
        .filter(|dob| !dob.is_empty())
        .collect::<BTreeSet<_>>();
    match recorded.len() {
        1 => recorded.into_iter().next().unwrap_or_default().to_string(),
        0 => roster.and_then(|lookup| lookup.known(key)).unwrap_or_default().to_string(),
        _ => String::new(),
    }
}
