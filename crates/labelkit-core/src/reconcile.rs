use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::amount::normalize_amount;
use crate::dates::normalize_date;
use crate::history::ExpirationLookup;
use crate::identity::{normalize_name, strip_accents, IdentityKey};

/// One confirmed payment taken from a validation export.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationRecord {
    pub surname: String,
    pub given_name: String,
    pub validated_by: String,
    /// Two fractional digits, or empty.
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<String>,
}

impl ValidationRecord {
    /// Returns `None` when both names normalize to empty.
    #[must_use]
    pub fn new(surname: &str, given_name: &str, validated_by: &str, amount: &str) -> Option<Self> {
        let surname = normalize_name(surname);
        let given_name = normalize_name(given_name);
        if surname.is_empty() && given_name.is_empty() {
            return None;
        }
        Some(Self {
            surname,
            given_name,
            validated_by: validated_by.trim().to_string(),
            amount: normalize_amount(amount),
            confirmed_on: None,
            confirmed_by: None,
        })
    }

    #[must_use]
    pub fn with_confirmation(mut self, on: Option<String>, by: Option<String>) -> Self {
        self.confirmed_on = on.filter(|value| !value.trim().is_empty());
        self.confirmed_by = by.filter(|value| !value.trim().is_empty());
        self
    }

    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.surname, &self.given_name)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ValidationLookup {
    entries: BTreeMap<IdentityKey, ValidationRecord>,
}

impl ValidationLookup {
    /// Later records for the same identity replace earlier ones.
    pub fn build<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ValidationRecord>,
    {
        let mut entries = BTreeMap::new();
        for record in records {
            let key = record.identity();
            if key.is_empty() {
                continue;
            }
            entries.insert(key, record);
        }
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&ValidationRecord> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn amount_for(&self, key: &IdentityKey) -> Option<&str> {
        self.entries
            .get(key)
            .map(|record| record.amount.trim())
            .filter(|amount| !amount.is_empty())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ValidationRecord> {
        self.entries.values()
    }
}

/// Split an allowlist such as `"Yann; Élise, Marc/Anne"` into folded names.
#[must_use]
pub fn parse_validator_names(raw: &str) -> BTreeSet<String> {
    raw.split([';', ',', '/', '\n', '\r'])
        .map(|token| strip_accents(token.trim()).to_uppercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn fold_tokens(text: &str) -> BTreeSet<String> {
    strip_accents(text)
        .to_uppercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    #[default]
    Unset,
    Question,
    Red,
    Orange,
    Green,
}

impl ComplianceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Question => "question",
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Green => "green",
        }
    }

    /// Lenient reading of a status cell coming from a spreadsheet.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "green" | "ok" | "valid" | "yes" | "true" | "1" | "y" | "oui" => Self::Green,
            "red" | "error" | "ko" | "no" | "false" | "0" | "n" | "non" => Self::Red,
            "orange" | "warning" | "amber" => Self::Orange,
            "question" | "unknown" | "?" => Self::Question,
            _ => Self::Unset,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Green => "Valide",
            Self::Red => "Invalide",
            Self::Orange | Self::Question => "A verifier",
        }
    }

    #[must_use]
    pub fn is_set(self) -> bool {
        self != Self::Unset
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Ruleset {
    #[default]
    Baseline,
    ValidatorAware,
}

impl Ruleset {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::ValidatorAware => "validator_aware",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "baseline" => Some(Self::Baseline),
            "validator_aware" => Some(Self::ValidatorAware),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    ruleset: Ruleset,
    configured_expiration: String,
    validators: BTreeSet<String>,
}

impl Reconciler {
    #[must_use]
    pub fn new(ruleset: Ruleset, configured_expiration: &str, validators: BTreeSet<String>) -> Self {
        Self {
            ruleset,
            configured_expiration: normalize_date(configured_expiration),
            validators,
        }
    }

    #[must_use]
    pub fn ruleset(&self) -> Ruleset {
        self.ruleset
    }

    #[must_use]
    pub fn configured_expiration(&self) -> &str {
        &self.configured_expiration
    }

    #[must_use]
    pub fn compute_status(
        &self,
        key: &IdentityKey,
        history: &ExpirationLookup,
        validation: &ValidationLookup,
    ) -> ComplianceStatus {
        if key.is_empty() {
            return ComplianceStatus::Unset;
        }
        let printed = history.get(key);
        let validated = validation.get(key);

        match (printed, validated) {
            (None, None | Some(_)) => ComplianceStatus::Unset,
            (Some(_), None) => match self.ruleset {
                Ruleset::Baseline => ComplianceStatus::Red,
                Ruleset::ValidatorAware => ComplianceStatus::Question,
            },
            (Some(entry), Some(record)) => {
                let same_expiration =
                    normalize_date(&entry.expiration) == self.configured_expiration;
                match self.ruleset {
                    Ruleset::Baseline if same_expiration => ComplianceStatus::Green,
                    Ruleset::Baseline => ComplianceStatus::Orange,
                    Ruleset::ValidatorAware if self.validators.is_empty() => ComplianceStatus::Green,
                    Ruleset::ValidatorAware if !same_expiration => ComplianceStatus::Red,
                    Ruleset::ValidatorAware if self.accepts_validator(&record.validated_by) => {
                        ComplianceStatus::Green
                    }
                    Ruleset::ValidatorAware => ComplianceStatus::Orange,
                }
            }
        }
    }

    /// Every token of some allowlisted name must appear in the free-text
    /// validator field.
    fn accepts_validator(&self, validated_by: &str) -> bool {
        let observed = fold_tokens(validated_by);
        self.validators.iter().any(|name| {
            let wanted = fold_tokens(name);
            !wanted.is_empty() && wanted.is_subset(&observed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DbExpiration;

    fn history_for(key: &IdentityKey, expiration: &str) -> ExpirationLookup {
        let mut lookup = ExpirationLookup::new();
        lookup.insert(
            key.clone(),
            DbExpiration {
                expiration: expiration.to_string(),
                printed_at: "2026-01-15T09:30:00.000000".to_string(),
            },
        );
        lookup
    }

    fn validation_for(surname: &str, given: &str, by: &str) -> ValidationLookup {
        ValidationLookup::build(ValidationRecord::new(surname, given, by, "45,5"))
    }

    #[test]
    fn validation_record_requires_a_name() {
        assert!(ValidationRecord::new(" ", "", "Yann", "10").is_none());
        let record = ValidationRecord::new("dupont", "élise", " Yann AUBER ", "45,5");
        let record = record.unwrap_or_default();
        assert_eq!(record.surname, "DUPONT");
        assert_eq!(record.given_name, "ELISE");
        assert_eq!(record.validated_by, "Yann AUBER");
        assert_eq!(record.amount, "45.50");
    }

    #[test]
    fn baseline_ruleset_end_to_end() {
        let key = IdentityKey::new("Dupont", "Elise");
        let history = history_for(&key, "2026-12-31");
        let validation = validation_for("DUPONT", "Elise", "");

        let current = Reconciler::new(Ruleset::Baseline, "31/12/2026", BTreeSet::new());
        assert_eq!(current.compute_status(&key, &history, &validation), ComplianceStatus::Green);

        let next = Reconciler::new(Ruleset::Baseline, "31/12/2027", BTreeSet::new());
        assert_eq!(next.compute_status(&key, &history, &validation), ComplianceStatus::Orange);

        let empty = ValidationLookup::default();
        assert_eq!(current.compute_status(&key, &history, &empty), ComplianceStatus::Red);
        assert_eq!(
            current.compute_status(&key, &ExpirationLookup::new(), &empty),
            ComplianceStatus::Unset
        );
        assert_eq!(
            current.compute_status(&key, &ExpirationLookup::new(), &validation),
            ComplianceStatus::Unset
        );
    }

    #[test]
    fn unparseable_expirations_compare_as_text() {
        let key = IdentityKey::new("Dupont", "Elise");
        let history = history_for(&key, "fin de saison");
        let validation = validation_for("Dupont", "Elise", "");
        let reconciler = Reconciler::new(Ruleset::Baseline, " fin de saison", BTreeSet::new());
        assert_eq!(reconciler.compute_status(&key, &history, &validation), ComplianceStatus::Green);
    }

    #[test]
    fn validator_aware_ruleset_checks_allowlist() {
        let key = IdentityKey::new("Dupont", "Elise");
        let history = history_for(&key, "31/12/2026");
        let validators = parse_validator_names("Yann; Anne-Marie");

        let reconciler = Reconciler::new(Ruleset::ValidatorAware, "31/12/2026", validators.clone());
        let by_yann = validation_for("Dupont", "Elise", "Yann AUBER");
        assert_eq!(reconciler.compute_status(&key, &history, &by_yann), ComplianceStatus::Green);

        let by_anne_marie = validation_for("Dupont", "Elise", "anne-marie léger");
        assert_eq!(
            reconciler.compute_status(&key, &history, &by_anne_marie),
            ComplianceStatus::Green
        );

        let by_other = validation_for("Dupont", "Elise", "Marc Yannick");
        assert_eq!(reconciler.compute_status(&key, &history, &by_other), ComplianceStatus::Orange);

        let missing = ValidationLookup::default();
        assert_eq!(reconciler.compute_status(&key, &history, &missing), ComplianceStatus::Question);

        let next = Reconciler::new(Ruleset::ValidatorAware, "31/12/2027", validators);
        assert_eq!(next.compute_status(&key, &history, &by_yann), ComplianceStatus::Red);
    }

    #[test]
    fn validator_aware_with_empty_allowlist_is_green() {
        let key = IdentityKey::new("Dupont", "Elise");
        let history = history_for(&key, "31/12/2026");
        let validation = validation_for("Dupont", "Elise", "");
        let reconciler = Reconciler::new(Ruleset::ValidatorAware, "31/12/2026", BTreeSet::new());
        assert_eq!(reconciler.compute_status(&key, &history, &validation), ComplianceStatus::Green);

        let next_season = Reconciler::new(Ruleset::ValidatorAware, "31/12/2027", BTreeSet::new());
        assert_eq!(next_season.compute_status(&key, &history, &validation), ComplianceStatus::Green);
    }

    #[test]
    fn empty_identity_is_always_unset() {
        let key = IdentityKey::new("", "");
        let history = history_for(&key, "31/12/2026");
        for ruleset in [Ruleset::Baseline, Ruleset::ValidatorAware] {
            let reconciler = Reconciler::new(ruleset, "31/12/2026", BTreeSet::new());
            assert_eq!(
                reconciler.compute_status(&key, &history, &ValidationLookup::default()),
                ComplianceStatus::Unset
            );
        }
    }

    #[test]
    fn validator_names_are_folded_and_split() {
        let names = parse_validator_names("Yann; élise,Marc/\nAnne ;;");
        let expected = ["ANNE", "ELISE", "MARC", "YANN"]
            .into_iter()
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>();
        assert_eq!(names, expected);
    }

    #[test]
    fn status_cells_parse_leniently() {
        assert_eq!(ComplianceStatus::parse(" Oui "), ComplianceStatus::Green);
        assert_eq!(ComplianceStatus::parse("KO"), ComplianceStatus::Red);
        assert_eq!(ComplianceStatus::parse("amber"), ComplianceStatus::Orange);
        assert_eq!(ComplianceStatus::parse("?"), ComplianceStatus::Question);
        assert_eq!(ComplianceStatus::parse("null"), ComplianceStatus::Unset);
        assert_eq!(ComplianceStatus::Question.label(), "A verifier");
        assert_eq!(Ruleset::parse(Ruleset::ValidatorAware.as_str()), Some(Ruleset::ValidatorAware));
    }
}
