use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::normalize_header_label;
use crate::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Surname,
    GivenName,
    BirthDate,
    Expiration,
    Email,
    Amount,
    Status,
}

impl CanonicalField {
    pub const ALL: [Self; 7] = [
        Self::Surname,
        Self::GivenName,
        Self::BirthDate,
        Self::Expiration,
        Self::Email,
        Self::Amount,
        Self::Status,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Surname => "nom",
            Self::GivenName => "prenom",
            Self::BirthDate => "date_de_naissance",
            Self::Expiration => "expire_le",
            Self::Email => "email",
            Self::Amount => "montant",
            Self::Status => "erreur_valide",
        }
    }

    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(self, Self::Surname | Self::GivenName)
    }
}

const SYNONYMS: &[(&str, CanonicalField)] = &[
    ("nom", CanonicalField::Surname),
    ("nom de famille", CanonicalField::Surname),
    ("nom usage", CanonicalField::Surname),
    ("nom adherent", CanonicalField::Surname),
    ("surname", CanonicalField::Surname),
    ("last name", CanonicalField::Surname),
    ("prenom", CanonicalField::GivenName),
    ("prenom usage", CanonicalField::GivenName),
    ("prenom usuel", CanonicalField::GivenName),
    ("prenom adherent", CanonicalField::GivenName),
    ("first name", CanonicalField::GivenName),
    ("given name", CanonicalField::GivenName),
    ("date de naissance", CanonicalField::BirthDate),
    ("date naissance", CanonicalField::BirthDate),
    ("ddn", CanonicalField::BirthDate),
    ("birth date", CanonicalField::BirthDate),
    ("expire le", CanonicalField::Expiration),
    ("date de fin", CanonicalField::Expiration),
    ("date fin", CanonicalField::Expiration),
    ("date expiration", CanonicalField::Expiration),
    ("expiration", CanonicalField::Expiration),
    ("date limite", CanonicalField::Expiration),
    ("adresse mail", CanonicalField::Email),
    ("adresse email", CanonicalField::Email),
    ("adresse e mail", CanonicalField::Email),
    ("email", CanonicalField::Email),
    ("e mail", CanonicalField::Email),
    ("courriel", CanonicalField::Email),
    ("montant", CanonicalField::Amount),
    ("montant regle", CanonicalField::Amount),
    ("montant paye", CanonicalField::Amount),
    ("montant verse", CanonicalField::Amount),
    ("amount", CanonicalField::Amount),
    ("erreur valide", CanonicalField::Status),
    ("erreur validee", CanonicalField::Status),
    ("erreur valider", CanonicalField::Status),
    ("validation", CanonicalField::Status),
    ("statut", CanonicalField::Status),
    ("status", CanonicalField::Status),
];

/// Static table from folded header text to canonical roster fields.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    synonyms: BTreeMap<String, CanonicalField>,
}

impl Default for HeaderMap {
    fn default() -> Self {
        Self {
            synonyms: SYNONYMS
                .iter()
                .map(|(label, field)| (normalize_header_label(label), *field))
                .collect(),
        }
    }
}

impl HeaderMap {
    #[must_use]
    pub fn with_synonym(mut self, label: &str, field: CanonicalField) -> Self {
        self.synonyms.insert(normalize_header_label(label), field);
        self
    }

    #[must_use]
    pub fn field_for(&self, header: &str) -> Option<CanonicalField> {
        self.synonyms.get(&normalize_header_label(header)).copied()
    }

    /// Map each canonical field to the first header naming it.
    ///
    /// # Errors
    /// Returns `CoreError::MissingColumns` when surname or given name cannot
    /// be resolved, listing the headers that were present.
    pub fn resolve(&self, headers: &[String]) -> Result<ColumnMap, CoreError> {
        let mut indices = BTreeMap::new();
        for (index, header) in headers.iter().enumerate() {
            if let Some(field) = self.field_for(header) {
                indices.entry(field).or_insert(index);
            }
        }

        let missing = CanonicalField::ALL
            .into_iter()
            .filter(|field| field.is_required() && !indices.contains_key(field))
            .map(|field| field.as_str().to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            let available = headers
                .iter()
                .map(|header| header.trim().to_string())
                .filter(|header| !header.is_empty())
                .collect();
            return Err(CoreError::MissingColumns { missing, available });
        }
        Ok(ColumnMap { indices })
    }

    /// Find the header row among the first `scan` rows.
    ///
    /// # Errors
    /// Returns the resolution error of the first non-empty row when no row
    /// carries the required headers.
    pub fn locate(&self, rows: &[Vec<String>], scan: usize) -> Result<(usize, ColumnMap), CoreError> {
        let mut first_error = None;
        for (index, row) in rows.iter().take(scan).enumerate() {
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            match self.resolve(row) {
                Ok(map) => return Ok((index, map)),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| CoreError::MissingColumns {
            missing: CanonicalField::ALL
                .into_iter()
                .filter(|field| field.is_required())
                .map(|field| field.as_str().to_string())
                .collect(),
            available: Vec::new(),
        }))
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ColumnMap {
    indices: BTreeMap<CanonicalField, usize>,
}

impl ColumnMap {
    #[must_use]
    pub fn index(&self, field: CanonicalField) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    /// Cell for `field`, empty when the column is absent or the row is short.
    #[must_use]
    pub fn cell<'a>(&self, row: &'a [String], field: CanonicalField) -> &'a str {
        self.index(field)
            .and_then(|index| row.get(index))
            .map_or("", |value| value.trim())
    }
}

/// Split a row whose cells hold newline-separated values into one row per line.
///
/// Some office suites export a whole group of members as a single row with
/// multi-line cells; single-line rows come back unchanged.
#[must_use]
pub fn explode_multiline_row(row: &[String]) -> Vec<Vec<String>> {
    let split = row
        .iter()
        .map(|cell| cell.lines().map(str::trim).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    let height = split.iter().map(Vec::len).max().unwrap_or(0);
    if height <= 1 {
        return vec![row.to_vec()];
    }
    (0..height)
        .map(|line| {
            split
                .iter()
                .map(|cell| cell.get(line).copied().unwrap_or_default().to_string())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn synonyms_resolve_regardless_of_accents_and_spacing() -> Result<(), CoreError> {
        let map = HeaderMap::default().resolve(&headers(&[
            "Nom de famille",
            "Prénom_usuel",
            "Date de naissance",
            "Expire le",
            "Adresse E-mail",
            "Montant payé",
        ]))?;
        assert_eq!(map.index(CanonicalField::Surname), Some(0));
        assert_eq!(map.index(CanonicalField::GivenName), Some(1));
        assert_eq!(map.index(CanonicalField::BirthDate), Some(2));
        assert_eq!(map.index(CanonicalField::Expiration), Some(3));
        assert_eq!(map.index(CanonicalField::Email), Some(4));
        assert_eq!(map.index(CanonicalField::Status), None);
        assert_eq!(map.index(CanonicalField::Amount), Some(5));
        Ok(())
    }

    #[test]
    fn missing_required_columns_are_named() {
        let err = HeaderMap::default().resolve(&headers(&["Nom", "Ville", " "]));
        assert_eq!(
            err,
            Err(CoreError::MissingColumns {
                missing: vec!["prenom".to_string()],
                available: vec!["Nom".to_string(), "Ville".to_string()],
            })
        );
    }

    #[test]
    fn header_row_is_found_below_banner_rows() -> Result<(), CoreError> {
        let rows = vec![
            headers(&["Club de plongée"]),
            headers(&["Saison 2025/2026"]),
            headers(&[""]),
            headers(&["Nom", "Prénom", "Email"]),
            headers(&["DUPONT", "Elise", "elise@example.org"]),
        ];
        let (index, map) = HeaderMap::default().locate(&rows, 10)?;
        assert_eq!(index, 3);
        assert_eq!(map.cell(&rows[4], CanonicalField::Email), "elise@example.org");
        assert_eq!(map.cell(&rows[4], CanonicalField::Amount), "");
        Ok(())
    }

    #[test]
    fn custom_synonyms_extend_the_table() {
        let map = HeaderMap::default().with_synonym("Cotisation", CanonicalField::Amount);
        assert_eq!(map.field_for("COTISATION"), Some(CanonicalField::Amount));
    }

    #[test]
    fn multiline_rows_are_exploded() {
        let row = headers(&["DUPONT\nMARTIN", "Elise\nPaul", "31/12/2026"]);
        let rows = explode_multiline_row(&row);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], headers(&["MARTIN", "Paul", ""]));
        assert_eq!(explode_multiline_row(&headers(&["A", "B"])), vec![headers(&["A", "B"])]);
    }
}
