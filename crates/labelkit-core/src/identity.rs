use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Remove diacritics through canonical decomposition.
#[must_use]
pub fn strip_accents(text: &str) -> String {
    text.nfd().filter(|ch| !is_combining_mark(*ch)).collect()
}

/// Canonicalize a surname or given-name fragment into its comparable form.
///
/// The result is uppercase, accent-free, with spaces around hyphens removed
/// and every other whitespace run collapsed to a single space. This is the
/// only function used to decide whether two names denote the same person.
#[must_use]
pub fn normalize_name(text: &str) -> String {
    let folded = strip_accents(&text.to_uppercase());

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch == '-' {
            // drop whitespace on both sides of the hyphen
            pending_space = false;
            out.push('-');
            continue;
        }
        if pending_space && !out.is_empty() && !out.ends_with('-') {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }
    out
}

/// Fold a spreadsheet header into the form used by the synonym table.
#[must_use]
pub fn normalize_header_label(text: &str) -> String {
    let folded = strip_accents(text).to_lowercase();
    folded
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IdentityKey {
    pub surname: String,
    pub given_name: String,
}

impl IdentityKey {
    #[must_use]
    pub fn new(surname: &str, given_name: &str) -> Self {
        Self { surname: normalize_name(surname), given_name: normalize_name(given_name) }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surname.is_empty() && self.given_name.is_empty()
    }
}

impl Display for IdentityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.surname, self.given_name)
    }
}
