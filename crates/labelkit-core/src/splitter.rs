//! Split a free-text "SURNAME Given" phrase into its two halves.
//!
//! A greedy pass takes the leading uppercase run (and name particles) as the
//! surname. A scoring pass then reconsiders every shorter surname so that a
//! fully uppercase line such as `LE GALL MARIE CLAIRE` still yields a given
//! name. Tokens are atomic, so hyphenated names are never cut in half.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::normalize_name;

const DEFAULT_PARTICLES: &[&str] = &[
    "d'", "da", "de", "del", "della", "der", "des", "di", "dos", "du", "la", "le", "les", "saint",
    "sainte", "st", "ste", "van", "von",
];

const DEFAULT_FIRST_NAMES: &[&str] = &[
    "ADRIEN", "ALAIN", "ALEXANDRE", "ALICE", "ANNE", "ANTOINE", "AUDREY", "BERNARD", "CAMILLE",
    "CATHERINE", "CECILE", "CHARLES", "CHRISTINE", "CLAIRE", "CLAUDE", "DANIEL", "DAVID",
    "DOMINIQUE", "ELISE", "EMILIE", "EMMA", "ERIC", "FRANCOIS", "FREDERIC", "GABRIEL", "GUILLAUME",
    "HELENE", "HUGO", "ISABELLE", "JACQUES", "JEAN", "JEANNE", "JULIE", "JULIEN", "LAURA",
    "LAURENT", "LEA", "LOUIS", "LUC", "LUCAS", "MANON", "MARC", "MARIE", "MARTINE", "MATHIEU",
    "MICHEL", "NATHALIE", "NICOLAS", "OLIVIER", "PATRICK", "PAUL", "PHILIPPE", "PIERRE",
    "SANDRINE", "SOPHIE", "STEPHANE", "SYLVIE", "THOMAS", "VALERIE", "VINCENT", "YANN", "YVES",
];

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SplitterConfig {
    pub particles: Vec<String>,
    pub common_first_names: Vec<String>,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            particles: DEFAULT_PARTICLES.iter().map(ToString::to_string).collect(),
            common_first_names: DEFAULT_FIRST_NAMES.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NameSplitter {
    particles: BTreeSet<String>,
    first_names: BTreeSet<String>,
}

impl Default for NameSplitter {
    fn default() -> Self {
        Self::new(&SplitterConfig::default())
    }
}

impl NameSplitter {
    #[must_use]
    pub fn new(config: &SplitterConfig) -> Self {
        Self {
            particles: config.particles.iter().map(|p| p.trim().to_lowercase()).collect(),
            first_names: config.common_first_names.iter().map(|n| normalize_name(n)).collect(),
        }
    }

    #[must_use]
    pub fn is_particle(&self, token: &str) -> bool {
        self.particles.contains(&token.to_lowercase())
    }

    /// Uppercase letters only (hyphen and apostrophe allowed), at least two letters.
    #[must_use]
    pub fn is_uppercase_name(token: &str) -> bool {
        let mut letters = 0;
        for ch in token.chars() {
            if ch.is_alphabetic() {
                if !ch.is_uppercase() {
                    return false;
                }
                letters += 1;
            } else if ch != '-' && ch != '\'' && ch != '\u{2019}' {
                return false;
            }
        }
        letters >= 2
    }

    fn is_common_first_name(&self, token: &str) -> bool {
        let normalized = normalize_name(token);
        if self.first_names.contains(&normalized) {
            return true;
        }
        normalized
            .split('-')
            .next()
            .is_some_and(|head| head != normalized && self.first_names.contains(head))
    }

    /// Leading tokens a greedy reader would take as the surname.
    fn greedy_surname_len(&self, tokens: &[&str]) -> usize {
        let mut end = 0;
        for (index, token) in tokens.iter().enumerate() {
            let particle = self.is_particle(token);
            let eligible = particle || Self::is_uppercase_name(token);
            if !eligible {
                break;
            }
            if !particle && token.contains('-') && index > 0 && !self.is_particle(tokens[index - 1])
            {
                // hyphenated tokens after a plain surname are compound first names
                break;
            }
            end = index + 1;
        }
        end
    }

    fn score(&self, tokens: &[&str], surname_len: usize) -> Option<i32> {
        let (surname, given) = tokens.split_at(surname_len);
        if surname.last().is_some_and(|token| self.is_particle(token)) && !given.is_empty() {
            return None;
        }
        let mut score = 0;
        if !given.is_empty() {
            score += 10;
            score += i32::try_from(given.len().min(3)).unwrap_or(3);
        }
        if given.first().is_some_and(|token| self.is_common_first_name(token)) {
            score += 5;
        }
        let misplaced = surname.iter().skip(1).filter(|token| self.is_common_first_name(token));
        score -= 4 * i32::try_from(misplaced.count()).unwrap_or(0);
        Some(score)
    }

    /// Return `(surname, given_name)` with the original spelling preserved.
    #[must_use]
    pub fn split(&self, raw: &str) -> (String, String) {
        let tokens = raw.split_whitespace().collect::<Vec<_>>();
        if tokens.is_empty() {
            return (String::new(), String::new());
        }

        let greedy = self.greedy_surname_len(&tokens).max(1);
        let mut best = greedy;
        let mut best_score = self.score(&tokens, greedy);
        for candidate in (1..greedy).rev() {
            let Some(score) = self.score(&tokens, candidate) else {
                continue;
            };
            if best_score.map_or(true, |current| score > current) {
                best = candidate;
                best_score = Some(score);
            }
        }

        let (surname, given) = tokens.split_at(best);
        (surname.join(" "), given.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(raw: &str) -> (String, String) {
        NameSplitter::default().split(raw)
    }

    fn pair(surname: &str, given: &str) -> (String, String) {
        (surname.to_string(), given.to_string())
    }

    #[test]
    fn uppercase_run_then_given_name() {
        assert_eq!(split("DUPONT Elise"), pair("DUPONT", "Elise"));
        assert_eq!(split("LE GALL Marie Claire"), pair("LE GALL", "Marie Claire"));
        assert_eq!(split("de la FONTAINE Jean"), pair("de la FONTAINE", "Jean"));
    }

    #[test]
    fn hyphenated_given_name_is_never_absorbed() {
        assert_eq!(split("DUPONT JEAN-PAUL"), pair("DUPONT", "JEAN-PAUL"));
        assert_eq!(split("DUPONT Jean-Paul"), pair("DUPONT", "Jean-Paul"));
    }

    #[test]
    fn hyphenated_surnames_stay_whole() {
        assert_eq!(split("DUPONT-MARTIN Lucie"), pair("DUPONT-MARTIN", "Lucie"));
        assert_eq!(split("DE SAINT-EXUPERY Antoine"), pair("DE SAINT-EXUPERY", "Antoine"));
    }

    #[test]
    fn all_caps_line_is_rebalanced_by_score() {
        assert_eq!(split("LE GALL MARIE CLAIRE"), pair("LE GALL", "MARIE CLAIRE"));
        assert_eq!(split("DE LA FONTAINE JEAN"), pair("DE LA FONTAINE", "JEAN"));
        assert_eq!(split("DUPONT JEAN PAUL"), pair("DUPONT", "JEAN PAUL"));
        assert_eq!(split("DUPONT DURAND"), pair("DUPONT", "DURAND"));
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(split(""), pair("", ""));
        assert_eq!(split("DUPONT"), pair("DUPONT", ""));
        assert_eq!(split("Dupont Jean"), pair("Dupont", "Jean"));
    }

    #[test]
    fn configured_first_names_drive_the_score() {
        let splitter = NameSplitter::new(&SplitterConfig {
            particles: vec!["de".into()],
            common_first_names: vec!["Maël".into()],
        });
        assert_eq!(splitter.split("BERTRAND KERDREUX MAËL"), pair("BERTRAND KERDREUX", "MAËL"));
    }
}
