//! Values substituted into payment attestations and their cover mail.
//!
//! Document assembly and delivery happen elsewhere; this module only decides
//! what the text says.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::amount::display_amount;
use crate::dates::{format_date, parse_date, season_label};
use crate::history::ContactInfo;
use crate::identity::strip_accents;

pub const DEFAULT_SUBJECT: &str = "Attestation de paiement - {{ prenom }} {{ nom }}";
pub const DEFAULT_BODY: &str = "Bonjour {{ prenom }},\n\n\
Veuillez trouver ci-joint votre attestation de paiement.\n\
Montant réglé : {{ montant }}.\n\n\
Cordialement.";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AttestationContext {
    pub surname: String,
    pub given_name: String,
    pub email: String,
    pub amount: String,
    pub expiration: String,
    pub dob: String,
    pub generated_on: Date,
}

impl AttestationContext {
    #[must_use]
    pub fn new(surname: &str, given_name: &str, expiration: &str, generated_on: Date) -> Self {
        Self {
            surname: surname.trim().to_string(),
            given_name: given_name.trim().to_string(),
            email: String::new(),
            amount: String::new(),
            expiration: expiration.trim().to_string(),
            dob: String::new(),
            generated_on,
        }
    }

    #[must_use]
    pub fn with_contact(mut self, contact: &ContactInfo) -> Self {
        self.email = contact.email.trim().to_string();
        self.amount = contact.amount.trim().to_string();
        self
    }

    fn end_year(&self) -> i32 {
        parse_date(&self.expiration).map_or(self.generated_on.year(), |date| date.year())
    }

    /// `2025/2026` for a membership expiring in 2026, else the generation year.
    #[must_use]
    pub fn season(&self) -> String {
        season_label(&self.expiration, "/")
            .unwrap_or_else(|| format!("{}/{}", self.end_year() - 1, self.end_year()))
    }

    #[must_use]
    pub fn year_suffix(&self) -> String {
        format!("{}_{}", self.end_year() - 1, self.end_year())
    }

    #[must_use]
    pub fn amount_display(&self) -> String {
        display_amount(&self.amount)
    }

    /// `DUPONT_ELISE_attestation_2025_2026`, restricted to file-safe characters.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_attestation_{}",
            sanitize(&self.surname.to_uppercase()),
            sanitize(&self.given_name.to_uppercase()),
            self.year_suffix()
        )
    }

    fn value(&self, field: &str) -> Option<String> {
        let value = match field {
            "nom" => self.surname.clone(),
            "prenom" => self.given_name.clone(),
            "email" => self.email.clone(),
            "montant" => self.amount_display(),
            "expire" => self.expiration.clone(),
            "date_de_naissance" => self.dob.clone(),
            "created_at_display" => format_date(self.generated_on),
            "saison" => self.season(),
            _ => return None,
        };
        Some(value)
    }

    /// Replace `{{ field }}` placeholders; unknown placeholders are kept.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                out.push_str(&rest[open..]);
                return out;
            };
            let field = after[..close].trim();
            match self.value(field) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[open..open + 2 + close + 2]),
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        out
    }
}

fn sanitize(value: &str) -> String {
    let cleaned = strip_accents(value)
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect::<String>();
    if cleaned.is_empty() {
        "attestation".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use time::Month;

    use super::*;

    fn context(expiration: &str) -> AttestationContext {
        let day = Date::from_calendar_date(2026, Month::March, 2).unwrap_or(Date::MIN);
        AttestationContext::new("Dupont", "Elise", expiration, day).with_contact(&ContactInfo {
            email: "elise@example.org".into(),
            amount: "45.50".into(),
        })
    }

    #[test]
    fn season_follows_expiration_then_generation_date() {
        assert_eq!(context("31/12/2026").season(), "2025/2026");
        assert_eq!(context("2027-08-31").year_suffix(), "2026_2027");
        assert_eq!(context("").season(), "2025/2026");
    }

    #[test]
    fn templates_render_known_fields() {
        let ctx = context("31/12/2026");
        assert_eq!(ctx.render(DEFAULT_SUBJECT), "Attestation de paiement - Elise Dupont");
        assert!(ctx.render(DEFAULT_BODY).contains("Montant réglé : 45.50 €."));
        assert_eq!(ctx.render("{{saison}} {{ inconnu }} {{ nom"), "2025/2026 {{ inconnu }} {{ nom");
        assert_eq!(ctx.render("le {{ created_at_display }}"), "le 02/03/2026");
    }

    #[test]
    fn file_stem_is_sanitized() {
        let ctx = AttestationContext::new("D'Artagnan", "Élise", "31/12/2026", Date::MIN);
        assert_eq!(ctx.file_stem(), "DARTAGNAN_ELISE_attestation_2025_2026");
    }
}
