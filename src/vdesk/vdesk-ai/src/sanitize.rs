/*
 * vDesk customer support engine
 * Copyright (C) 2023 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Mandatory post-processing of generated text: emails, phone numbers and
//! Luhn-valid card digit runs are redacted, the profanity list is masked.
//! There is deliberately no way to bypass this before a commit.

const EMAIL_TOKEN: &str = "[email redacted]";
const PHONE_TOKEN: &str = "[phone redacted]";
const CARD_TOKEN: &str = "[number redacted]";

/// words masked in generated output; lowercase.
const PROFANITY: &[&str] = &[
    "asshole", "bastard", "bitch", "bullshit", "crap", "damn", "fuck", "shit",
];

/// Compiled redaction families, built once at coordinator construction.
pub struct Sanitizer {
    email: regex::Regex,
    phone: regex::Regex,
    card_candidate: regex::Regex,
    profanity: regex::Regex,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    ///
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        Self {
            email: regex::Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b")
                .expect("valid email pattern"),
            // international or local notation, 8..15 digits with separators.
            phone: regex::Regex::new(r"(?:\+|\b)\d[\d\s().-]{6,13}\d\b")
                .expect("valid phone pattern"),
            // 13-19 digits, optionally grouped; verified with Luhn below.
            card_candidate: regex::Regex::new(r"\b(?:\d[ -]?){12,18}\d\b")
                .expect("valid card pattern"),
            profanity: {
                let words = PROFANITY.join("|");
                regex::Regex::new(&format!(r"(?i)\b(?:{words})\b"))
                    .expect("valid profanity pattern")
            },
        }
    }

    /// Redact everything; order matters, card runs are consumed before the
    /// looser phone family can eat them.
    #[must_use]
    pub fn sanitize(&self, text: &str) -> String {
        let text = self
            .card_candidate
            .replace_all(text, |captures: &regex::Captures<'_>| {
                let candidate = &captures[0];
                if luhn_valid(candidate) {
                    CARD_TOKEN.to_owned()
                } else {
                    candidate.to_owned()
                }
            });
        let text = self.email.replace_all(&text, EMAIL_TOKEN);
        let text = self.phone.replace_all(&text, PHONE_TOKEN);
        let text = self
            .profanity
            .replace_all(&text, |captures: &regex::Captures<'_>| {
                "*".repeat(captures[0].len())
            });
        text.into_owned()
    }

    /// `true` when nothing in `text` matches any redaction family; used by
    /// tests and the commit assertion.
    #[must_use]
    pub fn is_clean(&self, text: &str) -> bool {
        !self.email.is_match(text)
            && !self.phone.is_match(text)
            && !self
                .card_candidate
                .find_iter(text)
                .any(|hit| luhn_valid(hit.as_str()))
            && !self.profanity.is_match(text)
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits = candidate
        .chars()
        .filter(char::is_ascii_digit)
        .filter_map(|c| c.to_digit(10))
        .collect::<Vec<_>>();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(position, &digit)| {
            if position % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn emails_are_redacted() {
        let sanitizer = Sanitizer::new();
        assert_eq!(
            sanitizer.sanitize("write to Ada.Lovelace+test@Example.org please"),
            "write to [email redacted] please"
        );
    }

    #[test]
    fn phone_numbers_are_redacted() {
        let sanitizer = Sanitizer::new();
        let out = sanitizer.sanitize("call +33 1 42 68 53 00 or 0800-555-019");
        assert!(!out.contains("42 68"), "{out}");
        assert!(out.contains(PHONE_TOKEN), "{out}");
    }

    #[test]
    fn luhn_valid_cards_are_redacted() {
        let sanitizer = Sanitizer::new();
        // the classic visa test number.
        let out = sanitizer.sanitize("pay with 4111 1111 1111 1111 today");
        assert_eq!(out, format!("pay with {CARD_TOKEN} today"));
    }

    #[test]
    fn non_luhn_digit_runs_are_not_card_redacted() {
        let sanitizer = Sanitizer::new();
        // 16 digits failing the checksum: an order number, not a card. The
        // looser phone family may still take a bite, but not the card one.
        let out = sanitizer.sanitize("order 1234 5678 9012 3456 shipped");
        assert!(!out.contains(CARD_TOKEN), "{out}");
    }

    #[test]
    fn profanity_is_masked_preserving_length() {
        let sanitizer = Sanitizer::new();
        assert_eq!(sanitizer.sanitize("well damn."), "well ****.");
    }

    #[test]
    fn sanitized_output_is_clean() {
        let sanitizer = Sanitizer::new();
        let dirty = "mail me at a@b.co, card 4111111111111111, call +1 212 555 0199, shit";
        assert!(sanitizer.is_clean(&sanitizer.sanitize(dirty)));
    }

    #[test]
    fn luhn_checksum() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("5500 0000 0000 0004"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid("1234"));
    }
}
