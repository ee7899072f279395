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

//! The deterministic rule layer: weighted keyword hits plus boolean
//! signals, folded into `[0, 1]` scores.

use crate::Sample;

/// keyword weights; subject hits count double.
const SPAM_KEYWORDS: &[(&str, f64)] = &[
    ("free", 0.10),
    ("winner", 0.18),
    ("won", 0.12),
    ("congratulations", 0.15),
    ("lottery", 0.20),
    ("prize", 0.15),
    ("claim", 0.10),
    ("urgent", 0.10),
    ("act now", 0.15),
    ("click here", 0.12),
    ("100%", 0.10),
    ("guarantee", 0.08),
    ("no risk", 0.12),
    ("wire transfer", 0.20),
    ("inheritance", 0.20),
    ("bitcoin", 0.10),
    ("investment opportunity", 0.20),
    ("viagra", 0.30),
];

const PROMOTION_KEYWORDS: &[(&str, f64)] = &[
    ("sale", 0.12),
    ("% off", 0.15),
    ("discount", 0.12),
    ("coupon", 0.15),
    ("offer", 0.08),
    ("deal", 0.08),
    ("newsletter", 0.15),
    ("unsubscribe", 0.15),
    ("exclusive", 0.08),
    ("limited time", 0.12),
    ("shop now", 0.15),
    ("new arrivals", 0.15),
];

/// Rule-layer output, before any model blending.
#[derive(Debug, Clone)]
pub(crate) struct RuleScores {
    pub(crate) spam: f64,
    pub(crate) promotion: f64,
    pub(crate) reasons: Vec<String>,
}

/// Compiled boolean signal families; built once per classifier.
pub(crate) struct Signals {
    suspicious_sender: Vec<regex::Regex>,
    marketing_sender: regex::Regex,
    link: regex::Regex,
}

impl Signals {
    pub(crate) fn compile() -> Self {
        #[allow(clippy::expect_used)]
        Self {
            suspicious_sender: [
                // throwaway TLDs.
                r"@[^@]+\.(?:biz|click|top|loan|win|vip|gq|cf|tk)$",
                // digit-heavy local parts, `promo12345@...`.
                r"^[a-z]*\d{4,}@",
                // random-token senders, `x7kq2v9p@...`.
                r"^[a-z0-9]{14,}@",
            ]
            .into_iter()
            .map(|pattern| regex::Regex::new(pattern).expect("valid sender pattern"))
            .collect(),
            marketing_sender: regex::Regex::new(r"^(?:news|deals|offers|promo|marketing|noreply|no-reply)[@.-]")
                .expect("valid sender pattern"),
            link: regex::Regex::new(r"https?://").expect("valid link pattern"),
        }
    }

    /// Score one sample. Keyword lists run over the lowercased subject and
    /// body; every fired signal leaves a reason.
    pub(crate) fn score(&self, sample: &Sample<'_>) -> RuleScores {
        let subject = sample.subject.to_lowercase();
        let body = sample.body_text.unwrap_or("").to_lowercase();
        let sender = sample.from.full().to_lowercase();

        let mut spam = 0.0_f64;
        let mut promotion = 0.0_f64;
        let mut reasons = Vec::new();

        for &(keyword, weight) in SPAM_KEYWORDS {
            let mut hit = 0.0;
            if subject.contains(keyword) {
                hit += weight * 2.0;
            }
            if body.contains(keyword) {
                hit += weight;
            }
            if hit > 0.0 {
                spam += hit;
                reasons.push(format!("spam keyword '{keyword}'"));
            }
        }

        for &(keyword, weight) in PROMOTION_KEYWORDS {
            let mut hit = 0.0;
            if subject.contains(keyword) {
                hit += weight * 2.0;
            }
            if body.contains(keyword) {
                hit += weight;
            }
            if hit > 0.0 {
                promotion += hit;
                reasons.push(format!("promotion keyword '{keyword}'"));
            }
        }

        if is_shouting(sample.subject) {
            spam += 0.25;
            reasons.push("all-caps subject".to_owned());
        }

        if sample.has_list_unsubscribe {
            promotion += 0.35;
            reasons.push("list-unsubscribe header".to_owned());
        }

        if self
            .suspicious_sender
            .iter()
            .any(|pattern| pattern.is_match(&sender))
        {
            spam += 0.25;
            reasons.push(format!("suspicious sender '{sender}'"));
        }

        if self.marketing_sender.is_match(&sender) {
            promotion += 0.20;
            reasons.push(format!("marketing sender '{sender}'"));
        }

        let links = self.link.find_iter(&body).count();
        let words = body.split_whitespace().count().max(1);
        #[allow(clippy::cast_precision_loss)]
        let link_ratio = links as f64 / words as f64;
        if links >= 3 {
            spam += 0.15;
            reasons.push(format!("{links} links in body"));
        }
        if link_ratio > 0.10 {
            spam += 0.20;
            reasons.push("link-heavy body".to_owned());
        }

        RuleScores {
            spam: spam.min(1.0),
            promotion: promotion.min(1.0),
            reasons,
        }
    }
}

/// An all-caps subject with at least a few letters.
fn is_shouting(subject: &str) -> bool {
    let letters = subject.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 6 && !subject.chars().any(|c| c.is_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesk_common::addr;

    #[test]
    fn shouting_needs_letters() {
        assert!(is_shouting("YOU WON A PRIZE"));
        assert!(!is_shouting("RE: #123"));
        assert!(!is_shouting("You won a prize"));
    }

    #[test]
    fn subject_hits_weigh_double() {
        let signals = Signals::compile();
        let from = addr!("someone@example.test");
        let in_subject = signals.score(&Sample {
            from: &from,
            subject: "lottery",
            body_text: Some(""),
            has_list_unsubscribe: false,
        });
        let in_body = signals.score(&Sample {
            from: &from,
            subject: "hello",
            body_text: Some("lottery"),
            has_list_unsubscribe: false,
        });
        assert!(in_subject.spam > in_body.spam);
    }

    #[test]
    fn scores_are_clamped() {
        let signals = Signals::compile();
        let from = addr!("winner12345@lottery.biz");
        let body = SPAM_KEYWORDS
            .iter()
            .map(|(k, _)| *k)
            .collect::<Vec<_>>()
            .join(" ");
        let scores = signals.score(&Sample {
            from: &from,
            subject: "WINNER WINNER FREE LOTTERY PRIZE",
            body_text: Some(&body),
            has_list_unsubscribe: false,
        });
        assert!(scores.spam <= 1.0);
        assert!((0.0..=1.0).contains(&scores.promotion));
    }

    #[test]
    fn marketing_sender_is_a_promotion_signal() {
        let signals = Signals::compile();
        let from = addr!("news@shop.test");
        let scores = signals.score(&Sample {
            from: &from,
            subject: "hi",
            body_text: Some("plain text"),
            has_list_unsubscribe: false,
        });
        assert!(scores.promotion > 0.0);
        assert!(scores.reasons.iter().any(|r| r.contains("marketing")));
    }
}
