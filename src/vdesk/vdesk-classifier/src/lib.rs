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

//! Two-layer inbound mail classification: a deterministic rule layer, and
//! an optional naive-bayes model blended on top of it. The poller applies
//! the never-filter exceptions (known user, ticket reply); this crate only
//! scores.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod model;
mod signals;

pub use model::{BayesModel, ModelError};

use vdesk_common::types::Address;

/// weight of the model in the blended score when one is loaded.
const MODEL_WEIGHT: f64 = 0.6;

/// Verdict family of one inbound email.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde::Deserialize,
    serde::Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ///
    Ham,
    ///
    Spam,
    ///
    Promotion,
}

/// Scores and decision for one email.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    ///
    pub category: Category,
    /// `[0, 1]`.
    pub spam_score: f64,
    /// `[0, 1]`.
    pub promotion_score: f64,
    /// human-readable trail of the signals that fired.
    pub reasons: Vec<String>,
}

/// The parts of an email the classifier looks at.
#[derive(Debug, Clone)]
pub struct Sample<'a> {
    ///
    pub from: &'a Address,
    ///
    pub subject: &'a str,
    ///
    pub body_text: Option<&'a str>,
    /// whether a `List-Unsubscribe` header was present.
    pub has_list_unsubscribe: bool,
}

/// Decision thresholds, taken from the filter configuration.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    ///
    pub spam: f64,
    ///
    pub promotion: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            spam: 0.5,
            promotion: 0.5,
        }
    }
}

/// The classifier: rule signals, plus an optional trained model.
pub struct Classifier {
    thresholds: Thresholds,
    signals: signals::Signals,
    model: Option<BayesModel>,
}

impl Classifier {
    /// Rules-only classifier.
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            signals: signals::Signals::compile(),
            model: None,
        }
    }

    /// Classifier blending a trained model into the rule scores.
    #[must_use]
    pub fn with_model(thresholds: Thresholds, model: BayesModel) -> Self {
        Self {
            thresholds,
            signals: signals::Signals::compile(),
            model: Some(model),
        }
    }

    /// Score one email and decide its category.
    #[must_use]
    pub fn classify(&self, sample: &Sample<'_>) -> Verdict {
        let rules = self.signals.score(sample);

        let (spam_score, promotion_score, mut reasons) = match &self.model {
            Some(model) => {
                let prediction = model.predict(sample.subject, sample.body_text.unwrap_or(""));
                let mut reasons = rules.reasons;
                reasons.push(format!(
                    "model: spam={:.2} promotion={:.2}",
                    prediction.spam, prediction.promotion
                ));
                (
                    prediction
                        .spam
                        .mul_add(MODEL_WEIGHT, rules.spam * (1.0 - MODEL_WEIGHT)),
                    prediction
                        .promotion
                        .mul_add(MODEL_WEIGHT, rules.promotion * (1.0 - MODEL_WEIGHT)),
                    reasons,
                )
            }
            None => (rules.spam, rules.promotion, rules.reasons),
        };

        let category = if spam_score >= self.thresholds.spam {
            // spam wins when both thresholds are crossed.
            Category::Spam
        } else if promotion_score >= self.thresholds.promotion {
            Category::Promotion
        } else {
            Category::Ham
        };
        if category != Category::Ham {
            reasons.push(format!("categorized as {category}"));
        }

        Verdict {
            category,
            spam_score,
            promotion_score,
            reasons,
        }
    }
}
