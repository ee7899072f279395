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

//! TF-IDF weighted multinomial naive bayes over the ham/spam/promotion
//! classes. Training happens offline; this module only loads a serialized
//! model and scores text with it.

use std::collections::HashMap;

/// number of classes, fixed: ham, spam, promotion.
const CLASSES: usize = 3;

/// The model could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// unreadable file.
    #[error("cannot read model: {0}")]
    Io(#[from] std::io::Error),
    /// not a model file.
    #[error("cannot parse model: {0}")]
    Parse(#[from] serde_json::Error),
    /// structurally valid json, semantically broken weights.
    #[error("inconsistent model: {0}")]
    Inconsistent(String),
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct Term {
    /// inverse document frequency of the term.
    idf: f64,
    /// `log P(term | class)` per class, `[ham, spam, promotion]`.
    log_likelihood: [f64; CLASSES],
}

/// Class probabilities of one prediction; sums to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    ///
    pub ham: f64,
    ///
    pub spam: f64,
    ///
    pub promotion: f64,
}

/// A serialized naive-bayes pipeline.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct BayesModel {
    /// `log P(class)`, `[ham, spam, promotion]`.
    log_prior: [f64; CLASSES],
    /// fallback log likelihood of unseen terms, per class.
    log_unseen: [f64; CLASSES],
    vocabulary: HashMap<String, Term>,
}

impl BayesModel {
    /// Load a model from disk.
    ///
    /// # Errors
    ///
    /// * unreadable or unparseable file
    /// * empty vocabulary
    pub fn load(path: &std::path::Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        let model = serde_json::from_str::<Self>(&raw)?;
        if model.vocabulary.is_empty() {
            return Err(ModelError::Inconsistent("empty vocabulary".to_owned()));
        }
        tracing::info!(terms = model.vocabulary.len(), "Spam model loaded.");
        Ok(model)
    }

    /// Class probabilities for a subject and body.
    #[must_use]
    pub fn predict(&self, subject: &str, body: &str) -> Prediction {
        let mut counts: HashMap<&str, f64> = HashMap::new();
        for token in tokenize(subject).chain(tokenize(body)) {
            *counts.entry(token).or_default() += 1.0;
        }

        let mut log_scores = self.log_prior;
        for (token, count) in counts {
            let (idf, likelihood) = self.vocabulary.get(token).map_or_else(
                || (1.0, &self.log_unseen),
                |term| (term.idf, &term.log_likelihood),
            );
            let tfidf = count * idf;
            for (score, class_likelihood) in log_scores.iter_mut().zip(likelihood) {
                *score += tfidf * class_likelihood;
            }
        }

        // softmax, shifted for stability.
        let max = log_scores.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let exps = log_scores.map(|score| (score - max).exp());
        let total: f64 = exps.iter().sum();

        Prediction {
            ham: exps[0] / total,
            spam: exps[1] / total,
            promotion: exps[2] / total,
        }
    }
}

/// lowercase alphanumeric runs of at least two characters.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// a toy model: "lottery"/"prize" spammy, "sale" promotional,
    /// "password" hammy.
    fn toy_model() -> BayesModel {
        let mut vocabulary = HashMap::new();
        vocabulary.insert(
            "lottery".to_owned(),
            Term {
                idf: 2.0,
                log_likelihood: [-6.0, -1.0, -4.0],
            },
        );
        vocabulary.insert(
            "prize".to_owned(),
            Term {
                idf: 2.0,
                log_likelihood: [-6.0, -1.5, -4.0],
            },
        );
        vocabulary.insert(
            "sale".to_owned(),
            Term {
                idf: 1.5,
                log_likelihood: [-5.0, -3.0, -1.0],
            },
        );
        vocabulary.insert(
            "password".to_owned(),
            Term {
                idf: 1.2,
                log_likelihood: [-1.0, -5.0, -5.0],
            },
        );
        BayesModel {
            log_prior: [-0.5, -1.5, -1.5],
            log_unseen: [-8.0, -8.0, -8.0],
            vocabulary,
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let prediction = toy_model().predict("anything", "at all");
        let total = prediction.ham + prediction.spam + prediction.promotion;
        assert!((total - 1.0).abs() < 1e-9, "{total}");
    }

    #[test]
    fn spammy_terms_drive_the_spam_class() {
        let prediction = toy_model().predict("lottery prize", "you won the lottery");
        assert!(prediction.spam > prediction.ham);
        assert!(prediction.spam > prediction.promotion);
    }

    #[test]
    fn hammy_terms_drive_the_ham_class() {
        let prediction = toy_model().predict("password reset", "forgot my password");
        assert!(prediction.ham > prediction.spam);
    }

    #[test]
    fn tokenizer_drops_one_letter_noise() {
        assert_eq!(
            tokenize("a lottery, b. prize!").collect::<Vec<_>>(),
            vec!["lottery", "prize"]
        );
    }
}
