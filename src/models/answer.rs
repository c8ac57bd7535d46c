// src/models/answer.rs

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// Accepts `3`, `"3"`, `"opt_3"`, `"option-3"`, `"o3"`.
static OPTION_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:option|opt|o)?[_\-]?(\d{1,4})$").expect("static regex is valid")
});

/// A selected option as it arrives on the wire: a raw index or a prefixed token.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OptionToken {
    Index(u64),
    Token(String),
}

impl OptionToken {
    fn to_index(&self) -> Result<usize, AppError> {
        match self {
            OptionToken::Index(i) => usize::try_from(*i)
                .map_err(|_| AppError::Validation(format!("Option index {} is out of range", i))),
            OptionToken::Token(raw) => OPTION_TOKEN
                .captures(raw.trim())
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .ok_or_else(|| AppError::Validation(format!("Unrecognized option '{}'", raw))),
        }
    }
}

/// Normalized, ordered set of selected option indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection(BTreeSet<usize>);

impl Selection {
    /// Normalizes wire tokens. Duplicates collapse; an empty selection is rejected.
    pub fn from_tokens(tokens: &[OptionToken]) -> Result<Self, AppError> {
        if tokens.is_empty() {
            return Err(AppError::Validation("No option selected".to_string()));
        }
        let indices = tokens
            .iter()
            .map(OptionToken::to_index)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self(indices))
    }

    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self(indices.into_iter().collect())
    }

    /// Every index must address an option of the question.
    pub fn check_bounds(&self, option_count: usize) -> Result<(), AppError> {
        match self.0.iter().find(|&&i| i >= option_count) {
            Some(i) => Err(AppError::Validation(format!(
                "Option {} does not exist (question has {} options)",
                i, option_count
            ))),
            None => Ok(()),
        }
    }

    pub fn indices(&self) -> &BTreeSet<usize> {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.0.iter().copied().collect()
    }
}

/// DTO for submitting one answer.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    #[validate(length(min = 1, max = 32))]
    pub selected: Vec<OptionToken>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 86400.0))]
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Recorded,
    /// Exam resubmission: the prior answer was superseded.
    Replaced,
    /// Live duplicate: nothing changed.
    AlreadyAnswered,
}

/// What the submitter gets back for one answer.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerReceipt {
    pub outcome: AnswerOutcome,
    pub question_id: i64,
    pub is_correct: bool,
    pub points: i64,
    pub total_score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_heterogeneous_tokens() {
        let tokens = vec![
            OptionToken::Index(2),
            OptionToken::Token("opt_0".to_string()),
            OptionToken::Token("option-3".to_string()),
            OptionToken::Token(" 1 ".to_string()),
            OptionToken::Token("O2".to_string()),
        ];
        let selection = Selection::from_tokens(&tokens).unwrap();
        assert_eq!(selection.to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn rejects_garbage_and_empty() {
        assert!(matches!(
            Selection::from_tokens(&[OptionToken::Token("banana".to_string())]),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            Selection::from_tokens(&[]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn bounds_are_checked_against_option_count() {
        let selection = Selection::from_indices([0, 4]);
        assert!(selection.check_bounds(5).is_ok());
        assert!(matches!(selection.check_bounds(4), Err(AppError::Validation(_))));
    }

    #[test]
    fn wire_shapes_deserialize() {
        let req: SubmitAnswerRequest = serde_json::from_str(
            r#"{"question_id": 7, "selected": [1, "opt_2"], "elapsed_seconds": 3.5}"#,
        )
        .unwrap();
        let selection = Selection::from_tokens(&req.selected).unwrap();
        assert_eq!(selection.to_vec(), vec![1, 2]);
        assert_eq!(req.elapsed_seconds, 3.5);
    }
}
