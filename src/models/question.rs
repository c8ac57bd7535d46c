// src/models/question.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

/// One choice of a question as stored in the question bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub position: i64,

    /// Question type: 'single' (single choice) or 'multiple' (multiple choice).
    /// Mapped from the database column 'type' since `type` is a reserved keyword in Rust.
    #[sqlx(rename = "type")]
    pub question_type: String,

    /// The text content of the question.
    pub content: String,

    /// Stored as a JSON array in the database.
    pub options: Json<Vec<QuestionOption>>,

    /// Points awarded for a correct answer (live mode scales this by speed).
    pub point_cap: i64,

    pub time_limit_seconds: i64,
}

impl Question {
    /// Indices of every option flagged correct.
    pub fn correct_indices(&self) -> BTreeSet<usize> {
        self.options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_correct)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    /// Strips correctness flags for anything that leaves the server.
    pub fn to_public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id,
            question_type: self.question_type.clone(),
            content: self.content.clone(),
            options: self
                .options
                .iter()
                .enumerate()
                .map(|(i, o)| PublicOption {
                    id: i,
                    text: o.text.clone(),
                })
                .collect(),
            point_cap: self.point_cap,
            time_limit_seconds: self.time_limit_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicOption {
    /// Index of the option in the stored question.
    pub id: usize,
    pub text: String,
}

/// DTO for sending question to client (excludes correctness).
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: String,
    pub content: String,
    pub options: Vec<PublicOption>,
    pub point_cap: i64,
    pub time_limit_seconds: i64,
}
