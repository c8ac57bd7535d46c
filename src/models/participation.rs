// src/models/participation.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, types::Json};

use super::session::{RosterStatus, SessionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ParticipationStatus {
    Active,
    Finished,
}

/// Represents the 'answers' table: one recorded answer per (participation, question).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Answer {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub participation_id: i64,
    pub question_id: i64,
    pub selections: Json<Vec<usize>>,
    pub is_correct: bool,
    pub elapsed_seconds: f64,
    pub points: i64,
    pub answered_at: DateTime<Utc>,
}

/// Represents the 'participations' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ParticipationRow {
    pub id: i64,
    pub session_id: i64,
    pub participant_id: i64,
    pub mode: SessionMode,
    pub status: ParticipationStatus,
    pub score: i64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub unanswered_count: i64,
    pub grade: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A participant's ledger for one session.
#[derive(Debug, Clone, Serialize)]
pub struct Participation {
    #[serde(flatten)]
    pub row: ParticipationRow,
    pub answers: Vec<Answer>,
}

impl Participation {
    pub fn answer_for(&self, question_id: i64) -> Option<&Answer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }
}

/// One line of a ranking, read from the roster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub rank: usize,
    pub participant_id: i64,
    pub display_name: String,
    pub score: i64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub unanswered_count: i64,
    pub grade: Option<f64>,
    pub status: RosterStatus,
}
