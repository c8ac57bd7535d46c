// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionMode {
    /// Host-paced play with shared per-question timers.
    Live,
    /// Individually paced play bounded by a shared deadline.
    Exam,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Public,
    /// Only participants on the allow-list may join.
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Finished,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
        }
    }
}

/// Sub-state of the question at `current_question_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum QuestionPhase {
    /// No question has been opened yet.
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum RosterStatus {
    Active,
    Left,
    Finished,
}

/// Represents the 'sessions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: i64,
    pub quiz_id: i64,
    pub owner_id: i64,
    pub join_code: String,
    pub mode: SessionMode,
    pub access: AccessMode,
    pub allow_list: Json<Vec<i64>>,
    pub status: SessionStatus,
    pub seconds_per_question: Option<i64>,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub show_ranking: bool,
    pub exam_total_minutes: Option<i64>,
    pub exam_scheduled_start: Option<DateTime<Utc>>,
    pub question_order: Option<Json<Vec<i64>>>,
    pub current_question_index: i64,
    pub question_phase: QuestionPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveConfig {
    /// Overrides each question's own time limit when set.
    pub seconds_per_question: Option<i64>,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub show_ranking: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamConfig {
    pub total_minutes: Option<i64>,
    pub scheduled_start: Option<DateTime<Utc>>,
}

/// Embedded per-participant summary on a session.
/// The row id doubles as join order for ranking tie-breaks.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RosterEntry {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub session_id: i64,
    pub participant_id: i64,
    pub display_name: String,
    pub status: RosterStatus,
    pub score: i64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub unanswered_count: i64,
    pub grade: Option<f64>,
    pub joined_at: DateTime<Utc>,
}

/// A session together with its roster.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: i64,
    pub quiz_id: i64,
    pub owner_id: i64,
    pub join_code: String,
    pub mode: SessionMode,
    pub access: AccessMode,
    pub allow_list: Vec<i64>,
    pub status: SessionStatus,
    pub live: LiveConfig,
    pub exam: ExamConfig,
    /// Question ids in play order, fixed at start when shuffling.
    #[serde(skip)]
    pub question_order: Option<Vec<i64>>,
    pub current_question_index: i64,
    pub question_phase: QuestionPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub roster: Vec<RosterEntry>,
}

impl Session {
    pub fn from_parts(row: SessionRow, roster: Vec<RosterEntry>) -> Self {
        Self {
            id: row.id,
            quiz_id: row.quiz_id,
            owner_id: row.owner_id,
            join_code: row.join_code,
            mode: row.mode,
            access: row.access,
            allow_list: row.allow_list.0,
            status: row.status,
            live: LiveConfig {
                seconds_per_question: row.seconds_per_question,
                shuffle_questions: row.shuffle_questions,
                shuffle_options: row.shuffle_options,
                show_ranking: row.show_ranking,
            },
            exam: ExamConfig {
                total_minutes: row.exam_total_minutes,
                scheduled_start: row.exam_scheduled_start,
            },
            question_order: row.question_order.map(|o| o.0),
            current_question_index: row.current_question_index,
            question_phase: row.question_phase,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            roster,
        }
    }

    pub fn roster_entry(&self, participant_id: i64) -> Option<&RosterEntry> {
        self.roster.iter().find(|r| r.participant_id == participant_id)
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// The instant after which an active exam no longer counts as running.
    pub fn exam_deadline(&self) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let minutes = self.exam.total_minutes?;
        Some(started + chrono::Duration::minutes(minutes))
    }
}

fn default_true() -> bool {
    true
}

/// DTO for creating a new session.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub quiz_id: i64,
    pub mode: SessionMode,
    #[serde(default)]
    pub access: AccessMode,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub allow_list: Vec<i64>,
    #[validate(range(min = 5, max = 600))]
    pub seconds_per_question: Option<i64>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_options: bool,
    #[serde(default = "default_true")]
    pub show_ranking: bool,
    #[validate(range(min = 1, max = 1440))]
    pub exam_total_minutes: Option<i64>,
    pub exam_scheduled_start: Option<DateTime<Utc>>,
}

/// DTO for updating a waiting session. Fields are optional.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateSessionRequest {
    pub access: Option<AccessMode>,
    #[validate(length(max = 1000))]
    pub allow_list: Option<Vec<i64>>,
    #[validate(range(min = 5, max = 600))]
    pub seconds_per_question: Option<i64>,
    pub shuffle_questions: Option<bool>,
    pub shuffle_options: Option<bool>,
    pub show_ranking: Option<bool>,
    #[validate(range(min = 1, max = 1440))]
    pub exam_total_minutes: Option<i64>,
    pub exam_scheduled_start: Option<DateTime<Utc>>,
}

/// DTO for joining a session by code.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinSessionRequest {
    #[validate(length(min = 4, max = 9))]
    pub join_code: String,
}

/// Query parameters for listing sessions.
#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub owner_id: Option<i64>,
    pub status: Option<SessionStatus>,
}

/// Result of a join: a fresh roster slot, or a reconnect to an existing one.
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub session_id: i64,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub reconnected: bool,
}
