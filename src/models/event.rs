// src/models/event.rs

//! Payloads published to a session's room. Field names follow the client
//! contract (camelCase). None of these carry per-option correctness except
//! `question-closed`, which is sent after the question is over.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::participation::RankingEntry;
use super::question::PublicOption;

pub const QUESTION_OPENED: &str = "question-opened";
pub const VOTE_PROGRESS: &str = "vote-progress";
pub const QUESTION_CLOSED: &str = "question-closed";
pub const SESSION_FINISHED: &str = "session-finished";
pub const PARTICIPANT_JOINED: &str = "participant-joined";
pub const PARTICIPANT_LEFT: &str = "participant-left";
pub const PARTICIPANT_FINISHED: &str = "participant-finished";
pub const EXAM_STARTED: &str = "exam-started";
pub const SESSION_DELETED: &str = "session-deleted";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOpened {
    pub question_id: i64,
    pub prompt: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub time_limit: i64,
    pub points: i64,
    pub question_number: usize,
    pub total_questions: usize,
    pub options: Vec<PublicOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteProgress {
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionStat {
    pub option_id: usize,
    pub text: String,
    pub votes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionClosed {
    pub question_id: i64,
    pub question_number: usize,
    pub option_stats: Vec<OptionStat>,
    /// First correct option, kept for single-choice clients.
    pub correct_index: Option<usize>,
    pub correct_indices: Vec<usize>,
    pub partial_ranking: Vec<RankingEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub total_questions: usize,
    pub participants: usize,
    pub average_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFinished {
    pub session_id: i64,
    pub ranking: Vec<RankingEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SessionReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantJoined {
    pub participant_id: i64,
    pub display_name: String,
    pub participant_count: usize,
    pub reconnected: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantLeft {
    pub participant_id: i64,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantFinished {
    pub participant_id: i64,
    pub display_name: String,
    pub grade: f64,
    pub finished: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamStarted {
    pub session_id: i64,
    pub total_questions: usize,
    pub total_minutes: i64,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDeleted {
    pub session_id: i64,
}
