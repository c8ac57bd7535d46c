// src/services/tracker.rs

use sqlx::SqlitePool;

use crate::{
    db::{
        self,
        participations::{NewAnswer, RecordResult},
    },
    error::AppError,
    models::{
        participation::{Participation, RankingEntry},
        session::SessionMode,
    },
};

/// Per-participant answer ledgers and the rankings derived from them.
///
/// Reads are public. Writes go through the orchestrator, which is the only caller
/// of `record` and `finalize`.
#[derive(Clone)]
pub struct ParticipationTracker {
    pool: SqlitePool,
}

impl ParticipationTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A participant's own ledger, answers included.
    pub async fn participation(
        &self,
        session_id: i64,
        participant_id: i64,
    ) -> Result<Participation, AppError> {
        db::participations::find(&self.pool, session_id, participant_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Participant {} has no participation in session {}",
                    participant_id, session_id
                ))
            })
    }

    pub async fn ranking(
        &self,
        session_id: i64,
        mode: SessionMode,
    ) -> Result<Vec<RankingEntry>, AppError> {
        Ok(db::participations::ranking(&self.pool, session_id, mode).await?)
    }

    pub async fn answered_count(&self, session_id: i64, question_id: i64) -> Result<usize, AppError> {
        let count = db::participations::answered_count(&self.pool, session_id, question_id).await?;
        Ok(count.max(0) as usize)
    }

    /// Votes per option index for one question.
    pub async fn option_votes(
        &self,
        session_id: i64,
        question_id: i64,
        option_count: usize,
    ) -> Result<Vec<i64>, AppError> {
        let mut votes = vec![0i64; option_count];
        for selection in db::participations::selections_for(&self.pool, session_id, question_id).await? {
            for index in selection {
                if let Some(v) = votes.get_mut(index) {
                    *v += 1;
                }
            }
        }
        Ok(votes)
    }

    pub(crate) async fn record(
        &self,
        session_id: i64,
        participant_id: i64,
        mode: SessionMode,
        open_index: Option<i64>,
        answer: &NewAnswer,
    ) -> Result<RecordResult, AppError> {
        db::participations::record_answer(
            &self.pool,
            session_id,
            participant_id,
            mode,
            open_index,
            answer,
        )
        .await
        .map_err(|e| {
            tracing::error!(session_id, participant_id, "Failed to record answer: {:?}", e);
            AppError::from(e)
        })
    }

    pub(crate) async fn finalize(
        &self,
        session_id: i64,
        participant_id: i64,
        total_questions: usize,
    ) -> Result<Option<f64>, AppError> {
        Ok(db::participations::finalize(&self.pool, session_id, participant_id, total_questions).await?)
    }
}
