// src/services/question_bank.rs

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{error::AppError, models::question::Question};

/// Read-only, ordered access to a quiz's questions.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn quiz_exists(&self, quiz_id: i64) -> Result<bool, AppError>;

    /// All questions of a quiz in their authored order.
    async fn questions(&self, quiz_id: i64) -> Result<Vec<Question>, AppError>;
}

/// Question bank backed by the `quizzes` and `questions` tables.
#[derive(Clone)]
pub struct SqlQuestionBank {
    pool: SqlitePool,
}

impl SqlQuestionBank {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionBank for SqlQuestionBank {
    async fn quiz_exists(&self, quiz_id: i64) -> Result<bool, AppError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM quizzes WHERE id = $1")
            .bind(quiz_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn questions(&self, quiz_id: i64) -> Result<Vec<Question>, AppError> {
        sqlx::query_as::<_, Question>(
            r#"
            SELECT id, quiz_id, position, type, content, options, point_cap, time_limit_seconds
            FROM questions
            WHERE quiz_id = $1
            ORDER BY position ASC, id ASC
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch questions for quiz {}: {:?}", quiz_id, e);
            AppError::InternalServerError(e.to_string())
        })
    }
}
