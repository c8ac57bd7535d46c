// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use livequiz::{
    config::Config,
    db,
    error::AppError,
    models::{question::Question, user::Role},
    services::{
        identity::{IdentityDirectory, SqlIdentityDirectory},
        notifier::Notifier,
        orchestrator::Orchestrator,
        question_bank::{QuestionBank, SqlQuestionBank},
        registry::SessionRegistry,
        tracker::ParticipationTracker,
    },
};
use serde_json::Value;
use sqlx::SqlitePool;

/// Captures every published event for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingNotifier {
    pub fn events(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event, _)| event == name)
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events(name).len()
    }

    /// Every published event name, in publish order.
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event, _)| event.clone())
            .collect()
    }

    pub fn rooms(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(room, _, _)| room.clone())
            .collect()
    }

    /// Polls until `name` has been published at least `n` times.
    pub async fn wait_for(&self, name: &str, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count(name) >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count(name) >= n
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, room: &str, event: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((room.to_string(), event.to_string(), payload));
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub orchestrator: Orchestrator,
    pub notifier: Arc<RecordingNotifier>,
}

/// Question bank whose `questions` call fails when the shared countdown hits zero.
/// Each call decrements it; a negative countdown never fails.
pub struct FlakyQuestionBank {
    inner: Arc<dyn QuestionBank>,
    countdown: Arc<AtomicIsize>,
}

impl FlakyQuestionBank {
    pub fn new(inner: Arc<dyn QuestionBank>, countdown: Arc<AtomicIsize>) -> Self {
        Self { inner, countdown }
    }
}

#[async_trait]
impl QuestionBank for FlakyQuestionBank {
    async fn quiz_exists(&self, quiz_id: i64) -> Result<bool, AppError> {
        self.inner.quiz_exists(quiz_id).await
    }

    async fn questions(&self, quiz_id: i64) -> Result<Vec<Question>, AppError> {
        if self.countdown.fetch_sub(1, Ordering::SeqCst) == 0 {
            return Err(AppError::InternalServerError("question bank unavailable".to_string()));
        }
        self.inner.questions(quiz_id).await
    }
}

pub async fn harness() -> Harness {
    harness_with(Config::for_tests(), |bank| bank).await
}

/// Builds a harness with a custom config; `wrap` may decorate the SQL question bank.
pub async fn harness_with(
    config: Config,
    wrap: impl FnOnce(Arc<dyn QuestionBank>) -> Arc<dyn QuestionBank>,
) -> Harness {
    let pool = db::connect(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to open in-memory database");
    db::migrate(&pool).await.expect("Failed to migrate database");

    let notifier = Arc::new(RecordingNotifier::default());
    let identities: Arc<dyn IdentityDirectory> = Arc::new(SqlIdentityDirectory::new(pool.clone()));
    let questions = wrap(Arc::new(SqlQuestionBank::new(pool.clone())));
    let sink: Arc<dyn Notifier> = notifier.clone();

    let registry = SessionRegistry::new(
        pool.clone(),
        identities,
        questions.clone(),
        sink.clone(),
        config.join_code_length,
    );
    let orchestrator = Orchestrator::new(
        pool.clone(),
        Arc::new(config),
        registry,
        ParticipationTracker::new(pool.clone()),
        questions,
        sink,
    );

    Harness {
        pool,
        orchestrator,
        notifier,
    }
}

pub async fn seed_user(pool: &SqlitePool, name: &str, role: Role) -> i64 {
    let role = match role {
        Role::Admin => "admin",
        Role::Host => "host",
        Role::Participant => "participant",
    };
    sqlx::query_scalar(
        "INSERT INTO users (username, display_name, role) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(format!("{}_{}", name, &uuid::Uuid::new_v4().to_string()[..8]))
    .bind(name)
    .bind(role)
    .fetch_one(pool)
    .await
    .expect("Failed to seed user")
}

/// Seeds a quiz of `count` single-choice questions whose correct option is index 1.
pub async fn seed_quiz(
    pool: &SqlitePool,
    owner_id: i64,
    count: usize,
    point_cap: i64,
    time_limit_seconds: i64,
) -> (i64, Vec<i64>) {
    let quiz_id: i64 =
        sqlx::query_scalar("INSERT INTO quizzes (owner_id, title) VALUES ($1, $2) RETURNING id")
            .bind(owner_id)
            .bind("Test quiz")
            .fetch_one(pool)
            .await
            .expect("Failed to seed quiz");

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let options = serde_json::json!([
            {"text": "A", "is_correct": false},
            {"text": "B", "is_correct": true},
            {"text": "C", "is_correct": false},
            {"text": "D", "is_correct": false}
        ]);
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO questions (quiz_id, position, type, content, options, point_cap, time_limit_seconds)
            VALUES ($1, $2, 'single', $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(quiz_id)
        .bind(i as i64)
        .bind(format!("Question {}", i + 1))
        .bind(options.to_string())
        .bind(point_cap)
        .bind(time_limit_seconds)
        .fetch_one(pool)
        .await
        .expect("Failed to seed question");
        ids.push(id);
    }
    (quiz_id, ids)
}
