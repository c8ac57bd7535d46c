use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

use crate::{
    config::Config,
    services::{
        identity::{IdentityDirectory, SqlIdentityDirectory},
        notifier::{BroadcastHub, Notifier},
        orchestrator::Orchestrator,
        question_bank::{QuestionBank, SqlQuestionBank},
        registry::SessionRegistry,
        tracker::ParticipationTracker,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    /// Wires the SQL-backed collaborators and an in-process broadcast hub.
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let identities: Arc<dyn IdentityDirectory> = Arc::new(SqlIdentityDirectory::new(pool.clone()));
        let questions: Arc<dyn QuestionBank> = Arc::new(SqlQuestionBank::new(pool.clone()));
        let notifier: Arc<dyn Notifier> = hub.clone();

        let registry = SessionRegistry::new(
            pool.clone(),
            identities,
            questions.clone(),
            notifier.clone(),
            config.join_code_length,
        );
        let tracker = ParticipationTracker::new(pool.clone());
        let orchestrator = Orchestrator::new(
            pool.clone(),
            Arc::new(config.clone()),
            registry,
            tracker,
            questions,
            notifier,
        );

        Self {
            pool,
            config,
            orchestrator,
            hub,
        }
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Orchestrator {
    fn from_ref(state: &AppState) -> Self {
        state.orchestrator.clone()
    }
}

impl FromRef<AppState> for Arc<BroadcastHub> {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}
