// src/config.rs

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,

    /// Pause between `question-closed` and the next `question-opened`.
    pub question_pause_ms: u64,
    /// Extra time on top of an exam's total minutes before the safety timer force-closes it.
    pub exam_grace_seconds: u64,
    /// Used when neither the session nor the question defines a time limit.
    pub default_time_limit_seconds: i64,
    pub join_code_length: usize,
    /// Upper bound on waiting for a session's closure token.
    pub lock_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://livequiz.db".to_string());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
            jwt_secret,
            jwt_expiration: env_or("JWT_EXPIRATION", 86_400),
            rust_log,
            bind_addr,
            question_pause_ms: env_or("QUESTION_PAUSE_MS", 5_000),
            exam_grace_seconds: env_or("EXAM_GRACE_SECONDS", 60),
            default_time_limit_seconds: env_or("DEFAULT_TIME_LIMIT_SECONDS", 20),
            join_code_length: env_or::<usize>("JOIN_CODE_LENGTH", 6).clamp(4, 9),
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", 10_000),
        }
    }

    /// In-memory database and short pauses, for integration tests.
    pub fn for_tests() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            database_max_connections: 1,
            jwt_secret: "test_secret_for_integration_tests".to_string(),
            jwt_expiration: 600,
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            question_pause_ms: 20,
            exam_grace_seconds: 60,
            default_time_limit_seconds: 20,
            join_code_length: 6,
            lock_timeout_ms: 2_000,
        }
    }

    pub fn question_pause(&self) -> Duration {
        Duration::from_millis(self.question_pause_ms)
    }

    pub fn exam_grace(&self) -> Duration {
        Duration::from_secs(self.exam_grace_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
