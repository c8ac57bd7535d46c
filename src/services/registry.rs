// src/services/registry.rs

use std::sync::Arc;

use rand::Rng;
use sqlx::SqlitePool;
use validator::Validate;

use super::{
    identity::IdentityDirectory,
    notifier::{Notifier, publish_event},
    question_bank::QuestionBank,
};
use crate::{
    db::{
        self,
        participations,
        sessions::{NewSession, SessionSettings},
    },
    error::AppError,
    models::{
        event::{self, ParticipantJoined, SessionDeleted},
        session::{
            AccessMode, CreateSessionRequest, JoinResponse, ListSessionsQuery, RosterStatus,
            Session, SessionMode, SessionStatus, UpdateSessionRequest,
        },
        user::Requester,
    },
};

/// Attempts at finding a free join code before giving up.
const JOIN_CODE_ATTEMPTS: usize = 32;

/// Session lifecycle: create, read, update while waiting, delete, join.
#[derive(Clone)]
pub struct SessionRegistry {
    pool: SqlitePool,
    identities: Arc<dyn IdentityDirectory>,
    questions: Arc<dyn QuestionBank>,
    notifier: Arc<dyn Notifier>,
    join_code_length: usize,
}

impl SessionRegistry {
    pub fn new(
        pool: SqlitePool,
        identities: Arc<dyn IdentityDirectory>,
        questions: Arc<dyn QuestionBank>,
        notifier: Arc<dyn Notifier>,
        join_code_length: usize,
    ) -> Self {
        Self {
            pool,
            identities,
            questions,
            notifier,
            join_code_length,
        }
    }

    /// Creates a `waiting` session owned by `owner_id` with a fresh join code.
    pub async fn create(&self, owner_id: i64, req: CreateSessionRequest) -> Result<Session, AppError> {
        req.validate()?;

        self.identities.lookup_host(owner_id).await?;

        if !self.questions.quiz_exists(req.quiz_id).await? {
            return Err(AppError::NotFound(format!("Quiz {} not found", req.quiz_id)));
        }
        if self.questions.questions(req.quiz_id).await?.is_empty() {
            return Err(AppError::Validation(format!(
                "Quiz {} has no questions",
                req.quiz_id
            )));
        }

        let settings = SessionSettings {
            access: req.access,
            allow_list: req.allow_list,
            seconds_per_question: req.seconds_per_question,
            shuffle_questions: req.shuffle_questions,
            shuffle_options: req.shuffle_options,
            show_ranking: req.show_ranking,
            exam_total_minutes: req.exam_total_minutes,
            exam_scheduled_start: req.exam_scheduled_start,
        };
        check_mode_settings(req.mode, &settings)?;

        for _ in 0..JOIN_CODE_ATTEMPTS {
            let join_code = generate_join_code(self.join_code_length);
            if db::sessions::join_code_in_use(&self.pool, &join_code).await? {
                continue;
            }

            let new = NewSession {
                quiz_id: req.quiz_id,
                owner_id,
                join_code,
                mode: req.mode,
                settings: settings.clone(),
            };
            match db::sessions::insert(&self.pool, &new).await {
                Ok(id) => {
                    tracing::info!(session_id = id, owner_id, "Session created with code {}", new.join_code);
                    return self.get(id).await;
                }
                // Lost a race for the code; draw another.
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => continue,
                Err(e) => {
                    tracing::error!("Failed to insert session: {:?}", e);
                    return Err(e.into());
                }
            }
        }

        Err(AppError::Conflict(
            "Could not allocate a free join code, try again".to_string(),
        ))
    }

    pub async fn get(&self, id: i64) -> Result<Session, AppError> {
        db::sessions::load(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {} not found", id)))
    }

    /// Finds the joinable session for a code; finished sessions are invisible here.
    pub async fn get_by_code(&self, code: &str) -> Result<Session, AppError> {
        db::sessions::find_open_by_code(&self.pool, code.trim())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No open session with code {}", code)))
    }

    pub async fn list(&self, query: &ListSessionsQuery) -> Result<Vec<Session>, AppError> {
        let rows = db::sessions::list(&self.pool, query.owner_id, query.status).await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let roster = db::sessions::roster(&self.pool, row.id).await?;
            sessions.push(Session::from_parts(row, roster));
        }
        Ok(sessions)
    }

    /// Changes settings of a waiting session. Rules cannot change once play has started.
    pub async fn update(
        &self,
        id: i64,
        requester: Requester,
        req: UpdateSessionRequest,
    ) -> Result<Session, AppError> {
        req.validate()?;

        let session = self.get(id).await?;
        ensure_owner(&session, requester)?;
        if session.status != SessionStatus::Waiting {
            return Err(AppError::InvalidState(
                "Only waiting sessions can be edited".to_string(),
            ));
        }

        let mut settings = SessionSettings::of(&session);
        if let Some(access) = req.access {
            settings.access = access;
        }
        if let Some(allow_list) = req.allow_list {
            settings.allow_list = allow_list;
        }
        if let Some(seconds) = req.seconds_per_question {
            settings.seconds_per_question = Some(seconds);
        }
        if let Some(shuffle) = req.shuffle_questions {
            settings.shuffle_questions = shuffle;
        }
        if let Some(shuffle) = req.shuffle_options {
            settings.shuffle_options = shuffle;
        }
        if let Some(show) = req.show_ranking {
            settings.show_ranking = show;
        }
        if let Some(minutes) = req.exam_total_minutes {
            settings.exam_total_minutes = Some(minutes);
        }
        if let Some(start) = req.exam_scheduled_start {
            settings.exam_scheduled_start = Some(start);
        }
        check_mode_settings(session.mode, &settings)?;

        if !db::sessions::update_settings(&self.pool, id, &settings).await? {
            return Err(AppError::InvalidState(
                "Session left the waiting state".to_string(),
            ));
        }

        self.get(id).await
    }

    /// Deletes a session and everything recorded for it.
    pub async fn delete(&self, id: i64, requester: Requester) -> Result<Session, AppError> {
        let session = self.get(id).await?;
        ensure_owner(&session, requester)?;

        if !db::sessions::delete(&self.pool, id).await? {
            return Err(AppError::NotFound(format!("Session {} not found", id)));
        }

        tracing::info!(session_id = id, "Session deleted");
        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::SESSION_DELETED,
            &SessionDeleted { session_id: id },
        );
        Ok(session)
    }

    /// Joins the session holding `code`.
    ///
    /// A participant already on the roster is reconnected instead of added twice;
    /// a slot they had left becomes active again.
    pub async fn join(&self, code: &str, participant_id: i64) -> Result<JoinResponse, AppError> {
        let session = self.get_by_code(code).await?;
        let identity = self.identities.lookup(participant_id).await?;

        if session.access == AccessMode::Private && !session.allow_list.contains(&participant_id) {
            return Err(AppError::PermissionDenied(
                "This session is private".to_string(),
            ));
        }

        let reconnected = match session.roster_entry(participant_id) {
            Some(entry) => {
                if entry.status == RosterStatus::Finished {
                    return Err(AppError::InvalidState(
                        "You have already finished this session".to_string(),
                    ));
                }
                if entry.status == RosterStatus::Left {
                    participations::transition_roster(
                        &self.pool,
                        session.id,
                        participant_id,
                        RosterStatus::Left,
                        RosterStatus::Active,
                    )
                    .await?;
                }
                true
            }
            None => {
                !participations::enroll(
                    &self.pool,
                    session.id,
                    participant_id,
                    &identity.display_name,
                    session.mode,
                )
                .await?
            }
        };

        let participant_count = db::sessions::roster(&self.pool, session.id).await?.len();
        tracing::info!(
            session_id = session.id,
            participant_id,
            reconnected,
            "Participant joined"
        );
        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::PARTICIPANT_JOINED,
            &ParticipantJoined {
                participant_id,
                display_name: identity.display_name,
                participant_count,
                reconnected,
            },
        );

        Ok(JoinResponse {
            session_id: session.id,
            mode: session.mode,
            status: session.status,
            reconnected,
        })
    }
}

/// Owners and admins may drive a session.
pub fn ensure_owner(session: &Session, requester: Requester) -> Result<(), AppError> {
    if session.owner_id == requester.id || requester.is_admin() {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(
            "Only the session owner can do this".to_string(),
        ))
    }
}

fn check_mode_settings(mode: SessionMode, settings: &SessionSettings) -> Result<(), AppError> {
    if mode == SessionMode::Exam && settings.exam_total_minutes.is_none() {
        return Err(AppError::Validation(
            "Exam sessions need exam_total_minutes".to_string(),
        ));
    }
    Ok(())
}

fn generate_join_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_codes_are_numeric_of_requested_length() {
        for length in [4, 6, 9] {
            let code = generate_join_code(length);
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn exam_requires_total_minutes() {
        let settings = SessionSettings {
            access: AccessMode::Public,
            allow_list: vec![],
            seconds_per_question: None,
            shuffle_questions: false,
            shuffle_options: false,
            show_ranking: true,
            exam_total_minutes: None,
            exam_scheduled_start: None,
        };
        assert!(check_mode_settings(SessionMode::Live, &settings).is_ok());
        assert!(matches!(
            check_mode_settings(SessionMode::Exam, &settings),
            Err(AppError::Validation(_))
        ));
    }
}
