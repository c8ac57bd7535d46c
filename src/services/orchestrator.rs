// src/services/orchestrator.rs

//! Drives sessions: question cycling, answer intake, early advance and closure.
//!
//! Closing and opening questions for a session is serialized by a per-session token
//! (`SessionLocks`). Every deferred step re-reads the session and compares its
//! question index and phase before acting, so a timer that fires late is a no-op.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use validator::Validate;

use super::{
    locks::{SessionLocks, SessionToken},
    notifier::{Notifier, publish_event},
    question_bank::QuestionBank,
    registry::{SessionRegistry, ensure_owner},
    scoring,
    timers::{TimerKind, TimerRegistry},
    tracker::ParticipationTracker,
};
use crate::{
    config::Config,
    db::{
        self,
        participations::{NewAnswer, RecordResult},
    },
    error::AppError,
    models::{
        answer::{AnswerOutcome, AnswerReceipt, Selection, SubmitAnswerRequest},
        event::{
            self, ExamStarted, OptionStat, ParticipantFinished, ParticipantLeft, QuestionClosed,
            QuestionOpened, SessionFinished, SessionReport, VoteProgress,
        },
        question::{PublicQuestion, Question},
        session::{
            CreateSessionRequest, QuestionPhase, RosterStatus, Session, SessionMode,
            SessionStatus, UpdateSessionRequest,
        },
        user::Requester,
    },
};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Result of an exam participant finishing early.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FinalizeOutcome {
    pub grade: f64,
    /// True if this was the last pending participant and the session closed.
    pub session_finished: bool,
}

#[derive(Clone)]
pub struct Orchestrator {
    pool: SqlitePool,
    config: Arc<Config>,
    registry: SessionRegistry,
    tracker: ParticipationTracker,
    questions: Arc<dyn QuestionBank>,
    notifier: Arc<dyn Notifier>,
    timers: Arc<TimerRegistry>,
    locks: Arc<SessionLocks>,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        config: Arc<Config>,
        registry: SessionRegistry,
        tracker: ParticipationTracker,
        questions: Arc<dyn QuestionBank>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pool,
            config,
            registry,
            tracker,
            questions,
            notifier,
            timers: Arc::new(TimerRegistry::new()),
            locks: Arc::new(SessionLocks::new()),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &ParticipationTracker {
        &self.tracker
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    // ---- lifecycle wrappers -------------------------------------------------

    pub async fn create_session(
        &self,
        owner_id: i64,
        req: CreateSessionRequest,
    ) -> Result<Session, AppError> {
        let session = self.registry.create(owner_id, req).await?;
        self.schedule_exam_start(&session);
        Ok(session)
    }

    pub async fn update_session(
        &self,
        id: i64,
        requester: Requester,
        req: UpdateSessionRequest,
    ) -> Result<Session, AppError> {
        let session = self.registry.update(id, requester, req).await?;
        self.schedule_exam_start(&session);
        Ok(session)
    }

    pub async fn delete_session(&self, id: i64, requester: Requester) -> Result<(), AppError> {
        self.registry.delete(id, requester).await?;
        self.timers.cancel_all(id);
        self.locks.release_session(id);
        Ok(())
    }

    /// Arms (or clears) the automatic start of a waiting exam.
    fn schedule_exam_start(&self, session: &Session) {
        let start_at = match (session.mode, session.status, session.exam.scheduled_start) {
            (SessionMode::Exam, SessionStatus::Waiting, Some(at)) => at,
            _ => {
                self.timers.cancel(session.id, TimerKind::ScheduledStart);
                return;
            }
        };
        let delay = (start_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.timers.arm(
            session.id,
            TimerKind::ScheduledStart,
            delay,
            self.clone().scheduled_start_task(session.id),
        );
    }

    // ---- start / stop -------------------------------------------------------

    /// `waiting -> active`. Live sessions open their first question right away;
    /// exams announce their deadline and arm a safety close.
    pub async fn start_session(&self, id: i64, requester: Requester) -> Result<Session, AppError> {
        let session = self.registry.get(id).await?;
        ensure_owner(&session, requester)?;
        self.begin(session).await?;
        self.registry.get(id).await
    }

    async fn begin(&self, session: Session) -> Result<(), AppError> {
        if session.status != SessionStatus::Waiting {
            return Err(AppError::InvalidState(
                "Only waiting sessions can be started".to_string(),
            ));
        }

        let questions = self.questions.questions(session.quiz_id).await?;
        if questions.is_empty() {
            return Err(AppError::InvalidState("Quiz has no questions".to_string()));
        }

        let order = session.live.shuffle_questions.then(|| shuffled_ids(&questions));
        if !db::sessions::mark_started(&self.pool, session.id, order).await? {
            return Err(AppError::InvalidState(
                "Only waiting sessions can be started".to_string(),
            ));
        }
        self.timers.cancel(session.id, TimerKind::ScheduledStart);
        tracing::info!(session_id = session.id, mode = ?session.mode, "Session started");

        match session.mode {
            SessionMode::Live => {
                // The session is already active; a failed first step must not strand it.
                if let Err(e) = self.run_question_cycle(session.id, 0).await {
                    tracing::error!(
                        session_id = session.id,
                        "First question failed to open, retrying: {}",
                        e
                    );
                    self.timers.arm(
                        session.id,
                        TimerKind::Advance,
                        self.config.question_pause(),
                        self.clone().advance_task(session.id, 0),
                    );
                }
                Ok(())
            }
            SessionMode::Exam => {
                let started = self.registry.get(session.id).await?;
                let total_minutes = started.exam.total_minutes.unwrap_or_default();
                let deadline = started
                    .exam_deadline()
                    .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(total_minutes));

                publish_event(
                    self.notifier.as_ref(),
                    &started.join_code,
                    event::EXAM_STARTED,
                    &ExamStarted {
                        session_id: started.id,
                        total_questions: questions.len(),
                        total_minutes,
                        deadline,
                    },
                );

                let window = Duration::from_secs(total_minutes.max(0) as u64 * 60);
                self.timers.arm(
                    started.id,
                    TimerKind::ExamDeadline,
                    window + self.config.exam_grace(),
                    self.clone().exam_deadline_task(started.id),
                );
                Ok(())
            }
        }
    }

    /// Host ends an active session now, wherever it is in the question cycle.
    pub async fn stop_session(&self, id: i64, requester: Requester) -> Result<Session, AppError> {
        let session = self.registry.get(id).await?;
        ensure_owner(&session, requester)?;
        if session.status != SessionStatus::Active {
            return Err(AppError::InvalidState(
                "Only active sessions can be stopped".to_string(),
            ));
        }

        // Waits out a closure in flight so its events precede `session-finished`.
        let token = self.locks.acquire(id, self.config.lock_timeout()).await?;
        self.timers.cancel_all(id);
        self.close_session(id).await?;
        self.forget_token(id, token);
        self.registry.get(id).await
    }

    // ---- question cycle -----------------------------------------------------

    /// Opens question `index`, or closes the session once the questions run out.
    ///
    /// Only the first question (nothing opened yet) or the successor of a closed question
    /// can be opened; any other call is a stale step and is dropped.
    pub async fn run_question_cycle(&self, id: i64, index: i64) -> Result<(), AppError> {
        let token = self.locks.acquire(id, self.config.lock_timeout()).await?;

        let session = self.registry.get(id).await?;
        if session.status != SessionStatus::Active {
            tracing::debug!(session_id = id, index, "Cycle step on inactive session dropped");
            if session.is_finished() {
                self.forget_token(id, token);
            }
            return Ok(());
        }
        let expected = match session.question_phase {
            QuestionPhase::Pending => session.current_question_index,
            QuestionPhase::Closed => session.current_question_index + 1,
            QuestionPhase::Open => -1,
        };
        if index != expected {
            tracing::debug!(
                session_id = id,
                index,
                current = session.current_question_index,
                phase = ?session.question_phase,
                "Stale cycle step dropped"
            );
            return Ok(());
        }

        let questions = self.ordered_questions(&session).await?;
        let Some(question) = usize::try_from(index).ok().and_then(|i| questions.get(i)) else {
            self.close_session(id).await?;
            self.forget_token(id, token);
            return Ok(());
        };

        if !db::sessions::open_question(&self.pool, id, index).await? {
            tracing::debug!(session_id = id, index, "Question already opened elsewhere");
            return Ok(());
        }

        let time_limit = self.effective_time_limit(&session, question);
        self.timers.arm(
            id,
            TimerKind::QuestionDeadline,
            Duration::from_secs(time_limit as u64),
            self.clone().deadline_task(id, index),
        );

        let public = question.to_public();
        let mut options = public.options;
        if session.live.shuffle_options {
            options.shuffle(&mut rand::thread_rng());
        }

        tracing::info!(session_id = id, question_index = index, time_limit, "Question opened");
        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::QUESTION_OPENED,
            &QuestionOpened {
                question_id: question.id,
                prompt: question.content.clone(),
                question_type: question.question_type.clone(),
                time_limit,
                points: question.point_cap,
                question_number: index as usize + 1,
                total_questions: questions.len(),
                options,
            },
        );
        Ok(())
    }

    /// Closes question `index`: charges non-responders, publishes the results and
    /// schedules the next question after the display pause.
    ///
    /// Returns false when the session is no longer on `index` with the question open,
    /// which makes a second call for the same index a no-op.
    pub async fn close_question(&self, id: i64, index: i64) -> Result<bool, AppError> {
        let token = self.locks.acquire(id, self.config.lock_timeout()).await?;

        let session = self.registry.get(id).await?;
        if session.is_finished() {
            tracing::debug!(session_id = id, index, "Closure on finished session dropped");
            self.forget_token(id, token);
            return Ok(false);
        }
        if session.status != SessionStatus::Active
            || session.current_question_index != index
            || session.question_phase != QuestionPhase::Open
        {
            tracing::debug!(session_id = id, index, "Stale question closure dropped");
            return Ok(false);
        }

        let questions = self.ordered_questions(&session).await?;
        let question = usize::try_from(index)
            .ok()
            .and_then(|i| questions.get(i))
            .ok_or_else(|| AppError::NotFound(format!("Question #{} not found", index)))?;

        if !db::sessions::close_question(&self.pool, id, index, question.id).await? {
            return Ok(false);
        }
        self.timers.cancel(id, TimerKind::QuestionDeadline);
        // Armed before anything else can fail, so the cycle always moves on.
        self.timers.arm(
            id,
            TimerKind::Advance,
            self.config.question_pause(),
            self.clone().advance_task(id, index + 1),
        );

        let votes = self
            .tracker
            .option_votes(id, question.id, question.option_count())
            .await?;
        let option_stats = question
            .options
            .iter()
            .zip(votes)
            .enumerate()
            .map(|(option_id, (option, votes))| OptionStat {
                option_id,
                text: option.text.clone(),
                votes,
            })
            .collect();
        let correct_indices: Vec<usize> = question.correct_indices().into_iter().collect();
        let partial_ranking = if session.live.show_ranking {
            self.tracker.ranking(id, session.mode).await?
        } else {
            Vec::new()
        };

        tracing::info!(session_id = id, question_index = index, "Question closed");
        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::QUESTION_CLOSED,
            &QuestionClosed {
                question_id: question.id,
                question_number: index as usize + 1,
                option_stats,
                correct_index: correct_indices.first().copied(),
                correct_indices,
                partial_ranking,
            },
        );

        Ok(true)
    }

    /// Terminal transition. Exams are graded 0..=10 here; everyone still open is closed.
    /// Returns false if the session had already finished.
    pub async fn close_session(&self, id: i64) -> Result<bool, AppError> {
        let session = self.registry.get(id).await?;
        if session.is_finished() {
            return Ok(false);
        }

        let total_questions = self.questions.questions(session.quiz_id).await?.len();
        let grade_over = (session.mode == SessionMode::Exam).then_some(total_questions);

        if !db::sessions::finish(&self.pool, id, grade_over).await? {
            return Ok(false);
        }
        self.timers.cancel_all(id);
        // Kept while a caller still holds the token; that caller forgets it.
        self.locks.release_session(id);

        let ranking = self.tracker.ranking(id, session.mode).await?;
        let average_score = if ranking.is_empty() {
            0.0
        } else {
            ranking.iter().map(|r| r.score as f64).sum::<f64>() / ranking.len() as f64
        };
        let report = SessionReport {
            total_questions,
            participants: ranking.len(),
            average_score,
        };

        tracing::info!(session_id = id, participants = ranking.len(), "Session finished");
        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::SESSION_FINISHED,
            &SessionFinished {
                session_id: id,
                ranking,
                report: Some(report),
            },
        );
        Ok(true)
    }

    // ---- answers ------------------------------------------------------------

    /// Scores and records one answer.
    ///
    /// Live duplicates come back as `AlreadyAnswered` with nothing changed. Exam
    /// resubmissions replace the earlier answer. In live mode, once every active
    /// participant has answered the open question, it closes without waiting for its timer.
    pub async fn record_answer(
        &self,
        id: i64,
        participant_id: i64,
        req: SubmitAnswerRequest,
    ) -> Result<AnswerReceipt, AppError> {
        req.validate()?;
        let selection = Selection::from_tokens(&req.selected)?;

        let session = self.registry.get(id).await?;
        match session.status {
            SessionStatus::Finished => {
                return Err(AppError::InvalidState("Session has finished".to_string()));
            }
            SessionStatus::Waiting => {
                return Err(AppError::InvalidState(
                    "Session has not started yet".to_string(),
                ));
            }
            SessionStatus::Active => {}
        }

        let entry = session.roster_entry(participant_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "Participant {} is not in session {}",
                participant_id, id
            ))
        })?;
        match entry.status {
            RosterStatus::Active => {}
            RosterStatus::Left => {
                return Err(AppError::InvalidState(
                    "Rejoin the session before answering".to_string(),
                ));
            }
            RosterStatus::Finished => {
                return Err(AppError::InvalidState(
                    "You have already finished this session".to_string(),
                ));
            }
        }

        let questions = self.ordered_questions(&session).await?;
        let question = questions
            .iter()
            .find(|q| q.id == req.question_id)
            .ok_or_else(|| AppError::NotFound(format!("Question {} not found", req.question_id)))?;

        let open_index = match session.mode {
            SessionMode::Live => {
                let index = session.current_question_index;
                let is_open = session.question_phase == QuestionPhase::Open
                    && usize::try_from(index)
                        .ok()
                        .and_then(|i| questions.get(i))
                        .is_some_and(|q| q.id == question.id);
                if !is_open {
                    return Err(AppError::InvalidState(
                        "That question is not open".to_string(),
                    ));
                }
                Some(index)
            }
            SessionMode::Exam => None,
        };

        selection.check_bounds(question.option_count())?;

        let time_limit = self.effective_time_limit(&session, question);
        let score = scoring::score(
            question,
            &selection,
            session.mode,
            req.elapsed_seconds,
            time_limit,
        );
        let answer = NewAnswer {
            question_id: question.id,
            selections: selection.to_vec(),
            is_correct: score.is_correct,
            elapsed_seconds: req.elapsed_seconds,
            points: score.points,
        };

        let result = self
            .tracker
            .record(id, participant_id, session.mode, open_index, &answer)
            .await?;

        let receipt = match result {
            RecordResult::Closed => {
                return Err(AppError::InvalidState(
                    "Your participation is closed".to_string(),
                ));
            }
            RecordResult::NotAccepting => {
                return Err(AppError::InvalidState(
                    "That question is no longer open".to_string(),
                ));
            }
            RecordResult::Duplicate {
                total_score,
                is_correct,
                points,
            } => {
                tracing::debug!(
                    session_id = id,
                    participant_id,
                    question_id = question.id,
                    "Duplicate live answer ignored"
                );
                return Ok(AnswerReceipt {
                    outcome: AnswerOutcome::AlreadyAnswered,
                    question_id: question.id,
                    is_correct,
                    points,
                    total_score,
                });
            }
            RecordResult::Recorded { total_score } => AnswerReceipt {
                outcome: AnswerOutcome::Recorded,
                question_id: question.id,
                is_correct: score.is_correct,
                points: score.points,
                total_score,
            },
            RecordResult::Replaced { total_score, delta } => {
                tracing::debug!(
                    session_id = id,
                    participant_id,
                    score_delta = delta.score,
                    "Exam answer replaced"
                );
                AnswerReceipt {
                    outcome: AnswerOutcome::Replaced,
                    question_id: question.id,
                    is_correct: score.is_correct,
                    points: score.points,
                    total_score,
                }
            }
        };

        if let Some(index) = open_index {
            self.after_live_answer(&session, question.id, index).await;
        }

        Ok(receipt)
    }

    /// Publishes vote progress and closes the question early once everyone answered.
    /// Failures here are logged: the answer itself is already stored.
    async fn after_live_answer(&self, session: &Session, question_id: i64, index: i64) {
        if let Err(e) = self.check_early_advance(session, question_id, index).await {
            tracing::error!(session_id = session.id, question_index = index, "Early advance failed: {}", e);
        }
    }

    async fn check_early_advance(
        &self,
        session: &Session,
        question_id: i64,
        index: i64,
    ) -> Result<(), AppError> {
        let roster = db::sessions::roster(&self.pool, session.id).await?;
        let total = roster
            .iter()
            .filter(|r| r.status == RosterStatus::Active)
            .count();
        let answered = self.tracker.answered_count(session.id, question_id).await?;

        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::VOTE_PROGRESS,
            &VoteProgress { answered, total },
        );

        if total > 0 && answered >= total {
            tracing::info!(session_id = session.id, question_index = index, "Everyone answered, closing early");
            self.timers.cancel(session.id, TimerKind::QuestionDeadline);
            self.close_question(session.id, index).await?;
        }
        Ok(())
    }

    // ---- participants -------------------------------------------------------

    /// Exam only: a participant ends their attempt early and receives their grade.
    /// The last pending participant to do so closes the session.
    pub async fn finalize_participant(
        &self,
        id: i64,
        participant_id: i64,
    ) -> Result<FinalizeOutcome, AppError> {
        let session = self.registry.get(id).await?;
        if session.mode != SessionMode::Exam {
            return Err(AppError::InvalidState(
                "Only exam participants can finish early".to_string(),
            ));
        }
        if session.status != SessionStatus::Active {
            return Err(AppError::InvalidState("Exam is not running".to_string()));
        }
        let entry = session.roster_entry(participant_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "Participant {} is not in session {}",
                participant_id, id
            ))
        })?;

        let total_questions = self.questions.questions(session.quiz_id).await?.len();
        let grade = self
            .tracker
            .finalize(id, participant_id, total_questions)
            .await?
            .ok_or_else(|| AppError::InvalidState("You have already finished".to_string()))?;

        let roster = db::sessions::roster(&self.pool, id).await?;
        let finished = roster
            .iter()
            .filter(|r| r.status == RosterStatus::Finished)
            .count();
        let pending = roster
            .iter()
            .filter(|r| r.status == RosterStatus::Active)
            .count();

        tracing::info!(session_id = id, participant_id, grade, pending, "Participant finished exam");
        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::PARTICIPANT_FINISHED,
            &ParticipantFinished {
                participant_id,
                display_name: entry.display_name.clone(),
                grade,
                finished,
                total: roster.len(),
            },
        );

        let session_finished = if pending == 0 {
            self.close_session(id).await?
        } else {
            false
        };

        Ok(FinalizeOutcome {
            grade,
            session_finished,
        })
    }

    /// A participant steps away; their roster slot is kept as `left`.
    pub async fn leave_session(&self, id: i64, participant_id: i64) -> Result<(), AppError> {
        let session = self.registry.get(id).await?;
        let entry = session.roster_entry(participant_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "Participant {} is not in session {}",
                participant_id, id
            ))
        })?;

        let left = db::participations::transition_roster(
            &self.pool,
            id,
            participant_id,
            RosterStatus::Active,
            RosterStatus::Left,
        )
        .await?;
        if !left {
            return Ok(());
        }

        publish_event(
            self.notifier.as_ref(),
            &session.join_code,
            event::PARTICIPANT_LEFT,
            &ParticipantLeft {
                participant_id,
                display_name: entry.display_name.clone(),
            },
        );

        // The remaining participants may all have answered already.
        if session.mode == SessionMode::Live
            && session.status == SessionStatus::Active
            && session.question_phase == QuestionPhase::Open
        {
            let questions = self.ordered_questions(&session).await?;
            if let Some(question) = usize::try_from(session.current_question_index)
                .ok()
                .and_then(|i| questions.get(i))
            {
                self.check_early_advance(&session, question.id, session.current_question_index)
                    .await?;
            }
        }
        Ok(())
    }

    /// Sanitized questions of a running exam, for one of its participants.
    pub async fn exam_paper(
        &self,
        id: i64,
        participant_id: i64,
    ) -> Result<Vec<PublicQuestion>, AppError> {
        let session = self.registry.get(id).await?;
        if session.mode != SessionMode::Exam || session.status != SessionStatus::Active {
            return Err(AppError::InvalidState("Exam is not running".to_string()));
        }
        if session.roster_entry(participant_id).is_none() {
            return Err(AppError::PermissionDenied(
                "Join the session to see its questions".to_string(),
            ));
        }
        let questions = self.ordered_questions(&session).await?;
        let mut paper: Vec<PublicQuestion> = questions.iter().map(Question::to_public).collect();
        if session.live.shuffle_options {
            for q in &mut paper {
                q.options.shuffle(&mut rand::thread_rng());
            }
        }
        Ok(paper)
    }

    /// Re-arms work for sessions that were active when the process stopped.
    pub async fn resume_active_sessions(&self) -> Result<(), AppError> {
        let rows = db::sessions::list(&self.pool, None, Some(SessionStatus::Active)).await?;
        for row in rows {
            let id = row.id;
            match (row.mode, row.question_phase) {
                // The original deadline is gone; close now and carry on.
                (SessionMode::Live, QuestionPhase::Open) => self.timers.arm(
                    id,
                    TimerKind::QuestionDeadline,
                    Duration::ZERO,
                    self.clone().deadline_task(id, row.current_question_index),
                ),
                (SessionMode::Live, QuestionPhase::Pending) => self.timers.arm(
                    id,
                    TimerKind::Advance,
                    Duration::ZERO,
                    self.clone().advance_task(id, row.current_question_index),
                ),
                (SessionMode::Live, QuestionPhase::Closed) => self.timers.arm(
                    id,
                    TimerKind::Advance,
                    self.config.question_pause(),
                    self.clone().advance_task(id, row.current_question_index + 1),
                ),
                (SessionMode::Exam, _) => {
                    let started = row.started_at.unwrap_or(row.updated_at);
                    let minutes = row.exam_total_minutes.unwrap_or_default();
                    let close_at = started + chrono::Duration::minutes(minutes);
                    let remaining = (close_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    self.timers.arm(
                        id,
                        TimerKind::ExamDeadline,
                        remaining + self.config.exam_grace(),
                        self.clone().exam_deadline_task(id),
                    );
                }
            }
            tracing::info!(session_id = id, "Resumed active session");
        }

        let waiting = db::sessions::list(&self.pool, None, Some(SessionStatus::Waiting)).await?;
        for row in waiting.into_iter().filter(|r| r.mode == SessionMode::Exam) {
            let session = self.registry.get(row.id).await?;
            self.schedule_exam_start(&session);
        }
        Ok(())
    }

    // ---- helpers ------------------------------------------------------------

    /// Questions in play order: the persisted shuffle if any, authored order otherwise.
    async fn ordered_questions(&self, session: &Session) -> Result<Vec<Question>, AppError> {
        let questions = self.questions.questions(session.quiz_id).await?;
        let Some(order) = &session.question_order else {
            return Ok(questions);
        };
        let mut by_id: std::collections::HashMap<i64, Question> =
            questions.into_iter().map(|q| (q.id, q)).collect();
        Ok(order.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Session override, else the question's own limit, else the configured default.
    fn effective_time_limit(&self, session: &Session, question: &Question) -> i64 {
        session
            .live
            .seconds_per_question
            .filter(|s| *s > 0)
            .or(Some(question.time_limit_seconds).filter(|s| *s > 0))
            .unwrap_or(self.config.default_time_limit_seconds)
    }

    /// Gives back a finished session's token and drops its entry.
    fn forget_token(&self, id: i64, token: SessionToken) {
        drop(token);
        self.locks.release_session(id);
    }

    // ---- deferred work ------------------------------------------------------
    //
    // Boxed so the timer callbacks and the steps they call do not form a recursive
    // future type. Failures are logged and never escape the task.

    fn deadline_task(self, id: i64, index: i64) -> Task {
        Box::pin(async move {
            tracing::debug!(session_id = id, question_index = index, "Question deadline reached");
            if let Err(e) = self.close_question(id, index).await {
                tracing::error!(session_id = id, question_index = index, "Deadline closure failed: {}", e);
            }
        })
    }

    fn advance_task(self, id: i64, index: i64) -> Task {
        Box::pin(async move {
            if let Err(e) = self.run_question_cycle(id, index).await {
                tracing::error!(session_id = id, question_index = index, "Advance failed: {}", e);
            }
        })
    }

    fn exam_deadline_task(self, id: i64) -> Task {
        Box::pin(async move {
            match self.close_session(id).await {
                Ok(true) => tracing::info!(session_id = id, "Exam force-closed at deadline"),
                Ok(false) => {}
                Err(e) => tracing::error!(session_id = id, "Exam deadline closure failed: {}", e),
            }
        })
    }

    fn scheduled_start_task(self, id: i64) -> Task {
        Box::pin(async move {
            let result = match self.registry.get(id).await {
                Ok(session) if session.status == SessionStatus::Waiting => self.begin(session).await,
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::error!(session_id = id, "Scheduled exam start failed: {}", e);
            }
        })
    }
}

fn shuffled_ids(questions: &[Question]) -> Vec<i64> {
    let mut ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}
