// src/db/sessions.rs

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, types::Json};

use super::participations::{TotalsDelta, apply_delta};
use crate::{
    models::session::{
        AccessMode, RosterEntry, Session, SessionMode, SessionRow, SessionStatus,
    },
    services::scoring::exam_grade,
};

const SESSION_COLUMNS: &str = r#"
    id, quiz_id, owner_id, join_code, mode, access, allow_list, status,
    seconds_per_question, shuffle_questions, shuffle_options, show_ranking,
    exam_total_minutes, exam_scheduled_start, question_order,
    current_question_index, question_phase,
    created_at, updated_at, started_at, finished_at
"#;

/// Settings that may change while a session is waiting.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub access: AccessMode,
    pub allow_list: Vec<i64>,
    pub seconds_per_question: Option<i64>,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub show_ranking: bool,
    pub exam_total_minutes: Option<i64>,
    pub exam_scheduled_start: Option<DateTime<Utc>>,
}

impl SessionSettings {
    pub fn of(session: &Session) -> Self {
        Self {
            access: session.access,
            allow_list: session.allow_list.clone(),
            seconds_per_question: session.live.seconds_per_question,
            shuffle_questions: session.live.shuffle_questions,
            shuffle_options: session.live.shuffle_options,
            show_ranking: session.live.show_ranking,
            exam_total_minutes: session.exam.total_minutes,
            exam_scheduled_start: session.exam.scheduled_start,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub quiz_id: i64,
    pub owner_id: i64,
    pub join_code: String,
    pub mode: SessionMode,
    pub settings: SessionSettings,
}

/// Inserts a `waiting` session. Fails with a unique violation if the join code is taken.
pub async fn insert(pool: &SqlitePool, new: &NewSession) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_scalar(
        r#"
        INSERT INTO sessions (
            quiz_id, owner_id, join_code, mode, access, allow_list, status,
            seconds_per_question, shuffle_questions, shuffle_options, show_ranking,
            exam_total_minutes, exam_scheduled_start,
            current_question_index, question_phase, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'waiting', $7, $8, $9, $10, $11, $12, 0, 'pending', $13, $13)
        RETURNING id
        "#,
    )
    .bind(new.quiz_id)
    .bind(new.owner_id)
    .bind(&new.join_code)
    .bind(new.mode)
    .bind(new.settings.access)
    .bind(Json(new.settings.allow_list.clone()))
    .bind(new.settings.seconds_per_question)
    .bind(new.settings.shuffle_questions)
    .bind(new.settings.shuffle_options)
    .bind(new.settings.show_ranking)
    .bind(new.settings.exam_total_minutes)
    .bind(new.settings.exam_scheduled_start)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn join_code_in_use(pool: &SqlitePool, code: &str) -> Result<bool, sqlx::Error> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM sessions WHERE join_code = $1 AND status <> 'finished'",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn find_row(pool: &SqlitePool, id: i64) -> Result<Option<SessionRow>, sqlx::Error> {
    sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {} FROM sessions WHERE id = $1",
        SESSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn roster(pool: &SqlitePool, session_id: i64) -> Result<Vec<RosterEntry>, sqlx::Error> {
    sqlx::query_as::<_, RosterEntry>(
        r#"
        SELECT id, session_id, participant_id, display_name, status,
               score, correct_count, incorrect_count, unanswered_count, grade, joined_at
        FROM roster_entries
        WHERE session_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}

/// Loads a session with its roster.
pub async fn load(pool: &SqlitePool, id: i64) -> Result<Option<Session>, sqlx::Error> {
    let Some(row) = find_row(pool, id).await? else {
        return Ok(None);
    };
    let roster = roster(pool, id).await?;
    Ok(Some(Session::from_parts(row, roster)))
}

/// Finds the joinable (non-finished) session holding a code.
pub async fn find_open_by_code(pool: &SqlitePool, code: &str) -> Result<Option<Session>, sqlx::Error> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {} FROM sessions WHERE join_code = $1 AND status <> 'finished'",
        SESSION_COLUMNS
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let roster = roster(pool, row.id).await?;
            Ok(Some(Session::from_parts(row, roster)))
        }
        None => Ok(None),
    }
}

pub async fn list(
    pool: &SqlitePool,
    owner_id: Option<i64>,
    status: Option<SessionStatus>,
) -> Result<Vec<SessionRow>, sqlx::Error> {
    let mut query_builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM sessions WHERE 1 = 1",
        SESSION_COLUMNS
    ));
    if let Some(owner_id) = owner_id {
        query_builder.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(status) = status {
        query_builder.push(" AND status = ").push_bind(status.as_str());
    }
    query_builder.push(" ORDER BY id DESC");

    query_builder
        .build_query_as::<SessionRow>()
        .fetch_all(pool)
        .await
}

/// Rewrites the editable settings. Only matches a `waiting` session.
pub async fn update_settings(
    pool: &SqlitePool,
    id: i64,
    settings: &SessionSettings,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET access = $1, allow_list = $2, seconds_per_question = $3,
            shuffle_questions = $4, shuffle_options = $5, show_ranking = $6,
            exam_total_minutes = $7, exam_scheduled_start = $8, updated_at = $9
        WHERE id = $10 AND status = 'waiting'
        "#,
    )
    .bind(settings.access)
    .bind(Json(settings.allow_list.clone()))
    .bind(settings.seconds_per_question)
    .bind(settings.shuffle_questions)
    .bind(settings.shuffle_options)
    .bind(settings.show_ranking)
    .bind(settings.exam_total_minutes)
    .bind(settings.exam_scheduled_start)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `waiting -> active`. Returns false if the session was not waiting.
pub async fn mark_started(
    pool: &SqlitePool,
    id: i64,
    question_order: Option<Vec<i64>>,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET status = 'active', started_at = $1, updated_at = $1, question_order = $2,
            current_question_index = 0, question_phase = 'pending'
        WHERE id = $3 AND status = 'waiting'
        "#,
    )
    .bind(now)
    .bind(question_order.map(Json))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Opens question `index`. Only the first question (from `pending`) or the one right
/// after a closed question can be opened, so the index never moves backwards.
pub async fn open_question(pool: &SqlitePool, id: i64, index: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET current_question_index = $1, question_phase = 'open', updated_at = $2
        WHERE id = $3 AND status = 'active'
          AND ((question_phase = 'pending' AND current_question_index = $1)
            OR (question_phase = 'closed' AND current_question_index = $1 - 1))
        "#,
    )
    .bind(index)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Closes the open question `index` and charges an unanswered mark to every active
/// roster member without an answer for it. Returns false (and changes nothing) if
/// the session is not on `index` with that question open.
pub async fn close_question(
    pool: &SqlitePool,
    id: i64,
    index: i64,
    question_id: i64,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let closed = sqlx::query(
        r#"
        UPDATE sessions
        SET question_phase = 'closed', updated_at = $1
        WHERE id = $2 AND status = 'active'
          AND current_question_index = $3 AND question_phase = 'open'
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .bind(index)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !closed {
        tx.rollback().await?;
        return Ok(false);
    }

    let silent: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT r.participant_id
        FROM roster_entries r
        WHERE r.session_id = $1 AND r.status = 'active'
          AND NOT EXISTS (
              SELECT 1 FROM answers a
              JOIN participations p ON p.id = a.participation_id
              WHERE p.session_id = r.session_id
                AND p.participant_id = r.participant_id
                AND a.question_id = $2
          )
        "#,
    )
    .bind(id)
    .bind(question_id)
    .fetch_all(&mut *tx)
    .await?;

    let unanswered = TotalsDelta {
        unanswered: 1,
        ..TotalsDelta::default()
    };
    for participant_id in silent {
        apply_delta(&mut *tx, id, participant_id, &unanswered).await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// `active|waiting -> finished` and closes every open participation.
///
/// With `grade_over = Some(total)` (exam mode) each open participation is graded
/// 0..=10 from its correct count and charged for questions it never answered.
/// Returns false if the session was already finished.
pub async fn finish(
    pool: &SqlitePool,
    id: i64,
    grade_over: Option<usize>,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let finished = sqlx::query(
        r#"
        UPDATE sessions
        SET status = 'finished', finished_at = $1, updated_at = $1
        WHERE id = $2 AND status <> 'finished'
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if !finished {
        tx.rollback().await?;
        return Ok(false);
    }

    if let Some(total) = grade_over {
        let open: Vec<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT participant_id, correct_count, incorrect_count
            FROM participations
            WHERE session_id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        for (participant_id, correct, incorrect) in open {
            let missing = (total as i64 - correct - incorrect).max(0);
            if missing > 0 {
                let delta = TotalsDelta {
                    unanswered: missing,
                    ..TotalsDelta::default()
                };
                apply_delta(&mut *tx, id, participant_id, &delta).await?;
            }
            set_grade(&mut *tx, id, participant_id, exam_grade(correct, total)).await?;
        }
    }

    sqlx::query(
        r#"
        UPDATE participations
        SET status = 'finished', finished_at = $1, updated_at = $1
        WHERE session_id = $2 AND status = 'active'
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE roster_entries SET status = 'finished' WHERE session_id = $1 AND status = 'active'",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Stores a grade on both the participation and its roster slot.
pub(crate) async fn set_grade(
    conn: &mut sqlx::SqliteConnection,
    session_id: i64,
    participant_id: i64,
    grade: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE participations SET grade = $1 WHERE session_id = $2 AND participant_id = $3")
        .bind(grade)
        .bind(session_id)
        .bind(participant_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE roster_entries SET grade = $1 WHERE session_id = $2 AND participant_id = $3")
        .bind(grade)
        .bind(session_id)
        .bind(participant_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Deletes a session together with its roster, participations and answers.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    sqlx::query(
        r#"
        DELETE FROM answers
        WHERE participation_id IN (SELECT id FROM participations WHERE session_id = $1)
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM participations WHERE session_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM roster_entries WHERE session_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(deleted == 1)
}
