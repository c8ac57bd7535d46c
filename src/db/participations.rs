// src/db/participations.rs

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool, types::Json};

use super::sessions::set_grade;
use crate::{
    models::{
        participation::{Answer, Participation, ParticipationRow, RankingEntry},
        session::{RosterStatus, SessionMode},
    },
    services::scoring::exam_grade,
};

/// Change to a participant's running totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TotalsDelta {
    pub score: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub unanswered: i64,
}

impl TotalsDelta {
    /// Delta from replacing `previous` (if any) with `next`; each side is `(is_correct, points)`.
    pub fn between(previous: Option<(bool, i64)>, next: (bool, i64)) -> Self {
        let weight = |(correct, points): (bool, i64)| TotalsDelta {
            score: points,
            correct: correct as i64,
            incorrect: (!correct) as i64,
            unanswered: 0,
        };
        let new = weight(next);
        match previous {
            Some(old) => {
                let old = weight(old);
                TotalsDelta {
                    score: new.score - old.score,
                    correct: new.correct - old.correct,
                    incorrect: new.incorrect - old.incorrect,
                    unanswered: 0,
                }
            }
            None => new,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == TotalsDelta::default()
    }
}

/// Applies a delta to the participation and its roster slot together.
/// This is the only writer of running totals; both views always move in step.
pub async fn apply_delta(
    conn: &mut SqliteConnection,
    session_id: i64,
    participant_id: i64,
    delta: &TotalsDelta,
) -> Result<(), sqlx::Error> {
    if delta.is_zero() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE participations
        SET score = score + $1, correct_count = correct_count + $2,
            incorrect_count = incorrect_count + $3, unanswered_count = unanswered_count + $4,
            updated_at = $5
        WHERE session_id = $6 AND participant_id = $7
        "#,
    )
    .bind(delta.score)
    .bind(delta.correct)
    .bind(delta.incorrect)
    .bind(delta.unanswered)
    .bind(Utc::now())
    .bind(session_id)
    .bind(participant_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE roster_entries
        SET score = score + $1, correct_count = correct_count + $2,
            incorrect_count = incorrect_count + $3, unanswered_count = unanswered_count + $4
        WHERE session_id = $5 AND participant_id = $6
        "#,
    )
    .bind(delta.score)
    .bind(delta.correct)
    .bind(delta.incorrect)
    .bind(delta.unanswered)
    .bind(session_id)
    .bind(participant_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Adds a zeroed roster slot and an open participation.
/// Returns false if the participant was already on the roster.
pub async fn enroll(
    pool: &SqlitePool,
    session_id: i64,
    participant_id: i64,
    display_name: &str,
    mode: SessionMode,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO roster_entries (session_id, participant_id, display_name, status, joined_at)
        VALUES ($1, $2, $3, 'active', $4)
        ON CONFLICT (session_id, participant_id) DO NOTHING
        "#,
    )
    .bind(session_id)
    .bind(participant_id)
    .bind(display_name)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if inserted == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO participations (session_id, participant_id, mode, status, started_at, updated_at)
        VALUES ($1, $2, $3, 'active', $4, $4)
        ON CONFLICT (session_id, participant_id) DO NOTHING
        "#,
    )
    .bind(session_id)
    .bind(participant_id)
    .bind(mode)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Moves a roster slot from `from` to `to`. Returns false if it was not in `from`.
pub async fn transition_roster(
    pool: &SqlitePool,
    session_id: i64,
    participant_id: i64,
    from: RosterStatus,
    to: RosterStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE roster_entries SET status = $1
        WHERE session_id = $2 AND participant_id = $3 AND status = $4
        "#,
    )
    .bind(to)
    .bind(session_id)
    .bind(participant_id)
    .bind(from)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find(
    pool: &SqlitePool,
    session_id: i64,
    participant_id: i64,
) -> Result<Option<Participation>, sqlx::Error> {
    let row = sqlx::query_as::<_, ParticipationRow>(
        r#"
        SELECT id, session_id, participant_id, mode, status, score, correct_count,
               incorrect_count, unanswered_count, grade, started_at, finished_at, updated_at
        FROM participations
        WHERE session_id = $1 AND participant_id = $2
        "#,
    )
    .bind(session_id)
    .bind(participant_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let answers = sqlx::query_as::<_, Answer>(
        r#"
        SELECT id, participation_id, question_id, selections, is_correct,
               elapsed_seconds, points, answered_at
        FROM answers
        WHERE participation_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(row.id)
    .fetch_all(pool)
    .await?;

    Ok(Some(Participation { row, answers }))
}

/// A scored answer ready to be stored.
#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub question_id: i64,
    pub selections: Vec<usize>,
    pub is_correct: bool,
    pub elapsed_seconds: f64,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordResult {
    Recorded {
        total_score: i64,
    },
    /// Exam resubmission; `delta` is what changed in the totals.
    Replaced {
        total_score: i64,
        delta: TotalsDelta,
    },
    /// Live duplicate; the stored answer is untouched.
    Duplicate {
        total_score: i64,
        is_correct: bool,
        points: i64,
    },
    /// The participation is missing or already finished.
    Closed,
    /// The session stopped accepting answers for this question.
    NotAccepting,
}

/// Stores an answer and moves the totals by the resulting delta, in one transaction.
///
/// Live: the first answer for a question wins; later ones are reported as duplicates.
/// Exam: a later answer replaces the earlier one and only the difference is applied.
///
/// `open_index` (live) requires the session to still have that question open when the
/// answer is written, so an answer can never land after its question was closed.
pub async fn record_answer(
    pool: &SqlitePool,
    session_id: i64,
    participant_id: i64,
    mode: SessionMode,
    open_index: Option<i64>,
    answer: &NewAnswer,
) -> Result<RecordResult, sqlx::Error> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    // Write first so the transaction holds the write lock for the reads below.
    let participation_id: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE participations SET updated_at = $1
        WHERE session_id = $2 AND participant_id = $3 AND status = 'active'
        RETURNING id
        "#,
    )
    .bind(now)
    .bind(session_id)
    .bind(participant_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(participation_id) = participation_id else {
        tx.rollback().await?;
        return Ok(RecordResult::Closed);
    };

    let accepting: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM sessions
        WHERE id = $1 AND status = 'active'
          AND ($2 IS NULL OR (current_question_index = $2 AND question_phase = 'open'))
        "#,
    )
    .bind(session_id)
    .bind(open_index)
    .fetch_optional(&mut *tx)
    .await?;

    if accepting.is_none() {
        tx.rollback().await?;
        return Ok(RecordResult::NotAccepting);
    }

    let previous: Option<(bool, i64)> = sqlx::query_as(
        "SELECT is_correct, points FROM answers WHERE participation_id = $1 AND question_id = $2",
    )
    .bind(participation_id)
    .bind(answer.question_id)
    .fetch_optional(&mut *tx)
    .await?;

    if mode == SessionMode::Live {
        if let Some((is_correct, points)) = previous {
            let total_score = current_score(&mut *tx, participation_id).await?;
            tx.rollback().await?;
            return Ok(RecordResult::Duplicate {
                total_score,
                is_correct,
                points,
            });
        }
    }

    sqlx::query(
        r#"
        INSERT INTO answers (participation_id, question_id, selections, is_correct,
                             elapsed_seconds, points, answered_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (participation_id, question_id) DO UPDATE SET
            selections = excluded.selections,
            is_correct = excluded.is_correct,
            elapsed_seconds = excluded.elapsed_seconds,
            points = excluded.points,
            answered_at = excluded.answered_at
        "#,
    )
    .bind(participation_id)
    .bind(answer.question_id)
    .bind(Json(answer.selections.clone()))
    .bind(answer.is_correct)
    .bind(answer.elapsed_seconds)
    .bind(answer.points)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let delta = TotalsDelta::between(previous, (answer.is_correct, answer.points));
    apply_delta(&mut *tx, session_id, participant_id, &delta).await?;

    let total_score = current_score(&mut *tx, participation_id).await?;
    tx.commit().await?;

    Ok(match previous {
        Some(_) => RecordResult::Replaced { total_score, delta },
        None => RecordResult::Recorded { total_score },
    })
}

async fn current_score(conn: &mut SqliteConnection, participation_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT score FROM participations WHERE id = $1")
        .bind(participation_id)
        .fetch_one(&mut *conn)
        .await
}

/// Closes one exam participation early with its 0..=10 grade.
/// Returns `None` if it was not open.
pub async fn finalize(
    pool: &SqlitePool,
    session_id: i64,
    participant_id: i64,
    total_questions: usize,
) -> Result<Option<f64>, sqlx::Error> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let counts: Option<(i64, i64)> = sqlx::query_as(
        r#"
        UPDATE participations
        SET status = 'finished', finished_at = $1, updated_at = $1
        WHERE session_id = $2 AND participant_id = $3 AND status = 'active'
        RETURNING correct_count, incorrect_count
        "#,
    )
    .bind(now)
    .bind(session_id)
    .bind(participant_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((correct, incorrect)) = counts else {
        tx.rollback().await?;
        return Ok(None);
    };

    let missing = (total_questions as i64 - correct - incorrect).max(0);
    let delta = TotalsDelta {
        unanswered: missing,
        ..TotalsDelta::default()
    };
    apply_delta(&mut *tx, session_id, participant_id, &delta).await?;

    let grade = exam_grade(correct, total_questions);
    set_grade(&mut *tx, session_id, participant_id, grade).await?;

    sqlx::query(
        "UPDATE roster_entries SET status = 'finished' WHERE session_id = $1 AND participant_id = $2",
    )
    .bind(session_id)
    .bind(participant_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(grade))
}

/// How many active roster members have answered `question_id`.
pub async fn answered_count(
    pool: &SqlitePool,
    session_id: i64,
    question_id: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM answers a
        JOIN participations p ON p.id = a.participation_id
        JOIN roster_entries r ON r.session_id = p.session_id AND r.participant_id = p.participant_id
        WHERE p.session_id = $1 AND a.question_id = $2 AND r.status = 'active'
        "#,
    )
    .bind(session_id)
    .bind(question_id)
    .fetch_one(pool)
    .await
}

/// Every selection submitted for a question in a session.
pub async fn selections_for(
    pool: &SqlitePool,
    session_id: i64,
    question_id: i64,
) -> Result<Vec<Vec<usize>>, sqlx::Error> {
    let rows: Vec<Json<Vec<usize>>> = sqlx::query_scalar(
        r#"
        SELECT a.selections
        FROM answers a
        JOIN participations p ON p.id = a.participation_id
        WHERE p.session_id = $1 AND a.question_id = $2
        "#,
    )
    .bind(session_id)
    .bind(question_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|j| j.0).collect())
}

/// Session ranking read from the roster: score descending (grade first in exams),
/// ties broken by join order.
pub async fn ranking(
    pool: &SqlitePool,
    session_id: i64,
    mode: SessionMode,
) -> Result<Vec<RankingEntry>, sqlx::Error> {
    let order = match mode {
        SessionMode::Live => "score DESC, id ASC",
        SessionMode::Exam => "COALESCE(grade, -1) DESC, score DESC, id ASC",
    };

    let rows: Vec<(i64, String, i64, i64, i64, i64, Option<f64>, RosterStatus)> =
        sqlx::query_as(&format!(
            r#"
            SELECT participant_id, display_name, score, correct_count, incorrect_count,
                   unanswered_count, grade, status
            FROM roster_entries
            WHERE session_id = $1
            ORDER BY {}
            "#,
            order
        ))
        .bind(session_id)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(
            |(i, (participant_id, display_name, score, correct, incorrect, unanswered, grade, status))| {
                RankingEntry {
                    rank: i + 1,
                    participant_id,
                    display_name,
                    score,
                    correct_count: correct,
                    incorrect_count: incorrect,
                    unanswered_count: unanswered,
                    grade,
                    status,
                }
            },
        )
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_for_first_answer_counts_it() {
        let d = TotalsDelta::between(None, (true, 750));
        assert_eq!(d, TotalsDelta { score: 750, correct: 1, incorrect: 0, unanswered: 0 });
    }

    #[test]
    fn delta_for_replacement_is_the_difference() {
        let d = TotalsDelta::between(Some((true, 10)), (false, 0));
        assert_eq!(d, TotalsDelta { score: -10, correct: -1, incorrect: 1, unanswered: 0 });

        let same = TotalsDelta::between(Some((true, 10)), (true, 10));
        assert!(same.is_zero());
    }
}
