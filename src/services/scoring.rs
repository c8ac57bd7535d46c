// src/services/scoring.rs

//! Correctness and points for a single answer. No I/O.

use crate::models::{answer::Selection, question::Question, session::SessionMode};

/// Outcome of scoring one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub is_correct: bool,
    pub points: i64,
}

/// The selection must equal the set of correct options exactly; partial overlap is incorrect.
pub fn is_correct(question: &Question, selection: &Selection) -> bool {
    let correct = question.correct_indices();
    !correct.is_empty() && &correct == selection.indices()
}

/// Scores a submission.
///
/// Live: a correct answer earns between 50% and 100% of the cap, linearly by speed,
/// `ceil(cap * (1 - min(elapsed, limit) / limit / 2))`.
/// Exam: a correct answer earns the full cap. Incorrect answers earn nothing in either mode.
pub fn score(
    question: &Question,
    selection: &Selection,
    mode: SessionMode,
    elapsed_seconds: f64,
    time_limit_seconds: i64,
) -> Score {
    let correct = is_correct(question, selection);
    let points = match (correct, mode) {
        (false, _) => 0,
        (true, SessionMode::Exam) => question.point_cap,
        (true, SessionMode::Live) => {
            live_points(question.point_cap, elapsed_seconds, time_limit_seconds)
        }
    };
    Score {
        is_correct: correct,
        points,
    }
}

/// Integer form of the speed formula over milliseconds, so results are exact:
/// `ceil(cap * (2L - e) / 2L)`.
pub fn live_points(point_cap: i64, elapsed_seconds: f64, time_limit_seconds: i64) -> i64 {
    if point_cap <= 0 {
        return 0;
    }
    if time_limit_seconds <= 0 {
        return point_cap;
    }
    // Widened so caps and limits from the question bank cannot overflow.
    let limit_ms = i128::from(time_limit_seconds) * 1000;
    let elapsed_ms = if elapsed_seconds.is_finite() {
        i128::from((elapsed_seconds.max(0.0) * 1000.0).round() as i64).min(limit_ms)
    } else {
        limit_ms
    };
    let numerator = i128::from(point_cap) * (2 * limit_ms - elapsed_ms);
    let denominator = 2 * limit_ms;
    let points = (numerator + denominator - 1) / denominator;
    i64::try_from(points).unwrap_or(point_cap)
}

/// Exam grade on a 0..=10 scale, rounded to one decimal.
pub fn exam_grade(correct_count: i64, total_questions: usize) -> f64 {
    if total_questions == 0 {
        return 0.0;
    }
    let ratio = correct_count.max(0) as f64 / total_questions as f64;
    (ratio * 100.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::QuestionOption;
    use sqlx::types::Json;

    fn question(correct: &[usize], options: usize, cap: i64) -> Question {
        Question {
            id: 1,
            quiz_id: 1,
            position: 0,
            question_type: if correct.len() > 1 { "multiple" } else { "single" }.to_string(),
            content: "?".to_string(),
            options: Json(
                (0..options)
                    .map(|i| QuestionOption {
                        text: format!("option {}", i),
                        is_correct: correct.contains(&i),
                    })
                    .collect(),
            ),
            point_cap: cap,
            time_limit_seconds: 20,
        }
    }

    #[test]
    fn live_points_span_half_to_full_cap() {
        assert_eq!(live_points(1000, 0.0, 20), 1000);
        assert_eq!(live_points(1000, 10.0, 20), 750);
        assert_eq!(live_points(1000, 20.0, 20), 500);
        // Late answers are clamped to the limit.
        assert_eq!(live_points(1000, 45.0, 20), 500);
    }

    #[test]
    fn live_points_round_up() {
        // 999 * 0.5 = 499.5
        assert_eq!(live_points(999, 20.0, 20), 500);
        // 1000 * (1 - 0.35 / 2) = 825 exactly, no float drift.
        assert_eq!(live_points(1000, 7.0, 20), 825);
        assert_eq!(live_points(100, 1.0, 3), 84);
    }

    #[test]
    fn extreme_caps_and_limits_do_not_overflow() {
        assert_eq!(live_points(i64::MAX, 0.0, 20), i64::MAX);
        assert_eq!(live_points(i64::MAX, 20.0, 20), i64::MAX / 2 + 1);
        assert_eq!(live_points(1000, 1.0, i64::MAX), 1000);
        assert_eq!(live_points(1000, f64::INFINITY, 20), 500);
    }

    #[test]
    fn exact_set_equality_is_required() {
        let q = question(&[0, 2], 4, 1000);
        assert!(is_correct(&q, &Selection::from_indices([0, 2])));
        assert!(!is_correct(&q, &Selection::from_indices([0])));
        assert!(!is_correct(&q, &Selection::from_indices([0, 1, 2])));
    }

    #[test]
    fn exam_mode_awards_full_cap() {
        let q = question(&[1], 4, 10);
        let hit = score(&q, &Selection::from_indices([1]), SessionMode::Exam, 300.0, 20);
        assert_eq!(hit, Score { is_correct: true, points: 10 });
        let miss = score(&q, &Selection::from_indices([2]), SessionMode::Exam, 1.0, 20);
        assert_eq!(miss, Score { is_correct: false, points: 0 });
    }

    #[test]
    fn grades_round_to_one_decimal() {
        assert_eq!(exam_grade(7, 10), 7.0);
        assert_eq!(exam_grade(2, 3), 6.7);
        assert_eq!(exam_grade(1, 3), 3.3);
        assert_eq!(exam_grade(0, 0), 0.0);
    }
}
