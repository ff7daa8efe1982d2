//! Records a judge's per-criterion scores and derives the weight-normalised
//! overall score once the rubric is fully scored.

use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use uuid::Uuid;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        judging::{CriteriaError, JudgingCriteria, validate_rubric_weights},
        submissions::Submission,
    },
    schema::{criteria_scores, submission_judgments},
};

#[derive(Debug, PartialEq)]
pub enum JudgmentError {
    CompetitionNotFound,
    SubmissionNotFound,
    JudgingClosed(CompetitionStatus),
    /// Judges may not score their own submission.
    OwnSubmission,
    /// The competition has no judging criteria.
    EmptyRubric,
    /// The rubric's weights do not sum to 1; no judgment is accepted until
    /// the rubric is fixed.
    InvalidRubric { sum: f64 },
    UnknownCriteria(String),
    /// The same criterion was scored twice in one call.
    DuplicateCriteria(String),
    ScoreOutOfRange { criteria_id: String, score: f32 },
    MissingRequiredComment(String),
}

#[derive(Queryable, Clone, Debug)]
pub struct SubmissionJudgment {
    pub id: String,
    pub competition_id: String,
    pub submission_id: String,
    pub judge_id: String,
    pub voting_round: i64,
    pub overall_score: Option<f32>,
    pub overall_comments: Option<String>,
    pub is_completed: bool,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl SubmissionJudgment {
    pub fn fetch(
        submission_id: &str,
        judge_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Option<SubmissionJudgment> {
        submission_judgments::table
            .filter(
                submission_judgments::submission_id
                    .eq(submission_id)
                    .and(submission_judgments::judge_id.eq(judge_id))
                    .and(submission_judgments::voting_round.eq(1)),
            )
            .first::<SubmissionJudgment>(conn)
            .optional()
            .unwrap()
    }

    /// All completed round-1 judgments of a competition; the tally's input.
    pub fn completed_of_competition(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Vec<SubmissionJudgment> {
        submission_judgments::table
            .filter(
                submission_judgments::competition_id
                    .eq(competition_id)
                    .and(submission_judgments::voting_round.eq(1))
                    .and(submission_judgments::is_completed.eq(true)),
            )
            .order_by(submission_judgments::id.asc())
            .load::<SubmissionJudgment>(conn)
            .unwrap()
    }
}

/// One per-criterion score within a judgment.
pub struct CriteriaScoreInput {
    pub criteria_id: String,
    pub score: f32,
    pub comments: Option<String>,
}

/// Records (or extends) a judge's judgment of a submission. Scores may
/// arrive over several calls; each call upserts the supplied criteria.
/// `overall_score` is computed and `is_completed` flips only once every
/// criterion of the rubric carries a valid score.
pub fn record_judgment(
    competition_id: &str,
    submission_id: &str,
    judge_id: &str,
    scores: Vec<CriteriaScoreInput>,
    overall_comments: Option<String>,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<SubmissionJudgment, JudgmentError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(JudgmentError::CompetitionNotFound)?;
    if competition.status() != CompetitionStatus::Round1Voting {
        return Err(JudgmentError::JudgingClosed(competition.status()));
    }

    let criteria = JudgingCriteria::of_competition(competition_id, conn);
    if criteria.is_empty() {
        return Err(JudgmentError::EmptyRubric);
    }
    match validate_rubric_weights(competition_id, conn) {
        Err(CriteriaError::WeightsDoNotSumToOne { sum }) => {
            return Err(JudgmentError::InvalidRubric { sum });
        }
        _ => {}
    }

    let submission = Submission::fetch(submission_id, conn)
        .filter(|s| s.competition_id == competition_id)
        .ok_or(JudgmentError::SubmissionNotFound)?;
    if submission.user_id == judge_id {
        return Err(JudgmentError::OwnSubmission);
    }

    // Validate every supplied score before any write.
    let mut seen = Vec::with_capacity(scores.len());
    for input in &scores {
        let criterion = criteria
            .iter()
            .find(|c| c.id == input.criteria_id)
            .ok_or_else(|| {
                JudgmentError::UnknownCriteria(input.criteria_id.clone())
            })?;
        if seen.contains(&&input.criteria_id) {
            return Err(JudgmentError::DuplicateCriteria(
                input.criteria_id.clone(),
            ));
        }
        seen.push(&input.criteria_id);

        if input.score < criterion.min_score
            || input.score > criterion.max_score
        {
            return Err(JudgmentError::ScoreOutOfRange {
                criteria_id: input.criteria_id.clone(),
                score: input.score,
            });
        }
        if criterion.is_comment_required
            && input
                .comments
                .as_ref()
                .map(|c| c.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(JudgmentError::MissingRequiredComment(
                input.criteria_id.clone(),
            ));
        }
    }

    conn.transaction(
        |conn| -> Result<
            Result<SubmissionJudgment, JudgmentError>,
            diesel::result::Error,
        > {
            let now = Utc::now().naive_utc();
            let judgment_id =
                match SubmissionJudgment::fetch(submission_id, judge_id, conn)
                {
                    Some(j) => j.id,
                    None => {
                        let id = Uuid::now_v7().to_string();
                        diesel::insert_into(submission_judgments::table)
                            .values((
                                submission_judgments::id.eq(&id),
                                submission_judgments::competition_id
                                    .eq(competition_id),
                                submission_judgments::submission_id
                                    .eq(submission_id),
                                submission_judgments::judge_id.eq(judge_id),
                                submission_judgments::voting_round.eq(1),
                                submission_judgments::is_completed.eq(false),
                                submission_judgments::created_at.eq(now),
                                submission_judgments::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .unwrap();
                        id
                    }
                };

            let supplied_ids: Vec<&str> =
                scores.iter().map(|s| s.criteria_id.as_str()).collect();
            diesel::delete(
                criteria_scores::table.filter(
                    criteria_scores::judgment_id
                        .eq(&judgment_id)
                        .and(
                            criteria_scores::criteria_id
                                .eq_any(&supplied_ids),
                        ),
                ),
            )
            .execute(conn)
            .unwrap();

            let score_rows = scores
                .iter()
                .map(|input| {
                    (
                        criteria_scores::id.eq(Uuid::now_v7().to_string()),
                        criteria_scores::judgment_id.eq(judgment_id.clone()),
                        criteria_scores::criteria_id
                            .eq(input.criteria_id.clone()),
                        criteria_scores::score.eq(input.score),
                        criteria_scores::comments.eq(input.comments.clone()),
                    )
                })
                .collect::<Vec<_>>();
            diesel::insert_into(criteria_scores::table)
                .values(&score_rows)
                .execute(conn)
                .unwrap();

            let recorded: Vec<(String, f32)> = criteria_scores::table
                .filter(criteria_scores::judgment_id.eq(&judgment_id))
                .select((
                    criteria_scores::criteria_id,
                    criteria_scores::score,
                ))
                .load(conn)
                .unwrap();

            let complete = criteria
                .iter()
                .all(|c| recorded.iter().any(|(id, _)| *id == c.id));

            if complete {
                let overall = overall_score(
                    &criteria,
                    &recorded,
                    competition.score_display_max,
                );
                diesel::update(
                    submission_judgments::table.filter(
                        submission_judgments::id.eq(&judgment_id),
                    ),
                )
                .set((
                    submission_judgments::overall_score.eq(overall),
                    submission_judgments::overall_comments
                        .eq(overall_comments.clone()),
                    submission_judgments::is_completed.eq(true),
                    submission_judgments::updated_at.eq(now),
                ))
                .execute(conn)
                .unwrap();
            } else {
                diesel::update(
                    submission_judgments::table.filter(
                        submission_judgments::id.eq(&judgment_id),
                    ),
                )
                .set((
                    submission_judgments::overall_comments
                        .eq(overall_comments.clone()),
                    submission_judgments::updated_at.eq(now),
                ))
                .execute(conn)
                .unwrap();
            }

            Ok(Ok(SubmissionJudgment::fetch(
                submission_id,
                judge_id,
                conn,
            )
            .unwrap()))
        },
    )
    .unwrap()
}

/// Σ over criteria of (score rescaled to [0, 1]) × weight, scaled to the
/// competition's display range. Computed in `Decimal` so the result is
/// stable across platforms.
fn overall_score(
    criteria: &[JudgingCriteria],
    recorded: &[(String, f32)],
    display_max: f32,
) -> f32 {
    let mut total = Decimal::ZERO;
    for criterion in criteria {
        let score = recorded
            .iter()
            .find(|(id, _)| *id == criterion.id)
            .map(|(_, s)| *s)
            .expect("overall_score requires a fully scored rubric");

        let min = Decimal::from_f32_retain(criterion.min_score).unwrap();
        let max = Decimal::from_f32_retain(criterion.max_score).unwrap();
        let score = Decimal::from_f32_retain(score).unwrap();
        let weight = Decimal::from_f32_retain(criterion.weight).unwrap();

        total += (score - min) / (max - min) * weight;
    }

    (total * Decimal::from_f32_retain(display_max).unwrap())
        .to_f32()
        .unwrap()
}
