//! The judging rubric: weighted scoring criteria a judge scores each
//! submission against. Criteria are set up with the competition and become
//! immutable once the first judgment is recorded.

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use uuid::Uuid;

use crate::{
    competitions::{Competition, config::ScoringType},
    schema::{judging_criteria, submission_judgments},
};

pub mod scores;

/// Criteria weights for one competition must sum to 1 within this bound.
pub const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, PartialEq)]
pub enum CriteriaError {
    CompetitionNotFound,
    /// `min_score` must be strictly below `max_score`.
    InvalidScoreRange,
    /// Weights are fractions of the whole rubric.
    InvalidWeight,
    /// `RadioButtons` criteria need one label per integral score step.
    WrongOptionCount { expected: usize, got: usize },
    /// Criteria are immutable once judging has started.
    JudgingStarted,
    /// The rubric's weights do not sum to 1.
    WeightsDoNotSumToOne { sum: f64 },
}

#[derive(Queryable, Clone, Debug)]
pub struct JudgingCriteria {
    pub id: String,
    pub competition_id: String,
    pub title: String,
    pub description: Option<String>,
    pub scoring_type: String,
    pub min_score: f32,
    pub max_score: f32,
    pub weight: f32,
    pub display_order: i64,
    pub is_comment_required: bool,
    pub scoring_options: Option<String>,
}

impl JudgingCriteria {
    pub fn scoring_type(&self) -> ScoringType {
        ScoringType::parse(&self.scoring_type).unwrap_or_else(|| {
            panic!("unknown scoring type `{}`", self.scoring_type)
        })
    }

    /// Labels for `RadioButtons` criteria, lowest score first.
    pub fn scoring_option_labels(&self) -> Option<Vec<String>> {
        self.scoring_options
            .as_ref()
            .map(|json| serde_json::from_str(json).unwrap())
    }

    /// The competition's rubric in display order.
    pub fn of_competition(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Vec<JudgingCriteria> {
        judging_criteria::table
            .filter(judging_criteria::competition_id.eq(competition_id))
            .order_by(judging_criteria::display_order.asc())
            .load::<JudgingCriteria>(conn)
            .unwrap()
    }
}

pub struct NewJudgingCriteria {
    pub title: String,
    pub description: Option<String>,
    pub scoring_type: ScoringType,
    pub min_score: f32,
    pub max_score: f32,
    pub weight: f32,
    pub display_order: i64,
    pub is_comment_required: bool,
    pub scoring_options: Option<Vec<String>>,
}

pub fn create_judging_criteria(
    competition_id: &str,
    new: NewJudgingCriteria,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<JudgingCriteria, CriteriaError> {
    if Competition::fetch(competition_id, conn).is_none() {
        return Err(CriteriaError::CompetitionNotFound);
    }
    if new.min_score >= new.max_score {
        return Err(CriteriaError::InvalidScoreRange);
    }
    if !(0.0..=1.0).contains(&new.weight) {
        return Err(CriteriaError::InvalidWeight);
    }
    if new.scoring_type == ScoringType::RadioButtons {
        let expected = (new.max_score - new.min_score) as usize + 1;
        let got =
            new.scoring_options.as_ref().map(|o| o.len()).unwrap_or(0);
        if got != expected {
            return Err(CriteriaError::WrongOptionCount { expected, got });
        }
    }

    let judged: i64 = submission_judgments::table
        .filter(submission_judgments::competition_id.eq(competition_id))
        .count()
        .get_result(conn)
        .unwrap();
    if judged > 0 {
        return Err(CriteriaError::JudgingStarted);
    }

    let id = Uuid::now_v7().to_string();
    diesel::insert_into(judging_criteria::table)
        .values((
            judging_criteria::id.eq(&id),
            judging_criteria::competition_id.eq(competition_id),
            judging_criteria::title.eq(&new.title),
            judging_criteria::description.eq(new.description.clone()),
            judging_criteria::scoring_type.eq(new.scoring_type.as_str()),
            judging_criteria::min_score.eq(new.min_score),
            judging_criteria::max_score.eq(new.max_score),
            judging_criteria::weight.eq(new.weight),
            judging_criteria::display_order.eq(new.display_order),
            judging_criteria::is_comment_required
                .eq(new.is_comment_required),
            judging_criteria::scoring_options.eq(new
                .scoring_options
                .as_ref()
                .map(|o| serde_json::to_string(o).unwrap())),
        ))
        .execute(conn)
        .unwrap();

    Ok(judging_criteria::table
        .filter(judging_criteria::id.eq(&id))
        .first::<JudgingCriteria>(conn)
        .unwrap())
}

/// Checks that the rubric's weights sum to 1 ± [`WEIGHT_EPSILON`]. Called
/// before the first judgment is accepted.
pub fn validate_rubric_weights(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), CriteriaError> {
    let weights: Vec<f32> = judging_criteria::table
        .filter(judging_criteria::competition_id.eq(competition_id))
        .select(judging_criteria::weight)
        .load::<f32>(conn)
        .unwrap();

    let sum: f64 = weights.iter().map(|w| *w as f64).sum();
    if (sum - 1.0).abs() > WEIGHT_EPSILON {
        return Err(CriteriaError::WeightsDoNotSumToOne { sum });
    }
    Ok(())
}
