use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use uuid::Uuid;

use crate::schema::submissions;

#[derive(Queryable, Clone, Debug)]
pub struct Submission {
    pub id: String,
    pub competition_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: chrono::NaiveDateTime,
    pub is_disqualified: bool,
    pub advanced_to_round2: bool,
    pub eligible_round1_voting: bool,
    pub eligible_round2_voting: bool,
    pub is_winner: bool,
    pub round1_score: Option<f32>,
    pub round2_score: Option<f32>,
    pub final_score: Option<f32>,
    pub final_rank: Option<i64>,
}

impl Submission {
    pub fn create(
        competition_id: &str,
        user_id: &str,
        title: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Submission {
        let id = Uuid::now_v7().to_string();
        diesel::insert_into(submissions::table)
            .values((
                submissions::id.eq(&id),
                submissions::competition_id.eq(competition_id),
                submissions::user_id.eq(user_id),
                submissions::title.eq(title),
                submissions::created_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .unwrap();

        Submission::fetch(&id, conn).unwrap()
    }

    pub fn fetch(
        submission_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Option<Submission> {
        submissions::table
            .filter(submissions::id.eq(submission_id))
            .first::<Submission>(conn)
            .optional()
            .unwrap()
    }

    /// The submission a user entered into the given competition, if any.
    pub fn of_user(
        competition_id: &str,
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Option<Submission> {
        submissions::table
            .filter(
                submissions::competition_id
                    .eq(competition_id)
                    .and(submissions::user_id.eq(user_id)),
            )
            .first::<Submission>(conn)
            .optional()
            .unwrap()
    }

    /// All submissions of a competition, ordered by id for deterministic
    /// iteration.
    pub fn of_competition(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Vec<Submission> {
        submissions::table
            .filter(submissions::competition_id.eq(competition_id))
            .order_by(submissions::id.asc())
            .load::<Submission>(conn)
            .unwrap()
    }

    /// Submissions that take part in round-1 review: eligible for round-1
    /// voting and not disqualified.
    pub fn round1_pool(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Vec<Submission> {
        submissions::table
            .filter(
                submissions::competition_id
                    .eq(competition_id)
                    .and(submissions::eligible_round1_voting.eq(true))
                    .and(submissions::is_disqualified.eq(false)),
            )
            .order_by(submissions::id.asc())
            .load::<Submission>(conn)
            .unwrap()
    }
}
