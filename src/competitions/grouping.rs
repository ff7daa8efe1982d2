//! Partitions round-1 submissions into randomized review cohorts and
//! assigns every submitter a cohort to review.

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use rand::seq::SliceRandom;
use tracing::info;
use uuid::Uuid;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        submissions::Submission,
        tickets::{self, TicketKind},
    },
    schema::{round1_assignments, submission_groups, submission_votes},
};

#[derive(Debug, PartialEq, Eq)]
pub enum GroupingError {
    CompetitionNotFound,
    /// The competition is not in a state that admits (re)grouping.
    WrongStatus(CompetitionStatus),
    /// Assignments already exist; use the explicit clear path first.
    AlreadyGrouped,
    /// Fewer than two eligible submissions — nothing to review.
    NotEnoughSubmissions,
    InvalidGroupSize,
    /// Another grouping run holds the ticket.
    AlreadyInProgress,
    /// This run was superseded by an overriding ticket and aborted.
    Superseded,
    /// Ballots have already been cast; the grouping can no longer be
    /// cleared.
    VotingStarted,
}

#[derive(Queryable, Clone, Debug)]
pub struct Round1Assignment {
    pub id: String,
    pub competition_id: String,
    pub voter_id: String,
    pub voter_group_number: i64,
    pub assigned_group_number: i64,
    pub has_voted: bool,
    pub voting_completed_date: Option<chrono::NaiveDateTime>,
}

impl Round1Assignment {
    pub fn of_voter(
        competition_id: &str,
        voter_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Option<Round1Assignment> {
        round1_assignments::table
            .filter(
                round1_assignments::competition_id
                    .eq(competition_id)
                    .and(round1_assignments::voter_id.eq(voter_id)),
            )
            .first::<Round1Assignment>(conn)
            .optional()
            .unwrap()
    }
}

/// Shuffles the eligible submissions, partitions them into balanced
/// cohorts of roughly `target_group_size`, and assigns every submitter a
/// cohort other than their own to review. Returns the number of cohorts.
///
/// Refuses if assignments already exist — re-grouping requires
/// [`clear_groups_and_assignments`] first.
pub fn create_groups_and_assignments(
    competition_id: &str,
    target_group_size: usize,
    rng: &mut rand_chacha::ChaCha20Rng,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<usize, GroupingError> {
    if target_group_size == 0 {
        return Err(GroupingError::InvalidGroupSize);
    }

    let competition = Competition::fetch(competition_id, conn)
        .ok_or(GroupingError::CompetitionNotFound)?;
    if competition.status() != CompetitionStatus::OpenForSubmissions {
        return Err(GroupingError::WrongStatus(competition.status()));
    }

    let ticket =
        tickets::acquire(competition_id, TicketKind::Grouping, false, conn)
            .map_err(|_| GroupingError::AlreadyInProgress)?;

    let result = conn
        .transaction(
            |conn| -> Result<
                Result<usize, GroupingError>,
                diesel::result::Error,
            > {
                let existing: i64 = round1_assignments::table
                    .filter(
                        round1_assignments::competition_id.eq(competition_id),
                    )
                    .count()
                    .get_result(conn)
                    .unwrap();
                if existing > 0 {
                    return Ok(Err(GroupingError::AlreadyGrouped));
                }

                let mut pool = Submission::round1_pool(competition_id, conn);
                if pool.len() < 2 {
                    return Ok(Err(GroupingError::NotEnoughSubmissions));
                }

                pool.shuffle(rng);

                // Fewer than two full cohorts collapse into one.
                let group_count = if pool.len() < 2 * target_group_size {
                    1
                } else {
                    pool.len().div_ceil(target_group_size)
                };

                let mut group_rows = Vec::with_capacity(pool.len());
                let mut assignment_rows = Vec::with_capacity(pool.len());
                for (i, submission) in pool.iter().enumerate() {
                    let group_number = (i % group_count) as i64 + 1;
                    // Reviewers rotate to the next cohort, so load spreads
                    // evenly and nobody reviews their own cohort (unless
                    // there is only one).
                    let assigned_group_number =
                        (group_number % group_count as i64) + 1;

                    group_rows.push((
                        submission_groups::id
                            .eq(Uuid::now_v7().to_string()),
                        submission_groups::competition_id.eq(competition_id),
                        submission_groups::submission_id
                            .eq(submission.id.clone()),
                        submission_groups::group_number.eq(group_number),
                    ));
                    assignment_rows.push((
                        round1_assignments::id
                            .eq(Uuid::now_v7().to_string()),
                        round1_assignments::competition_id.eq(competition_id),
                        round1_assignments::voter_id
                            .eq(submission.user_id.clone()),
                        round1_assignments::voter_group_number.eq(group_number),
                        round1_assignments::assigned_group_number
                            .eq(assigned_group_number),
                        round1_assignments::has_voted.eq(false),
                    ));
                }

                diesel::insert_into(submission_groups::table)
                    .values(&group_rows)
                    .execute(conn)
                    .unwrap();
                diesel::insert_into(round1_assignments::table)
                    .values(&assignment_rows)
                    .execute(conn)
                    .unwrap();

                if !tickets::is_current(&ticket, conn) {
                    return Err(diesel::result::Error::RollbackTransaction);
                }

                competition
                    .advance_status(CompetitionStatus::Round1Voting, conn)
                    .unwrap();

                Ok(Ok(group_count))
            },
        )
        .unwrap_or(Err(GroupingError::Superseded));

    tickets::release(ticket, conn);

    if let Ok(groups) = &result {
        info!(
            competition = competition_id,
            groups, "created review cohorts and voter assignments"
        );
    }

    result
}

/// The explicit clear-then-recreate path. Refuses once any ballot has been
/// cast.
pub fn clear_groups_and_assignments(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), GroupingError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(GroupingError::CompetitionNotFound)?;
    if competition.status() != CompetitionStatus::Round1Voting {
        return Err(GroupingError::WrongStatus(competition.status()));
    }

    conn.transaction(
        |conn| -> Result<Result<(), GroupingError>, diesel::result::Error> {
            let voted: i64 = round1_assignments::table
                .filter(
                    round1_assignments::competition_id
                        .eq(competition_id)
                        .and(round1_assignments::has_voted.eq(true)),
                )
                .count()
                .get_result(conn)
                .unwrap();
            let votes: i64 = submission_votes::table
                .filter(
                    submission_votes::competition_id
                        .eq(competition_id)
                        .and(submission_votes::voting_round.eq(1)),
                )
                .count()
                .get_result(conn)
                .unwrap();
            if voted > 0 || votes > 0 {
                return Ok(Err(GroupingError::VotingStarted));
            }

            diesel::delete(round1_assignments::table.filter(
                round1_assignments::competition_id.eq(competition_id),
            ))
            .execute(conn)
            .unwrap();
            diesel::delete(submission_groups::table.filter(
                submission_groups::competition_id.eq(competition_id),
            ))
            .execute(conn)
            .unwrap();

            competition
                .advance_status(CompetitionStatus::OpenForSubmissions, conn)
                .unwrap();

            Ok(Ok(()))
        },
    )
    .unwrap()
}

/// Read-only admin helper: `(ballots cast, assignments issued)`.
pub fn voting_progress(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> (i64, i64) {
    let total: i64 = round1_assignments::table
        .filter(round1_assignments::competition_id.eq(competition_id))
        .count()
        .get_result(conn)
        .unwrap();
    let voted: i64 = round1_assignments::table
        .filter(
            round1_assignments::competition_id
                .eq(competition_id)
                .and(round1_assignments::has_voted.eq(true)),
        )
        .count()
        .get_result(conn)
        .unwrap();
    (voted, total)
}

/// Submission ids of one cohort, ordered by id.
pub fn cohort_submission_ids(
    competition_id: &str,
    group_number: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Vec<String> {
    submission_groups::table
        .filter(
            submission_groups::competition_id
                .eq(competition_id)
                .and(submission_groups::group_number.eq(group_number)),
        )
        .order_by(submission_groups::submission_id.asc())
        .select(submission_groups::submission_id)
        .load::<String>(conn)
        .unwrap()
}
