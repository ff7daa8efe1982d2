//! Round-1 ballot collection. A voter ranks first, second and third place
//! within their assigned cohort; the three vote rows and the assignment's
//! `has_voted` flip commit as one transaction, so a crash mid-write leaves
//! no partial ballot behind.

use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use uuid::Uuid;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        grouping::{Round1Assignment, cohort_submission_ids},
        submissions::Submission,
    },
    schema::{round1_assignments, submission_votes, submissions},
};

#[derive(Debug, PartialEq, Eq)]
pub enum BallotError {
    CompetitionNotFound,
    /// One of the ranked submission ids does not exist.
    SubmissionNotFound(String),
    /// The competition is not accepting round-1 ballots.
    VotingClosed(CompetitionStatus),
    /// The voter has no review assignment in this competition.
    NoAssignment,
    /// Ballots are immutable; this voter already cast one.
    AlreadyVoted,
    /// The same submission was ranked twice.
    DuplicateChoice,
    /// A ranked submission is not part of the voter's assigned cohort.
    OutsideAssignedGroup(String),
    /// Voters may not rank their own submission.
    OwnSubmission,
}

/// A voter's ranked choices, first to third, with optional per-choice
/// comments.
pub struct RankedBallot {
    pub first: String,
    pub second: String,
    pub third: String,
    pub comments: [Option<String>; 3],
}

impl RankedBallot {
    pub fn new(first: &str, second: &str, third: &str) -> RankedBallot {
        RankedBallot {
            first: first.to_string(),
            second: second.to_string(),
            third: third.to_string(),
            comments: [None, None, None],
        }
    }
}

/// Points awarded for first, second and third place.
const PLACE_POINTS: [i64; 3] = [3, 2, 1];

/// Validates and records a voter's round-1 ballot.
pub fn process_voter_submission(
    competition_id: &str,
    voter_id: &str,
    ballot: RankedBallot,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), BallotError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(BallotError::CompetitionNotFound)?;
    if competition.status() != CompetitionStatus::Round1Voting {
        return Err(BallotError::VotingClosed(competition.status()));
    }

    conn.transaction(
        |conn| -> Result<Result<(), BallotError>, diesel::result::Error> {
            let assignment =
                Round1Assignment::of_voter(competition_id, voter_id, conn);
            let assignment = match assignment {
                Some(a) => a,
                None => return Ok(Err(BallotError::NoAssignment)),
            };
            if assignment.has_voted {
                return Ok(Err(BallotError::AlreadyVoted));
            }

            let choices =
                [&ballot.first, &ballot.second, &ballot.third];
            if choices[0] == choices[1]
                || choices[0] == choices[2]
                || choices[1] == choices[2]
            {
                return Ok(Err(BallotError::DuplicateChoice));
            }

            let cohort = cohort_submission_ids(
                competition_id,
                assignment.assigned_group_number,
                conn,
            );
            let own =
                Submission::of_user(competition_id, voter_id, conn);
            for choice in &choices {
                if !cohort.contains(*choice) {
                    let exists = submissions::table
                        .filter(
                            submissions::id
                                .eq(choice.as_str())
                                .and(
                                    submissions::competition_id
                                        .eq(competition_id),
                                ),
                        )
                        .count()
                        .get_result::<i64>(conn)
                        .unwrap()
                        > 0;
                    return Ok(Err(if exists {
                        BallotError::OutsideAssignedGroup(
                            choice.to_string(),
                        )
                    } else {
                        BallotError::SubmissionNotFound(choice.to_string())
                    }));
                }
                if let Some(own) = &own {
                    if *choice == &own.id {
                        return Ok(Err(BallotError::OwnSubmission));
                    }
                }
            }

            let now = Utc::now().naive_utc();
            let vote_rows = choices
                .iter()
                .enumerate()
                .map(|(i, choice)| {
                    (
                        submission_votes::id
                            .eq(Uuid::now_v7().to_string()),
                        submission_votes::competition_id.eq(competition_id),
                        submission_votes::submission_id
                            .eq(choice.to_string()),
                        submission_votes::voter_id.eq(voter_id),
                        submission_votes::voting_round.eq(1),
                        submission_votes::rank.eq(i as i64 + 1),
                        submission_votes::points.eq(PLACE_POINTS[i]),
                        submission_votes::vote_time.eq(now),
                        submission_votes::comment
                            .eq(ballot.comments[i].clone()),
                    )
                })
                .collect::<Vec<_>>();

            diesel::insert_into(submission_votes::table)
                .values(&vote_rows)
                .execute(conn)
                .unwrap();

            diesel::update(
                round1_assignments::table
                    .filter(round1_assignments::id.eq(&assignment.id)),
            )
            .set((
                round1_assignments::has_voted.eq(true),
                round1_assignments::voting_completed_date.eq(now),
            ))
            .execute(conn)
            .unwrap();

            Ok(Ok(()))
        },
    )
    .unwrap()
}

/// The submissions a voter is asked to review: their assigned cohort minus
/// their own submission, in stable id order. Lock-free read.
pub fn assigned_submissions_for_voter(
    competition_id: &str,
    voter_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Vec<Submission>, BallotError> {
    if Competition::fetch(competition_id, conn).is_none() {
        return Err(BallotError::CompetitionNotFound);
    }
    let assignment =
        Round1Assignment::of_voter(competition_id, voter_id, conn)
            .ok_or(BallotError::NoAssignment)?;

    let ids = cohort_submission_ids(
        competition_id,
        assignment.assigned_group_number,
        conn,
    );
    let own = Submission::of_user(competition_id, voter_id, conn);

    Ok(submissions::table
        .filter(submissions::id.eq_any(&ids))
        .order_by(submissions::id.asc())
        .load::<Submission>(conn)
        .unwrap()
        .into_iter()
        .filter(|s| own.as_ref().map(|o| o.id != s.id).unwrap_or(true))
        .collect())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{
        competitions::grouping::create_groups_and_assignments,
        test::fixtures,
    };

    fn voting_competition(
        n: usize,
        target: usize,
        conn: &mut diesel::SqliteConnection,
    ) -> (Competition, Vec<Submission>) {
        let competition = fixtures::competition(conn);
        fixtures::force_status(
            &competition.id,
            CompetitionStatus::OpenForSubmissions,
            conn,
        );
        let submissions = fixtures::enter_submissions(&competition.id, n, conn);
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(3);
        create_groups_and_assignments(&competition.id, target, &mut rng, conn)
            .unwrap();
        (competition, submissions)
    }

    fn ballot_for(
        competition_id: &str,
        voter_id: &str,
        conn: &mut diesel::SqliteConnection,
    ) -> RankedBallot {
        let assigned =
            assigned_submissions_for_voter(competition_id, voter_id, conn)
                .unwrap();
        RankedBallot::new(&assigned[0].id, &assigned[1].id, &assigned[2].id)
    }

    #[test]
    fn ballot_writes_three_votes_and_flips_flag() {
        let mut conn = fixtures::test_conn();
        let (competition, _) = voting_competition(8, 4, &mut conn);

        let ballot = ballot_for(&competition.id, "user-0", &mut conn);
        let (first, second, third) = (
            ballot.first.clone(),
            ballot.second.clone(),
            ballot.third.clone(),
        );
        process_voter_submission(&competition.id, "user-0", ballot, &mut conn)
            .unwrap();

        let votes = submission_votes::table
            .filter(
                submission_votes::competition_id
                    .eq(&competition.id)
                    .and(submission_votes::voter_id.eq("user-0")),
            )
            .order_by(submission_votes::rank.asc())
            .load::<(
                String,
                String,
                String,
                String,
                i64,
                Option<i64>,
                Option<i64>,
                chrono::NaiveDateTime,
                Option<String>,
            )>(&mut conn)
            .unwrap();
        assert_eq!(votes.len(), 3);
        assert_eq!(
            votes
                .iter()
                .map(|v| (v.2.clone(), v.5, v.6))
                .collect::<Vec<_>>(),
            vec![
                (first, Some(1), Some(3)),
                (second, Some(2), Some(2)),
                (third, Some(3), Some(1)),
            ]
        );

        let assignment =
            Round1Assignment::of_voter(&competition.id, "user-0", &mut conn)
                .unwrap();
        assert!(assignment.has_voted);
        assert!(assignment.voting_completed_date.is_some());
    }

    #[test]
    fn repeated_ballot_is_rejected() {
        let mut conn = fixtures::test_conn();
        let (competition, _) = voting_competition(8, 4, &mut conn);

        let ballot = ballot_for(&competition.id, "user-0", &mut conn);
        process_voter_submission(&competition.id, "user-0", ballot, &mut conn)
            .unwrap();

        let again = ballot_for(&competition.id, "user-0", &mut conn);
        assert_eq!(
            process_voter_submission(
                &competition.id,
                "user-0",
                again,
                &mut conn
            )
            .unwrap_err(),
            BallotError::AlreadyVoted
        );
    }

    #[test]
    fn duplicate_choice_is_rejected_before_any_write() {
        let mut conn = fixtures::test_conn();
        let (competition, _) = voting_competition(8, 4, &mut conn);

        let assigned = assigned_submissions_for_voter(
            &competition.id,
            "user-0",
            &mut conn,
        )
        .unwrap();
        let ballot = RankedBallot::new(
            &assigned[0].id,
            &assigned[0].id,
            &assigned[1].id,
        );
        assert_eq!(
            process_voter_submission(
                &competition.id,
                "user-0",
                ballot,
                &mut conn
            )
            .unwrap_err(),
            BallotError::DuplicateChoice
        );

        let votes: i64 = submission_votes::table
            .filter(submission_votes::voter_id.eq("user-0"))
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!(votes, 0);
        assert!(
            !Round1Assignment::of_voter(&competition.id, "user-0", &mut conn)
                .unwrap()
                .has_voted
        );
    }

    #[test]
    fn own_cohort_submission_is_rejected() {
        let mut conn = fixtures::test_conn();
        // single cohort: every voter reviews the cohort containing their
        // own submission, so the self-vote ban must hold
        let (competition, _) = voting_competition(6, 20, &mut conn);

        let own = Submission::of_user(&competition.id, "user-0", &mut conn)
            .unwrap();
        let others = assigned_submissions_for_voter(
            &competition.id,
            "user-0",
            &mut conn,
        )
        .unwrap();
        assert!(others.iter().all(|s| s.id != own.id));

        let ballot =
            RankedBallot::new(&own.id, &others[0].id, &others[1].id);
        assert_eq!(
            process_voter_submission(
                &competition.id,
                "user-0",
                ballot,
                &mut conn
            )
            .unwrap_err(),
            BallotError::OwnSubmission
        );
    }

    #[test]
    fn submission_from_other_cohort_is_rejected() {
        let mut conn = fixtures::test_conn();
        let (competition, _) = voting_competition(8, 4, &mut conn);

        let assignment =
            Round1Assignment::of_voter(&competition.id, "user-0", &mut conn)
                .unwrap();
        // a submission from the voter's own cohort is, by construction,
        // outside the assigned cohort
        let foreign = cohort_submission_ids(
            &competition.id,
            assignment.voter_group_number,
            &mut conn,
        )
        .into_iter()
        .find(|id| {
            Submission::fetch(id, &mut conn).unwrap().user_id != "user-0"
        })
        .unwrap();

        let assigned = assigned_submissions_for_voter(
            &competition.id,
            "user-0",
            &mut conn,
        )
        .unwrap();
        let ballot = RankedBallot::new(
            &foreign,
            &assigned[0].id,
            &assigned[1].id,
        );
        assert_eq!(
            process_voter_submission(
                &competition.id,
                "user-0",
                ballot,
                &mut conn
            )
            .unwrap_err(),
            BallotError::OutsideAssignedGroup(foreign)
        );
    }

    #[test]
    fn unknown_submission_is_not_found() {
        let mut conn = fixtures::test_conn();
        let (competition, _) = voting_competition(8, 4, &mut conn);

        let assigned = assigned_submissions_for_voter(
            &competition.id,
            "user-0",
            &mut conn,
        )
        .unwrap();
        let ballot = RankedBallot::new(
            "missing",
            &assigned[0].id,
            &assigned[1].id,
        );
        assert_eq!(
            process_voter_submission(
                &competition.id,
                "user-0",
                ballot,
                &mut conn
            )
            .unwrap_err(),
            BallotError::SubmissionNotFound("missing".to_string())
        );
    }
}
