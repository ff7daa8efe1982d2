//! Round 2: the finalist pool, single-choice plurality ballots, and the
//! tally that resolves (or reports a tie for) the winner.

use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use itertools::Itertools;
use tracing::info;
use uuid::Uuid;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        config::TieBreakPolicy,
        grouping::Round1Assignment,
        picks::SongCreatorPick,
        results::set_competition_winner,
        submissions::Submission,
        tickets::{self, TicketKind},
    },
    schema::{submission_votes, submissions},
};

#[derive(Debug, PartialEq, Eq)]
pub enum Round2Error {
    CompetitionNotFound,
    SubmissionNotFound,
    WrongStatus(CompetitionStatus),
    /// No submission survived round 1; there is nothing to vote on.
    EmptyPool,
    /// The voter does not satisfy the round-2 voter policy.
    NotEligible,
    /// The chosen submission is not part of the finalist pool.
    NotInPool(String),
    OwnSubmission,
    /// One round-2 vote per voter; changing it requires the explicit
    /// update path.
    AlreadyVoted,
    /// The update path requires an existing vote to replace.
    NoExistingVote,
    /// Another round-2 tally run holds the ticket.
    AlreadyInProgress,
    /// This run was superseded by an overriding ticket and aborted.
    Superseded,
}

/// Marks every advanced, non-disqualified submission as eligible for
/// round-2 voting and opens the vote. Returns the size of the finalist
/// pool.
pub fn setup_round2_voting(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<usize, Round2Error> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(Round2Error::CompetitionNotFound)?;
    if competition.status() != CompetitionStatus::Round2Setup {
        return Err(Round2Error::WrongStatus(competition.status()));
    }

    conn.transaction(
        |conn| -> Result<Result<usize, Round2Error>, diesel::result::Error> {
            diesel::update(
                submissions::table.filter(
                    submissions::competition_id.eq(competition_id),
                ),
            )
            .set(submissions::eligible_round2_voting.eq(false))
            .execute(conn)
            .unwrap();

            let pool = diesel::update(
                submissions::table.filter(
                    submissions::competition_id
                        .eq(competition_id)
                        .and(submissions::advanced_to_round2.eq(true))
                        .and(submissions::is_disqualified.eq(false)),
                ),
            )
            .set(submissions::eligible_round2_voting.eq(true))
            .execute(conn)
            .unwrap();

            if pool == 0 {
                return Ok(Err(Round2Error::EmptyPool));
            }

            competition
                .advance_status(CompetitionStatus::Round2Voting, conn)
                .unwrap();

            Ok(Ok(pool))
        },
    )
    .unwrap()
}

/// The round-2 voter policy: participants who completed their round-1
/// review and whose own submission was not disqualified.
pub fn is_user_eligible_for_round2_voting(
    competition_id: &str,
    voter_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<bool, Round2Error> {
    if Competition::fetch(competition_id, conn).is_none() {
        return Err(Round2Error::CompetitionNotFound);
    }

    let assignment =
        match Round1Assignment::of_voter(competition_id, voter_id, conn) {
            Some(a) => a,
            None => return Ok(false),
        };
    if !assignment.has_voted {
        return Ok(false);
    }

    Ok(Submission::of_user(competition_id, voter_id, conn)
        .map(|s| !s.is_disqualified)
        .unwrap_or(false))
}

/// The finalist pool, in stable id order.
pub fn round2_pool(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Vec<Submission> {
    submissions::table
        .filter(
            submissions::competition_id
                .eq(competition_id)
                .and(submissions::eligible_round2_voting.eq(true))
                .and(submissions::advanced_to_round2.eq(true))
                .and(submissions::is_disqualified.eq(false)),
        )
        .order_by(submissions::id.asc())
        .load::<Submission>(conn)
        .unwrap()
}

fn validate_round2_vote(
    competition: &Competition,
    voter_id: &str,
    submission_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), Round2Error> {
    if competition.status() != CompetitionStatus::Round2Voting {
        return Err(Round2Error::WrongStatus(competition.status()));
    }
    if !is_user_eligible_for_round2_voting(
        &competition.id,
        voter_id,
        conn,
    )? {
        return Err(Round2Error::NotEligible);
    }

    let submission = Submission::fetch(submission_id, conn)
        .filter(|s| s.competition_id == competition.id)
        .ok_or(Round2Error::SubmissionNotFound)?;
    if !submission.eligible_round2_voting
        || !submission.advanced_to_round2
        || submission.is_disqualified
    {
        return Err(Round2Error::NotInPool(submission_id.to_string()));
    }
    if submission.user_id == voter_id {
        return Err(Round2Error::OwnSubmission);
    }
    Ok(())
}

fn existing_round2_vote(
    competition_id: &str,
    voter_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Option<String> {
    submission_votes::table
        .filter(
            submission_votes::competition_id
                .eq(competition_id)
                .and(submission_votes::voter_id.eq(voter_id))
                .and(submission_votes::voting_round.eq(2)),
        )
        .select(submission_votes::id)
        .first::<String>(conn)
        .optional()
        .unwrap()
}

/// Records a voter's single round-2 choice. A second vote is rejected —
/// use [`change_round2_vote`] to replace one.
pub fn record_round2_vote(
    competition_id: &str,
    voter_id: &str,
    submission_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), Round2Error> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(Round2Error::CompetitionNotFound)?;

    conn.transaction(
        |conn| -> Result<Result<(), Round2Error>, diesel::result::Error> {
            if let Err(e) = validate_round2_vote(
                &competition,
                voter_id,
                submission_id,
                conn,
            ) {
                return Ok(Err(e));
            }
            if existing_round2_vote(competition_id, voter_id, conn)
                .is_some()
            {
                return Ok(Err(Round2Error::AlreadyVoted));
            }

            insert_round2_vote(
                competition_id,
                voter_id,
                submission_id,
                conn,
            );
            Ok(Ok(()))
        },
    )
    .unwrap()
}

/// The explicit vote-change path: replaces the voter's existing round-2
/// vote in one transaction.
pub fn change_round2_vote(
    competition_id: &str,
    voter_id: &str,
    submission_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), Round2Error> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(Round2Error::CompetitionNotFound)?;

    conn.transaction(
        |conn| -> Result<Result<(), Round2Error>, diesel::result::Error> {
            if let Err(e) = validate_round2_vote(
                &competition,
                voter_id,
                submission_id,
                conn,
            ) {
                return Ok(Err(e));
            }
            let prior =
                match existing_round2_vote(competition_id, voter_id, conn) {
                    Some(id) => id,
                    None => return Ok(Err(Round2Error::NoExistingVote)),
                };

            diesel::delete(
                submission_votes::table
                    .filter(submission_votes::id.eq(&prior)),
            )
            .execute(conn)
            .unwrap();
            insert_round2_vote(
                competition_id,
                voter_id,
                submission_id,
                conn,
            );
            Ok(Ok(()))
        },
    )
    .unwrap()
}

fn insert_round2_vote(
    competition_id: &str,
    voter_id: &str,
    submission_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) {
    diesel::insert_into(submission_votes::table)
        .values((
            submission_votes::id.eq(Uuid::now_v7().to_string()),
            submission_votes::competition_id.eq(competition_id),
            submission_votes::submission_id.eq(submission_id),
            submission_votes::voter_id.eq(voter_id),
            submission_votes::voting_round.eq(2),
            submission_votes::rank.eq(None::<i64>),
            submission_votes::points.eq(None::<i64>),
            submission_votes::vote_time.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .unwrap();
}

/// The outcome of a round-2 tally. A tie is a normal, reportable result,
/// not an error: `winner_id` stays unset and the competition waits for
/// manual resolution (unless the song-creator tie-break is configured and
/// applies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round2TallyOutcome {
    /// `(submission_id, votes)`, most votes first, id as the stable tail.
    pub vote_counts: Vec<(String, i64)>,
    pub winner_id: Option<String>,
    pub is_tie: bool,
}

/// Counts the plurality votes, writes round-2 scores and provisional final
/// ranks, and resolves the winner where one exists.
pub fn tally_round2_votes(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Round2TallyOutcome, Round2Error> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(Round2Error::CompetitionNotFound)?;
    match competition.status() {
        CompetitionStatus::Round2Voting
        | CompetitionStatus::Round2Tallying
        | CompetitionStatus::RequiresManualWinner => {}
        other => return Err(Round2Error::WrongStatus(other)),
    }

    let ticket =
        tickets::acquire(competition_id, TicketKind::Round2Tally, false, conn)
            .map_err(|_| Round2Error::AlreadyInProgress)?;

    let outcome = conn
        .transaction(
            |conn| -> Result<
                Result<Round2TallyOutcome, Round2Error>,
                diesel::result::Error,
            > {
                let pool = round2_pool(competition_id, conn);
                if pool.is_empty() {
                    return Ok(Err(Round2Error::EmptyPool));
                }

                if competition.status() == CompetitionStatus::Round2Voting {
                    competition
                        .advance_status(
                            CompetitionStatus::Round2Tallying,
                            conn,
                        )
                        .unwrap();
                }

                let votes: Vec<String> = submission_votes::table
                    .filter(
                        submission_votes::competition_id
                            .eq(competition_id)
                            .and(submission_votes::voting_round.eq(2)),
                    )
                    .select(submission_votes::submission_id)
                    .load(conn)
                    .unwrap();

                let vote_counts: Vec<(String, i64)> = pool
                    .iter()
                    .map(|submission| {
                        let count = votes
                            .iter()
                            .filter(|v| **v == submission.id)
                            .count() as i64;
                        (submission.id.clone(), count)
                    })
                    .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
                    .collect();

                for (i, (submission_id, count)) in
                    vote_counts.iter().enumerate()
                {
                    diesel::update(
                        submissions::table
                            .filter(submissions::id.eq(submission_id)),
                    )
                    .set((
                        submissions::round2_score.eq(*count as f32),
                        submissions::final_score.eq(*count as f32),
                        submissions::final_rank.eq(i as i64 + 1),
                    ))
                    .execute(conn)
                    .unwrap();
                }

                let max = vote_counts[0].1;
                let leaders: Vec<&String> = vote_counts
                    .iter()
                    .take_while(|(_, count)| *count == max)
                    .map(|(id, _)| id)
                    .collect();

                let winner_id = if leaders.len() == 1 {
                    Some(leaders[0].clone())
                } else if competition.round2_tie_break()
                    == TieBreakPolicy::SongCreatorPick
                {
                    SongCreatorPick::of_competition(competition_id, conn)
                        .first()
                        .map(|pick| pick.submission_id.clone())
                        .filter(|pick| leaders.contains(&pick))
                } else {
                    None
                };

                if !tickets::is_current(&ticket, conn) {
                    return Err(diesel::result::Error::RollbackTransaction);
                }

                let is_tie = winner_id.is_none();
                if is_tie {
                    let current = Competition::fetch(competition_id, conn)
                        .unwrap();
                    if current.status()
                        == CompetitionStatus::Round2Tallying
                    {
                        current
                            .advance_status(
                                CompetitionStatus::RequiresManualWinner,
                                conn,
                            )
                            .unwrap();
                    }
                }

                Ok(Ok(Round2TallyOutcome {
                    vote_counts,
                    winner_id,
                    is_tie,
                }))
            },
        )
        .unwrap_or(Err(Round2Error::Superseded));

    tickets::release(ticket, conn);
    let outcome = outcome?;

    // winner resolution runs outside the tally transaction, through the
    // same path an admin uses for manual resolution
    if let Some(winner_id) = &outcome.winner_id {
        set_competition_winner(competition_id, winner_id, conn)
            .expect("tally winner must be an eligible finalist");
    }

    info!(
        competition = competition_id,
        is_tie = outcome.is_tie,
        winner = outcome.winner_id.as_deref().unwrap_or("<unresolved>"),
        "tallied round-2 votes"
    );

    Ok(outcome)
}
