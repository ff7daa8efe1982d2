//! The round-1 tally: merges ballot points or rubric scores per cohort,
//! ranks every cohort deterministically, and flags the top performers for
//! round 2.
//!
//! Both scoring sources are reduced to the same shape before ranking — a
//! per-submission `Aggregate` of total points and place-vote counters — so
//! the ranking comparator is written once and dispatch on the competition's
//! scoring source stays in a single function.

use std::collections::HashMap;

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use itertools::Itertools;
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        config::ScoringSource,
        judging::scores::SubmissionJudgment,
        submissions::Submission,
        tickets::{self, TicketKind},
    },
    schema::{submission_groups, submission_votes, submissions},
};

#[derive(Debug, PartialEq, Eq)]
pub enum TallyError {
    CompetitionNotFound,
    /// The competition is not in a state where a round-1 tally makes
    /// sense.
    WrongStatus(CompetitionStatus),
    /// Grouping has not run yet; there are no cohorts to tally.
    NotGrouped,
    /// Another tally run holds the ticket.
    AlreadyInProgress,
    /// This run was superseded by an overriding ticket and aborted.
    Superseded,
    /// Submissions were already advanced by a previous tally; a re-run
    /// could silently un-advance them, so it requires the explicit
    /// override.
    AlreadyAdvanced,
}

/// Points handed to a cohort's top three, mirroring the ballot scale.
const PLACE_POINTS: [i64; 3] = [3, 2, 1];

#[derive(Default, Clone, Copy, Debug)]
struct Aggregate {
    total_points: i64,
    first_place_votes: i64,
    second_place_votes: i64,
    third_place_votes: i64,
}

impl Aggregate {
    fn award(&mut self, place: usize) {
        self.total_points += PLACE_POINTS[place];
        match place {
            0 => self.first_place_votes += 1,
            1 => self.second_place_votes += 1,
            2 => self.third_place_votes += 1,
            _ => unreachable!("only the top three places are awarded"),
        }
    }
}

/// Recomputes every cohort's scores and ranks from scratch and flags the
/// advancing submissions. Safe to re-run: score and rank columns are
/// overwritten, never duplicated. Returns the number of submissions
/// advanced to round 2.
pub fn tally_votes_and_determine_advancement(
    competition_id: &str,
    override_advanced: bool,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<usize, TallyError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(TallyError::CompetitionNotFound)?;
    match competition.status() {
        CompetitionStatus::Round1Voting
        | CompetitionStatus::Round1Tallying => {}
        // a previous tally already advanced submissions and the
        // competition has moved on to forming the round-2 pool
        CompetitionStatus::Round2Setup if override_advanced => {}
        CompetitionStatus::Round2Setup => {
            return Err(TallyError::AlreadyAdvanced);
        }
        other => return Err(TallyError::WrongStatus(other)),
    }

    let ticket =
        tickets::acquire(competition_id, TicketKind::Tally, false, conn)
            .map_err(|_| TallyError::AlreadyInProgress)?;

    let result = conn
        .transaction(
            |conn| -> Result<
                Result<usize, TallyError>,
                diesel::result::Error,
            > {
                if competition.status() == CompetitionStatus::Round1Voting {
                    competition
                        .advance_status(
                            CompetitionStatus::Round1Tallying,
                            conn,
                        )
                        .unwrap();
                }

                let memberships: Vec<(String, String, i64)> =
                    submission_groups::table
                        .filter(
                            submission_groups::competition_id
                                .eq(competition_id),
                        )
                        .select((
                            submission_groups::id,
                            submission_groups::submission_id,
                            submission_groups::group_number,
                        ))
                        .load(conn)
                        .unwrap();
                if memberships.is_empty() {
                    return Ok(Err(TallyError::NotGrouped));
                }

                let group_of: HashMap<&str, i64> = memberships
                    .iter()
                    .map(|(_, sid, g)| (sid.as_str(), *g))
                    .collect();

                let aggregates = match competition.scoring_source() {
                    ScoringSource::PeerBallot => {
                        ballot_aggregates(competition_id, conn)
                    }
                    ScoringSource::JudgeRubric => {
                        rubric_aggregates(competition_id, &group_of, conn)
                    }
                };

                let disqualified: HashMap<String, bool> =
                    Submission::of_competition(competition_id, conn)
                        .into_iter()
                        .map(|s| (s.id, s.is_disqualified))
                        .collect();

                let advancement_count =
                    competition.round1_advancement_count;
                let mut advanced = 0usize;

                for (_, cohort) in &memberships
                    .iter()
                    .sorted_by_key(|(_, _, g)| *g)
                    .chunk_by(|(_, _, g)| *g)
                {
                    let mut rows: Vec<(&String, &String, Aggregate, bool)> =
                        cohort
                            .map(|(gid, sid, _)| {
                                (
                                    gid,
                                    sid,
                                    aggregates
                                        .get(sid.as_str())
                                        .copied()
                                        .unwrap_or_default(),
                                    disqualified[sid.as_str()],
                                )
                            })
                            .collect();

                    // Disqualified entries sink to the bottom; everyone
                    // else ranks by points, then place counts, then id.
                    // The id tail makes the order total, so no ties
                    // survive.
                    rows.sort_by(|a, b| {
                        a.3.cmp(&b.3)
                            .then(b.2.total_points.cmp(&a.2.total_points))
                            .then(
                                b.2.first_place_votes
                                    .cmp(&a.2.first_place_votes),
                            )
                            .then(
                                b.2.second_place_votes
                                    .cmp(&a.2.second_place_votes),
                            )
                            .then(
                                b.2.third_place_votes
                                    .cmp(&a.2.third_place_votes),
                            )
                            .then(a.1.cmp(b.1))
                    });

                    for (i, (group_row_id, submission_id, agg, dq)) in
                        rows.iter().enumerate()
                    {
                        let rank = i as i64 + 1;
                        diesel::update(
                            submission_groups::table.filter(
                                submission_groups::id.eq(*group_row_id),
                            ),
                        )
                        .set((
                            submission_groups::total_points
                                .eq(agg.total_points),
                            submission_groups::first_place_votes
                                .eq(agg.first_place_votes),
                            submission_groups::second_place_votes
                                .eq(agg.second_place_votes),
                            submission_groups::third_place_votes
                                .eq(agg.third_place_votes),
                            submission_groups::rank_in_group.eq(rank),
                        ))
                        .execute(conn)
                        .unwrap();

                        let advances =
                            rank <= advancement_count && !*dq;
                        if advances {
                            advanced += 1;
                        }
                        diesel::update(
                            submissions::table.filter(
                                submissions::id.eq(*submission_id),
                            ),
                        )
                        .set((
                            submissions::round1_score
                                .eq(agg.total_points as f32),
                            submissions::advanced_to_round2.eq(advances),
                        ))
                        .execute(conn)
                        .unwrap();
                    }
                }

                if !tickets::is_current(&ticket, conn) {
                    return Err(diesel::result::Error::RollbackTransaction);
                }

                if Competition::fetch(competition_id, conn)
                    .unwrap()
                    .status()
                    == CompetitionStatus::Round1Tallying
                {
                    Competition::fetch(competition_id, conn)
                        .unwrap()
                        .advance_status(CompetitionStatus::Round2Setup, conn)
                        .unwrap();
                }

                Ok(Ok(advanced))
            },
        )
        .unwrap_or(Err(TallyError::Superseded));

    tickets::release(ticket, conn);

    if let Ok(advanced) = &result {
        info!(
            competition = competition_id,
            advanced, "tallied round-1 cohorts"
        );
    }

    result
}

/// Peer-ballot mode: points come straight off the vote rows.
fn ballot_aggregates(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> HashMap<String, Aggregate> {
    let votes: Vec<(String, Option<i64>, Option<i64>)> =
        submission_votes::table
            .filter(
                submission_votes::competition_id
                    .eq(competition_id)
                    .and(submission_votes::voting_round.eq(1)),
            )
            .select((
                submission_votes::submission_id,
                submission_votes::rank,
                submission_votes::points,
            ))
            .load(conn)
            .unwrap();

    let mut aggregates: HashMap<String, Aggregate> = HashMap::new();
    for (submission_id, rank, points) in votes {
        let agg = aggregates.entry(submission_id).or_default();
        agg.total_points += points.unwrap_or(0);
        match rank {
            Some(1) => agg.first_place_votes += 1,
            Some(2) => agg.second_place_votes += 1,
            Some(3) => agg.third_place_votes += 1,
            _ => {}
        }
    }
    aggregates
}

/// Judge-rubric mode: every judge with completed judgments acts as one
/// implied ballot per cohort — their top three submissions by overall
/// score earn 3/2/1, which keeps the aggregates comparable with the
/// peer-ballot mode.
fn rubric_aggregates(
    competition_id: &str,
    group_of: &HashMap<&str, i64>,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> HashMap<String, Aggregate> {
    let judgments =
        SubmissionJudgment::completed_of_competition(competition_id, conn);

    // (group, judge) -> [(score, submission)]
    let mut per_judge: HashMap<(i64, &str), Vec<(Decimal, &str)>> =
        HashMap::new();
    for judgment in &judgments {
        let Some(group) = group_of.get(judgment.submission_id.as_str())
        else {
            // submission left the cohort structure (e.g. entered after
            // grouping); its judgments cannot score anyone
            continue;
        };
        let score = judgment.overall_score.unwrap_or(0.0);
        per_judge
            .entry((*group, judgment.judge_id.as_str()))
            .or_default()
            .push((
                Decimal::from_f32_retain(score).unwrap_or_default(),
                judgment.submission_id.as_str(),
            ));
    }

    let mut aggregates: HashMap<String, Aggregate> = HashMap::new();
    for ranking in per_judge.into_values() {
        let ordered = ranking
            .into_iter()
            .sorted_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
        for (place, (_, submission_id)) in
            ordered.take(PLACE_POINTS.len()).enumerate()
        {
            aggregates
                .entry(submission_id.to_string())
                .or_default()
                .award(place);
        }
    }
    aggregates
}
