//! Winner resolution and the read-only results projection.

use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::{
    competitions::{
        Competition, CompetitionStatus, picks::SongCreatorPick,
        submissions::Submission,
    },
    schema::{competitions, submission_groups, submission_votes, submissions},
};

#[derive(Debug, PartialEq, Eq)]
pub enum WinnerError {
    CompetitionNotFound,
    SubmissionNotFound,
    /// Winners are set while resolving the round-2 tally or a parked tie.
    WrongStatus(CompetitionStatus),
    /// The winner must come out of the finalist pool.
    NotInPool,
    /// A different submission has already been crowned.
    WinnerAlreadySet(String),
}

/// Crowns `submission_id`: flags the submission, stamps the competition's
/// completion date and moves it to `Completed`. Used both by the automatic
/// resolution in the round-2 tally and by manual tie resolution.
pub fn set_competition_winner(
    competition_id: &str,
    submission_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), WinnerError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(WinnerError::CompetitionNotFound)?;
    match competition.status() {
        CompetitionStatus::Round2Tallying
        | CompetitionStatus::RequiresManualWinner => {}
        other => return Err(WinnerError::WrongStatus(other)),
    }

    let submission = Submission::fetch(submission_id, conn)
        .filter(|s| s.competition_id == competition_id)
        .ok_or(WinnerError::SubmissionNotFound)?;
    if !submission.eligible_round2_voting
        || !submission.advanced_to_round2
        || submission.is_disqualified
    {
        return Err(WinnerError::NotInPool);
    }

    conn.transaction(
        |conn| -> Result<Result<(), WinnerError>, diesel::result::Error> {
            let existing: Option<String> = submissions::table
                .filter(
                    submissions::competition_id
                        .eq(competition_id)
                        .and(submissions::is_winner.eq(true)),
                )
                .select(submissions::id)
                .first::<String>(conn)
                .optional()
                .unwrap();
            if let Some(existing) = existing {
                return Ok(Err(WinnerError::WinnerAlreadySet(existing)));
            }

            // a manually resolved winner takes rank 1 from the provisional
            // leader, who inherits the winner's old rank
            if submission.final_rank != Some(1) {
                diesel::update(
                    submissions::table.filter(
                        submissions::competition_id
                            .eq(competition_id)
                            .and(submissions::final_rank.eq(1))
                            .and(submissions::id.ne(submission_id)),
                    ),
                )
                .set(submissions::final_rank.eq(submission.final_rank))
                .execute(conn)
                .unwrap();
            }

            diesel::update(
                submissions::table
                    .filter(submissions::id.eq(submission_id)),
            )
            .set((
                submissions::is_winner.eq(true),
                submissions::final_rank.eq(1),
            ))
            .execute(conn)
            .unwrap();

            diesel::update(
                competitions::table
                    .filter(competitions::id.eq(competition_id)),
            )
            .set(
                competitions::completed_date
                    .eq(Utc::now().naive_utc()),
            )
            .execute(conn)
            .unwrap();

            competition
                .advance_status(CompetitionStatus::Completed, conn)
                .unwrap();

            Ok(Ok(()))
        },
    )
    .unwrap()?;

    info!(
        competition = competition_id,
        winner = submission_id,
        "competition completed"
    );
    Ok(())
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub submission_id: String,
    pub title: String,
    pub user_id: String,
    pub group_number: Option<i64>,
    pub rank_in_group: Option<i64>,
    pub total_points: Option<i64>,
    pub round2_votes: Option<i64>,
    pub final_rank: Option<i64>,
    pub advanced_to_round2: bool,
    pub is_disqualified: bool,
    pub is_winner: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PickResult {
    pub rank: i64,
    pub submission_id: String,
    pub comment: Option<String>,
}

/// Read-only projection of a competition's results. Assembling it has no
/// side effects; calling it twice against unchanged data yields identical
/// values.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompetitionResults {
    pub competition_id: String,
    pub name: String,
    pub status: String,
    pub scoring_source: String,
    pub completed_date: Option<chrono::NaiveDateTime>,
    pub winner: Option<SubmissionResult>,
    /// Finalists first (by final rank), then the rest by cohort and
    /// in-cohort rank.
    pub standings: Vec<SubmissionResult>,
    pub song_creator_picks: Vec<PickResult>,
    pub total_round1_votes: i64,
    pub total_round2_votes: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResultsError {
    CompetitionNotFound,
}

pub fn get_competition_results(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<CompetitionResults, ResultsError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(ResultsError::CompetitionNotFound)?;

    let group_rows: Vec<(String, i64, Option<i64>, Option<i64>)> =
        submission_groups::table
            .filter(submission_groups::competition_id.eq(competition_id))
            .select((
                submission_groups::submission_id,
                submission_groups::group_number,
                submission_groups::rank_in_group,
                submission_groups::total_points,
            ))
            .load(conn)
            .unwrap();

    let round2_votes: Vec<String> = submission_votes::table
        .filter(
            submission_votes::competition_id
                .eq(competition_id)
                .and(submission_votes::voting_round.eq(2)),
        )
        .select(submission_votes::submission_id)
        .load(conn)
        .unwrap();
    let total_round1_votes: i64 = submission_votes::table
        .filter(
            submission_votes::competition_id
                .eq(competition_id)
                .and(submission_votes::voting_round.eq(1)),
        )
        .count()
        .get_result(conn)
        .unwrap();

    let mut standings: IndexMap<String, SubmissionResult> =
        Submission::of_competition(competition_id, conn)
            .into_iter()
            .map(|s| {
                (
                    s.id.clone(),
                    SubmissionResult {
                        submission_id: s.id,
                        title: s.title,
                        user_id: s.user_id,
                        group_number: None,
                        rank_in_group: None,
                        total_points: None,
                        round2_votes: if s.eligible_round2_voting {
                            Some(0)
                        } else {
                            None
                        },
                        final_rank: s.final_rank,
                        advanced_to_round2: s.advanced_to_round2,
                        is_disqualified: s.is_disqualified,
                        is_winner: s.is_winner,
                    },
                )
            })
            .collect();

    for (submission_id, group, rank, points) in group_rows {
        if let Some(entry) = standings.get_mut(&submission_id) {
            entry.group_number = Some(group);
            entry.rank_in_group = rank;
            entry.total_points = points;
        }
    }
    for submission_id in &round2_votes {
        if let Some(entry) = standings.get_mut(submission_id) {
            entry.round2_votes =
                Some(entry.round2_votes.unwrap_or(0) + 1);
        }
    }

    let mut standings: Vec<SubmissionResult> =
        standings.into_values().collect();
    standings.sort_by(|a, b| {
        rank_key(a)
            .cmp(&rank_key(b))
            .then(a.submission_id.cmp(&b.submission_id))
    });

    let winner = standings.iter().find(|s| s.is_winner).cloned();

    let song_creator_picks =
        SongCreatorPick::of_competition(competition_id, conn)
            .into_iter()
            .map(|p| PickResult {
                rank: p.rank,
                submission_id: p.submission_id,
                comment: p.comment,
            })
            .collect();

    Ok(CompetitionResults {
        competition_id: competition.id,
        name: competition.name,
        status: competition.status,
        scoring_source: competition.scoring_source,
        completed_date: competition.completed_date,
        winner,
        standings,
        song_creator_picks,
        total_round1_votes,
        total_round2_votes: round2_votes.len() as i64,
    })
}

/// Finalists (with a final rank) first, then everyone else by cohort and
/// in-cohort rank; disqualified entries last.
fn rank_key(
    s: &SubmissionResult,
) -> (bool, Option<i64>, Option<i64>, Option<i64>) {
    (
        s.is_disqualified,
        s.final_rank.map_or(Some(i64::MAX), Some),
        s.group_number,
        s.rank_in_group,
    )
}

impl CompetitionResults {
    /// Writes the standings as CSV for administrative export.
    pub fn write_csv<W: std::io::Write>(
        &self,
        writer: W,
    ) -> csv::Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record([
            "submission_id",
            "title",
            "user_id",
            "group",
            "rank_in_group",
            "total_points",
            "round2_votes",
            "final_rank",
            "advanced",
            "disqualified",
            "winner",
        ])?;
        for row in &self.standings {
            let fmt_opt =
                |v: Option<i64>| v.map_or(String::new(), |v| v.to_string());
            csv.write_record([
                row.submission_id.clone(),
                row.title.clone(),
                row.user_id.clone(),
                fmt_opt(row.group_number),
                fmt_opt(row.rank_in_group),
                fmt_opt(row.total_points),
                fmt_opt(row.round2_votes),
                fmt_opt(row.final_rank),
                row.advanced_to_round2.to_string(),
                row.is_disqualified.to_string(),
                row.is_winner.to_string(),
            ])?;
        }
        csv.flush()?;
        Ok(())
    }
}
