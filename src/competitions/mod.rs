use chrono::Utc;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use uuid::Uuid;

use crate::{
    competitions::config::{ScoringSource, TieBreakPolicy},
    schema::competitions,
};

pub mod ballots;
pub mod config;
pub mod disqualify;
pub mod grouping;
pub mod judging;
pub mod picks;
pub mod results;
pub mod round_two;
pub mod submissions;
pub mod tally;
pub mod tickets;

#[derive(Queryable, Clone, Debug)]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub created_at: chrono::NaiveDateTime,
    pub status: String,
    pub scoring_source: String,
    pub round1_voting_end_date: Option<chrono::NaiveDateTime>,
    pub round2_voting_end_date: Option<chrono::NaiveDateTime>,
    pub round1_advancement_count: i64,
    pub round2_tie_break: String,
    pub score_display_max: f32,
    pub song_creator_id: Option<String>,
    pub completed_date: Option<chrono::NaiveDateTime>,
}

/// Lifecycle of a competition. Stored as text in the `status` column; every
/// transition is applied by exactly one engine operation (see the edge list
/// in [`CompetitionStatus::can_transition`]), never inferred from scattered
/// checks.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompetitionStatus {
    Upcoming,
    OpenForSubmissions,
    Round1Voting,
    Round1Tallying,
    Round2Setup,
    Round2Voting,
    Round2Tallying,
    RequiresManualWinner,
    Completed,
}

impl CompetitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionStatus::Upcoming => "upcoming",
            CompetitionStatus::OpenForSubmissions => "open_for_submissions",
            CompetitionStatus::Round1Voting => "round1_voting",
            CompetitionStatus::Round1Tallying => "round1_tallying",
            CompetitionStatus::Round2Setup => "round2_setup",
            CompetitionStatus::Round2Voting => "round2_voting",
            CompetitionStatus::Round2Tallying => "round2_tallying",
            CompetitionStatus::RequiresManualWinner => "requires_manual_winner",
            CompetitionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<CompetitionStatus> {
        Some(match s {
            "upcoming" => CompetitionStatus::Upcoming,
            "open_for_submissions" => CompetitionStatus::OpenForSubmissions,
            "round1_voting" => CompetitionStatus::Round1Voting,
            "round1_tallying" => CompetitionStatus::Round1Tallying,
            "round2_setup" => CompetitionStatus::Round2Setup,
            "round2_voting" => CompetitionStatus::Round2Voting,
            "round2_tallying" => CompetitionStatus::Round2Tallying,
            "requires_manual_winner" => CompetitionStatus::RequiresManualWinner,
            "completed" => CompetitionStatus::Completed,
            _ => return None,
        })
    }

    /// Allowed transitions:
    ///
    /// - `Upcoming → OpenForSubmissions` (admin opens entries)
    /// - `OpenForSubmissions → Round1Voting` (grouping)
    /// - `Round1Voting → OpenForSubmissions` (grouping cleared before any
    ///   ballot was cast)
    /// - `Round1Voting → Round1Tallying` and
    ///   `Round1Tallying → Round2Setup` (round-1 tally; a guarded re-run
    ///   from `Round2Setup` leaves the status where it is)
    /// - `Round2Setup → Round2Voting` (round-2 setup)
    /// - `Round2Voting → Round2Tallying` (round-2 tally)
    /// - `Round2Tallying → Completed` (unique winner or tie-break)
    /// - `Round2Tallying → RequiresManualWinner` (unresolved tie)
    /// - `RequiresManualWinner → Completed` (admin names the winner)
    ///
    /// A re-run of the round-1 tally keeps the status at `Round1Tallying`
    /// (the self edge below).
    pub fn can_transition(self, to: CompetitionStatus) -> bool {
        use CompetitionStatus::*;
        matches!(
            (self, to),
            (Upcoming, OpenForSubmissions)
                | (OpenForSubmissions, Round1Voting)
                | (Round1Voting, OpenForSubmissions)
                | (Round1Voting, Round1Tallying)
                | (Round1Tallying, Round2Setup)
                | (Round2Setup, Round2Voting)
                | (Round2Voting, Round2Tallying)
                | (Round2Tallying, Completed)
                | (Round2Tallying, RequiresManualWinner)
                | (RequiresManualWinner, Completed)
        )
    }
}

/// Raised when an operation is invoked against a competition in the wrong
/// lifecycle state.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: CompetitionStatus,
    pub to: CompetitionStatus,
}

pub struct NewCompetition {
    pub name: String,
    pub slug: String,
    pub scoring_source: ScoringSource,
    pub round1_voting_end_date: Option<chrono::NaiveDateTime>,
    pub round2_voting_end_date: Option<chrono::NaiveDateTime>,
    pub round1_advancement_count: i64,
    pub round2_tie_break: TieBreakPolicy,
    pub score_display_max: f32,
    pub song_creator_id: Option<String>,
}

impl NewCompetition {
    pub fn new(name: &str, slug: &str, scoring_source: ScoringSource) -> Self {
        NewCompetition {
            name: name.to_string(),
            slug: slug.to_string(),
            scoring_source,
            round1_voting_end_date: None,
            round2_voting_end_date: None,
            round1_advancement_count: 2,
            round2_tie_break: TieBreakPolicy::Manual,
            score_display_max: 10.0,
            song_creator_id: None,
        }
    }
}

impl Competition {
    pub fn create(
        new: NewCompetition,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Competition {
        let id = Uuid::now_v7().to_string();
        diesel::insert_into(competitions::table)
            .values((
                competitions::id.eq(&id),
                competitions::name.eq(&new.name),
                competitions::slug.eq(&new.slug),
                competitions::created_at.eq(Utc::now().naive_utc()),
                competitions::status.eq(CompetitionStatus::Upcoming.as_str()),
                competitions::scoring_source.eq(new.scoring_source.as_str()),
                competitions::round1_voting_end_date
                    .eq(new.round1_voting_end_date),
                competitions::round2_voting_end_date
                    .eq(new.round2_voting_end_date),
                competitions::round1_advancement_count
                    .eq(new.round1_advancement_count),
                competitions::round2_tie_break.eq(new.round2_tie_break.as_str()),
                competitions::score_display_max.eq(new.score_display_max),
                competitions::song_creator_id.eq(new.song_creator_id.clone()),
            ))
            .execute(conn)
            .unwrap();

        Competition::fetch(&id, conn).unwrap()
    }

    pub fn fetch(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Option<Competition> {
        competitions::table
            .filter(competitions::id.eq(competition_id))
            .first::<Competition>(conn)
            .optional()
            .unwrap()
    }

    pub fn status(&self) -> CompetitionStatus {
        CompetitionStatus::parse(&self.status).unwrap_or_else(|| {
            panic!("unknown competition status `{}`", self.status)
        })
    }

    pub fn scoring_source(&self) -> ScoringSource {
        ScoringSource::parse(&self.scoring_source).unwrap_or_else(|| {
            panic!("unknown scoring source `{}`", self.scoring_source)
        })
    }

    pub fn round2_tie_break(&self) -> TieBreakPolicy {
        TieBreakPolicy::parse(&self.round2_tie_break).unwrap_or_else(|| {
            panic!("unknown tie-break policy `{}`", self.round2_tie_break)
        })
    }

    /// Moves the competition to `to`, enforcing the transition table.
    pub fn advance_status(
        &self,
        to: CompetitionStatus,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<(), InvalidTransition> {
        let from = self.status();
        if !from.can_transition(to) {
            return Err(InvalidTransition { from, to });
        }

        diesel::update(
            competitions::table.filter(competitions::id.eq(&self.id)),
        )
        .set(competitions::status.eq(to.as_str()))
        .execute(conn)
        .unwrap();

        Ok(())
    }
}
