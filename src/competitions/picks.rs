//! Song-creator picks: the editorial ranking supplied by the owner of the
//! source song. Stored alongside the audience results and consulted by the
//! configured tie-break, but never summed into the vote counts.

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use uuid::Uuid;

use crate::{
    competitions::{Competition, CompetitionStatus, submissions::Submission},
    schema::song_creator_picks,
};

#[derive(Debug, PartialEq, Eq)]
pub enum PickError {
    CompetitionNotFound,
    SubmissionNotFound(String),
    /// Picks are recorded around round-2 setup, not before or after.
    WrongStatus(CompetitionStatus),
    /// The same submission appears at two ranks.
    DuplicateSubmission(String),
    /// Picks rank the finalist pool only.
    NotInPool(String),
    /// Picks are recorded once; there is no overwrite path.
    AlreadyRecorded,
    EmptyPicks,
}

#[derive(Queryable, Clone, Debug)]
pub struct SongCreatorPick {
    pub id: String,
    pub competition_id: String,
    pub submission_id: String,
    pub rank: i64,
    pub comment: Option<String>,
}

impl SongCreatorPick {
    /// The recorded picks, best first.
    pub fn of_competition(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Vec<SongCreatorPick> {
        song_creator_picks::table
            .filter(song_creator_picks::competition_id.eq(competition_id))
            .order_by(song_creator_picks::rank.asc())
            .load::<SongCreatorPick>(conn)
            .unwrap()
    }
}

/// Records the song creator's ordered picks (best first) with optional
/// per-pick comments. One recording per competition.
pub fn record_song_creator_picks(
    competition_id: &str,
    ordered_picks: Vec<(String, Option<String>)>,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<(), PickError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(PickError::CompetitionNotFound)?;
    match competition.status() {
        CompetitionStatus::Round2Setup | CompetitionStatus::Round2Voting => {}
        other => return Err(PickError::WrongStatus(other)),
    }
    if ordered_picks.is_empty() {
        return Err(PickError::EmptyPicks);
    }

    for (i, (submission_id, _)) in ordered_picks.iter().enumerate() {
        if ordered_picks[..i].iter().any(|(s, _)| s == submission_id) {
            return Err(PickError::DuplicateSubmission(
                submission_id.clone(),
            ));
        }
        let submission = Submission::fetch(submission_id, conn)
            .filter(|s| s.competition_id == competition_id)
            .ok_or_else(|| {
                PickError::SubmissionNotFound(submission_id.clone())
            })?;
        if !submission.advanced_to_round2 || submission.is_disqualified {
            return Err(PickError::NotInPool(submission_id.clone()));
        }
    }

    conn.transaction(
        |conn| -> Result<Result<(), PickError>, diesel::result::Error> {
            let existing: i64 = song_creator_picks::table
                .filter(
                    song_creator_picks::competition_id.eq(competition_id),
                )
                .count()
                .get_result(conn)
                .unwrap();
            if existing > 0 {
                return Ok(Err(PickError::AlreadyRecorded));
            }

            let rows = ordered_picks
                .iter()
                .enumerate()
                .map(|(i, (submission_id, comment))| {
                    (
                        song_creator_picks::id
                            .eq(Uuid::now_v7().to_string()),
                        song_creator_picks::competition_id
                            .eq(competition_id),
                        song_creator_picks::submission_id
                            .eq(submission_id.clone()),
                        song_creator_picks::rank.eq(i as i64 + 1),
                        song_creator_picks::comment.eq(comment.clone()),
                    )
                })
                .collect::<Vec<_>>();
            diesel::insert_into(song_creator_picks::table)
                .values(&rows)
                .execute(conn)
                .unwrap();

            Ok(Ok(()))
        },
    )
    .unwrap()
}
