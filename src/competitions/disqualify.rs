//! Disqualifies voters who never cast their round-1 ballot. Participation
//! in review is a condition of entry: an assigned voter who sits out past
//! the deadline forfeits their own submission.

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use tracing::info;

use crate::{
    competitions::{
        Competition, CompetitionStatus,
        tickets::{self, TicketKind},
    },
    schema::{round1_assignments, submissions},
};

#[derive(Debug, PartialEq, Eq)]
pub enum DisqualifyError {
    CompetitionNotFound,
    /// The competition has no round-1 voting deadline configured.
    NoDeadline,
    /// The round-1 voting deadline has not passed yet.
    DeadlineNotReached,
    /// The competition has already moved past the stage where
    /// disqualification applies.
    WrongStatus(CompetitionStatus),
    /// Another disqualification run holds the ticket.
    AlreadyInProgress,
}

/// Disqualifies the submission of every assigned voter who has not voted
/// by `now`. Idempotent: already-disqualified submissions are skipped.
/// Returns the number of submissions newly disqualified.
pub fn disqualify_non_voters(
    competition_id: &str,
    now: chrono::NaiveDateTime,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<usize, DisqualifyError> {
    let competition = Competition::fetch(competition_id, conn)
        .ok_or(DisqualifyError::CompetitionNotFound)?;
    match competition.status() {
        CompetitionStatus::Round1Voting
        | CompetitionStatus::Round1Tallying
        | CompetitionStatus::Round2Setup => {}
        other => return Err(DisqualifyError::WrongStatus(other)),
    }

    let deadline = competition
        .round1_voting_end_date
        .ok_or(DisqualifyError::NoDeadline)?;
    if now <= deadline {
        return Err(DisqualifyError::DeadlineNotReached);
    }

    let ticket =
        tickets::acquire(competition_id, TicketKind::Disqualify, false, conn)
            .map_err(|_| DisqualifyError::AlreadyInProgress)?;

    let disqualified = conn
        .transaction(|conn| -> Result<usize, diesel::result::Error> {
            let non_voters: Vec<String> = round1_assignments::table
                .filter(
                    round1_assignments::competition_id
                        .eq(competition_id)
                        .and(round1_assignments::has_voted.eq(false)),
                )
                .select(round1_assignments::voter_id)
                .load(conn)
                .unwrap();

            let count = diesel::update(
                submissions::table.filter(
                    submissions::competition_id
                        .eq(competition_id)
                        .and(submissions::user_id.eq_any(&non_voters))
                        .and(submissions::is_disqualified.eq(false)),
                ),
            )
            .set(submissions::is_disqualified.eq(true))
            .execute(conn)
            .unwrap();

            Ok(count)
        })
        .unwrap();

    tickets::release(ticket, conn);

    info!(
        competition = competition_id,
        disqualified, "disqualified non-voting participants"
    );

    Ok(disqualified)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rand::SeedableRng;

    use super::*;
    use crate::{
        competitions::{
            NewCompetition,
            ballots::{
                RankedBallot, assigned_submissions_for_voter,
                process_voter_submission,
            },
            config::ScoringSource,
            grouping::create_groups_and_assignments,
            submissions::Submission,
        },
        test::fixtures,
    };

    fn competition_past_deadline(
        conn: &mut diesel::SqliteConnection,
    ) -> Competition {
        let mut new = NewCompetition::new(
            "Deadline Remix",
            "deadline-remix",
            ScoringSource::PeerBallot,
        );
        new.round1_voting_end_date =
            Some(Utc::now().naive_utc() - Duration::hours(1));
        fixtures::competition_with(new, conn)
    }

    #[test]
    fn non_voters_lose_their_submission() {
        let mut conn = fixtures::test_conn();
        let competition = competition_past_deadline(&mut conn);
        fixtures::force_status(
            &competition.id,
            CompetitionStatus::OpenForSubmissions,
            &mut conn,
        );
        fixtures::enter_submissions(&competition.id, 6, &mut conn);
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(31);
        create_groups_and_assignments(&competition.id, 3, &mut rng, &mut conn)
            .unwrap();

        // everyone votes except user-0
        for i in 1..6 {
            let voter = format!("user-{i}");
            let assigned = assigned_submissions_for_voter(
                &competition.id,
                &voter,
                &mut conn,
            )
            .unwrap();
            process_voter_submission(
                &competition.id,
                &voter,
                RankedBallot::new(
                    &assigned[0].id,
                    &assigned[1].id,
                    &assigned[2].id,
                ),
                &mut conn,
            )
            .unwrap();
        }

        let count = disqualify_non_voters(
            &competition.id,
            Utc::now().naive_utc(),
            &mut conn,
        )
        .unwrap();
        assert_eq!(count, 1);

        let submission =
            Submission::of_user(&competition.id, "user-0", &mut conn)
                .unwrap();
        assert!(submission.is_disqualified);

        // second run finds nothing new
        let count = disqualify_non_voters(
            &competition.id,
            Utc::now().naive_utc(),
            &mut conn,
        )
        .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn refused_before_the_deadline() {
        let mut conn = fixtures::test_conn();
        let mut new = NewCompetition::new(
            "Early Remix",
            "early-remix",
            ScoringSource::PeerBallot,
        );
        new.round1_voting_end_date =
            Some(Utc::now().naive_utc() + Duration::hours(1));
        let competition = fixtures::competition_with(new, &mut conn);
        fixtures::force_status(
            &competition.id,
            CompetitionStatus::Round1Voting,
            &mut conn,
        );

        assert_eq!(
            disqualify_non_voters(
                &competition.id,
                Utc::now().naive_utc(),
                &mut conn
            )
            .unwrap_err(),
            DisqualifyError::DeadlineNotReached
        );
    }

    #[test]
    fn missing_deadline_is_an_error() {
        let mut conn = fixtures::test_conn();
        let competition = fixtures::competition(&mut conn);
        fixtures::force_status(
            &competition.id,
            CompetitionStatus::Round1Voting,
            &mut conn,
        );

        assert_eq!(
            disqualify_non_voters(
                &competition.id,
                Utc::now().naive_utc(),
                &mut conn
            )
            .unwrap_err(),
            DisqualifyError::NoDeadline
        );
    }
}
