//! Whole-lifecycle workload. Drives one competition through every engine
//! operation — grouping, round-1 ballots, disqualification, the unified
//! tally, round-2 setup and voting, song-creator picks, tie resolution and
//! the results projection — and checks the cross-cutting invariants along
//! the way.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use diesel::prelude::*;
use rand::SeedableRng;

use crate::{
    competitions::{
        Competition, CompetitionStatus, NewCompetition,
        ballots::{
            RankedBallot, assigned_submissions_for_voter,
            process_voter_submission,
        },
        config::{ScoringSource, TieBreakPolicy},
        disqualify::disqualify_non_voters,
        grouping::{
            Round1Assignment, create_groups_and_assignments, voting_progress,
        },
        picks::record_song_creator_picks,
        results::{get_competition_results, set_competition_winner},
        round_two::{
            is_user_eligible_for_round2_voting, record_round2_vote,
            round2_pool, setup_round2_voting, tally_round2_votes,
        },
        submissions::Submission,
        tally::tally_votes_and_determine_advancement,
    },
    db,
    schema::{round1_assignments, submission_votes, submissions},
    test::fixtures,
};

#[test]
fn full_competition_lifecycle() {
    // the production pool path, against an in-memory database
    let pool = db::make_pool(":memory:");
    let mut conn = pool.get().unwrap();
    db::run_migrations(&mut conn);

    let mut new = NewCompetition::new(
        "Grand Remix Final",
        "grand-remix-final",
        ScoringSource::PeerBallot,
    );
    new.round1_voting_end_date =
        Some(Utc::now().naive_utc() - Duration::minutes(5));
    new.round2_tie_break = TieBreakPolicy::Manual;
    let competition = fixtures::competition_with(new, &mut conn);

    competition
        .advance_status(CompetitionStatus::OpenForSubmissions, &mut conn)
        .unwrap();
    let competition = Competition::fetch(&competition.id, &mut conn).unwrap();

    fixtures::enter_submissions(&competition.id, 40, &mut conn);

    // -- grouping ---------------------------------------------------------

    let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(2024);
    let groups = create_groups_and_assignments(
        &competition.id,
        20,
        &mut rng,
        &mut conn,
    )
    .unwrap();
    assert_eq!(groups, 2);

    let assignments: Vec<Round1Assignment> = round1_assignments::table
        .filter(round1_assignments::competition_id.eq(&competition.id))
        .load(&mut conn)
        .unwrap();
    assert_eq!(assignments.len(), 40);

    // one assignment per voter, reviewing the other cohort
    let mut voters = HashSet::new();
    for assignment in &assignments {
        assert!(voters.insert(assignment.voter_id.clone()));
        assert_ne!(
            assignment.voter_group_number,
            assignment.assigned_group_number
        );
    }

    // -- round-1 ballots --------------------------------------------------

    // user-0 never votes and will be disqualified; everyone else ranks
    // the first three submissions (by id) of their assigned cohort
    for i in 1..40 {
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

    assert_eq!(voting_progress(&competition.id, &mut conn), (39, 40));

    // nobody managed to vote for their own submission
    let own_votes: i64 = submission_votes::table
        .inner_join(
            submissions::table
                .on(submission_votes::submission_id.eq(submissions::id)),
        )
        .filter(
            submission_votes::competition_id
                .eq(&competition.id)
                .and(submission_votes::voter_id.eq(submissions::user_id)),
        )
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(own_votes, 0);

    // -- disqualification -------------------------------------------------

    let disqualified = disqualify_non_voters(
        &competition.id,
        Utc::now().naive_utc(),
        &mut conn,
    )
    .unwrap();
    assert_eq!(disqualified, 1);
    let slacker =
        Submission::of_user(&competition.id, "user-0", &mut conn).unwrap();
    assert!(slacker.is_disqualified);

    // -- unified tally ----------------------------------------------------

    let advanced = tally_votes_and_determine_advancement(
        &competition.id,
        false,
        &mut conn,
    )
    .unwrap();
    assert_eq!(advanced, 4);

    // per cohort: contiguous 1..20 ranks, no ties, advancing set matches
    let mut by_group: HashMap<i64, Vec<(i64, String)>> = HashMap::new();
    for (submission_id, group, rank) in crate::schema::submission_groups::table
        .filter(
            crate::schema::submission_groups::competition_id
                .eq(&competition.id),
        )
        .select((
            crate::schema::submission_groups::submission_id,
            crate::schema::submission_groups::group_number,
            crate::schema::submission_groups::rank_in_group,
        ))
        .load::<(String, i64, Option<i64>)>(&mut conn)
        .unwrap()
    {
        by_group
            .entry(group)
            .or_default()
            .push((rank.unwrap(), submission_id));
    }
    for ranked in by_group.values_mut() {
        ranked.sort();
        let ranks: Vec<i64> = ranked.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranks, (1..=20).collect::<Vec<i64>>());
    }

    // the disqualified submission never advances, whatever its score
    assert!(
        !Submission::fetch(&slacker.id, &mut conn)
            .unwrap()
            .advanced_to_round2
    );

    // a re-run with the override changes nothing (idempotence)
    let before: Vec<(String, Option<i64>)> =
        crate::schema::submission_groups::table
            .filter(
                crate::schema::submission_groups::competition_id
                    .eq(&competition.id),
            )
            .select((
                crate::schema::submission_groups::submission_id,
                crate::schema::submission_groups::rank_in_group,
            ))
            .order_by(
                crate::schema::submission_groups::submission_id.asc(),
            )
            .load(&mut conn)
            .unwrap();
    let advanced_again = tally_votes_and_determine_advancement(
        &competition.id,
        true,
        &mut conn,
    )
    .unwrap();
    assert_eq!(advanced, advanced_again);
    let after: Vec<(String, Option<i64>)> =
        crate::schema::submission_groups::table
            .filter(
                crate::schema::submission_groups::competition_id
                    .eq(&competition.id),
            )
            .select((
                crate::schema::submission_groups::submission_id,
                crate::schema::submission_groups::rank_in_group,
            ))
            .order_by(
                crate::schema::submission_groups::submission_id.asc(),
            )
            .load(&mut conn)
            .unwrap();
    assert_eq!(before, after);

    // -- round 2 ----------------------------------------------------------

    let pool_size = setup_round2_voting(&competition.id, &mut conn).unwrap();
    assert_eq!(pool_size, 4);
    let pool = round2_pool(&competition.id, &mut conn);

    record_song_creator_picks(
        &competition.id,
        vec![
            (pool[1].id.clone(), Some("the bravest arrangement".into())),
            (pool[0].id.clone(), None),
        ],
        &mut conn,
    )
    .unwrap();

    // the non-voter is no longer part of the electorate
    assert!(!is_user_eligible_for_round2_voting(
        &competition.id,
        "user-0",
        &mut conn
    )
    .unwrap());

    // engineer an exact tie between the first two finalists
    let mut cast = 0;
    for i in 1..40 {
        let voter = format!("user-{i}");
        let choice = &pool[cast % 2];
        if choice.user_id == voter {
            continue;
        }
        record_round2_vote(&competition.id, &voter, &choice.id, &mut conn)
            .unwrap();
        cast += 1;
        if cast == 20 {
            break;
        }
    }

    let outcome = tally_round2_votes(&competition.id, &mut conn).unwrap();
    assert!(outcome.is_tie);
    assert_eq!(outcome.winner_id, None);
    assert_eq!(outcome.vote_counts[0].1, outcome.vote_counts[1].1);
    assert_eq!(
        Competition::fetch(&competition.id, &mut conn)
            .unwrap()
            .status(),
        CompetitionStatus::RequiresManualWinner
    );
    // no winner flag while the tie is unresolved
    assert!(
        Submission::of_competition(&competition.id, &mut conn)
            .iter()
            .all(|s| !s.is_winner)
    );

    // -- manual resolution and results ------------------------------------

    set_competition_winner(&competition.id, &pool[1].id, &mut conn).unwrap();

    let results = get_competition_results(&competition.id, &mut conn).unwrap();
    assert_eq!(results.status, "completed");
    assert_eq!(
        results.winner.as_ref().unwrap().submission_id,
        pool[1].id
    );
    assert_eq!(results.song_creator_picks.len(), 2);
    assert_eq!(results.total_round1_votes, 39 * 3);
    assert_eq!(results.total_round2_votes, 20);

    // the projection is stable across repeated reads
    let again = get_competition_results(&competition.id, &mut conn).unwrap();
    assert_eq!(results, again);

    let mut csv = Vec::new();
    results.write_csv(&mut csv).unwrap();
    assert_eq!(String::from_utf8(csv).unwrap().lines().count(), 41);
}
