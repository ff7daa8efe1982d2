//! Seeds a database with a demo competition for local exploration. All
//! fixtures are explicit — nothing here runs implicitly at application
//! startup.

use clap::Parser;
use crescendo::MIGRATIONS;
use crescendo::competitions::{
    Competition, CompetitionStatus, NewCompetition,
    ballots::{
        RankedBallot, assigned_submissions_for_voter,
        process_voter_submission,
    },
    config::{ScoringSource, ScoringType},
    grouping::create_groups_and_assignments,
    judging::{NewJudgingCriteria, create_judging_criteria},
    submissions::Submission,
};
use diesel::Connection;
use diesel_migrations::MigrationHarness;
use rand::SeedableRng;

#[derive(Parser)]
struct Seed {
    database_url: Option<String>,
    /// Number of submissions to enter.
    #[clap(long, default_value_t = 40)]
    entries: usize,
    /// Target review cohort size.
    #[clap(long, default_value_t = 20)]
    group_size: usize,
    /// Cast a ballot for every voter after grouping.
    #[clap(long, short, action)]
    ballots: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Seed::parse();
    let db_url = if let Some(url) = args.database_url {
        url
    } else {
        std::env::var("DATABASE_URL").expect(
            "please either set `DATABASE_URL` or pass the database url as \
             the first argument",
        )
    };

    let mut conn = diesel::SqliteConnection::establish(&db_url).unwrap();
    conn.run_pending_migrations(MIGRATIONS).unwrap();

    let mut new = NewCompetition::new(
        "Neon Skyline Remix Challenge",
        "neon-skyline",
        ScoringSource::PeerBallot,
    );
    new.song_creator_id = Some("artist-neon".to_string());
    let competition = Competition::create(new, &mut conn);

    for (i, (title, weight)) in [
        ("Mixing & Mastering", 0.4f32),
        ("Creativity", 0.35),
        ("Arrangement", 0.25),
    ]
    .iter()
    .enumerate()
    {
        create_judging_criteria(
            &competition.id,
            NewJudgingCriteria {
                title: title.to_string(),
                description: None,
                scoring_type: ScoringType::Slider,
                min_score: 0.0,
                max_score: 10.0,
                weight: *weight,
                display_order: i as i64 + 1,
                is_comment_required: false,
                scoring_options: None,
            },
            &mut conn,
        )
        .unwrap();
    }

    competition
        .advance_status(CompetitionStatus::OpenForSubmissions, &mut conn)
        .unwrap();

    for i in 0..args.entries {
        Submission::create(
            &competition.id,
            &format!("user-{i}"),
            &format!("Skyline Flip #{i}"),
            &mut conn,
        );
    }

    let mut rng = rand_chacha::ChaCha20Rng::from_os_rng();
    let groups = create_groups_and_assignments(
        &competition.id,
        args.group_size,
        &mut rng,
        &mut conn,
    )
    .unwrap();
    println!(
        "seeded competition {} with {} entries in {groups} cohorts",
        competition.id, args.entries
    );

    if args.ballots {
        for i in 0..args.entries {
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
        println!("cast {} ballots", args.entries);
    }
}
