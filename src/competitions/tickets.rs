//! Serialization tickets for admin-triggered batch operations.
//!
//! Every batch mutation (grouping, tallying, disqualification) acquires an
//! unreleased ticket row for its `(competition, kind)` pair before touching
//! any other table. A second concurrent attempt observes the unreleased
//! ticket and fails fast instead of interleaving with the first run. An
//! abandoned ticket (crashed run) can be superseded by acquiring with
//! `override_prior`, which chains a new ticket with a higher `seq`; the
//! stale run then fails its currency check before committing.

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use uuid::Uuid;

use crate::schema::competition_tickets;

#[derive(Debug, PartialEq, Eq)]
pub enum TicketError {
    /// An unreleased ticket of the same kind already exists for this
    /// competition.
    AlreadyInProgress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TicketKind {
    Grouping,
    Tally,
    Disqualify,
    Round2Tally,
}

impl TicketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Grouping => "grouping",
            TicketKind::Tally => "tally",
            TicketKind::Disqualify => "disqualify",
            TicketKind::Round2Tally => "round2_tally",
        }
    }
}

#[derive(Debug)]
pub struct Ticket {
    pub id: String,
    pub competition_id: String,
    pub kind: TicketKind,
    pub seq: i64,
}

/// Acquires a ticket for `(competition_id, kind)`. With `override_prior`
/// an unreleased predecessor is superseded rather than refused.
pub fn acquire(
    competition_id: &str,
    kind: TicketKind,
    override_prior: bool,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Ticket, TicketError> {
    conn.transaction(
        |conn| -> Result<Result<Ticket, TicketError>, diesel::result::Error> {
            let prior_seq = competition_tickets::table
                .filter(
                    competition_tickets::competition_id
                        .eq(competition_id)
                        .and(competition_tickets::kind.eq(kind.as_str()))
                        .and(competition_tickets::released.eq(false)),
                )
                .select(diesel::dsl::max(competition_tickets::seq))
                .get_result::<Option<i64>>(conn)
                .unwrap();

            if prior_seq.is_some() && !override_prior {
                return Ok(Err(TicketError::AlreadyInProgress));
            }

            let seq = prior_seq.map(|s| s + 1).unwrap_or(0);
            let id = Uuid::now_v7().to_string();
            diesel::insert_into(competition_tickets::table)
                .values((
                    competition_tickets::id.eq(&id),
                    competition_tickets::competition_id.eq(competition_id),
                    competition_tickets::kind.eq(kind.as_str()),
                    competition_tickets::seq.eq(seq),
                    competition_tickets::acquired.eq(diesel::dsl::now),
                    competition_tickets::released.eq(false),
                ))
                .execute(conn)
                .unwrap();

            Ok(Ok(Ticket {
                id,
                competition_id: competition_id.to_string(),
                kind,
                seq,
            }))
        },
    )
    .unwrap()
}

/// A ticket is current while no successor with a higher `seq` exists. A
/// superseded run must abandon its work instead of committing.
pub fn is_current(
    ticket: &Ticket,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> bool {
    let newer: i64 = competition_tickets::table
        .filter(
            competition_tickets::competition_id
                .eq(&ticket.competition_id)
                .and(competition_tickets::kind.eq(ticket.kind.as_str()))
                .and(competition_tickets::seq.gt(ticket.seq)),
        )
        .count()
        .get_result(conn)
        .unwrap();

    newer == 0
}

pub fn release(
    ticket: Ticket,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) {
    diesel::update(
        competition_tickets::table
            .filter(competition_tickets::id.eq(&ticket.id)),
    )
    .set(competition_tickets::released.eq(true))
    .execute(conn)
    .unwrap();
}
