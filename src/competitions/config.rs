use serde::{Deserialize, Serialize};

/// Which scoring source feeds the round-1 tally. A competition-level
/// setting: every cohort in the competition is tallied from the same
/// source.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScoringSource {
    #[serde(rename = "peer_ballot")]
    PeerBallot,
    #[serde(rename = "judge_rubric")]
    JudgeRubric,
}

impl ScoringSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringSource::PeerBallot => "peer_ballot",
            ScoringSource::JudgeRubric => "judge_rubric",
        }
    }

    pub fn parse(s: &str) -> Option<ScoringSource> {
        match s {
            "peer_ballot" => Some(ScoringSource::PeerBallot),
            "judge_rubric" => Some(ScoringSource::JudgeRubric),
            _ => None,
        }
    }
}

/// What happens when the round-2 plurality tally produces a tied maximum.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum TieBreakPolicy {
    /// The competition parks in a manual-resolution state until an admin
    /// names the winner.
    #[serde(rename = "manual")]
    Manual,
    /// The song creator's rank-1 pick is authoritative, provided it is one
    /// of the tied leaders.
    #[serde(rename = "song_creator_pick")]
    SongCreatorPick,
}

impl TieBreakPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TieBreakPolicy::Manual => "manual",
            TieBreakPolicy::SongCreatorPick => "song_creator_pick",
        }
    }

    pub fn parse(s: &str) -> Option<TieBreakPolicy> {
        match s {
            "manual" => Some(TieBreakPolicy::Manual),
            "song_creator_pick" => Some(TieBreakPolicy::SongCreatorPick),
            _ => None,
        }
    }
}

/// Widget a judging criterion is presented with. `RadioButtons` carries a
/// JSON array of labels in `judging_criteria.scoring_options`, one per
/// integral score step.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScoringType {
    #[serde(rename = "slider")]
    Slider,
    #[serde(rename = "stars")]
    Stars,
    #[serde(rename = "radio_buttons")]
    RadioButtons,
}

impl ScoringType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringType::Slider => "slider",
            ScoringType::Stars => "stars",
            ScoringType::RadioButtons => "radio_buttons",
        }
    }

    pub fn parse(s: &str) -> Option<ScoringType> {
        match s {
            "slider" => Some(ScoringType::Slider),
            "stars" => Some(ScoringType::Stars),
            "radio_buttons" => Some(ScoringType::RadioButtons),
            _ => None,
        }
    }
}

#[cfg(test)]
#[test]
fn config_strings_roundtrip() {
    for source in [ScoringSource::PeerBallot, ScoringSource::JudgeRubric] {
        assert_eq!(ScoringSource::parse(source.as_str()), Some(source));
    }
    for policy in [TieBreakPolicy::Manual, TieBreakPolicy::SongCreatorPick] {
        assert_eq!(TieBreakPolicy::parse(policy.as_str()), Some(policy));
    }
    for ty in [
        ScoringType::Slider,
        ScoringType::Stars,
        ScoringType::RadioButtons,
    ] {
        assert_eq!(ScoringType::parse(ty.as_str()), Some(ty));
        let json = serde_json::to_string(&ty).unwrap();
        assert_eq!(json, format!("\"{}\"", ty.as_str()));
    }
}
