use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(FacultyId);
id_newtype!(GraduateId);
id_newtype!(RoundNumber);

impl RoundNumber {
    pub fn title(self) -> String {
        format!("Round {}", self.0)
    }
}

/// A place a faculty's quota can sit: a numbered round or the unassigned remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Round(RoundNumber),
    Unassigned,
}

impl From<Option<RoundNumber>> for Bucket {
    fn from(value: Option<RoundNumber>) -> Self {
        value.map_or(Bucket::Unassigned, Bucket::Round)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Round(round) => write!(f, "round {round}"),
            Bucket::Unassigned => f.write_str("unassigned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    NotStarted,
    InProgress,
    Exhausted,
}

impl RoundState {
    pub fn from_counts(total: i64, called: i64) -> Self {
        if called >= total {
            RoundState::Exhausted
        } else if called == 0 {
            RoundState::NotStarted
        } else {
            RoundState::InProgress
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "round", rename_all = "snake_case")]
pub enum CurrentRound {
    Active(RoundNumber),
    AllRoundsComplete,
}
