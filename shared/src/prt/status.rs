use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Operating state code published by the PRT status API.
///
/// Operators mostly publish 1, 5 and 7 even when another code would fit better, so
/// consumers should branch on [`PrtState::availability`] rather than the exact code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum PrtState {
    Normal,
    DownBetweenStations,
    Maintenance,
    Down,
    SpecialEvent,
    DownAtStation,
    Closed,
    /// Closed code used by older revisions of the feed.
    LegacyClosed,
    Other(i32),
}

impl PrtState {
    pub const fn code(self) -> i32 {
        match self {
            Self::Normal => 1,
            Self::DownBetweenStations => 2,
            Self::Maintenance => 3,
            Self::Down => 4,
            Self::SpecialEvent => 5,
            Self::DownAtStation => 6,
            Self::Closed => 7,
            Self::LegacyClosed => 9,
            Self::Other(code) => code,
        }
    }

    pub const fn availability(self) -> Availability {
        match self {
            Self::Normal => Availability::Up,
            Self::Closed | Self::LegacyClosed => Availability::Closed,
            _ => Availability::Down,
        }
    }
}

impl From<i32> for PrtState {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Normal,
            2 => Self::DownBetweenStations,
            3 => Self::Maintenance,
            4 => Self::Down,
            5 => Self::SpecialEvent,
            6 => Self::DownAtStation,
            7 => Self::Closed,
            9 => Self::LegacyClosed,
            other => Self::Other(other),
        }
    }
}

impl From<PrtState> for i32 {
    fn from(state: PrtState) -> Self {
        state.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Up,
    Down,
    Closed,
}

impl Display for Availability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One observation of the PRT status feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    #[serde(rename = "status")]
    pub state: PrtState,
    pub message: String,
    /// Unix seconds of the status event, as published by the feed.
    pub timestamp: i64,
    pub stations: Vec<String>,
    pub buses_dispatched: bool,
    pub duration: Option<String>,
    /// Response body the record was parsed from, kept for audit.
    #[serde(skip)]
    pub raw_payload: Vec<u8>,
}

impl StatusRecord {
    pub fn headline(&self) -> String {
        format!("The PRT is {}", self.state.availability())
    }

    /// Flattened key/value form sent as the data payload of a native push.
    pub fn push_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("status".to_string(), self.state.code().to_string()),
            ("message".to_string(), self.message.clone()),
            ("timestamp".to_string(), self.timestamp.to_string()),
            ("stations".to_string(), self.stations.join(",")),
            (
                "bussesDispatched".to_string(),
                self.buses_dispatched.to_string(),
            ),
        ])
    }
}

/// Position of a fetched record relative to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recency {
    Before,
    Equal,
    After,
}

/// Orders `fetched` against `current`.
///
/// Equality only looks at state code, message and timestamp: stations and the bus flag
/// are ignored so cosmetic re-fetches of one event are not reported as changes. Ordering
/// is by timestamp alone, and a substantive difference under an unchanged timestamp is
/// reported as [`Recency::After`] because the feed reuses timestamps within an event.
pub fn compare(current: &StatusRecord, fetched: &StatusRecord) -> Recency {
    let same_event = current.state.code() == fetched.state.code()
        && current.message == fetched.message
        && current.timestamp == fetched.timestamp;

    if same_event {
        Recency::Equal
    } else if fetched.timestamp < current.timestamp {
        Recency::Before
    } else {
        Recency::After
    }
}
