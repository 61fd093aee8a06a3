//! Task identifiers.
//!
//! Tasks are keyed by a ULID so ids sort by creation time and can be minted by
//! any process (the worker and the `upload` command) without coordination.
//!
//! `Display` renders a `task-` prefix for logs; the serialized form is the bare
//! ULID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a Task document. Assigned once at creation, never changed.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    const PREFIX: &'static str = "task-";

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// The bare ULID string used as the storage key.
    pub fn to_key(&self) -> String {
        self.0.to_string()
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

/// Accepts both the display form (`task-01H...`) and the bare ULID.
impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}
