use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Result, SombraError};

/// Container id carried by records that have not been placed yet.
pub const COLLECTION_ID_INVALID: i32 = -1;
/// Position carried by records that have not been persisted yet.
pub const COLLECTION_POS_INVALID: i64 = -1;
/// Largest container id a record can live in.
pub const COLLECTION_MAX: i32 = 32767;

/// Stable locator of a record: `(container id, position)`.
///
/// Ordering is by container id, then by position, both compared as
/// signed integers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Rid {
    /// Container (collection) the record lives in.
    pub cid: i32,
    /// Position inside the container.
    pub pos: i64,
}

impl Rid {
    /// The "no record" locator.
    pub const INVALID: Rid = Rid {
        cid: COLLECTION_ID_INVALID,
        pos: COLLECTION_POS_INVALID,
    };

    /// Builds a locator, rejecting container ids outside `[-2, 32767]`.
    ///
    /// `-2` is tolerated because temporary records use it before they are
    /// assigned to a container.
    pub fn new(cid: i32, pos: i64) -> Result<Self> {
        if cid < -2 {
            return Err(SombraError::Invalid("container id below -2"));
        }
        if cid > COLLECTION_MAX {
            return Err(SombraError::Invalid("container id above maximum"));
        }
        Ok(Self { cid, pos })
    }

    /// Returns true when both parts point at stored data.
    pub fn is_persistent(&self) -> bool {
        self.cid > -1 && self.pos > COLLECTION_POS_INVALID
    }

    /// Returns true when the record has not been assigned a position yet.
    pub fn is_new(&self) -> bool {
        self.pos < 0
    }

    /// Returns true when the container id is a real container.
    pub fn is_valid(&self) -> bool {
        self.cid != COLLECTION_ID_INVALID
    }
}

impl Ord for Rid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cid
            .cmp(&other.cid)
            .then_with(|| self.pos.cmp(&other.pos))
    }
}

impl PartialOrd for Rid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cid, self.pos)
    }
}

impl FromStr for Rid {
    type Err = SombraError;

    fn from_str(s: &str) -> Result<Self> {
        let body = s.trim().strip_prefix('#').unwrap_or(s.trim());
        let (cid, pos) = body
            .split_once(':')
            .ok_or(SombraError::Invalid("record id must look like #c:p"))?;
        let cid = cid
            .parse::<i32>()
            .map_err(|_| SombraError::Invalid("record id container is not a number"))?;
        let pos = pos
            .parse::<i64>()
            .map_err(|_| SombraError::Invalid("record id position is not a number"))?;
        Rid::new(cid, pos)
    }
}
