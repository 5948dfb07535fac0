use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use uuid::Uuid;

use super::error::{MalformedIdSnafu, StorageError, StorageResult};

/// Names the row family a [`RecordId`] points at.
pub trait RecordKind: 'static {
    const NAME: &'static str;
}

#[derive(Debug)]
pub enum SessionKind {}

impl RecordKind for SessionKind {
    const NAME: &'static str = "session";
}

#[derive(Debug)]
pub enum MessageKind {}

impl RecordKind for MessageKind {
    const NAME: &'static str = "message";
}

/// A v7 UUID tagged with the kind of row it identifies.
///
/// Ids are minted by the controller before anything is written, so a session or
/// message keeps the same id from its first frame through every later store call.
pub struct RecordId<K: RecordKind> {
    uuid: Uuid,
    kind: PhantomData<fn() -> K>,
}

pub type SessionId = RecordId<SessionKind>;
pub type MessageId = RecordId<MessageKind>;

impl<K: RecordKind> RecordId<K> {
    pub fn new_v7() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            kind: PhantomData,
        }
    }

    /// Reads the hyphenated text form written to the `id` columns.
    pub fn parse(raw: &str) -> StorageResult<Self> {
        Uuid::parse_str(raw)
            .map(Self::from_uuid)
            .context(MalformedIdSnafu {
                stage: "record-id-parse",
                kind: K::NAME,
                raw: raw.to_string(),
            })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<K: RecordKind> Clone for RecordId<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: RecordKind> Copy for RecordId<K> {}

impl<K: RecordKind> PartialEq for RecordId<K> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<K: RecordKind> Eq for RecordId<K> {}

impl<K: RecordKind> Hash for RecordId<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

// v7 ids sort by the millisecond they were minted.
impl<K: RecordKind> Ord for RecordId<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<K: RecordKind> PartialOrd for RecordId<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: RecordKind> fmt::Debug for RecordId<K> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", K::NAME, self.uuid)
    }
}

impl<K: RecordKind> fmt::Display for RecordId<K> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uuid.hyphenated(), formatter)
    }
}

impl<K: RecordKind> FromStr for RecordId<K> {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}

impl<K: RecordKind> Serialize for RecordId<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.uuid.serialize(serializer)
    }
}

impl<'de, K: RecordKind> Deserialize<'de> for RecordId<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}
