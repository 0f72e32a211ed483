use core::str::FromStr;

/// Identifier for a queue record
///
/// A ULID, so identifiers sort by creation time and can double as file names
/// for file-backed stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId {
    id: ulid::Ulid,
}

impl QueueId {
    /// Parse an identifier from a file name like `01ARYZ6S41TSV4RRFFQ69G5FAV.record`
    ///
    /// Rejects path separators and traversal patterns before attempting to parse.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".record")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique identifier
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// File name used by file-backed stores
    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.record", self.id)
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for QueueId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            id: ulid::Ulid::from_string(s)?,
        })
    }
}

impl serde::Serialize for QueueId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for QueueId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_id_filename_validation() {
        assert!(QueueId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.record").is_some());

        assert!(QueueId::from_filename("../etc/passwd.record").is_none());
        assert!(QueueId::from_filename("foo/bar.record").is_none());
        assert!(QueueId::from_filename("..\\windows\\system32.record").is_none());

        assert!(QueueId::from_filename("not_a_valid_ulid.record").is_none());
        assert!(QueueId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_none());
    }

    #[test]
    fn test_queue_id_filename_round_trip() {
        let id = QueueId::generate();
        assert_eq!(QueueId::from_filename(&id.filename()), Some(id));
        assert_eq!(id.to_string().parse::<QueueId>().ok(), Some(id));
    }
}
