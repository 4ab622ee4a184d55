/// Internal identifier of a stored message unit
///
/// This is a ULID assigned by the backing store when a unit is first written.
/// It is the storage key, not the protocol message id: incoming units may
/// legitimately carry a message id that was already seen, so the two must not
/// be conflated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    id: ulid::Ulid,
}

impl UnitId {
    /// Parse a unit ID from a filename like `01ARYZ6S41TSV4RRFFQ69G5FAV.bin`
    ///
    /// Validates that the stem is a valid ULID to prevent path traversal.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    /// Create a unit ID from an existing ULID
    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique unit ID
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    /// Get the underlying ULID
    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which this ID was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl serde::Serialize for UnitId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for UnitId {
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
    fn test_unit_id_from_filename() {
        assert!(UnitId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").is_some());

        assert!(UnitId::from_filename("../etc/passwd.bin").is_none());
        assert!(UnitId::from_filename("foo/bar.bin").is_none());
        assert!(UnitId::from_filename("..\\windows\\system32.bin").is_none());

        assert!(UnitId::from_filename("not_a_valid_ulid.bin").is_none());
        assert!(UnitId::from_filename("01ARZ3NDEKTSV4RRFFQ69G5FAV.ron").is_none());
    }

    #[test]
    fn test_unit_id_serde() {
        let id = UnitId::generate();
        let text = ron::to_string(&id).unwrap();
        let parsed: UnitId = ron::from_str(&text).unwrap();
        assert_eq!(id, parsed);
    }
}
