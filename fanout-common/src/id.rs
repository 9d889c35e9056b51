//! ULID-backed identifiers
//!
//! Engine-generated ids are ULIDs: globally unique, lexicographically
//! sortable by creation time, and collision-resistant. They serialize as
//! their canonical 26-character string form.

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            id: ulid::Ulid,
        }

        impl $name {
            /// Generate a new unique id
            #[must_use]
            pub fn generate() -> Self {
                Self {
                    id: ulid::Ulid::new(),
                }
            }

            /// Create an id from an existing ULID
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self { id }
            }

            /// Get the underlying ULID
            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.id
            }

            /// Get the timestamp (milliseconds since Unix epoch) encoded in this id
            #[must_use]
            pub const fn timestamp_ms(&self) -> u64 {
                self.id.timestamp_ms()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.id)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s).map(|id| Self { id })
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.id.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
                Ok(Self { id })
            }
        }
    };
}

ulid_id! {
    /// Identifier for a campaign run
    CampaignId
}

ulid_id! {
    /// Identifier for a mailing task in the dispatch queue
    TaskId
}

ulid_id! {
    /// Identifier for a background job
    JobId
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = TaskId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 26);
        assert_eq!(TaskId::from_str(&text).unwrap(), id);
    }

    #[test]
    fn test_id_serde_as_string() {
        let id = CampaignId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: CampaignId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!(TaskId::from_str("not-a-ulid").is_err());
        assert!(TaskId::from_str("").is_err());
    }
}
