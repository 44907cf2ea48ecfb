//! Identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for holds and queue items.
/// Uses UUIDv7 for time-ordered, sortable IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ResourceId(Uuid);

impl ResourceId {
    /// Create a new unique ResourceId using UUIDv7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ResourceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
        )]
        #[display("{_0}")]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a throttle category, unique within a registry.
    CategoryId
);

string_id!(
    /// Identifier of a job (the reference plugin calls these projects).
    JobId
);

string_id!(
    /// Name of an execution node.
    NodeRef
);

/// One run of a job, e.g. `first-job#1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{job}#{number}")]
pub struct RunRef {
    pub job: JobId,
    pub number: u32,
}

impl RunRef {
    pub fn new(job: impl Into<JobId>, number: u32) -> Self {
        Self {
            job: job.into(),
            number,
        }
    }
}

impl std::str::FromStr for RunRef {
    type Err = crate::Error;

    /// Parses `job#number`; a bare job name means run 1.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.rsplit_once('#') {
            Some((job, number)) if !job.is_empty() => {
                let number = number.parse().map_err(|_| {
                    crate::Error::InvalidInput(format!("invalid run number in '{}'", s))
                })?;
                Ok(Self::new(job, number))
            }
            Some(_) => Err(crate::Error::InvalidInput(format!(
                "missing job name in '{}'",
                s
            ))),
            None if !s.is_empty() => Ok(Self::new(s, 1)),
            None => Err(crate::Error::InvalidInput("empty run reference".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ref_display_and_parse() {
        let run = RunRef::new("first-job", 3);
        assert_eq!(run.to_string(), "first-job#3");
        assert_eq!("first-job#3".parse::<RunRef>().unwrap(), run);
        assert_eq!("first-job".parse::<RunRef>().unwrap().number, 1);
        assert!("#3".parse::<RunRef>().is_err());
        assert!("job#x".parse::<RunRef>().is_err());
    }

    #[test]
    fn test_string_ids_serialize_transparently() {
        let id = CategoryId::new("TWO_TOTAL");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"TWO_TOTAL\"");
        assert_eq!(id.to_string(), "TWO_TOTAL");
    }
}
