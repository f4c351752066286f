//! Typed identifier wrappers shared across the workspace.
//!
//! Every catalog/job entity is keyed by a UUIDv4 string rather than a
//! bare `String`, so a `DesignId` can never be passed where a `JobId`
//! is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(value)
                    .map_err(|e| IdParseError::new(format!("invalid {}: {}", $label, e)))?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(DesignId, "design id");
define_id!(JobId, "job id");
define_id!(ChannelId, "channel id");
define_id!(MessageId, "message id");
define_id!(AttachmentId, "attachment id");
define_id!(DesignFileId, "design file id");
define_id!(DesignSourceId, "design source id");
define_id!(PreviewAssetId, "preview asset id");
define_id!(ImportSourceId, "import source id");
define_id!(ImportRecordId, "import record id");
define_id!(ImportProfileId, "import profile id");
define_id!(DuplicateCandidateId, "duplicate candidate id");
define_id!(DiscoveredChannelId, "discovered channel id");
define_id!(ExternalMetadataSourceId, "external metadata source id");
define_id!(CredentialId, "credential id");
define_id!(TagId, "tag id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = DesignId::new();
        let parsed = DesignId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_garbage() {
        assert!(JobId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn serializes_transparently() {
        let id = ChannelId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_str()));
    }
}
