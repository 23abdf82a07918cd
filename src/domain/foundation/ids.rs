//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ValidationError;

/// Producer-assigned element identifier (e.g. an IFC GUID).
///
/// Opaque and unique across the whole system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    /// Creates a new ElementId, returning error if empty.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::empty_field("element_id"));
        }
        Ok(Self(id))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Project reference carried by every element and upload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a new ProjectId, returning error if empty.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::empty_field("project_id"));
        }
        Ok(Self(id))
    }

    /// Project used for records that arrive without a project reference.
    pub fn unassigned() -> Self {
        Self("unassigned".to_string())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a live subscriber connection.
///
/// Allocated from a monotonically increasing counter, never reused within
/// a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_rejects_blank() {
        assert!(ElementId::new("").is_err());
        assert!(ElementId::new("   ").is_err());
    }

    #[test]
    fn element_id_preserves_value() {
        let id = ElementId::new("2O2Fr$t4X7Zf8NOew3FLOH").unwrap();
        assert_eq!(id.as_str(), "2O2Fr$t4X7Zf8NOew3FLOH");
    }

    #[test]
    fn project_id_serializes_transparently() {
        let id = ProjectId::new("P-100").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""P-100""#);
    }

    #[test]
    fn connection_id_displays_with_prefix() {
        assert_eq!(ConnectionId::from_raw(7).to_string(), "conn-7");
    }
}
