//! Endpoint roster and the selection functions over it.

use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointDescriptor, profile_identical};
use crate::error::{Error, Result};

/// Ordered endpoints returned by one heartbeat. Replaced wholesale on each
/// heartbeat, never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(Vec<EndpointDescriptor>);

impl Roster {
    pub const fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self(endpoints)
    }

    pub fn as_slice(&self) -> &[EndpointDescriptor] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EndpointDescriptor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&EndpointDescriptor> {
        self.0.first()
    }

    /// See [`find_by_id_prefix`].
    pub fn find_by_id_prefix(&self, prefix: &str) -> Result<&EndpointDescriptor> {
        find_by_id_prefix(&self.0, prefix)
    }

    /// See [`contains_profile`].
    pub fn contains_profile(&self, endpoint: &EndpointDescriptor) -> bool {
        contains_profile(&self.0, endpoint)
    }
}

impl From<Vec<EndpointDescriptor>> for Roster {
    fn from(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self(endpoints)
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a EndpointDescriptor;
    type IntoIter = std::slice::Iter<'a, EndpointDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// First endpoint, in roster order, whose id starts with `prefix`.
///
/// Case-sensitive. Ambiguous prefixes are not rejected: the earliest match
/// wins.
pub fn find_by_id_prefix<'a>(
    roster: &'a [EndpointDescriptor],
    prefix: &str,
) -> Result<&'a EndpointDescriptor> {
    roster
        .iter()
        .find(|e| e.id.starts_with(prefix))
        .ok_or_else(|| Error::NotFound(format!("Server ID [{prefix}] not found")))
}

/// Whether any roster entry is profile-identical to `endpoint`.
pub fn contains_profile(roster: &[EndpointDescriptor], endpoint: &EndpointDescriptor) -> bool {
    roster.iter().any(|e| profile_identical(e, endpoint))
}
