//! Host stack version

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host stack version using semantic versioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Current host stack version
pub const CURRENT_VERSION: StackVersion = StackVersion {
    major: 2,
    minor: 2,
    patch: 0,
};

impl StackVersion {
    /// Pack as `major << 16 | minor << 8 | patch`
    pub fn packed(&self) -> u32 {
        (u32::from(self.major) << 16) | (u32::from(self.minor) << 8) | u32::from(self.patch)
    }

    /// Inverse of [`StackVersion::packed`]; bits above 23 are ignored
    pub fn from_packed(value: u32) -> Self {
        Self {
            major: (value >> 16) as u8,
            minor: (value >> 8) as u8,
            patch: value as u8,
        }
    }

    /// Check if this version is compatible with another version
    pub fn is_compatible_with(&self, other: &StackVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }
}

impl fmt::Display for StackVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
