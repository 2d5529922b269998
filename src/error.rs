//! Unified error handling for the rendering core.
//!
//! Every fallible operation in the crate returns [`RenderResult`] so callers
//! can propagate with `?` instead of panicking mid-frame.

use std::error::Error as StdError;
use std::fmt;

/// Main error type for the rendering core
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Attempt to place a texture into a locked atlas. Programmer error:
    /// collections lock an atlas only after routing draws away from it.
    AtlasLocked {
        key: String,
    },

    /// The atlas cannot fit the requested texture. Recovered by the owning
    /// collection, which locks the atlas and allocates a fresh one.
    NotEnoughRoom {
        key: String,
    },

    /// A render type was registered against a collection that does not exist
    UnknownCollection {
        name: String,
    },

    /// A draw referenced a render type that was never registered
    UnknownRenderType {
        name: String,
    },

    /// A bounding box with a non-positive or non-finite extent was submitted
    InvalidBoundingBox {
        w: f32,
        h: f32,
    },
}

impl RenderError {
    /// Whether the owning collection is expected to recover from this error
    /// by allocating a new atlas
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::NotEnoughRoom { .. })
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::AtlasLocked { key } => {
                write!(f, "Cannot draw '{}' into a locked atlas", key)
            }
            RenderError::NotEnoughRoom { key } => {
                write!(f, "Atlas cannot fit texture for key '{}'", key)
            }
            RenderError::UnknownCollection { name } => {
                write!(f, "Atlas collection not registered: {}", name)
            }
            RenderError::UnknownRenderType { name } => {
                write!(f, "Render type not registered: {}", name)
            }
            RenderError::InvalidBoundingBox { w, h } => {
                write!(f, "Invalid bounding box: {}x{}", w, h)
            }
        }
    }
}

impl StdError for RenderError {}

/// Result type alias used throughout the crate
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let full = RenderError::NotEnoughRoom {
            key: "k".to_string(),
        };
        let locked = RenderError::AtlasLocked {
            key: "k".to_string(),
        };
        assert!(full.is_recoverable());
        assert!(!locked.is_recoverable());
    }

    #[test]
    fn test_display_includes_key() {
        let err = RenderError::UnknownCollection {
            name: "labels".to_string(),
        };
        assert!(err.to_string().contains("labels"));
    }
}
