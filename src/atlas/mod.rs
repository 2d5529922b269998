//! Texture atlas cache.
//!
//! Rasterized node and label images are packed into a bounded set of
//! fixed-size square textures so that a frame can be drawn with a handful of
//! texture binds. Three layers:
//!
//! - [`Atlas`]: one square texture, cursor-based row-wrap placement
//! - [`AtlasCollection`]: an ordered list of atlases for one render type
//!   family, with mark-and-sweep garbage collection
//! - [`AtlasManager`]: named collections, style-key invalidation, and
//!   per-frame batch assembly

mod atlas;
mod collection;
mod manager;

pub use atlas::{Atlas, AtlasDebugInfo, AtlasId, Location, StyleKey, TextureEntry};
pub use collection::{AtlasCollection, CollectionDebugInfo};
pub use manager::{
    AtlasInfo, AtlasManager, CollectionOptions, InvalidateOptions, ManagerDebugInfo, RenderType,
};

/// Element bounding box in model space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, w: f32, h: f32) -> Self {
        Self { x1, y1, w, h }
    }

    /// Grow the box by `pad` pixels on every side
    pub fn padded(&self, pad: f32) -> Self {
        Self {
            x1: self.x1 - pad,
            y1: self.y1 - pad,
            w: self.w + 2.0 * pad,
            h: self.h + 2.0 * pad,
        }
    }
}
