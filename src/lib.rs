//! Ember Graph - GPU-accelerated graph rendering core.
//!
//! Two subsystems do the heavy lifting when drawing large graphs in a small
//! number of draw calls:
//!
//! - the **atlas cache** ([`atlas`]): rasterized node and label images are
//!   packed into a bounded set of fixed-size square textures, looked up by
//!   style key and reclaimed by mark-and-sweep garbage collection
//! - the **instanced batcher** ([`batch`]): per-edge attributes are folded
//!   into preallocated instance buffers and flushed as instanced draws,
//!   with a picking variant that writes packed element indices
//!
//! Scene graph, styling, layout and windowing are external collaborators:
//! callers hand the core opaque elements plus a [`atlas::RenderType`]
//! implementation that extracts style keys, bounding boxes and raster
//! drawing routines.

pub mod atlas;
pub mod batch;
pub mod config;
pub mod constants;
pub mod error;
pub mod raster;

pub use atlas::{
    Atlas, AtlasCollection, AtlasId, AtlasInfo, AtlasManager, BoundingBox, CollectionOptions,
    InvalidateOptions, Location, RenderType, StyleKey, TextureEntry,
};
pub use batch::{
    ArrowData, EdgeDrawData, EdgeKind, EdgeRenderer, FrameContext, FrameStats, RenderTarget,
};
pub use config::RendererConfig;
pub use error::{RenderError, RenderResult};
pub use raster::Surface;

// Re-export wgpu for callers that drive the device directly
pub use wgpu;
