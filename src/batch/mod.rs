//! Instanced batching.
//!
//! Per-element attributes are folded into preallocated instance buffers and
//! flushed in draw calls bounded by the configured batch size. The edge
//! batcher is the canonical instance of the pattern; node-body and label
//! batchers follow the same shape against the atlas manager.

mod edge_data;
mod edge_renderer;

pub use edge_data::{
    arrow_size, pack_element_index, premultiply, ArrowData, EdgeDrawData, EdgeInstance,
    EdgeInstanceData, EdgeKind,
};
pub use edge_renderer::{EdgeRenderer, FrameContext, FrameStats, RenderTarget, PICKING_FORMAT};
