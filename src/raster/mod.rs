//! CPU-side raster surfaces.
//!
//! Atlas pixels live on the CPU in an [`image::RgbaImage`] until they are
//! uploaded; [`Surface`] wraps that image with the save/translate/scale
//! transform stack the element paint callbacks draw through.

mod surface;

pub use surface::Surface;
