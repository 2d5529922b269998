//! CPU-side edge instance data.
//!
//! One [`EdgeInstance`] per edge, preallocated to the batch size and written
//! by direct element assignment so the per-frame hot loop allocates nothing.

use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix3, Rad, Vector2};

use crate::constants;

/// Edge geometry class. Only straight edges carry arrowheads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Straight,
    Curved,
}

/// Arrowhead style resolved by the caller from the scene
#[derive(Debug, Clone, Copy)]
pub struct ArrowData {
    /// Tip position in world space
    pub pos: Vector2<f32>,
    /// Rotation in radians
    pub angle: f32,
    /// Normalized straight-alpha RGB
    pub color: [f32; 3],
    pub opacity: f32,
    /// Scale factor on top of the width-derived size
    pub scale: f32,
}

impl ArrowData {
    fn is_finite(&self) -> bool {
        self.pos.x.is_finite() && self.pos.y.is_finite() && self.angle.is_finite()
    }
}

/// Everything the batcher needs to draw one edge
#[derive(Debug, Clone, Copy)]
pub struct EdgeDrawData {
    pub source: Vector2<f32>,
    pub target: Vector2<f32>,
    pub kind: EdgeKind,
    pub width: f32,
    /// Normalized straight-alpha RGB
    pub color: [f32; 3],
    pub opacity: f32,
    pub source_arrow: Option<ArrowData>,
    pub target_arrow: Option<ArrowData>,
}

/// Interleaved per-instance attributes, GPU layout.
///
/// Must match the instance vertex buffer layout in the edge renderer and
/// the shader's `VertexInput`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct EdgeInstance {
    /// Element index packed as 4 bytes, read as normalized unorm channels
    /// by the picking pass
    pub index: [u8; 4],
    /// `(sx, sy, tx, ty)` endpoints in world space
    pub source_target: [f32; 4],
    pub line_width: f32,
    /// Premultiplied RGBA
    pub line_color: [f32; 4],
    /// 0/1 flags for the source and target arrowheads
    pub draw_arrows: [u32; 2],
    /// Premultiplied RGBA
    pub source_arrow_color: [f32; 4],
    /// Premultiplied RGBA
    pub target_arrow_color: [f32; 4],
    /// Column-major 3x3 affine
    pub source_arrow_transform: [f32; 9],
    /// Column-major 3x3 affine
    pub target_arrow_transform: [f32; 9],
}

/// Pack an element index into 4 bytes, little-endian. The picking shader
/// echoes these as normalized color channels.
pub fn pack_element_index(index: u32) -> [u8; 4] {
    index.to_le_bytes()
}

/// Premultiplied RGBA from straight-alpha RGB and opacity
pub fn premultiply(color: [f32; 3], opacity: f32) -> [f32; 4] {
    [
        color[0] * opacity,
        color[1] * opacity,
        color[2] * opacity,
        opacity,
    ]
}

/// Arrowhead edge length derived from the line width
pub fn arrow_size(line_width: f32, scale: f32) -> f32 {
    (line_width * 2.0).max(constants::batch::MIN_ARROW_BASE) * scale
}

/// `translate(pos) * scale(size) * rotate(angle)`, column-major
fn arrow_transform(pos: Vector2<f32>, angle: f32, size: f32) -> [f32; 9] {
    let m = Matrix3::from_translation(pos)
        * Matrix3::from_nonuniform_scale(size, size)
        * Matrix3::from_angle_z(Rad(angle));
    let flat: &[f32; 9] = m.as_ref();
    *flat
}

/// Preallocated instance array for one batch
pub struct EdgeInstanceData {
    instances: Vec<EdgeInstance>,
    count: usize,
}

impl EdgeInstanceData {
    pub fn new(capacity: usize) -> Self {
        Self {
            instances: vec![EdgeInstance::zeroed(); capacity],
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.instances.len()
    }

    /// Instances written so far; the upload covers exactly these bytes
    pub fn instances(&self) -> &[EdgeInstance] {
        &self.instances[..self.count]
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    /// Write one edge. The caller flushes before calling this when
    /// [`is_full`](Self::is_full).
    pub fn push(&mut self, edge: &EdgeDrawData, element_index: u32) {
        debug_assert!(!self.is_full());

        let inst = &mut self.instances[self.count];
        inst.index = pack_element_index(element_index);
        inst.source_target = [edge.source.x, edge.source.y, edge.target.x, edge.target.y];
        inst.line_width = edge.width;
        inst.line_color = premultiply(edge.color, edge.opacity);
        inst.draw_arrows = [0, 0];

        // Arrowheads only exist on straight edges; a non-finite position or
        // angle from the scene skips that arrow
        if edge.kind == EdgeKind::Straight {
            if let Some(arrow) = edge.source_arrow.filter(|a| a.is_finite()) {
                inst.draw_arrows[0] = 1;
                inst.source_arrow_color = premultiply(arrow.color, arrow.opacity);
                inst.source_arrow_transform = arrow_transform(
                    arrow.pos,
                    arrow.angle,
                    arrow_size(edge.width, arrow.scale),
                );
            }
            if let Some(arrow) = edge.target_arrow.filter(|a| a.is_finite()) {
                inst.draw_arrows[1] = 1;
                inst.target_arrow_color = premultiply(arrow.color, arrow.opacity);
                inst.target_arrow_transform = arrow_transform(
                    arrow.pos,
                    arrow.angle,
                    arrow_size(edge.width, arrow.scale),
                );
            }
        }

        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    fn plain_edge() -> EdgeDrawData {
        EdgeDrawData {
            source: Vector2::new(0.0, 0.0),
            target: Vector2::new(10.0, 0.0),
            kind: EdgeKind::Straight,
            width: 2.0,
            color: [1.0, 0.0, 0.0],
            opacity: 1.0,
            source_arrow: None,
            target_arrow: None,
        }
    }

    fn arrow_at(x: f32, y: f32) -> ArrowData {
        ArrowData {
            pos: Vector2::new(x, y),
            angle: 0.0,
            color: [0.0, 0.0, 1.0],
            opacity: 1.0,
            scale: 1.0,
        }
    }

    #[test]
    fn test_index_packs_little_endian() {
        // 0x01020304 reads back as (4, 3, 2, 1)/255 in the shader
        assert_eq!(pack_element_index(0x0102_0304), [4, 3, 2, 1]);
        assert_eq!(pack_element_index(0), [0, 0, 0, 0]);
        assert_eq!(pack_element_index(u32::MAX), [255, 255, 255, 255]);
    }

    #[test]
    fn test_premultiply() {
        // The S5 arrow: straight-alpha (0.4, 0, 0) at half opacity
        let c = premultiply([0.4, 0.0, 0.0], 0.5);
        assert_eq!(c, [0.2, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_arrow_size_has_floor() {
        assert_eq!(arrow_size(3.0, 1.0), 6.0);
        assert_eq!(arrow_size(0.1, 1.0), 1.0);
        assert_eq!(arrow_size(3.0, 2.0), 12.0);
    }

    #[test]
    fn test_arrow_transform_composition() {
        let m9 = arrow_transform(Vector2::new(10.0, 20.0), std::f32::consts::FRAC_PI_2, 2.0);
        let m = Matrix3::new(
            m9[0], m9[1], m9[2], m9[3], m9[4], m9[5], m9[6], m9[7], m9[8],
        );
        // Unit +y rotated a quarter turn lands on -x, scaled by 2, then
        // translated
        let p = m * Vector3::new(0.0, 1.0, 1.0);
        assert!((p.x - 8.0).abs() < 1e-4);
        assert!((p.y - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_push_writes_instance_fields() {
        let mut data = EdgeInstanceData::new(4);
        let mut edge = plain_edge();
        edge.opacity = 0.5;
        edge.target_arrow = Some(arrow_at(10.0, 0.0));

        data.push(&edge, 0x0102_0304);

        let inst = &data.instances()[0];
        assert_eq!(inst.index, [4, 3, 2, 1]);
        assert_eq!(inst.source_target, [0.0, 0.0, 10.0, 0.0]);
        assert_eq!(inst.line_color, [0.5, 0.0, 0.0, 0.5]);
        assert_eq!(inst.draw_arrows, [0, 1]);
        assert_eq!(inst.target_arrow_color, [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_curved_edges_never_get_arrows() {
        let mut data = EdgeInstanceData::new(4);
        let mut edge = plain_edge();
        edge.kind = EdgeKind::Curved;
        edge.source_arrow = Some(arrow_at(0.0, 0.0));
        edge.target_arrow = Some(arrow_at(10.0, 0.0));

        data.push(&edge, 1);
        assert_eq!(data.instances()[0].draw_arrows, [0, 0]);
    }

    #[test]
    fn test_non_finite_arrow_is_skipped() {
        let mut data = EdgeInstanceData::new(4);
        let mut edge = plain_edge();
        edge.source_arrow = Some(ArrowData {
            pos: Vector2::new(f32::NAN, 0.0),
            ..arrow_at(0.0, 0.0)
        });
        edge.target_arrow = Some(ArrowData {
            angle: f32::INFINITY,
            ..arrow_at(10.0, 0.0)
        });

        data.push(&edge, 1);
        assert_eq!(data.instances()[0].draw_arrows, [0, 0]);
    }

    #[test]
    fn test_capacity_tracking() {
        // Three draws against a two-instance batch: full after the second,
        // so the caller flushes once mid-stream and once at frame end
        let mut data = EdgeInstanceData::new(2);
        let edge = plain_edge();
        let mut flushes = 0;

        for i in 0..3u32 {
            if data.is_full() {
                flushes += 1;
                data.clear();
            }
            data.push(&edge, i);
        }
        if !data.is_empty() {
            flushes += 1;
            data.clear();
        }

        assert_eq!(flushes, 2);
        assert!(data.is_empty());
    }

    #[test]
    fn test_instance_layout_is_stable() {
        // The instance stride is baked into the vertex buffer layout
        assert_eq!(std::mem::size_of::<EdgeInstance>(), 152);
    }
}
