//! A single atlas: one square texture partitioned into equal-height rows,
//! filled left to right by a monotonic cursor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RenderError, RenderResult};
use crate::raster::Surface;

use super::BoundingBox;

/// Opaque string identifying raster content; equal keys must map to
/// identical pixels.
pub type StyleKey = String;

/// Process-unique atlas identifier. Collections and per-frame batches refer
/// to atlases by id, never by pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtlasId(u64);

impl AtlasId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn next_for_test() -> Self {
        Self::next()
    }
}

/// Pixel region within an atlas texture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Location {
    #[cfg(test)]
    fn overlaps(&self, other: &Location) -> bool {
        self.w > 0
            && other.w > 0
            && self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
}

/// Placement of one style key. `loc2.w == 0` means the entry fits in a
/// single row; otherwise `loc1` is the tail of one row and `loc2` the head
/// of the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureEntry {
    pub loc1: Location,
    pub loc2: Location,
}

impl TextureEntry {
    pub fn is_wrapped(&self) -> bool {
        self.loc2.w > 0
    }

    pub fn total_width(&self) -> u32 {
        self.loc1.w + self.loc2.w
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    x: u32,
    row: u32,
}

/// Debug statistics for one atlas
#[derive(Debug, Clone)]
pub struct AtlasDebugInfo {
    pub id: AtlasId,
    pub key_count: usize,
    pub locked: bool,
    pub utilization: f32,
}

/// One fixed-size square texture and its companion CPU canvas.
///
/// Placement is append-only: the cursor advances monotonically and space is
/// reclaimed only when the owning collection repacks during GC.
pub struct Atlas {
    id: AtlasId,
    tex_size: u32,
    tex_rows: u32,
    row_height: u32,

    cursor: Cursor,
    locked: bool,
    entries: HashMap<StyleKey, TextureEntry>,

    canvas: Option<Surface>,
    dirty: bool,

    texture: Option<wgpu::Texture>,
    view: Option<wgpu::TextureView>,
    sampler: Option<wgpu::Sampler>,
}

impl Atlas {
    pub fn new(tex_size: u32, tex_rows: u32) -> Self {
        let id = AtlasId::next();
        log::debug!(
            "[Atlas::new] Created atlas {:?}: {}x{} pixels, {} rows",
            id,
            tex_size,
            tex_size,
            tex_rows
        );
        Self {
            id,
            tex_size,
            tex_rows,
            row_height: tex_size / tex_rows,
            cursor: Cursor { x: 0, row: 0 },
            locked: false,
            entries: HashMap::new(),
            canvas: Some(Surface::new(tex_size, tex_size)),
            dirty: false,
            texture: None,
            view: None,
            sampler: None,
        }
    }

    pub fn id(&self) -> AtlasId {
        self.id
    }

    pub fn tex_size(&self) -> u32 {
        self.tex_size
    }

    pub fn row_height(&self) -> u32 {
        self.row_height
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Cursor position as `(x, row)`
    pub fn cursor(&self) -> (u32, u32) {
        (self.cursor.x, self.cursor.row)
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StyleKey> {
        self.entries.keys()
    }

    pub fn canvas(&self) -> Option<&Surface> {
        self.canvas.as_ref()
    }

    /// Scale factor and resulting texture dimensions for a bounding box:
    /// fit height to the row, then refit to the atlas width if that
    /// overflows.
    pub fn get_scale(&self, bb: &BoundingBox) -> (f32, u32, u32) {
        let mut scale = self.row_height as f32 / bb.h;
        if bb.w * scale > self.tex_size as f32 {
            scale = self.tex_size as f32 / bb.w;
        }
        let tex_w = ((bb.w * scale).round() as u32).clamp(1, self.tex_size);
        let tex_h = ((bb.h * scale).round() as u32).clamp(1, self.row_height);
        (scale, tex_w, tex_h)
    }

    /// Whether a texture for `bb` can still be placed here
    pub fn can_fit(&self, bb: &BoundingBox) -> bool {
        if self.locked || self.cursor.row >= self.tex_rows {
            return false;
        }
        let (_, tex_w, _) = self.get_scale(bb);
        if self.cursor.x + tex_w <= self.tex_size {
            return true;
        }
        // A wrap consumes the head of the next row
        self.cursor.row < self.tex_rows - 1
    }

    /// Whether a region of exactly `tex_w` pixels can still be placed.
    /// Pixel-dimension twin of [`can_fit`](Self::can_fit), used when
    /// repacking existing entries at scale 1.
    pub(super) fn can_fit_pixels(&self, tex_w: u32) -> bool {
        if self.locked || self.cursor.row >= self.tex_rows {
            return false;
        }
        if self.cursor.x + tex_w <= self.tex_size {
            return true;
        }
        self.cursor.row < self.tex_rows - 1
    }

    /// Rasterize `paint` into the next free region.
    ///
    /// The callback is invoked exactly once, on a surface whose transform is
    /// set up so it can draw in `bb` coordinates. The caller guarantees
    /// `key` is not already present.
    pub fn draw<F>(
        &mut self,
        key: &str,
        bb: &BoundingBox,
        scratch: &mut Surface,
        paint: F,
    ) -> RenderResult<TextureEntry>
    where
        F: FnOnce(&mut Surface, &BoundingBox),
    {
        if !(bb.w.is_finite() && bb.h.is_finite() && bb.w > 0.0 && bb.h > 0.0) {
            return Err(RenderError::InvalidBoundingBox { w: bb.w, h: bb.h });
        }
        let (scale, tex_w, tex_h) = self.get_scale(bb);
        self.place(key, tex_w, tex_h, scratch, |surface| {
            surface.scale(scale, scale);
            surface.translate(-bb.x1, -bb.y1);
            paint(surface, bb);
        })
    }

    /// Place a region of exactly `tex_w` x `tex_h` pixels, painting through
    /// `painter` with the surface translated to the region origin. Used by
    /// [`draw`](Self::draw) and by collection GC, which must preserve entry
    /// dimensions exactly.
    pub(super) fn place<P>(
        &mut self,
        key: &str,
        tex_w: u32,
        tex_h: u32,
        scratch: &mut Surface,
        painter: P,
    ) -> RenderResult<TextureEntry>
    where
        P: FnOnce(&mut Surface),
    {
        if self.locked {
            return Err(RenderError::AtlasLocked {
                key: key.to_string(),
            });
        }
        debug_assert!(!self.entries.contains_key(key));

        let canvas = self
            .canvas
            .as_mut()
            .ok_or_else(|| RenderError::AtlasLocked {
                key: key.to_string(),
            })?;

        if self.cursor.row >= self.tex_rows {
            return Err(RenderError::NotEnoughRoom {
                key: key.to_string(),
            });
        }

        // Cursor parked at the exact end of a row: move on before placing
        if self.cursor.x == self.tex_size {
            if self.cursor.row + 1 >= self.tex_rows {
                return Err(RenderError::NotEnoughRoom {
                    key: key.to_string(),
                });
            }
            self.cursor.x = 0;
            self.cursor.row += 1;
        }

        let entry = if self.cursor.x + tex_w <= self.tex_size {
            let loc1 = Location {
                x: self.cursor.x,
                y: self.cursor.row * self.row_height,
                w: tex_w,
                h: tex_h,
            };

            canvas.save();
            canvas.translate(loc1.x as f32, loc1.y as f32);
            painter(canvas);
            canvas.restore();

            self.cursor.x += tex_w;
            if self.cursor.x == self.tex_size {
                self.cursor.x = 0;
                self.cursor.row += 1;
            }

            TextureEntry {
                loc1,
                loc2: Location::default(),
            }
        } else {
            if self.cursor.row + 1 >= self.tex_rows {
                return Err(RenderError::NotEnoughRoom {
                    key: key.to_string(),
                });
            }

            // Wrap: paint once into the scratch at origin, then split the
            // pixels across the tail of this row and the head of the next
            let first_w = self.tex_size - self.cursor.x;
            let second_w = tex_w - first_w;
            let y1 = self.cursor.row * self.row_height;
            let y2 = (self.cursor.row + 1) * self.row_height;

            scratch.clear();
            scratch.save();
            painter(scratch);
            scratch.restore();

            canvas.draw_image(
                scratch.image(),
                0,
                0,
                first_w,
                tex_h,
                self.cursor.x as f32,
                y1 as f32,
                first_w as f32,
                tex_h as f32,
            );
            canvas.draw_image(
                scratch.image(),
                first_w,
                0,
                second_w,
                tex_h,
                0.0,
                y2 as f32,
                second_w as f32,
                tex_h as f32,
            );

            self.cursor = Cursor {
                x: second_w,
                row: self.cursor.row + 1,
            };

            TextureEntry {
                loc1: Location {
                    x: self.tex_size - first_w,
                    y: y1,
                    w: first_w,
                    h: tex_h,
                },
                loc2: Location {
                    x: 0,
                    y: y2,
                    w: second_w,
                    h: tex_h,
                },
            }
        };

        self.entries.insert(key.to_string(), entry);
        self.dirty = true;
        Ok(entry)
    }

    /// Placement record for a key, if present
    pub fn get_offsets(&self, key: &str) -> Option<&TextureEntry> {
        self.entries.get(key)
    }

    /// Permanently stop accepting placements
    pub fn lock(&mut self) {
        if !self.locked {
            log::debug!(
                "[Atlas::lock] Atlas {:?} locked with {} keys",
                self.id,
                self.entries.len()
            );
        }
        self.locked = true;
    }

    /// Lazily create the GPU texture and upload the CPU canvas if it holds
    /// uncommitted pixels. When the atlas is locked and the config allows,
    /// the CPU canvas is released afterwards to reclaim memory.
    pub fn buffer_if_needed(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        release_locked_canvases: bool,
    ) {
        if self.texture.is_none() {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Atlas Texture"),
                size: wgpu::Extent3d {
                    width: self.tex_size,
                    height: self.tex_size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            self.view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
            self.sampler = Some(device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Atlas Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            }));
            self.texture = Some(texture);
            log::debug!("[Atlas::buffer_if_needed] Allocated GPU texture for {:?}", self.id);
        }

        if self.dirty {
            if let (Some(texture), Some(canvas)) = (&self.texture, &self.canvas) {
                queue.write_texture(
                    wgpu::ImageCopyTexture {
                        texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    canvas.image().as_raw(),
                    wgpu::ImageDataLayout {
                        offset: 0,
                        bytes_per_row: Some(4 * self.tex_size),
                        rows_per_image: Some(self.tex_size),
                    },
                    wgpu::Extent3d {
                        width: self.tex_size,
                        height: self.tex_size,
                        depth_or_array_layers: 1,
                    },
                );
            }
            self.dirty = false;
        }

        if self.locked && release_locked_canvases && self.canvas.is_some() {
            log::debug!(
                "[Atlas::buffer_if_needed] Released CPU canvas for locked atlas {:?}",
                self.id
            );
            self.canvas = None;
        }
    }

    /// Drop GPU and CPU resources. The atlas accepts no further work.
    pub fn dispose(&mut self) {
        log::debug!("[Atlas::dispose] Disposing atlas {:?}", self.id);
        self.texture = None;
        self.view = None;
        self.sampler = None;
        self.canvas = None;
        self.locked = true;
    }

    pub fn texture_view(&self) -> Option<&wgpu::TextureView> {
        self.view.as_ref()
    }

    pub fn sampler(&self) -> Option<&wgpu::Sampler> {
        self.sampler.as_ref()
    }

    /// Percentage of the pixel area covered by live entries
    pub fn utilization(&self) -> f32 {
        let used: u64 = self
            .entries
            .values()
            .map(|e| (e.loc1.w * e.loc1.h + e.loc2.w * e.loc2.h) as u64)
            .sum();
        let total = self.tex_size as u64 * self.tex_size as u64;
        used as f32 / total as f32 * 100.0
    }

    pub fn debug_info(&self) -> AtlasDebugInfo {
        AtlasDebugInfo {
            id: self.id,
            key_count: self.entries.len(),
            locked: self.locked,
            utilization: self.utilization(),
        }
    }

    /// Save the CPU canvas to an image file for debugging
    pub fn save_debug(&self, path: &str) -> anyhow::Result<()> {
        let canvas = self
            .canvas
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Atlas {:?} has no CPU canvas", self.id))?;
        canvas.image().save(path)?;
        Ok(())
    }

    /// Verify that no two entries overlap. Test support.
    #[cfg(test)]
    pub(crate) fn entries_disjoint(&self) -> bool {
        let locs: Vec<Location> = self
            .entries
            .values()
            .flat_map(|e| [e.loc1, e.loc2])
            .filter(|l| l.w > 0)
            .collect();
        for (i, a) in locs.iter().enumerate() {
            for b in &locs[i + 1..] {
                if a.overlaps(b) {
                    return false;
                }
            }
        }
        true
    }

    /// Verify that every entry lies within the texture bounds. Test support.
    #[cfg(test)]
    pub(crate) fn entries_in_bounds(&self) -> bool {
        self.entries
            .values()
            .flat_map(|e| [e.loc1, e.loc2])
            .filter(|l| l.w > 0)
            .all(|l| l.x + l.w <= self.tex_size && l.y + l.h <= self.tex_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, w, h)
    }

    fn scratch_for(atlas: &Atlas) -> Surface {
        Surface::scratch(atlas.tex_size(), atlas.row_height())
    }

    fn no_paint(_: &mut Surface, _: &BoundingBox) {}

    #[test]
    fn test_simple_placement_advances_cursor() {
        // tex_size=100, tex_rows=2 => row_height=50
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        let entry = atlas
            .draw("a", &bb(80.0, 50.0), &mut scratch, no_paint)
            .unwrap();
        assert_eq!(entry.loc1, Location { x: 0, y: 0, w: 80, h: 50 });
        assert!(!entry.is_wrapped());
        assert_eq!(atlas.cursor(), (80, 0));
    }

    #[test]
    fn test_wrap_splits_across_rows() {
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        atlas
            .draw("a", &bb(80.0, 50.0), &mut scratch, no_paint)
            .unwrap();
        let entry = atlas
            .draw("b", &bb(40.0, 50.0), &mut scratch, no_paint)
            .unwrap();

        assert!(entry.is_wrapped());
        assert_eq!(entry.loc1, Location { x: 80, y: 0, w: 20, h: 50 });
        assert_eq!(entry.loc2, Location { x: 0, y: 50, w: 20, h: 50 });
        assert_eq!(entry.total_width(), 40);
        assert_eq!(atlas.cursor(), (20, 1));
    }

    #[test]
    fn test_wrap_requires_a_next_row() {
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        atlas
            .draw("a", &bb(80.0, 50.0), &mut scratch, no_paint)
            .unwrap();
        atlas
            .draw("b", &bb(40.0, 50.0), &mut scratch, no_paint)
            .unwrap();

        // Cursor is on the last row; a full-width texture would need to wrap
        assert!(!atlas.can_fit(&bb(100.0, 50.0)));
        let err = atlas
            .draw("c", &bb(100.0, 50.0), &mut scratch, no_paint)
            .unwrap_err();
        assert!(matches!(err, RenderError::NotEnoughRoom { .. }));
    }

    #[test]
    fn test_exact_row_fill_advances_to_next_row() {
        let mut atlas = Atlas::new(100, 4);
        let mut scratch = scratch_for(&atlas);

        atlas
            .draw("a", &bb(100.0, 25.0), &mut scratch, no_paint)
            .unwrap();
        assert_eq!(atlas.cursor(), (0, 1));

        let entry = atlas
            .draw("b", &bb(10.0, 25.0), &mut scratch, no_paint)
            .unwrap();
        assert_eq!(entry.loc1, Location { x: 0, y: 25, w: 10, h: 25 });
    }

    #[test]
    fn test_scale_fits_height_then_width() {
        let atlas = Atlas::new(100, 2);

        // Height-fit: 25x25 scaled to 50x50
        let (scale, w, h) = atlas.get_scale(&bb(25.0, 25.0));
        assert_eq!(scale, 2.0);
        assert_eq!((w, h), (50, 50));

        // Width-refit: 400x50 would become 400 wide at height-fit scale
        let (scale, w, h) = atlas.get_scale(&bb(400.0, 50.0));
        assert_eq!(scale, 0.25);
        assert_eq!((w, h), (100, 13));

        // Chosen scale is the min only when height-fit overflows width
        let (scale, _, _) = atlas.get_scale(&bb(10.0, 100.0));
        assert_eq!(scale, 0.5);
    }

    #[test]
    fn test_locked_atlas_rejects_draws() {
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        atlas.lock();
        assert!(!atlas.can_fit(&bb(10.0, 10.0)));
        let err = atlas
            .draw("a", &bb(10.0, 10.0), &mut scratch, no_paint)
            .unwrap_err();
        assert!(matches!(err, RenderError::AtlasLocked { .. }));
    }

    #[test]
    fn test_invalid_bounding_box_rejected() {
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        let err = atlas
            .draw("a", &bb(0.0, 10.0), &mut scratch, no_paint)
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidBoundingBox { .. }));
    }

    #[test]
    fn test_entries_stay_disjoint_and_in_bounds() {
        let mut atlas = Atlas::new(100, 4);
        let mut scratch = scratch_for(&atlas);

        let sizes = [
            (30.0, 25.0),
            (45.0, 25.0),
            (40.0, 25.0),
            (60.0, 25.0),
            (25.0, 25.0),
            (80.0, 25.0),
        ];
        for (i, (w, h)) in sizes.iter().enumerate() {
            let key = format!("k{}", i);
            if atlas.can_fit(&bb(*w, *h)) {
                atlas.draw(&key, &bb(*w, *h), &mut scratch, no_paint).unwrap();
            }
        }

        assert!(atlas.entries_disjoint());
        assert!(atlas.entries_in_bounds());
    }

    #[test]
    fn test_wrapped_entry_offsets_are_consistent() {
        let mut atlas = Atlas::new(100, 4);
        let mut scratch = scratch_for(&atlas);

        atlas
            .draw("a", &bb(70.0, 25.0), &mut scratch, no_paint)
            .unwrap();
        atlas
            .draw("b", &bb(50.0, 25.0), &mut scratch, no_paint)
            .unwrap();

        let entry = atlas.get_offsets("b").copied().unwrap();
        assert!(entry.is_wrapped());
        assert_eq!(entry.loc1.x + entry.loc1.w, 100);
        assert_eq!(entry.loc2.x, 0);
        assert_eq!(entry.loc2.y, entry.loc1.y + atlas.row_height());
        assert_eq!(entry.total_width(), 50);
    }

    #[test]
    fn test_paint_lands_in_destination_region() {
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        atlas
            .draw("a", &bb(30.0, 50.0), &mut scratch, no_paint)
            .unwrap();
        atlas
            .draw("b", &bb(20.0, 50.0), &mut scratch, |surface, bb| {
                surface.fill_rect(bb.x1, bb.y1, bb.w, bb.h, [10, 20, 30, 255]);
            })
            .unwrap();

        let canvas = atlas.canvas().unwrap();
        // Entry b occupies (30, 0)..(50, 50)
        assert_eq!(canvas.image().get_pixel(30, 0).0, [10, 20, 30, 255]);
        assert_eq!(canvas.image().get_pixel(49, 49).0, [10, 20, 30, 255]);
        assert_eq!(canvas.image().get_pixel(50, 0).0, [0, 0, 0, 0]);
        // Entry a's region was untouched
        assert_eq!(canvas.image().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_wrapped_paint_splits_pixels() {
        let mut atlas = Atlas::new(100, 2);
        let mut scratch = scratch_for(&atlas);

        atlas
            .draw("a", &bb(80.0, 50.0), &mut scratch, no_paint)
            .unwrap();
        atlas
            .draw("b", &bb(40.0, 50.0), &mut scratch, |surface, bb| {
                surface.fill_rect(bb.x1, bb.y1, bb.w, bb.h, [200, 100, 50, 255]);
            })
            .unwrap();

        let canvas = atlas.canvas().unwrap();
        // First 20 columns at the tail of row 0
        assert_eq!(canvas.image().get_pixel(80, 0).0, [200, 100, 50, 255]);
        assert_eq!(canvas.image().get_pixel(99, 49).0, [200, 100, 50, 255]);
        // Remaining 20 columns at the head of row 1
        assert_eq!(canvas.image().get_pixel(0, 50).0, [200, 100, 50, 255]);
        assert_eq!(canvas.image().get_pixel(19, 99).0, [200, 100, 50, 255]);
        assert_eq!(canvas.image().get_pixel(20, 50).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_dispose_releases_resources() {
        let mut atlas = Atlas::new(100, 2);
        atlas.dispose();
        assert!(atlas.is_locked());
        assert!(atlas.canvas().is_none());
        assert!(atlas.texture_view().is_none());
    }
}
