//! Ordered list of atlases for one render-type family.
//!
//! Placement is routed to the newest atlas; older atlases are locked.
//! Space is reclaimed by mark-and-sweep: callers tombstone style keys and
//! [`AtlasCollection::gc`] repacks the survivors into fresh atlases.

use std::collections::{HashMap, HashSet};

use crate::error::RenderResult;
use crate::raster::Surface;

use super::atlas::{Atlas, AtlasDebugInfo, AtlasId, StyleKey, TextureEntry};
use super::BoundingBox;

/// Debug statistics for a collection
#[derive(Debug, Clone)]
pub struct CollectionDebugInfo {
    pub atlas_count: usize,
    pub key_count: usize,
    pub marked_count: usize,
    pub atlases: Vec<AtlasDebugInfo>,
}

/// Ordered atlases plus the key routing table for one collection.
///
/// Invariants: every known key lives in exactly one atlas; only the last
/// atlas accepts placements.
pub struct AtlasCollection {
    tex_size: u32,
    tex_rows: u32,
    atlases: Vec<Atlas>,
    key_to_atlas: HashMap<StyleKey, AtlasId>,
    marked_keys: HashSet<StyleKey>,
    scratch: Option<Surface>,
}

impl AtlasCollection {
    pub fn new(tex_size: u32, tex_rows: u32) -> Self {
        Self {
            tex_size,
            tex_rows,
            atlases: Vec::new(),
            key_to_atlas: HashMap::new(),
            marked_keys: HashSet::new(),
            scratch: None,
        }
    }

    pub fn row_height(&self) -> u32 {
        self.tex_size / self.tex_rows
    }

    pub fn atlases(&self) -> &[Atlas] {
        &self.atlases
    }

    pub fn atlas(&self, id: AtlasId) -> Option<&Atlas> {
        self.atlases.iter().find(|a| a.id() == id)
    }

    pub fn atlas_mut(&mut self, id: AtlasId) -> Option<&mut Atlas> {
        self.atlases.iter_mut().find(|a| a.id() == id)
    }

    pub fn atlas_id_for_key(&self, key: &str) -> Option<AtlasId> {
        self.key_to_atlas.get(key).copied()
    }

    pub fn key_count(&self) -> usize {
        self.key_to_atlas.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.key_to_atlas.contains_key(key)
    }

    /// Index of the atlas that can accept a new placement for `bb`,
    /// locking the current tail and appending a fresh atlas if needed.
    fn ensure_active_atlas(&mut self, bb: &BoundingBox) -> usize {
        let fits = self.atlases.last().map_or(false, |a| a.can_fit(bb));
        if !fits {
            if let Some(last) = self.atlases.last_mut() {
                last.lock();
            }
            self.atlases.push(Atlas::new(self.tex_size, self.tex_rows));
            log::debug!(
                "[AtlasCollection::ensure_active_atlas] Allocated atlas #{}",
                self.atlases.len()
            );
        }
        self.atlases.len() - 1
    }

    /// Return the owning atlas for `key`, rasterizing through `paint` on a
    /// cache miss.
    pub fn draw<F>(
        &mut self,
        key: &str,
        bb: &BoundingBox,
        paint: F,
    ) -> RenderResult<(AtlasId, TextureEntry)>
    where
        F: FnOnce(&mut Surface, &BoundingBox),
    {
        if let Some(&id) = self.key_to_atlas.get(key) {
            if let Some(entry) = self.atlas(id).and_then(|a| a.get_offsets(key)) {
                return Ok((id, *entry));
            }
            // Stale mapping; re-draw below
            self.key_to_atlas.remove(key);
        }

        let idx = self.ensure_active_atlas(bb);
        let row_height = self.tex_size / self.tex_rows;
        let Self {
            atlases,
            scratch,
            key_to_atlas,
            tex_size,
            ..
        } = self;
        let scratch = scratch.get_or_insert_with(|| Surface::scratch(*tex_size, row_height));

        let atlas = &mut atlases[idx];
        let entry = atlas.draw(key, bb, scratch, paint)?;
        key_to_atlas.insert(key.to_string(), atlas.id());
        Ok((atlas.id(), entry))
    }

    /// Tombstone a key for the next [`gc`](Self::gc) pass. No eager work.
    pub fn mark_key_for_gc(&mut self, key: &str) {
        if self.key_to_atlas.contains_key(key) {
            self.marked_keys.insert(key.to_string());
        } else {
            log::trace!(
                "[AtlasCollection::mark_key_for_gc] Ignoring unknown key '{}'",
                key
            );
        }
    }

    pub fn marked_count(&self) -> usize {
        self.marked_keys.len()
    }

    /// Sweep tombstoned keys, repacking the survivors of affected atlases
    /// into fresh atlases so their space is recovered. Atlases with no
    /// tombstoned keys are retained untouched.
    pub fn gc(&mut self) -> RenderResult<()> {
        if self.marked_keys.is_empty() {
            return Ok(());
        }

        let marked = std::mem::take(&mut self.marked_keys);
        let old = std::mem::take(&mut self.atlases);

        // Partition: sources hold at least one tombstoned key and get
        // repacked; everything else is retained as-is. Retained order is
        // preserved, so the only unlocked retained atlas stays last.
        let mut retained: Vec<Atlas> = Vec::new();
        let mut sources: Vec<Atlas> = Vec::new();
        for atlas in old {
            let has_collected = atlas.keys().any(|k| marked.contains(k));
            if has_collected && atlas.canvas().is_some() {
                sources.push(atlas);
            } else if has_collected {
                // CPU pixels were released; nothing to repack from. Drop the
                // tombstoned keys from the routing table but leave the atlas
                // in place until it is disposed wholesale.
                log::warn!(
                    "[AtlasCollection::gc] Atlas {:?} has tombstoned keys but no CPU canvas; space not reclaimed",
                    atlas.id()
                );
                for key in atlas.keys().filter(|k| marked.contains(*k)) {
                    self.key_to_atlas.remove(key);
                }
                retained.push(atlas);
            } else {
                retained.push(atlas);
            }
        }

        if sources.is_empty() {
            self.atlases = retained;
            return Ok(());
        }

        for key in &marked {
            self.key_to_atlas.remove(key);
        }

        let tex_size = self.tex_size;
        let row_height = self.tex_size / self.tex_rows;
        let scratch = self
            .scratch
            .get_or_insert_with(|| Surface::scratch(tex_size, row_height));
        let mut stitch = Surface::scratch(tex_size, row_height);

        let mut new_atlases = retained;
        let mut repacked = 0usize;
        let mut collected = 0usize;

        for mut source in sources {
            let kept: Vec<(StyleKey, TextureEntry)> = source
                .keys()
                .filter(|k| !marked.contains(*k))
                .map(|k| (k.clone(), source.get_offsets(k).copied().unwrap_or_default()))
                .collect();
            collected += source.key_count() - kept.len();

            if let Some(src_canvas) = source.canvas() {
                for (key, entry) in &kept {
                    let w = entry.total_width();
                    let h = entry.loc1.h;

                    let fits = new_atlases.last().map_or(false, |a| a.can_fit_pixels(w));
                    if !fits {
                        if let Some(last) = new_atlases.last_mut() {
                            last.lock();
                        }
                        new_atlases.push(Atlas::new(self.tex_size, self.tex_rows));
                    }
                    let dest_idx = new_atlases.len() - 1;
                    let dest = &mut new_atlases[dest_idx];

                    let src = src_canvas.image();
                    if entry.is_wrapped() {
                        // Stitch the two halves side by side, then place the
                        // rejoined strip through the standard path
                        stitch.clear();
                        stitch.draw_image(
                            src,
                            entry.loc1.x,
                            entry.loc1.y,
                            entry.loc1.w,
                            h,
                            0.0,
                            0.0,
                            entry.loc1.w as f32,
                            h as f32,
                        );
                        stitch.draw_image(
                            src,
                            entry.loc2.x,
                            entry.loc2.y,
                            entry.loc2.w,
                            h,
                            entry.loc1.w as f32,
                            0.0,
                            entry.loc2.w as f32,
                            h as f32,
                        );
                        let stitch_img = stitch.image();
                        dest.place(key, w, h, scratch, |surface| {
                            surface.draw_image(
                                stitch_img, 0, 0, w, h, 0.0, 0.0, w as f32, h as f32,
                            );
                        })?;
                    } else {
                        dest.place(key, w, h, scratch, |surface| {
                            surface.draw_image(
                                src,
                                entry.loc1.x,
                                entry.loc1.y,
                                w,
                                h,
                                0.0,
                                0.0,
                                w as f32,
                                h as f32,
                            );
                        })?;
                    }
                    self.key_to_atlas.insert(key.clone(), dest.id());
                    repacked += 1;
                }
            }

            source.dispose();
        }

        self.atlases = new_atlases;
        log::debug!(
            "[AtlasCollection::gc] Collected {} keys, repacked {}, {} atlases remain",
            collected,
            repacked,
            self.atlases.len()
        );
        Ok(())
    }

    pub fn debug_info(&self) -> CollectionDebugInfo {
        CollectionDebugInfo {
            atlas_count: self.atlases.len(),
            key_count: self.key_to_atlas.len(),
            marked_count: self.marked_keys.len(),
            atlases: self.atlases.iter().map(|a| a.debug_info()).collect(),
        }
    }

    /// Upload every dirty atlas and lazily create missing GPU textures
    pub fn buffer_all(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        release_locked_canvases: bool,
    ) {
        for atlas in &mut self.atlases {
            atlas.buffer_if_needed(device, queue, release_locked_canvases);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::Location;
    use image::RgbaImage;

    fn bb(w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, w, h)
    }

    fn solid(color: [u8; 4]) -> impl Fn(&mut Surface, &BoundingBox) {
        move |surface, bb| surface.fill_rect(bb.x1, bb.y1, bb.w, bb.h, color)
    }

    /// Copy an entry's pixels out of its atlas canvas, unwrapping into the
    /// logical row-major strip so pre/post-GC content can be compared.
    fn entry_pixels(collection: &AtlasCollection, key: &str) -> Vec<u8> {
        let id = collection.atlas_id_for_key(key).unwrap();
        let atlas = collection.atlas(id).unwrap();
        let entry = *atlas.get_offsets(key).unwrap();
        let img: &RgbaImage = atlas.canvas().unwrap().image();

        let mut out = Vec::new();
        for y in 0..entry.loc1.h {
            for loc in [entry.loc1, entry.loc2] {
                if loc.w == 0 {
                    continue;
                }
                for x in loc.x..loc.x + loc.w {
                    out.extend_from_slice(&img.get_pixel(x, loc.y + y).0);
                }
            }
        }
        out
    }

    #[test]
    fn test_overflow_locks_and_allocates() {
        // S2: after an 80-wide and a wrapped 40-wide entry the cursor sits
        // on the last row; a full-width texture forces a second atlas.
        let mut collection = AtlasCollection::new(100, 2);
        collection.draw("a", &bb(80.0, 50.0), solid([255, 0, 0, 255])).unwrap();
        collection.draw("b", &bb(40.0, 50.0), solid([0, 255, 0, 255])).unwrap();
        assert_eq!(collection.atlases().len(), 1);

        let (id_c, _) = collection
            .draw("c", &bb(100.0, 50.0), solid([0, 0, 255, 255]))
            .unwrap();

        assert_eq!(collection.atlases().len(), 2);
        assert!(collection.atlases()[0].is_locked());
        assert!(!collection.atlases()[1].is_locked());
        assert_eq!(collection.atlases()[1].id(), id_c);
    }

    #[test]
    fn test_draw_is_idempotent_per_key() {
        let mut collection = AtlasCollection::new(100, 2);
        let (id1, e1) = collection.draw("a", &bb(30.0, 50.0), solid([9, 9, 9, 255])).unwrap();
        let (id2, e2) = collection.draw("a", &bb(30.0, 50.0), solid([1, 1, 1, 255])).unwrap();

        assert_eq!(id1, id2);
        assert_eq!(e1, e2);
        assert_eq!(collection.key_count(), 1);
        assert_eq!(collection.atlases()[0].key_count(), 1);
    }

    #[test]
    fn test_gc_compacts_and_preserves_pixels() {
        // S3: mark the 80-wide entry, keep the wrapped one; after GC the
        // survivor is repacked at the origin with identical pixels.
        let mut collection = AtlasCollection::new(100, 2);
        collection.draw("a", &bb(80.0, 50.0), solid([255, 0, 0, 255])).unwrap();
        // Two-tone fill so a half-swap or reordering during repack is caught
        collection
            .draw("b", &bb(40.0, 50.0), |surface, bb| {
                surface.fill_rect(bb.x1, bb.y1, bb.w / 2.0, bb.h, [0, 200, 40, 255]);
                surface.fill_rect(bb.x1 + bb.w / 2.0, bb.y1, bb.w / 2.0, bb.h, [40, 0, 200, 255]);
            })
            .unwrap();

        let before = entry_pixels(&collection, "b");

        collection.mark_key_for_gc("a");
        collection.gc().unwrap();

        assert!(!collection.contains_key("a"));
        assert!(collection.contains_key("b"));
        assert_eq!(collection.marked_count(), 0);
        assert_eq!(collection.atlases().len(), 1);

        let id = collection.atlas_id_for_key("b").unwrap();
        let atlas = collection.atlas(id).unwrap();
        let entry = *atlas.get_offsets("b").unwrap();
        // Compacted to the head of the atlas, wrapped shape preserved as a
        // 40-wide strip starting at the origin
        assert_eq!(entry.loc1, Location { x: 0, y: 0, w: 40, h: 50 });
        assert!(!entry.is_wrapped());

        let after = entry_pixels(&collection, "b");
        assert_eq!(before, after);
    }

    #[test]
    fn test_gc_key_set_is_previous_minus_marked() {
        let mut collection = AtlasCollection::new(100, 4);
        for (i, w) in [30.0, 40.0, 50.0, 60.0].iter().enumerate() {
            let key = format!("k{}", i);
            collection.draw(&key, &bb(*w, 25.0), solid([i as u8, 0, 0, 255])).unwrap();
        }

        collection.mark_key_for_gc("k1");
        collection.mark_key_for_gc("k3");
        collection.gc().unwrap();

        assert!(collection.contains_key("k0"));
        assert!(!collection.contains_key("k1"));
        assert!(collection.contains_key("k2"));
        assert!(!collection.contains_key("k3"));
        assert_eq!(collection.key_count(), 2);
        assert_eq!(collection.marked_count(), 0);
    }

    #[test]
    fn test_gc_retains_unaffected_atlases() {
        let mut collection = AtlasCollection::new(100, 2);
        // Fill the first atlas completely so the second draw opens a new one
        collection.draw("a", &bb(100.0, 50.0), solid([1, 0, 0, 255])).unwrap();
        collection.draw("b", &bb(100.0, 50.0), solid([2, 0, 0, 255])).unwrap();
        collection.draw("c", &bb(100.0, 50.0), solid([3, 0, 0, 255])).unwrap();
        assert_eq!(collection.atlases().len(), 2);

        let first_id = collection.atlas_id_for_key("a").unwrap();

        // Only the second atlas is affected
        collection.mark_key_for_gc("c");
        collection.gc().unwrap();

        assert_eq!(collection.atlas_id_for_key("a"), Some(first_id));
        assert_eq!(collection.atlas_id_for_key("b"), Some(first_id));
        assert!(!collection.contains_key("c"));
    }

    #[test]
    fn test_gc_without_marks_is_a_no_op() {
        let mut collection = AtlasCollection::new(100, 2);
        collection.draw("a", &bb(30.0, 50.0), solid([1, 1, 1, 255])).unwrap();
        let id = collection.atlas_id_for_key("a").unwrap();

        collection.gc().unwrap();

        assert_eq!(collection.atlas_id_for_key("a"), Some(id));
        assert_eq!(collection.atlases().len(), 1);
    }

    #[test]
    fn test_mark_unknown_key_is_ignored() {
        let mut collection = AtlasCollection::new(100, 2);
        collection.mark_key_for_gc("ghost");
        assert_eq!(collection.marked_count(), 0);
    }
}
