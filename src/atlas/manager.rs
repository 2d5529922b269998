//! Atlas manager: named collections, render types, per-frame batch
//! assembly.
//!
//! The manager is the cache's public face. Renderers register collections
//! and render types once, then per frame resolve elements to an atlas plus
//! texture locations, bounded by the number of atlases one draw call may
//! reference.

use std::collections::HashMap;

use cgmath::{Matrix3, Rad, Vector2};

use crate::config::RendererConfig;
use crate::error::{RenderError, RenderResult};
use crate::raster::Surface;

use super::atlas::{AtlasId, Location, StyleKey, TextureEntry};
use super::collection::{AtlasCollection, CollectionDebugInfo};
use super::BoundingBox;

/// Per-drawable-class hooks. One implementation per render type (node body,
/// node label, ...), registered against a collection.
pub trait RenderType<E> {
    /// Cache identity: equal keys must rasterize to identical pixels
    fn style_key(&self, ele: &E) -> StyleKey;

    /// Model-space bounding box of the element
    fn bounding_box(&self, ele: &E) -> BoundingBox;

    /// Rasterize the element. The surface transform is set up so the
    /// callback draws in `bb` coordinates.
    fn draw_element(&self, surface: &mut Surface, ele: &E, bb: &BoundingBox);

    /// Stable element identifier, used to detect style transitions
    fn id(&self, ele: &E) -> u64;

    /// Rotation in radians applied at draw time
    fn rotation(&self, _ele: &E) -> f32 {
        0.0
    }

    /// Point the rotation pivots around
    fn rotation_point(&self, ele: &E) -> Vector2<f32> {
        let bb = self.bounding_box(ele);
        Vector2::new(bb.x1 + bb.w / 2.0, bb.y1 + bb.h / 2.0)
    }

    /// Offset from the pivot to the quad origin
    fn rotation_offset(&self, ele: &E) -> Vector2<f32> {
        let bb = self.bounding_box(ele);
        Vector2::new(-bb.w / 2.0, -bb.h / 2.0)
    }

    /// Padding in model-space pixels added around the bounding box
    fn padding(&self, _ele: &E) -> f32 {
        0.0
    }
}

struct RegisteredType<E> {
    collection: String,
    render: Box<dyn RenderType<E>>,
}

/// Options for collection registration
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionOptions {
    /// Rows per atlas; defaults to the config value
    pub tex_rows: Option<u32>,
}

/// Options for [`AtlasManager::invalidate`]
pub struct InvalidateOptions<'a, E> {
    /// Tombstone the rendered key even if the style key is unchanged and
    /// collect synchronously. Used when pixel content changed under a
    /// stable key, e.g. an image finished loading.
    pub force_redraw: bool,
    pub filter_ele: Option<&'a dyn Fn(&E) -> bool>,
    pub filter_type: Option<&'a dyn Fn(&str) -> bool>,
}

impl<'a, E> Default for InvalidateOptions<'a, E> {
    fn default() -> Self {
        Self {
            force_redraw: false,
            filter_ele: None,
            filter_type: None,
        }
    }
}

/// Resolved atlas placement for one element in the current batch
#[derive(Debug, Clone, Copy)]
pub struct AtlasInfo {
    pub atlas_id: AtlasId,
    /// Index of the atlas within the current batch
    pub index: usize,
    pub tex1: Location,
    pub tex2: Location,
    pub bb: BoundingBox,
}

/// Aggregated debug statistics
#[derive(Debug, Clone)]
pub struct ManagerDebugInfo {
    pub collections: Vec<(String, CollectionDebugInfo)>,
}

/// Owns the atlas collections and render-type registry, and assembles the
/// per-frame list of atlases a batch may reference.
pub struct AtlasManager<E> {
    tex_size: u32,
    default_tex_rows: u32,
    texes_per_batch: usize,
    release_locked_canvases: bool,

    collections: HashMap<String, AtlasCollection>,
    render_types: HashMap<String, RegisteredType<E>>,
    /// Last style key rendered per (render type, element id)
    rendered_keys: HashMap<(String, u64), StyleKey>,

    batch_atlases: Vec<AtlasId>,
}

impl<E> AtlasManager<E> {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            tex_size: config.tex_size,
            default_tex_rows: config.tex_rows,
            texes_per_batch: config.texes_per_batch,
            release_locked_canvases: config.release_locked_canvases,
            collections: HashMap::new(),
            render_types: HashMap::new(),
            rendered_keys: HashMap::new(),
            batch_atlases: Vec::new(),
        }
    }

    pub fn add_atlas_collection(&mut self, name: &str, opts: CollectionOptions) {
        let tex_rows = opts.tex_rows.unwrap_or(self.default_tex_rows);
        log::debug!(
            "[AtlasManager::add_atlas_collection] '{}': {}px, {} rows",
            name,
            self.tex_size,
            tex_rows
        );
        self.collections
            .insert(name.to_string(), AtlasCollection::new(self.tex_size, tex_rows));
    }

    pub fn add_render_type(
        &mut self,
        name: &str,
        collection: &str,
        render: Box<dyn RenderType<E>>,
    ) -> RenderResult<()> {
        if !self.collections.contains_key(collection) {
            return Err(RenderError::UnknownCollection {
                name: collection.to_string(),
            });
        }
        self.render_types.insert(
            name.to_string(),
            RegisteredType {
                collection: collection.to_string(),
                render,
            },
        );
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Option<&AtlasCollection> {
        self.collections.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Option<&mut AtlasCollection> {
        self.collections.get_mut(name)
    }

    /// Resolve the atlas and placement for an element, rasterizing on a
    /// cache miss and recording the style key for transition detection.
    pub fn get_or_create_atlas(
        &mut self,
        type_name: &str,
        ele: &E,
        bb: Option<BoundingBox>,
    ) -> RenderResult<(AtlasId, TextureEntry)> {
        let Self {
            render_types,
            collections,
            rendered_keys,
            ..
        } = self;

        let rt = render_types
            .get(type_name)
            .ok_or_else(|| RenderError::UnknownRenderType {
                name: type_name.to_string(),
            })?;
        let collection =
            collections
                .get_mut(&rt.collection)
                .ok_or_else(|| RenderError::UnknownCollection {
                    name: rt.collection.clone(),
                })?;

        let render = rt.render.as_ref();
        let key = render.style_key(ele);
        let bb = bb.unwrap_or_else(|| render.bounding_box(ele));

        let (id, entry) =
            collection.draw(&key, &bb, |surface, bb| render.draw_element(surface, ele, bb))?;
        rendered_keys.insert((type_name.to_string(), render.id(ele)), key);
        Ok((id, entry))
    }

    /// Tombstone stale style keys for the given elements.
    ///
    /// With `force_redraw` the rendered keys are tombstoned unconditionally
    /// and collection runs synchronously, so the next draw observes a clean
    /// cache. Otherwise keys are tombstoned only on a style transition and
    /// the return value reports whether a deferred [`gc`](Self::gc) is
    /// warranted.
    pub fn invalidate(
        &mut self,
        elements: &[E],
        opts: InvalidateOptions<'_, E>,
    ) -> RenderResult<bool> {
        let mut needs_gc = false;

        {
            let Self {
                render_types,
                collections,
                rendered_keys,
                ..
            } = self;

            for ele in elements {
                if let Some(filter) = opts.filter_ele {
                    if !filter(ele) {
                        continue;
                    }
                }
                for (type_name, rt) in render_types.iter() {
                    if let Some(filter) = opts.filter_type {
                        if !filter(type_name) {
                            continue;
                        }
                    }

                    let render = rt.render.as_ref();
                    let map_key = (type_name.clone(), render.id(ele));

                    if opts.force_redraw {
                        let key = rendered_keys
                            .remove(&map_key)
                            .unwrap_or_else(|| render.style_key(ele));
                        if let Some(collection) = collections.get_mut(&rt.collection) {
                            collection.mark_key_for_gc(&key);
                        }
                    } else {
                        let new_key = render.style_key(ele);
                        let stale = rendered_keys
                            .get(&map_key)
                            .is_some_and(|old| *old != new_key);
                        if stale {
                            if let Some(old) = rendered_keys.remove(&map_key) {
                                if let Some(collection) = collections.get_mut(&rt.collection) {
                                    collection.mark_key_for_gc(&old);
                                }
                                needs_gc = true;
                            }
                        }
                    }
                }
            }
        }

        if opts.force_redraw {
            self.gc()?;
            return Ok(false);
        }
        Ok(needs_gc)
    }

    /// Run garbage collection on every collection
    pub fn gc(&mut self) -> RenderResult<()> {
        for collection in self.collections.values_mut() {
            collection.gc()?;
        }
        Ok(())
    }

    // --- batch assembly ---

    /// Begin a fresh batch; the previous batch's atlases are forgotten
    pub fn start_batch(&mut self) {
        self.batch_atlases.clear();
    }

    /// Atlases referenced by the current batch, in bind order
    pub fn batch_atlas_ids(&self) -> &[AtlasId] {
        &self.batch_atlases
    }

    /// Whether an element can join the current batch: there is room for
    /// another atlas, or the element's atlas is already bound.
    pub fn can_add_to_current_batch(&self, type_name: &str, ele: &E) -> bool {
        if self.batch_atlases.len() < self.texes_per_batch {
            return true;
        }
        let Some(rt) = self.render_types.get(type_name) else {
            return false;
        };
        let key = rt.render.style_key(ele);
        self.collections
            .get(&rt.collection)
            .and_then(|c| c.atlas_id_for_key(&key))
            .is_some_and(|id| self.batch_atlases.contains(&id))
    }

    /// Index of an atlas within the current batch, appending it if there is
    /// room. `None` means the batch is full: flush and retry.
    pub fn get_atlas_index_for_batch(&mut self, id: AtlasId) -> Option<usize> {
        if let Some(pos) = self.batch_atlases.iter().position(|&a| a == id) {
            return Some(pos);
        }
        if self.batch_atlases.len() < self.texes_per_batch {
            self.batch_atlases.push(id);
            return Some(self.batch_atlases.len() - 1);
        }
        None
    }

    /// Resolve an element to its atlas index within the current batch plus
    /// its texture locations and bounding box. `Ok(None)` means the batch
    /// is full.
    pub fn get_atlas_info(&mut self, type_name: &str, ele: &E) -> RenderResult<Option<AtlasInfo>> {
        let bb = {
            let rt = self
                .render_types
                .get(type_name)
                .ok_or_else(|| RenderError::UnknownRenderType {
                    name: type_name.to_string(),
                })?;
            rt.render.bounding_box(ele)
        };

        let (atlas_id, entry) = self.get_or_create_atlas(type_name, ele, Some(bb))?;
        let Some(index) = self.get_atlas_index_for_batch(atlas_id) else {
            return Ok(None);
        };

        Ok(Some(AtlasInfo {
            atlas_id,
            index,
            tex1: entry.loc1,
            tex2: entry.loc2,
            bb,
        }))
    }

    /// Build the model transform for one instance of an element's quad.
    ///
    /// Wrapped entries are drawn as two instances; `first` selects the half
    /// and the destination quad is split at the ratio of the halves'
    /// widths.
    pub fn set_transform_matrix(
        &self,
        matrix: &mut Matrix3<f32>,
        type_name: &str,
        ele: &E,
        info: &AtlasInfo,
        first: bool,
    ) {
        let Some(rt) = self.render_types.get(type_name) else {
            log::error!(
                "[AtlasManager::set_transform_matrix] Unknown render type '{}'",
                type_name
            );
            return;
        };
        let render = rt.render.as_ref();

        let total = (info.tex1.w + info.tex2.w) as f32;
        let mut ratio = if total > 0.0 {
            info.tex1.w as f32 / total
        } else {
            1.0
        };
        if !first {
            ratio = 1.0 - ratio;
        }

        let bb = info.bb.padded(render.padding(ele));
        let adj_w = bb.w * ratio;
        let x_offset = if first { 0.0 } else { bb.w - adj_w };

        let theta = render.rotation(ele);
        *matrix = if theta != 0.0 {
            let point = render.rotation_point(ele);
            let offset = render.rotation_offset(ele);
            Matrix3::from_translation(point)
                * Matrix3::from_angle_z(Rad(theta))
                * Matrix3::from_translation(Vector2::new(offset.x + x_offset, offset.y))
                * Matrix3::from_nonuniform_scale(adj_w, bb.h)
        } else {
            Matrix3::from_translation(Vector2::new(bb.x1 + x_offset, bb.y1))
                * Matrix3::from_nonuniform_scale(adj_w, bb.h)
        };
    }

    /// Upload every dirty atlas in every collection
    pub fn buffer_all(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        for collection in self.collections.values_mut() {
            collection.buffer_all(device, queue, self.release_locked_canvases);
        }
    }

    pub fn get_debug_info(&self) -> ManagerDebugInfo {
        let mut collections: Vec<(String, CollectionDebugInfo)> = self
            .collections
            .iter()
            .map(|(name, c)| (name.clone(), c.debug_info()))
            .collect();
        collections.sort_by(|a, b| a.0.cmp(&b.0));
        ManagerDebugInfo { collections }
    }
}
