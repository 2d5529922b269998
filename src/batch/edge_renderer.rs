//! GPU edge renderer: pipelines, static geometry, and the per-frame batch
//! cycle.
//!
//! One instanced draw renders up to `batch_size` edges. Each instance
//! expands to 12 vertices: a quad oriented along the edge and two arrowhead
//! triangles, discriminated by a per-vertex type attribute.

use bytemuck::{Pod, Zeroable};
use cgmath::Matrix3;
use wgpu::util::DeviceExt;

use crate::config::RendererConfig;
use crate::constants;

use super::edge_data::{EdgeDrawData, EdgeInstance, EdgeInstanceData};

/// Texture format of the picking render target
pub const PICKING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const VERT_LINE: u32 = 0;
const VERT_SOURCE_ARROW: u32 = 1;
const VERT_TARGET_ARROW: u32 = 2;

/// Which pass a frame renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Screen,
    /// Offscreen pass writing packed element indices for hit-testing
    Picking,
}

/// Per-frame GPU handles threaded through the batch cycle
pub struct FrameContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    /// Color attachment of the active render target
    pub color_view: &'a wgpu::TextureView,
}

/// Counters reset by `start_frame`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub batches: u32,
    pub instances: u32,
}

/// Static per-vertex geometry, instanced 12 vertices at a time
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct EdgeVertex {
    position: [f32; 2],
    vert_type: u32,
}

const fn vert(x: f32, y: f32, vert_type: u32) -> EdgeVertex {
    EdgeVertex {
        position: [x, y],
        vert_type,
    }
}

/// 6 line vertices spanning the unit quad, then one unit triangle per
/// arrowhead. The line quad's x runs source to target; y is half-width up
/// and down.
const EDGE_VERTICES: [EdgeVertex; 12] = [
    vert(0.0, -0.5, VERT_LINE),
    vert(1.0, -0.5, VERT_LINE),
    vert(1.0, 0.5, VERT_LINE),
    vert(0.0, -0.5, VERT_LINE),
    vert(1.0, 0.5, VERT_LINE),
    vert(0.0, 0.5, VERT_LINE),
    vert(-0.15, -0.3, VERT_SOURCE_ARROW),
    vert(0.0, 0.0, VERT_SOURCE_ARROW),
    vert(0.15, -0.3, VERT_SOURCE_ARROW),
    vert(-0.15, -0.3, VERT_TARGET_ARROW),
    vert(0.0, 0.0, VERT_TARGET_ARROW),
    vert(0.15, -0.3, VERT_TARGET_ARROW),
];

/// Uniform block shared by both pipelines. `mat3x3` columns are padded to
/// vec4 per WGSL uniform layout rules.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct EdgeUniform {
    pan_zoom: [[f32; 4]; 3],
    bg_color: [f32; 4],
}

fn pan_zoom_to_gpu(m: &Matrix3<f32>) -> [[f32; 4]; 3] {
    let cols: &[[f32; 3]; 3] = m.as_ref();
    [
        [cols[0][0], cols[0][1], cols[0][2], 0.0],
        [cols[1][0], cols[1][1], cols[1][2], 0.0],
        [cols[2][0], cols[2][1], cols[2][2], 0.0],
    ]
}

/// Instanced edge batcher.
///
/// Frame cycle: `start_frame`, then for each batch `start_batch` /
/// `draw`... / `end_batch`. Reaching the instance cap inside `draw` flushes
/// implicitly.
pub struct EdgeRenderer {
    data: EdgeInstanceData,
    pan_zoom: Matrix3<f32>,
    bg_color: [f32; 4],
    target: RenderTarget,
    stats: FrameStats,

    screen_pipeline: wgpu::RenderPipeline,
    picking_pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    instance_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
}

impl EdgeRenderer {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        config: &RendererConfig,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Edge Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/edge_render.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Edge Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Edge Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layouts = [
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<EdgeVertex>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[
                    wgpu::VertexAttribute {
                        offset: 0,
                        shader_location: 0,
                        format: wgpu::VertexFormat::Float32x2,
                    },
                    wgpu::VertexAttribute {
                        offset: 8,
                        shader_location: 1,
                        format: wgpu::VertexFormat::Uint32,
                    },
                ],
            },
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<EdgeInstance>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &[
                    // index, packed unorm bytes
                    wgpu::VertexAttribute {
                        offset: 0,
                        shader_location: 2,
                        format: wgpu::VertexFormat::Unorm8x4,
                    },
                    // source_target
                    wgpu::VertexAttribute {
                        offset: 4,
                        shader_location: 3,
                        format: wgpu::VertexFormat::Float32x4,
                    },
                    // line_width
                    wgpu::VertexAttribute {
                        offset: 20,
                        shader_location: 4,
                        format: wgpu::VertexFormat::Float32,
                    },
                    // line_color
                    wgpu::VertexAttribute {
                        offset: 24,
                        shader_location: 5,
                        format: wgpu::VertexFormat::Float32x4,
                    },
                    // draw_arrows
                    wgpu::VertexAttribute {
                        offset: 40,
                        shader_location: 6,
                        format: wgpu::VertexFormat::Uint32x2,
                    },
                    // source_arrow_color
                    wgpu::VertexAttribute {
                        offset: 48,
                        shader_location: 7,
                        format: wgpu::VertexFormat::Float32x4,
                    },
                    // target_arrow_color
                    wgpu::VertexAttribute {
                        offset: 64,
                        shader_location: 8,
                        format: wgpu::VertexFormat::Float32x4,
                    },
                    // source_arrow_transform, three consecutive columns
                    wgpu::VertexAttribute {
                        offset: 80,
                        shader_location: 9,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                    wgpu::VertexAttribute {
                        offset: 92,
                        shader_location: 10,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                    wgpu::VertexAttribute {
                        offset: 104,
                        shader_location: 11,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                    // target_arrow_transform
                    wgpu::VertexAttribute {
                        offset: 116,
                        shader_location: 12,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                    wgpu::VertexAttribute {
                        offset: 128,
                        shader_location: 13,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                    wgpu::VertexAttribute {
                        offset: 140,
                        shader_location: 14,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                ],
            },
        ];

        let make_pipeline = |label: &str,
                             entry_point: &str,
                             format: wgpu::TextureFormat,
                             blend: Option<wgpu::BlendState>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &vertex_layouts,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point,
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        };

        // Instance colors are premultiplied
        let screen_pipeline = make_pipeline(
            "Edge Screen Pipeline",
            "fs_main",
            surface_format,
            Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        );

        // Picking writes exact index bytes; no blending
        let picking_pipeline = make_pipeline("Edge Picking Pipeline", "fs_pick", PICKING_FORMAT, None);

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Edge Vertex Buffer"),
            contents: bytemuck::cast_slice(&EDGE_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Edge Instance Buffer"),
            size: (config.batch_size * std::mem::size_of::<EdgeInstance>()) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Edge Uniform Buffer"),
            size: std::mem::size_of::<EdgeUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Edge Uniform Bind Group"),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        log::debug!(
            "[EdgeRenderer::new] Initialized: batch_size={}, instance stride={}",
            config.batch_size,
            std::mem::size_of::<EdgeInstance>()
        );

        Self {
            data: EdgeInstanceData::new(config.batch_size),
            pan_zoom: Matrix3::from_scale(1.0),
            bg_color: config.bg_color,
            target: RenderTarget::Screen,
            stats: FrameStats::default(),
            screen_pipeline,
            picking_pipeline,
            vertex_buffer,
            instance_buffer,
            uniform_buffer,
            uniform_bind_group,
        }
    }

    /// Begin a frame: fix the pan-zoom matrix and render target for every
    /// batch until the next `start_frame`
    pub fn start_frame(&mut self, pan_zoom: Matrix3<f32>, target: RenderTarget) {
        self.pan_zoom = pan_zoom;
        self.target = target;
        self.stats = FrameStats::default();
        self.data.clear();
    }

    pub fn start_batch(&mut self) {
        self.data.clear();
    }

    /// Record one edge, flushing first if the batch is at capacity
    pub fn draw(&mut self, ctx: &FrameContext<'_>, edge: &EdgeDrawData, element_index: u32) {
        if self.data.is_full() {
            self.end_batch(ctx);
        }
        self.data.push(edge, element_index);
    }

    /// Flush the accumulated instances in one instanced draw. No-op when
    /// the batch is empty, so calling again is safe.
    pub fn end_batch(&mut self, ctx: &FrameContext<'_>) {
        let count = self.data.count();
        if count == 0 {
            return;
        }

        let uniform = EdgeUniform {
            pan_zoom: pan_zoom_to_gpu(&self.pan_zoom),
            bg_color: self.bg_color,
        };
        ctx.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
        // Upload only the first `count` instances' worth of bytes
        ctx.queue.write_buffer(
            &self.instance_buffer,
            0,
            bytemuck::cast_slice(self.data.instances()),
        );

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Edge Batch Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Edge Batch Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: ctx.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let pipeline = match self.target {
                RenderTarget::Screen => &self.screen_pipeline,
                RenderTarget::Picking => &self.picking_pipeline,
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
            pass.draw(0..constants::batch::VERTS_PER_EDGE, 0..count as u32);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        self.stats.batches += 1;
        self.stats.instances += count as u32;
        log::trace!(
            "[EdgeRenderer::end_batch] Flushed {} instances (batch {})",
            count,
            self.stats.batches
        );
        self.data.clear();
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }
}
