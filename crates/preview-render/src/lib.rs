//! Preview Rendering Stage
//!
//! Pulls one frame at a time from the hand-off queue, imports it into a
//! persistent texture and draws a full-screen quad. Rendering is not
//! continuous: a draw happens only when a redraw was explicitly requested,
//! and a draw with an empty queue simply repaints the current texture
//! contents.
//!
//! Frame ownership: the renderer owns a pulled descriptor for exactly one
//! upload + draw, waits for the GPU to finish consuming the import, then
//! hands the descriptor to the return path. Returning before the wait would
//! let the camera service reuse memory the GPU is still reading.

use evs_service::{FrameDescriptor, HardwareImage};
use frame_queue::FrameQueue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Rendering error types
#[derive(Error, Debug)]
pub enum RenderError {
    /// Shader compile/link failed at surface creation. Fatal for this
    /// surface instance; a broken pipeline cannot self-heal without a new
    /// surface.
    #[error("pipeline build failed: {0}")]
    PipelineBuild(String),

    /// A frame could not be imported into the texture. Fatal for that frame
    /// only; the loop continues with the next one.
    #[error("frame import failed: {0}")]
    Import(String),

    /// No GPU pipeline exists; `surface_created` has not run (or failed).
    #[error("no surface: render pipeline has not been built")]
    NoSurface,

    /// The static placeholder image has unusable dimensions.
    #[error("static image has invalid dimensions")]
    BadImage,
}

/// Return path for frames the renderer is done with.
pub trait FrameReturn: Send + Sync {
    /// Invoked after the GPU has fully consumed the frame.
    fn on_display_frame_returned(&self, frame: FrameDescriptor);
}

/// What a single draw accomplished.
#[derive(Debug, Clone, Copy)]
pub struct DrawOutcome {
    /// A fresh frame was imported and drawn (false for an idempotent
    /// repaint).
    pub frame_presented: bool,
    /// Frames remain queued; the caller should request another draw right
    /// away instead of waiting for the next frame event.
    pub more_queued: bool,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    camera_mat: [[f32; 4]; 4],
}

const IDENTITY_MAT: CameraUniform = CameraUniform {
    camera_mat: [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ],
};

struct TextureEntry {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct GpuState {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    /// Persistent frame texture, created at first import and recreated on
    /// dimension change.
    entry: Option<TextureEntry>,
}

/// Per-stream renderer. Single-threaded: one render context owns it and the
/// GPU state exclusively.
pub struct PreviewRenderer {
    frames: Arc<FrameQueue>,
    returns: Arc<dyn FrameReturn>,
    gpu: Option<GpuState>,
    viewport: (u32, u32),
}

impl PreviewRenderer {
    pub fn new(frames: Arc<FrameQueue>, returns: Arc<dyn FrameReturn>) -> Self {
        Self {
            frames,
            returns,
            gpu: None,
            viewport: (0, 0),
        }
    }

    /// (Re)build the GPU pipeline for a new surface. Idempotent: an existing
    /// pipeline is discarded and rebuilt against the new target format.
    ///
    /// Shader validation failure is reported, not retried; the renderer is
    /// left without a pipeline.
    pub fn surface_created(
        &mut self,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target_format: wgpu::TextureFormat,
    ) -> Result<(), RenderError> {
        self.gpu = None;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("evs-preview shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/preview.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("evs-preview bind group layout"),
            entries: &[
                // Frame texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // Camera matrix uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("evs-preview pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("evs-preview pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    // Frames are fully opaque
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        // Linear upscale, nearest-neighbor downscale, edge-clamped
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("evs-preview sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("evs-preview camera matrix"),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&uniform_buffer, 0, bytemuck::cast_slice(&[IDENTITY_MAT]));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            error!(%err, "shader pipeline build failed");
            return Err(RenderError::PipelineBuild(err.to_string()));
        }

        info!("render pipeline built");
        self.gpu = Some(GpuState {
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            entry: None,
        });
        Ok(())
    }

    /// The display surface changed size.
    pub fn surface_resized(&mut self, width: u32, height: u32) {
        debug!(width, height, "surface resized");
        self.viewport = (width, height);
    }

    /// Draw one frame into `target`.
    ///
    /// Pulls at most one frame from the queue. With an empty queue this is an
    /// idempotent repaint of the current texture, which is normal when the
    /// redraw was requested for a UI-only reason.
    pub fn draw_frame(&mut self, target: &wgpu::TextureView) -> Result<DrawOutcome, RenderError> {
        let gpu = self.gpu.as_mut().ok_or(RenderError::NoSurface)?;

        let frame = self.frames.try_dequeue_head();
        let import_result = match &frame {
            Some(frame) => gpu.import_image(frame.image()),
            None => Ok(()),
        };

        if import_result.is_ok() {
            gpu.draw(target, self.viewport);
        }

        // Block until the GPU has consumed the import before the underlying
        // memory goes back to the camera service.
        gpu.wait();
        let frame_presented = frame.is_some() && import_result.is_ok();
        if let Some(frame) = frame {
            self.returns.on_display_frame_returned(frame);
        }
        // The frame was released either way; only now surface the fault.
        import_result?;

        Ok(DrawOutcome {
            frame_presented,
            more_queued: self.frames.peek_has_more(),
        })
    }

    /// Rasterize a still image into the frame texture, outside the normal
    /// frame path. Used when the camera service reports unavailable/busy
    /// instead of starting a stream; the caller requests a redraw afterwards.
    pub fn render_static_image(&mut self, still: &image::RgbaImage) -> Result<(), RenderError> {
        let gpu = self.gpu.as_mut().ok_or(RenderError::NoSurface)?;
        if still.width() == 0 || still.height() == 0 {
            return Err(RenderError::BadImage);
        }
        gpu.import_rgba(still.width(), still.height(), still.width() * 4, still.as_raw());
        gpu.wait();
        debug!(
            width = still.width(),
            height = still.height(),
            "static image uploaded"
        );
        Ok(())
    }

    /// Whether a usable pipeline exists.
    pub fn has_surface(&self) -> bool {
        self.gpu.is_some()
    }

    /// True while admitted frames remain queued. Lets the caller keep
    /// pipelining draws when `draw_frame` failed for one frame and its
    /// `DrawOutcome` was lost.
    pub fn has_backlog(&self) -> bool {
        self.frames.peek_has_more()
    }
}

impl GpuState {
    /// Import a hardware image into the persistent texture. Layout problems
    /// are fatal for the frame, never absorbed into stale content.
    fn import_image(&mut self, image: &HardwareImage) -> Result<(), RenderError> {
        if !image.layout_valid() {
            return Err(RenderError::Import(format!(
                "inconsistent layout: {}x{} stride {} with {} bytes",
                image.width(),
                image.height(),
                image.stride(),
                image.pixels().len()
            )));
        }
        self.import_rgba(image.width(), image.height(), image.stride(), image.pixels());
        Ok(())
    }

    fn import_rgba(&mut self, width: u32, height: u32, stride: u32, pixels: &[u8]) {
        self.ensure_entry(width, height);
        let entry = self.entry.as_ref().expect("entry just ensured");
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(stride),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn ensure_entry(&mut self, width: u32, height: u32) {
        let fits = matches!(
            &self.entry,
            Some(entry) if entry.width == width && entry.height == height
        );
        if fits {
            return;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("evs-preview frame texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("evs-preview frame bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        debug!(width, height, "frame texture (re)created");
        self.entry = Some(TextureEntry {
            texture,
            bind_group,
            width,
            height,
        });
    }

    fn draw(&self, target: &wgpu::TextureView, viewport: (u32, u32)) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("evs-preview draw"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("evs-preview pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::RED),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(entry) = &self.entry {
                if viewport.0 > 0 && viewport.1 > 0 {
                    pass.set_viewport(0.0, 0.0, viewport.0 as f32, viewport.1 as f32, 0.0, 1.0);
                }
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &entry.bind_group, &[]);
                pass.draw(0..4, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
    }

    /// Wait until all submitted GPU work is complete, bounded by the
    /// driver's own fencing semantics.
    fn wait(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evs_service::{FrameDescriptor, HardwareImage, ReturnToken, StreamKind};
    use std::sync::Mutex;

    struct CollectingReturns(Mutex<Vec<usize>>);

    impl FrameReturn for CollectingReturns {
        fn on_display_frame_returned(&self, frame: FrameDescriptor) {
            self.0.lock().unwrap().push(frame.release().slot());
        }
    }

    fn renderer() -> (PreviewRenderer, Arc<FrameQueue>) {
        let frames = Arc::new(FrameQueue::new());
        let returns = Arc::new(CollectingReturns(Mutex::new(Vec::new())));
        (PreviewRenderer::new(frames.clone(), returns), frames)
    }

    #[test]
    fn test_renderer_starts_without_surface() {
        let (renderer, frames) = renderer();
        let pixels: Arc<[u8]> = vec![0u8; 4 * 4 * 4].into();
        frames.try_enqueue(FrameDescriptor::new(
            HardwareImage::new(4, 4, 16, pixels),
            ReturnToken::new(StreamKind::Front, 0),
        ));

        // No pipeline yet; queued frames stay queued until a surface exists
        assert!(!renderer.has_surface());
        assert_eq!(frames.len(), 1);
        frames.drain_and_release(|f| {
            f.release();
        });
    }

    #[test]
    fn test_static_image_without_surface_is_no_surface() {
        let (mut renderer, _frames) = renderer();
        let still = image::RgbaImage::new(8, 8);
        assert!(matches!(
            renderer.render_static_image(&still),
            Err(RenderError::NoSurface)
        ));
    }

    #[test]
    fn test_resize_before_surface_is_accepted() {
        let (mut renderer, _frames) = renderer();
        renderer.surface_resized(640, 480);
        assert!(!renderer.has_surface());
    }

    #[test]
    fn test_has_backlog_tracks_queue() {
        let (renderer, frames) = renderer();
        assert!(!renderer.has_backlog());
        let pixels: Arc<[u8]> = vec![0u8; 4 * 4 * 4].into();
        frames.try_enqueue(FrameDescriptor::new(
            HardwareImage::new(4, 4, 16, pixels),
            ReturnToken::new(StreamKind::Front, 0),
        ));
        assert!(renderer.has_backlog());
        frames.drain_and_release(|f| {
            f.release();
        });
        assert!(!renderer.has_backlog());
    }

    /// Offscreen device for draw-path tests. `None` on hosts without a GPU
    /// adapter, in which case the callers return early.
    fn gpu() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None))
                .ok()?;
        Some((Arc::new(device), Arc::new(queue)))
    }

    fn offscreen_target(device: &wgpu::Device) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("test target"),
            size: wgpu::Extent3d {
                width: 16,
                height: 16,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn frame(slot: usize, stride: u32) -> FrameDescriptor {
        let pixels: Arc<[u8]> = vec![0u8; 64].into();
        FrameDescriptor::new(
            HardwareImage::new(4, 4, stride, pixels),
            ReturnToken::new(StreamKind::Front, slot),
        )
    }

    #[test]
    fn test_empty_queue_draw_is_idempotent_repaint() {
        let Some((device, queue)) = gpu() else { return };
        let frames = Arc::new(FrameQueue::new());
        let returns = Arc::new(CollectingReturns(Mutex::new(Vec::new())));
        let mut renderer = PreviewRenderer::new(frames.clone(), returns.clone());
        renderer
            .surface_created(device.clone(), queue, wgpu::TextureFormat::Rgba8Unorm)
            .unwrap();
        renderer.surface_resized(16, 16);
        let (_target, view) = offscreen_target(&device);

        let outcome = renderer.draw_frame(&view).unwrap();
        assert!(!outcome.frame_presented);
        assert!(!outcome.more_queued);
        // The repaint touched neither the queue nor the return path
        assert!(frames.is_empty());
        assert!(returns.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_import_failure_releases_frame_once_and_keeps_backlog() {
        let Some((device, queue)) = gpu() else { return };
        let frames = Arc::new(FrameQueue::new());
        let returns = Arc::new(CollectingReturns(Mutex::new(Vec::new())));
        let mut renderer = PreviewRenderer::new(frames.clone(), returns.clone());
        renderer
            .surface_created(device.clone(), queue, wgpu::TextureFormat::Rgba8Unorm)
            .unwrap();
        renderer.surface_resized(16, 16);
        let (_target, view) = offscreen_target(&device);

        // Stride 8 is shorter than a 4-pixel row: the import must fail
        assert!(frames.try_enqueue(frame(7, 8)).is_admitted());
        assert!(frames.try_enqueue(frame(8, 16)).is_admitted());

        let err = renderer.draw_frame(&view).unwrap_err();
        assert!(matches!(err, RenderError::Import(_)));
        // The bad frame went back exactly once, and the backlog survived it
        assert_eq!(returns.0.lock().unwrap().as_slice(), &[7]);
        assert!(renderer.has_backlog());

        let outcome = renderer.draw_frame(&view).unwrap();
        assert!(outcome.frame_presented);
        assert!(!outcome.more_queued);
        assert_eq!(returns.0.lock().unwrap().as_slice(), &[7, 8]);
    }
}
