//! EVS Preview Simulator - Main Entry Point
//!
//! Headless end-to-end exercise of the preview pipeline: a simulated camera
//! service pushes synthetic frames for both streams into offscreen wgpu
//! targets. The front stream stalls for a while mid-run so the dropped and
//! frozen indicators latch and recover. Stop with ctrl-c.

use anyhow::Context;
use evs_service::simulated::synthetic_image;
use evs_service::{SimulatedEvsService, StreamKind};
use std::sync::Arc;
use preview_render::RenderError;
use stream_pipeline::{
    init_logging, placeholder_image, PipelineConfig, StartOutcome, StreamPipeline,
};
use tracing::{info, warn};

const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 240;
/// Frame sequence window during which the front camera goes silent.
const STALL_FRAMES: std::ops::Range<u64> = 150..220;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("=== EVS Preview Simulator v{} ===", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::load()?;
    let service = Arc::new(SimulatedEvsService::new(8));

    // Offscreen GPU bring-up; no window needed.
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .context("no GPU adapter available")?;
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await?;
    let device = Arc::new(device);
    let queue = Arc::new(queue);

    let mut pipelines = Vec::new();
    let mut tasks = Vec::new();
    for kind in [StreamKind::Front, StreamKind::Rear] {
        let pipeline = Arc::new(StreamPipeline::new(kind, &config, service.clone()));
        tasks.extend(spawn_stream(
            kind,
            &config,
            pipeline.clone(),
            service.clone(),
            device.clone(),
            queue.clone(),
        )?);
        pipelines.push(pipeline);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for pipeline in &pipelines {
        pipeline.shutdown();
    }
    for task in &tasks {
        task.abort();
    }
    for kind in [StreamKind::Front, StreamKind::Rear] {
        info!(
            stream = kind.label(),
            free_slots = service.free_slots(kind),
            outstanding = service.outstanding(kind),
            "buffer pool at exit"
        );
    }

    Ok(())
}

/// Wire one stream: renderer on an offscreen target, frame generator,
/// health logger.
fn spawn_stream(
    kind: StreamKind,
    config: &PipelineConfig,
    pipeline: Arc<StreamPipeline>,
    service: Arc<SimulatedEvsService>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
) -> anyhow::Result<Vec<tokio::task::JoinHandle<()>>> {
    let target = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("evs-preview-sim target"),
        size: wgpu::Extent3d {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

    let mut renderer = pipeline.renderer();
    renderer.surface_created(device, queue, wgpu::TextureFormat::Rgba8Unorm)?;
    renderer.surface_resized(FRAME_WIDTH, FRAME_HEIGHT);

    let mut tasks = Vec::new();

    match pipeline.start()? {
        StartOutcome::Streaming => {
            let interval = config.frame_interval();
            let generator_service = service.clone();
            tasks.push(tokio::spawn(async move {
                let mut sequence: u64 = 0;
                loop {
                    tokio::time::sleep(interval).await;
                    let stalled = kind == StreamKind::Front && STALL_FRAMES.contains(&sequence);
                    if !stalled {
                        generator_service
                            .push_frame(kind, synthetic_image(FRAME_WIDTH, FRAME_HEIGHT, sequence));
                    }
                    sequence += 1;
                }
            }));
        }
        StartOutcome::Placeholder => {
            renderer.render_static_image(&placeholder_image())?;
            pipeline.redraw().request();
        }
        StartOutcome::Unavailable => {}
    }

    // Render context: draws only when a redraw was requested, and keeps
    // going while a backlog remains.
    let redraw = pipeline.redraw();
    tasks.push(tokio::spawn(async move {
        // Keeps the target texture alive for as long as its view is drawn to.
        let _target = target;
        loop {
            redraw.requested().await;
            match renderer.draw_frame(&target_view) {
                Ok(outcome) => {
                    if outcome.more_queued {
                        redraw.request();
                    }
                }
                Err(err) => {
                    warn!(stream = kind.label(), %err, "draw failed");
                    // A bad frame must not stall the backlog behind it.
                    if matches!(err, RenderError::Import(_)) && renderer.has_backlog() {
                        redraw.request();
                    }
                }
            }
        }
    }));

    // Health indicator observer, standing in for the UI layer.
    let mut health = pipeline.health_watch();
    tasks.push(tokio::spawn(async move {
        let mut last = *health.borrow();
        info!(stream = kind.label(), ?last, "initial health");
        while health.changed().await.is_ok() {
            let flags = *health.borrow();
            if flags != last {
                info!(
                    stream = kind.label(),
                    playing = flags.playing,
                    stopped = flags.stopped,
                    frame_dropped = flags.frame_dropped,
                    timed_out = flags.timed_out,
                    "health changed"
                );
                last = flags;
            }
        }
    }));

    Ok(tasks)
}
