//! Host loop: use render_api types and PrismPlugin as RenderBackend (prepare + render_frame),
//! headless, then read the offscreen output back and print its mean color.
//! Run: cargo run -p debug --bin plugin_loop

use prism_bridge::PrismPlugin;
use render_api::{OutputTarget, RenderBackend};

const SIZE: (u32, u32) = (640, 480);
const FRAMES: u32 = 4;

fn main() -> Result<(), String> {
    env_logger::init();
    let (device, queue) = pollster::block_on(request_device())?;
    let mut plugin = PrismPlugin::new(device, queue)?;

    let scene = debug::demo_scene();
    for frame in 0..FRAMES {
        let view = debug::demo_view(SIZE, frame as f32 * 0.25, 24, OutputTarget::Offscreen { flip_y: false });
        plugin.prepare(&scene);
        plugin.render_frame(&view)?;
    }
    if let Some(graph) = plugin.renderer().last_graph() {
        log::info!("pass order {:?}, async {:?}", graph.ordered_names(), graph.async_passes());
    }

    let mean = read_mean_color(&plugin)?;
    println!(
        "Prism plugin_loop: {} frames OK, mean output color [{:.3}, {:.3}, {:.3}]",
        FRAMES, mean[0], mean[1], mean[2]
    );
    Ok(())
}

/// Copy the offscreen output into a mappable buffer and average it. Rows are 256-byte aligned at
/// this size, so no row padding needs stripping.
fn read_mean_color(plugin: &PrismPlugin) -> Result<[f32; 3], String> {
    let texture = plugin.offscreen_texture().ok_or("no frame rendered")?;
    let device = plugin.device();
    let bytes_per_row = SIZE.0 * 4;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("plugin_loop_readback"),
        size: (bytes_per_row * SIZE.1) as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("plugin_loop_readback") });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &readback,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(SIZE.1),
            },
        },
        wgpu::Extent3d { width: SIZE.0, height: SIZE.1, depth_or_array_layers: 1 },
    );
    plugin.queue().submit(std::iter::once(encoder.finish()));

    let slice = readback.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    rx.recv().map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
    let mut sum = [0u64; 3];
    {
        let data = slice.get_mapped_range();
        for texel in data.chunks_exact(4) {
            for c in 0..3 {
                sum[c] += texel[c] as u64;
            }
        }
    }
    readback.unmap();
    let count = (SIZE.0 * SIZE.1) as f32 * 255.0;
    Ok([sum[0] as f32 / count, sum[1] as f32 / count, sum[2] as f32 / count])
}

async fn request_device() -> Result<(wgpu::Device, wgpu::Queue), String> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions::default())
        .await
        .ok_or("No adapter")?;
    adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await
        .map_err(|e| e.to_string())
}
