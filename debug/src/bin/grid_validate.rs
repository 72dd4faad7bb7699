//! Build the cluster light grid on the GPU for a random-ish light field and compare every cluster
//! list against the CPU reference build.
//! Run: cargo run -p debug --bin grid_validate

use glam::{Mat4, Vec3};
use prism_renderer::graph::{BufferHandle, PassContext, RenderGraph, TransientPool};
use prism_renderer::light_grid::cpu::{build_reference, ClusterGrid};
use prism_renderer::light_grid::offset_bits;
use prism_renderer::lights::EnvSlotSource;
use prism_renderer::{
    ClusterCamera, KernelRegistry, LightBoundCollector, LightGridBuilder, PrismConfig, RenderResult,
};
use render_api::{ExtractedLight, ExtractedReflectionProbe, LightKind};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// Every probe resolves to slot 0; the grid only cares about bounds.
struct FixedSlot;

impl EnvSlotSource for FixedSlot {
    fn fetch_slice(&mut self, _texture_id: u64) -> Option<u32> {
        Some(0)
    }
}

/// Linear congruential sequence in [0, 1); deterministic across runs.
struct Lcg(u32);

impl Lcg {
    fn next(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.0 >> 8) as f32 / (1u32 << 24) as f32
    }
}

fn scene_lights(count: usize) -> Vec<ExtractedLight> {
    let mut rng = Lcg(7);
    (0..count)
        .map(|i| {
            let position = Vec3::new(rng.next() * 40.0 - 20.0, rng.next() * 10.0 - 5.0, -rng.next() * 60.0);
            let spot = i % 3 == 0;
            let rotation = Mat4::from_rotation_y(rng.next() * std::f32::consts::TAU);
            ExtractedLight {
                kind: if spot { LightKind::Spot } else { LightKind::Point },
                local_to_world: (Mat4::from_translation(position) * rotation).to_cols_array(),
                range: 1.0 + rng.next() * 6.0,
                color: [1.0, 0.9, 0.8],
                spot_angle: 20.0 + rng.next() * 60.0,
            }
        })
        .collect()
}

fn scene_probes() -> Vec<ExtractedReflectionProbe> {
    vec![
        ExtractedReflectionProbe {
            bounds_center: [0.0, 0.0, -10.0],
            bounds_extents: [5.0, 3.0, 5.0],
            blend_distance: 1.0,
            texture_id: Some(1),
            active: true,
        },
        ExtractedReflectionProbe {
            bounds_center: [8.0, 0.0, -35.0],
            bounds_extents: [10.0, 4.0, 10.0],
            blend_distance: 2.0,
            texture_id: Some(2),
            active: true,
        },
    ]
}

fn readback_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn copy_buffer(ctx: &mut PassContext<'_>, from: BufferHandle, to: BufferHandle, size: u64) -> RenderResult<()> {
    let source = ctx.resources.buffer(from)?;
    let target = ctx.resources.buffer(to)?;
    ctx.encoder.copy_buffer_to_buffer(source, 0, target, 0, size);
    Ok(())
}

fn read_u32s(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u32>, String> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    let _ = device.poll(wgpu::Maintain::Wait);
    rx.recv().map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
    let data = bytemuck::cast_slice::<u8, u32>(&slice.get_mapped_range()).to_vec();
    buffer.unmap();
    Ok(data)
}

fn main() -> Result<(), String> {
    env_logger::init();
    let (device, queue) = pollster::block_on(request_device())?;
    let config = PrismConfig { max_punctual_lights: 256, ..PrismConfig::default() };
    let kernels = KernelRegistry::new(&device);
    let mut builder = LightGridBuilder::new(&device, &kernels, &config);
    let mut collector = LightBoundCollector::new(
        config.max_directional_lights,
        config.max_punctual_lights,
        config.max_env_lights,
    );

    let lights = scene_lights(200);
    let probes = scene_probes();
    let collected = collector.collect(&lights, &probes, &mut FixedSlot);
    let camera = ClusterCamera {
        world_to_view: Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::new(0.0, 0.0, -20.0), Vec3::Y),
        viewport_width: WIDTH,
        viewport_height: HEIGHT,
        fov_y_degrees: 60.0,
        aspect: WIDTH as f32 / HEIGHT as f32,
        near: 0.1,
        far: 80.0,
    };
    let params = builder.prepare(&queue, &camera, &collected.bounds);
    let max = builder.max_lights_per_cluster();
    log::info!(
        "grid {}x{}x{}, {} bounds, capacity {}",
        params.clusters_x,
        params.clusters_y,
        params.depth_slices,
        builder.view_bounds().len(),
        params.capacity(max)
    );

    let packing_size = params.cluster_count() as u64 * 2 * 4;
    let lights_size = params.capacity(max).max(1) as u64 * 4;
    let packing_readback = readback_buffer(&device, "packing_offsets_readback", packing_size);
    let lights_readback = readback_buffer(&device, "cluster_lights_readback", lights_size);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("grid_validate") });
    let mut pool = TransientPool::new();
    {
        let mut graph = RenderGraph::new();
        let grid = builder.record(&mut graph, &params);
        let mut pass = graph.add_pass("grid_readback");
        pass.read_buffer(grid.packing_offsets);
        pass.read_buffer(grid.cluster_lights);
        let packing_target = pass.import_buffer(&packing_readback);
        let lights_target = pass.import_buffer(&lights_readback);
        pass.write_buffer(packing_target);
        pass.write_buffer(lights_target);
        pass.set_render_func(move |ctx| {
            copy_buffer(ctx, grid.packing_offsets, packing_target, packing_size)?;
            copy_buffer(ctx, grid.cluster_lights, lights_target, lights_size)
        });
        graph.execute(&device, &queue, &mut encoder, &mut pool).map_err(|e| e.to_string())?;
    }
    queue.submit(std::iter::once(encoder.finish()));

    let gpu = ClusterGrid::new(
        read_u32s(&device, &packing_readback)?,
        read_u32s(&device, &lights_readback)?,
        offset_bits(max),
    );
    let cpu = build_reference(&params, builder.view_bounds(), max);

    let gpu_lists = gpu.lists();
    let cpu_lists = cpu.lists();
    let mismatched: Vec<usize> = (0..cpu_lists.len()).filter(|&c| gpu_lists.get(c) != cpu_lists.get(c)).collect();
    let non_empty = cpu_lists.iter().filter(|l| !l[0].is_empty() || !l[1].is_empty()).count();
    if let Some(&first) = mismatched.first() {
        log::error!("cluster {}: gpu {:?} cpu {:?}", first, gpu_lists.get(first), cpu_lists.get(first));
        return Err(format!("{} of {} clusters differ", mismatched.len(), cpu_lists.len()));
    }
    println!("grid_validate: {} clusters match ({} non-empty)", cpu_lists.len(), non_empty);
    Ok(())
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
