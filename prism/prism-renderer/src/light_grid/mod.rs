//! Clustered light grid: per-cluster lists of the punctual and env lights overlapping each cell,
//! built on the GPU every frame.

pub mod cpu;
mod params;

pub use params::{
    bounds_to_view_space, flip_view_handedness, offset_bits, pack_offset_count, packing_slot, unpack_offset_count,
    ClusterConstants, ClusterParams,
};

use glam::Mat4;

use crate::config::PrismConfig;
use crate::error::RenderResult;
use crate::graph::{BufferDesc, BufferHandle, RenderGraph};
use crate::kernels::{Kernel, KernelRegistry};
use crate::lights::{LightBound, LightCategory};

pub const BUILD_WORKGROUP_SIZE: [u32; 3] = [4, 4, 4];

/// Camera inputs of one grid build.
#[derive(Clone, Copy, Debug)]
pub struct ClusterCamera {
    /// Host world-to-view (right-handed, looking down -Z).
    pub world_to_view: Mat4,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

/// Graph handles of a recorded grid build, read by the lighting pass.
#[derive(Clone, Copy, Debug)]
pub struct LightGridOutput {
    pub packing_offsets: BufferHandle,
    pub cluster_lights: BufferHandle,
}

pub struct LightGridBuilder {
    clear_pipeline: wgpu::ComputePipeline,
    build_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    constants_buf: wgpu::Buffer,
    bounds_buf: wgpu::Buffer,
    max_bounds: u32,
    tile_size: u32,
    depth_slices: u32,
    max_lights_per_cluster: u32,
    view_bounds: Vec<LightBound>,
    params: Option<ClusterParams>,
}

impl LightGridBuilder {
    pub fn new(device: &wgpu::Device, kernels: &KernelRegistry, config: &PrismConfig) -> Self {
        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("light_grid_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<ClusterConstants>() as u64),
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
                storage(3, false),
                storage(4, false),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("light_grid_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let module = kernels.module(Kernel::BuildLightGrid);
        let compute = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let clear_pipeline = compute("clear_global_counter_pipeline", "clear_global_counter");
        let build_pipeline = compute("build_cluster_light_grid_pipeline", "build_cluster_light_grid");

        let constants_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cluster_constants"),
            size: std::mem::size_of::<ClusterConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let max_bounds = config.max_clustered_lights().max(1);
        let bounds_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("light_bounds"),
            size: max_bounds as u64 * std::mem::size_of::<LightBound>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            clear_pipeline,
            build_pipeline,
            bind_group_layout,
            constants_buf,
            bounds_buf,
            max_bounds,
            tile_size: config.cluster_tile_size,
            depth_slices: config.cluster_depth_slices,
            max_lights_per_cluster: config.cluster_max_lights,
            view_bounds: Vec::new(),
            params: None,
        }
    }

    /// Move the collected world-space bounds into flipped view space and upload them together with
    /// this camera's cluster constants.
    pub fn prepare(&mut self, queue: &wgpu::Queue, camera: &ClusterCamera, bounds: &[LightBound]) -> ClusterParams {
        let params = ClusterParams::new(
            camera.viewport_width,
            camera.viewport_height,
            camera.fov_y_degrees,
            camera.aspect,
            camera.near,
            camera.far,
            self.tile_size,
            self.depth_slices,
        );
        let flipped = flip_view_handedness(camera.world_to_view);
        self.view_bounds.clear();
        self.view_bounds
            .extend_from_slice(&bounds[..bounds.len().min(self.max_bounds as usize)]);
        bounds_to_view_space(&flipped, &mut self.view_bounds);
        if !self.view_bounds.is_empty() {
            queue.write_buffer(&self.bounds_buf, 0, bytemuck::cast_slice(&self.view_bounds));
        }
        let constants = params.constants(self.view_bounds.len() as u32, self.max_lights_per_cluster);
        queue.write_buffer(&self.constants_buf, 0, bytemuck::bytes_of(&constants));
        self.params = Some(params);
        params
    }

    pub fn params(&self) -> Option<&ClusterParams> {
        self.params.as_ref()
    }

    /// View-space bounds uploaded by the last `prepare`.
    pub fn view_bounds(&self) -> &[LightBound] {
        &self.view_bounds
    }

    pub fn max_lights_per_cluster(&self) -> u32 {
        self.max_lights_per_cluster
    }

    pub fn constants_buffer(&self) -> &wgpu::Buffer {
        &self.constants_buf
    }

    /// Add the grid build to the graph: clear the global counter, then one invocation per cluster.
    /// The pass does not depend on rasterization and is marked async-compute eligible.
    pub fn record<'a>(&'a self, graph: &mut RenderGraph<'a>, params: &ClusterParams) -> LightGridOutput {
        let clusters = params.cluster_count() as u64;
        let capacity = params.capacity(self.max_lights_per_cluster).max(1) as u64;
        let grid_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let dispatch = params.dispatch_size(BUILD_WORKGROUP_SIZE);

        let mut pass = graph.add_pass("build_light_grid");
        pass.enable_async_compute(true);
        let bounds = pass.import_buffer(&self.bounds_buf);
        pass.read_buffer(bounds);
        let packing_offsets = pass.create_buffer(BufferDesc {
            label: "cluster_packing_offsets",
            size: clusters * LightCategory::COUNT as u64 * 4,
            usage: grid_usage,
        });
        let cluster_lights = pass.create_buffer(BufferDesc { label: "cluster_lights", size: capacity * 4, usage: grid_usage });
        let counter = pass.create_buffer(BufferDesc {
            label: "cluster_global_counter",
            size: 4,
            usage: wgpu::BufferUsages::STORAGE,
        });
        pass.write_buffer(packing_offsets);
        pass.write_buffer(cluster_lights);
        pass.write_buffer(counter);

        pass.set_render_func(move |ctx| -> RenderResult<()> {
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("light_grid_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: self.constants_buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: ctx.resources.buffer(bounds)?.as_entire_binding() },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: ctx.resources.buffer(packing_offsets)?.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: ctx.resources.buffer(cluster_lights)?.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry { binding: 4, resource: ctx.resources.buffer(counter)?.as_entire_binding() },
                ],
            });
            let mut cp = ctx.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("build_light_grid"),
                timestamp_writes: None,
            });
            cp.set_bind_group(0, &bind_group, &[]);
            cp.set_pipeline(&self.clear_pipeline);
            cp.dispatch_workgroups(1, 1, 1);
            cp.set_pipeline(&self.build_pipeline);
            cp.dispatch_workgroups(dispatch[0], dispatch[1], dispatch[2]);
            Ok(())
        });

        LightGridOutput { packing_offsets, cluster_lights }
    }
}
