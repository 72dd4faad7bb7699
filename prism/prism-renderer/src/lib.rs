//! Prism renderer: wgpu clustered deferred lighting with a reflection probe cache.
//!
//! Per frame: collect lights -> build the cluster light grid (async compute) -> GBuffer ->
//! deferred lighting -> final blit, all scheduled through a small render graph.

pub mod brdf_lut;
pub mod config;
pub mod cubemap_filter;
pub mod error;
pub mod gbuffer;
pub mod graph;
pub mod kernels;
pub mod light_grid;
pub mod light_pass;
pub mod lights;
pub mod present;
pub mod probe_cache;
pub mod resources;

pub use brdf_lut::PreIntegratedBrdf;
pub use config::{PrismConfig, ProbeFormat, ToneMapping};
pub use cubemap_filter::CubemapFilter;
pub use error::{RenderError, RenderResult};
pub use gbuffer::{GBufferPass, MeshDraw};
pub use graph::{CompiledGraph, NodeId, RenderGraph, ResourceId, ResourceUsage, TransientPool};
pub use kernels::{Kernel, KernelRegistry};
pub use light_grid::{ClusterCamera, ClusterParams, LightGridBuilder};
pub use light_pass::{DeferredLightingPass, LightingConstants, LightingInputs};
pub use lights::{LightBoundCollector, LightBuffers};
pub use present::FinalBlitPass;
pub use probe_cache::{ProbeSlotFetcher, ProbeSources, ReflectionProbeCache};
pub use resources::{FrameResource, FrameResources};

use glam::Mat4;
use render_api::{ExtractedProbeTexture, ExtractedView};

use crate::light_grid::flip_view_handedness;

/// Owns every pass and all state that lives across frames.
pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: PrismConfig,
    kernels: KernelRegistry,
    collector: LightBoundCollector,
    light_buffers: LightBuffers,
    light_grid: LightGridBuilder,
    probe_sources: ProbeSources,
    probe_cache: ReflectionProbeCache,
    cubemap_filter: CubemapFilter,
    brdf: PreIntegratedBrdf,
    gbuffer_pass: GBufferPass,
    lighting_pass: DeferredLightingPass,
    blit_pass: FinalBlitPass,
    frame_resources: FrameResources,
    pool: TransientPool,
    last_graph: Option<CompiledGraph>,
}

impl Renderer {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> RenderResult<Self> {
        Self::new_with_config(device, queue, PrismConfig::default())
    }

    pub fn new_with_config(device: wgpu::Device, queue: wgpu::Queue, config: PrismConfig) -> RenderResult<Self> {
        config.validate()?;
        let kernels = KernelRegistry::new(&device);
        let cubemap_filter = CubemapFilter::new(
            &device,
            &queue,
            &kernels,
            config.probe_resolution,
            config.probe_format.working_format(),
        );
        let probe_cache = ReflectionProbeCache::new(&device, &queue, &kernels, &config, cubemap_filter.mip_count())?;
        let renderer = Self {
            collector: LightBoundCollector::new(
                config.max_directional_lights,
                config.max_punctual_lights,
                config.max_env_lights,
            ),
            light_buffers: LightBuffers::new(&device, &config),
            light_grid: LightGridBuilder::new(&device, &kernels, &config),
            probe_sources: ProbeSources::new(),
            probe_cache,
            cubemap_filter,
            brdf: PreIntegratedBrdf::new(&device, &queue),
            gbuffer_pass: GBufferPass::new(&device, &kernels),
            lighting_pass: DeferredLightingPass::new(&device, &kernels),
            blit_pass: FinalBlitPass::new(&device, &kernels, config.swapchain_format, config.tone_mapping),
            frame_resources: FrameResources::new(),
            pool: TransientPool::new(),
            last_graph: None,
            kernels,
            device,
            queue,
            config,
        };
        log::info!(
            "prism renderer ready: tile {}px, {} slices, {} lights/cluster, probe cache {:?}",
            renderer.config.cluster_tile_size,
            renderer.config.cluster_depth_slices,
            renderer.config.cluster_max_lights,
            renderer.config.probe_format
        );
        Ok(renderer)
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn config(&self) -> &PrismConfig {
        &self.config
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn light_grid(&self) -> &LightGridBuilder {
        &self.light_grid
    }

    pub fn probe_cache(&self) -> &ReflectionProbeCache {
        &self.probe_cache
    }

    /// Schedule of the last executed frame.
    pub fn last_graph(&self) -> Option<&CompiledGraph> {
        self.last_graph.as_ref()
    }

    /// Create or refresh the GPU copy of a host probe texture.
    pub fn upload_probe_texture(&mut self, texture: &ExtractedProbeTexture) {
        self.probe_sources.upload(&self.device, &self.queue, texture);
    }

    pub fn retain_probe_textures(&mut self, live: impl Fn(u64) -> bool) {
        self.probe_sources.retain(live);
    }

    /// Record one camera into `encoder`, writing the camera's pixel rect of `output`.
    /// `output` must have the configured swapchain format.
    pub fn encode_frame(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &ExtractedView,
        meshes: &[MeshDraw],
        output: &wgpu::TextureView,
    ) -> RenderResult<()> {
        let (_, _, width, height) = view.pixel_rect;
        self.frame_resources.begin_frame(width, height);
        self.pool.begin_frame();
        self.probe_cache.new_frame();

        let collected = {
            let mut fetcher = ProbeSlotFetcher {
                cache: &mut self.probe_cache,
                sources: &self.probe_sources,
                filter: &self.cubemap_filter,
                device: &self.device,
                encoder: &mut *encoder,
            };
            self.collector.collect(&view.lights, &view.reflection_probes, &mut fetcher)
        };
        self.light_buffers.upload(&self.queue, collected);
        self.probe_cache.relight(
            &self.device,
            encoder,
            &self.cubemap_filter,
            &self.probe_sources,
            collected.env.len() as u32,
        );

        let world_to_view = Mat4::from_cols_array(&view.world_to_view);
        let camera = ClusterCamera {
            world_to_view,
            viewport_width: self.frame_resources.width(),
            viewport_height: self.frame_resources.height(),
            fov_y_degrees: view.fov_y,
            aspect: view.aspect(),
            near: view.near,
            far: view.far,
        };
        let params = self.light_grid.prepare(&self.queue, &camera, &collected.bounds);

        let view_proj = Mat4::from_cols_array(&view.projection) * world_to_view;
        self.gbuffer_pass.prepare(&self.device, &self.queue, view_proj, meshes);
        self.lighting_pass.prepare(
            &self.queue,
            &LightingConstants::new(
                view_proj,
                flip_view_handedness(world_to_view),
                &self.light_buffers,
                self.probe_cache.mip_count(),
            ),
        );
        self.blit_pass.prepare(&self.queue, view.output);

        let mut graph = RenderGraph::new();
        self.gbuffer_pass.record(&mut graph, &mut self.frame_resources, meshes)?;
        let grid = self.light_grid.record(&mut graph, &params);
        self.lighting_pass.record(
            &mut graph,
            &mut self.frame_resources,
            LightingInputs {
                cluster_constants: self.light_grid.constants_buffer(),
                lights: &self.light_buffers,
                grid,
                env_cubes: self.probe_cache.cache_view(),
                brdf_lut: self.brdf.view(),
            },
        )?;
        let backbuffer = graph.import_view(output);
        self.frame_resources.set(FrameResource::Backbuffer, backbuffer);
        self.blit_pass.record(&mut graph, &self.frame_resources, view.pixel_rect, view.viewport_size)?;

        let compiled = graph.execute(&self.device, &self.queue, encoder, &mut self.pool)?;
        self.last_graph = Some(compiled);
        Ok(())
    }

    /// `encode_frame` into a fresh encoder, then submit.
    pub fn render_to_view(
        &mut self,
        view: &ExtractedView,
        meshes: &[MeshDraw],
        output: &wgpu::TextureView,
    ) -> RenderResult<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("prism_frame") });
        self.encode_frame(&mut encoder, view, meshes, output)?;
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
