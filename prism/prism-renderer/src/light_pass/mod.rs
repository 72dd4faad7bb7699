//! Deferred lighting pass: one full-screen draw resolving GBuffer + clustered light lists into the
//! HDR lighting target.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::error::{RenderError, RenderResult};
use crate::graph::{RenderGraph, TextureHandle};
use crate::kernels::{Kernel, KernelRegistry};
use crate::light_grid::{ClusterConstants, LightGridOutput};
use crate::lights::LightBuffers;
use crate::resources::{FrameResource, FrameResources, LIGHTING_FORMAT};

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LightingConstants {
    pub inv_view_proj: [f32; 16],
    /// Flipped world-to-view, so view z is the positive distance the cluster slices use.
    pub world_to_view: [f32; 16],
    pub camera_position: [f32; 4],
    pub directional_count: u32,
    pub punctual_count: u32,
    pub env_count: u32,
    pub env_max_lod: f32,
}

impl LightingConstants {
    pub fn new(view_proj: Mat4, flipped_world_to_view: Mat4, lights: &LightBuffers, env_mip_count: u32) -> Self {
        // Camera position is the translation of view-to-world; the handedness flip does not move it.
        let camera_position: Vec3 = flipped_world_to_view.inverse().w_axis.truncate();
        Self {
            inv_view_proj: view_proj.inverse().to_cols_array(),
            world_to_view: flipped_world_to_view.to_cols_array(),
            camera_position: camera_position.extend(1.0).to_array(),
            directional_count: lights.directional_count(),
            punctual_count: lights.punctual_count(),
            env_count: lights.env_count(),
            env_max_lod: env_mip_count.saturating_sub(1) as f32,
        }
    }
}

/// Buffers and views the lighting pass binds but does not own.
pub struct LightingInputs<'a> {
    pub cluster_constants: &'a wgpu::Buffer,
    pub lights: &'a LightBuffers,
    pub grid: LightGridOutput,
    pub env_cubes: &'a wgpu::TextureView,
    pub brdf_lut: &'a wgpu::TextureView,
}

pub struct DeferredLightingPass {
    pipeline: wgpu::RenderPipeline,
    buffers_layout: wgpu::BindGroupLayout,
    textures_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    constants_buf: wgpu::Buffer,
}

impl DeferredLightingPass {
    pub fn new(device: &wgpu::Device, kernels: &KernelRegistry) -> Self {
        let uniform = |binding: u32, size: usize| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(size as u64),
            },
            count: None,
        };
        let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let buffers_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("deferred_lighting_bind_group_layout_0"),
            entries: &[
                uniform(0, std::mem::size_of::<ClusterConstants>()),
                uniform(1, std::mem::size_of::<LightingConstants>()),
                storage(2),
                storage(3),
                storage(4),
                storage(5),
                storage(6),
            ],
        });

        let texture = |binding: u32, sample_type: wgpu::TextureSampleType, view_dimension: wgpu::TextureViewDimension| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture { sample_type, view_dimension, multisampled: false },
                count: None,
            }
        };
        let gbuffer = wgpu::TextureSampleType::Float { filterable: false };
        let filterable = wgpu::TextureSampleType::Float { filterable: true };
        let d2 = wgpu::TextureViewDimension::D2;
        let textures_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("deferred_lighting_bind_group_layout_1"),
            entries: &[
                texture(0, wgpu::TextureSampleType::Depth, d2),
                texture(1, gbuffer, d2),
                texture(2, gbuffer, d2),
                texture(3, gbuffer, d2),
                texture(4, gbuffer, d2),
                texture(5, filterable, wgpu::TextureViewDimension::CubeArray),
                texture(6, filterable, d2),
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("deferred_lighting_pipeline_layout"),
            bind_group_layouts: &[&buffers_layout, &textures_layout],
            push_constant_ranges: &[],
        });
        let shader = kernels.module(Kernel::DeferredLighting);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("deferred_lighting_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_lighting"),
                targets: &[Some(LIGHTING_FORMAT.into())],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("deferred_lighting_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let constants_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lighting_constants"),
            size: std::mem::size_of::<LightingConstants>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self { pipeline, buffers_layout, textures_layout, sampler, constants_buf }
    }

    pub fn prepare(&self, queue: &wgpu::Queue, constants: &LightingConstants) {
        queue.write_buffer(&self.constants_buf, 0, bytemuck::bytes_of(constants));
    }

    /// Read GBuffer0..3 + depth from `frame` and the grid, write `LightingColor` (registered in
    /// `frame`), cleared to black before the draw.
    pub fn record<'a>(
        &'a self,
        graph: &mut RenderGraph<'a>,
        frame: &mut FrameResources,
        inputs: LightingInputs<'a>,
    ) -> RenderResult<TextureHandle> {
        let depth = frame.require(FrameResource::Depth)?;
        let mut gbuffers = [depth; 4];
        for (slot, id) in gbuffers.iter_mut().zip(FrameResource::GBUFFERS) {
            *slot = frame.require(id)?;
        }
        let color_desc = FrameResource::LightingColor
            .desc(frame.width(), frame.height())
            .ok_or_else(|| RenderError::resource("lighting target desc"))?;

        let mut pass = graph.add_pass("deferred_lighting");
        pass.read_texture(depth);
        for handle in gbuffers {
            pass.read_texture(handle);
        }
        let packing_offsets = pass.read_buffer(inputs.grid.packing_offsets);
        let cluster_lights = pass.read_buffer(inputs.grid.cluster_lights);
        let directional = pass.import_buffer(&inputs.lights.directional);
        let punctual = pass.import_buffer(&inputs.lights.punctual);
        let env = pass.import_buffer(&inputs.lights.env);
        for handle in [directional, punctual, env] {
            pass.read_buffer(handle);
        }
        let color = pass.create_texture(color_desc);
        pass.write_texture(color);
        frame.set(FrameResource::LightingColor, color);

        let LightingInputs { cluster_constants, env_cubes, brdf_lut, .. } = inputs;
        pass.set_render_func(move |ctx| -> RenderResult<()> {
            let res = ctx.resources;
            let buffers = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("deferred_lighting_bind_group_0"),
                layout: &self.buffers_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: cluster_constants.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: self.constants_buf.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: res.buffer(packing_offsets)?.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: res.buffer(cluster_lights)?.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 4, resource: res.buffer(directional)?.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 5, resource: res.buffer(punctual)?.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 6, resource: res.buffer(env)?.as_entire_binding() },
                ],
            });
            let depth_view = res.texture_view(depth)?;
            let mut gbuffer_views = Vec::with_capacity(4);
            for handle in gbuffers {
                gbuffer_views.push(res.texture_view(handle)?);
            }
            let textures = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("deferred_lighting_bind_group_1"),
                layout: &self.textures_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(depth_view) },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(gbuffer_views[0]) },
                    wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(gbuffer_views[1]) },
                    wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(gbuffer_views[2]) },
                    wgpu::BindGroupEntry { binding: 4, resource: wgpu::BindingResource::TextureView(gbuffer_views[3]) },
                    wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(env_cubes) },
                    wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::TextureView(brdf_lut) },
                    wgpu::BindGroupEntry { binding: 7, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                ],
            });
            let load = ctx.color_load_op(color);
            let mut rp = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("deferred_lighting"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: res.texture_view(color)?,
                    resolve_target: None,
                    ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&self.pipeline);
            rp.set_bind_group(0, &buffers, &[]);
            rp.set_bind_group(1, &textures, &[]);
            rp.draw(0..3, 0..1);
            Ok(())
        });
        Ok(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<LightingConstants>(), 160);
    }

    #[test]
    fn camera_position_survives_the_handedness_flip() {
        let eye = Vec3::new(3.0, 2.0, 5.0);
        let world_to_view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let flipped = crate::light_grid::flip_view_handedness(world_to_view);
        let position = flipped.inverse().w_axis.truncate();
        assert!((position - eye).length() < 1e-4);
    }

    #[test]
    fn flipped_view_depth_is_positive_in_front() {
        let world_to_view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let flipped = crate::light_grid::flip_view_handedness(world_to_view);
        let z = flipped.transform_point3(Vec3::new(0.0, 0.0, -7.0)).z;
        assert!((z - 7.0).abs() < 1e-5);
    }
}
