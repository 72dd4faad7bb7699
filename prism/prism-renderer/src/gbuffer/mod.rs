//! GBuffer pass: fill 4 RTs + depth. One pipeline, position + normal vertices (stride 24), flat
//! per-draw material in a dynamic-offset uniform buffer.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use render_api::ExtractedMaterial;

use crate::cubemap_filter::align_to;
use crate::error::{RenderError, RenderResult};
use crate::graph::{RenderGraph, TextureHandle};
use crate::kernels::{Kernel, KernelRegistry};
use crate::resources::{FrameResource, FrameResources, DEPTH_FORMAT};

pub const VERTEX_STRIDE: u64 = 24;

#[derive(Clone)]
pub struct MeshDraw {
    pub vertex_buf: Arc<wgpu::Buffer>,
    pub index_buf: Arc<wgpu::Buffer>,
    pub index_count: u32,
    /// World transform (column-major 4x4).
    pub transform: [f32; 16],
    pub material: ExtractedMaterial,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DrawUniforms {
    pub model: [f32; 16],
    pub normal_matrix: [f32; 16],
    pub albedo_metallic: [f32; 4],
    /// roughness, occlusion
    pub surface: [f32; 4],
    pub baked_gi: [f32; 4],
}

impl DrawUniforms {
    pub fn new(transform: &[f32; 16], material: &ExtractedMaterial) -> Self {
        let model = Mat4::from_cols_array(transform);
        let normal_matrix = if model.determinant().abs() > f32::EPSILON {
            model.inverse().transpose()
        } else {
            Mat4::IDENTITY
        };
        let [r, g, b] = material.albedo;
        let [gi_r, gi_g, gi_b] = material.baked_gi;
        Self {
            model: *transform,
            normal_matrix: normal_matrix.to_cols_array(),
            albedo_metallic: [r, g, b, material.metallic.clamp(0.0, 1.0)],
            surface: [material.roughness.clamp(0.0, 1.0), material.occlusion.clamp(0.0, 1.0), 0.0, 0.0],
            baked_gi: [gi_r, gi_g, gi_b, 0.0],
        }
    }
}

/// Graph handles written by the GBuffer pass.
#[derive(Clone, Copy, Debug)]
pub struct GBufferOutput {
    pub gbuffers: [TextureHandle; 4],
    pub depth: TextureHandle,
}

pub struct GBufferPass {
    pipeline: wgpu::RenderPipeline,
    draw_layout: wgpu::BindGroupLayout,
    frame_bind_group: wgpu::BindGroup,
    view_proj_buf: wgpu::Buffer,
    draw_buf: wgpu::Buffer,
    draw_capacity: u32,
    draw_stride: u64,
}

impl GBufferPass {
    pub fn new(device: &wgpu::Device, kernels: &KernelRegistry) -> Self {
        let uniform_entry = |dynamic: bool, size: usize| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic,
                min_binding_size: wgpu::BufferSize::new(size as u64),
            },
            count: None,
        };
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gbuffer_bind_group_layout_0"),
            entries: &[uniform_entry(false, 64)],
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gbuffer_bind_group_layout_1"),
            entries: &[uniform_entry(true, std::mem::size_of::<DrawUniforms>())],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("gbuffer_pipeline_layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout],
            push_constant_ranges: &[],
        });

        let shader = kernels.module(Kernel::GBuffer);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("gbuffer_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: VERTEX_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                        wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
                    ],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs"),
                targets: &FrameResource::GBUFFERS.map(|g| g.format().map(wgpu::ColorTargetState::from)),
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState { cull_mode: Some(wgpu::Face::Back), ..Default::default() },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let view_proj_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gbuffer_view_proj"),
            size: 64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gbuffer_bind_group_0"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: view_proj_buf.as_entire_binding() }],
        });
        let draw_stride = align_to(
            std::mem::size_of::<DrawUniforms>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let draw_capacity = 64;
        let draw_buf = Self::create_draw_buffer(device, draw_stride, draw_capacity);

        Self { pipeline, draw_layout, frame_bind_group, view_proj_buf, draw_buf, draw_capacity, draw_stride }
    }

    fn create_draw_buffer(device: &wgpu::Device, stride: u64, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gbuffer_draws"),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Upload the camera and one uniform block per mesh. Grows the draw buffer as needed.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, view_proj: Mat4, meshes: &[MeshDraw]) {
        queue.write_buffer(&self.view_proj_buf, 0, bytemuck::cast_slice(&view_proj.to_cols_array()));
        if meshes.is_empty() {
            return;
        }
        if meshes.len() as u32 > self.draw_capacity {
            self.draw_capacity = (meshes.len() as u32).next_power_of_two();
            self.draw_buf = Self::create_draw_buffer(device, self.draw_stride, self.draw_capacity);
            log::debug!("gbuffer: draw buffer grown to {} draws", self.draw_capacity);
        }
        let mut blocks = vec![0u8; (self.draw_stride * meshes.len() as u64) as usize];
        for (i, mesh) in meshes.iter().enumerate() {
            let offset = (self.draw_stride * i as u64) as usize;
            let uniforms = DrawUniforms::new(&mesh.transform, &mesh.material);
            blocks[offset..offset + std::mem::size_of::<DrawUniforms>()].copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        queue.write_buffer(&self.draw_buf, 0, &blocks);
    }

    /// Add the GBuffer fill to the graph. Registers GBuffer0..3 and depth in `frame`.
    pub fn record<'a>(
        &'a self,
        graph: &mut RenderGraph<'a>,
        frame: &mut FrameResources,
        meshes: &'a [MeshDraw],
    ) -> RenderResult<GBufferOutput> {
        let (width, height) = (frame.width(), frame.height());
        let mut pass = graph.add_pass("gbuffer");
        let mut gbuffers = Vec::with_capacity(4);
        for id in FrameResource::GBUFFERS {
            let desc = id.desc(width, height).ok_or_else(|| RenderError::resource("gbuffer desc"))?;
            let handle = pass.create_texture(desc);
            pass.write_texture(handle);
            frame.set(id, handle);
            gbuffers.push(handle);
        }
        let depth_desc = FrameResource::Depth
            .desc(width, height)
            .ok_or_else(|| RenderError::resource("depth desc"))?;
        let depth = pass.create_texture(depth_desc);
        pass.write_texture(depth);
        frame.set(FrameResource::Depth, depth);
        let gbuffers: [TextureHandle; 4] = [gbuffers[0], gbuffers[1], gbuffers[2], gbuffers[3]];

        pass.set_render_func(move |ctx| -> RenderResult<()> {
            let draw_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("gbuffer_bind_group_1"),
                layout: &self.draw_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.draw_buf,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
                    }),
                }],
            });
            let mut attachments = Vec::with_capacity(4);
            for handle in gbuffers {
                attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view: ctx.resources.texture_view(handle)?,
                    resolve_target: None,
                    ops: wgpu::Operations { load: ctx.color_load_op(handle), store: wgpu::StoreOp::Store },
                }));
            }
            let mut rp = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gbuffer_pass"),
                color_attachments: &attachments,
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: ctx.resources.texture_view(depth)?,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&self.pipeline);
            rp.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            rp.set_bind_group(0, &self.frame_bind_group, &[]);
            for (i, mesh) in meshes.iter().enumerate().take(self.draw_capacity as usize) {
                rp.set_bind_group(1, &draw_bind_group, &[(self.draw_stride * i as u64) as u32]);
                rp.set_vertex_buffer(0, mesh.vertex_buf.slice(..));
                rp.set_index_buffer(mesh.index_buf.slice(..), wgpu::IndexFormat::Uint32);
                rp.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
            Ok(())
        });

        Ok(GBufferOutput { gbuffers, depth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn draw_uniforms_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 176);
    }

    #[test]
    fn material_is_packed_and_clamped() {
        let material = ExtractedMaterial {
            albedo: [0.1, 0.2, 0.3],
            metallic: 1.5,
            roughness: -0.2,
            occlusion: 0.75,
            baked_gi: [0.5, 0.25, 0.125],
        };
        let u = DrawUniforms::new(&Mat4::IDENTITY.to_cols_array(), &material);
        assert_eq!(u.albedo_metallic, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(u.surface[..2], [0.0, 0.75]);
        assert_eq!(u.baked_gi[..3], [0.5, 0.25, 0.125]);
    }

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let u = DrawUniforms::new(&model.to_cols_array(), &ExtractedMaterial::default());
        let n = Mat4::from_cols_array(&u.normal_matrix).transform_vector3(Vec3::new(1.0, 1.0, 0.0));
        assert!((n.x - 0.5).abs() < 1e-6);
        assert!((n.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn singular_transform_falls_back_to_identity_normals() {
        let u = DrawUniforms::new(&Mat4::ZERO.to_cols_array(), &ExtractedMaterial::default());
        assert_eq!(u.normal_matrix, Mat4::IDENTITY.to_cols_array());
    }
}
