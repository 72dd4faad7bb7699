//! Final blit: sample the HDR lighting target, tone map, write the camera's pixel rect of the output.

use bytemuck::{Pod, Zeroable};
use render_api::OutputTarget;

use crate::config::ToneMapping;
use crate::error::RenderResult;
use crate::graph::{RenderGraph, TextureHandle};
use crate::kernels::{Kernel, KernelRegistry};
use crate::resources::{FrameResource, FrameResources};

const NO_FLIP: [f32; 4] = [1.0, 1.0, 0.0, 0.0];
const FLIP_Y: [f32; 4] = [1.0, -1.0, 0.0, 1.0];

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BlitParams {
    pub scale_bias: [f32; 4],
    pub tone_mode: u32,
    pub _pad: [u32; 3],
}

impl BlitParams {
    /// The lighting target has its uv origin at the top; flip when the output expects otherwise.
    pub fn for_target(output: OutputTarget, tone_mapping: ToneMapping) -> Self {
        let flip = match output {
            OutputTarget::Backbuffer { uv_starts_at_top } => !uv_starts_at_top,
            OutputTarget::Offscreen { flip_y } => flip_y,
        };
        Self {
            scale_bias: if flip { FLIP_Y } else { NO_FLIP },
            tone_mode: match tone_mapping {
                ToneMapping::Reinhard => 0,
                ToneMapping::None => 1,
            },
            _pad: [0; 3],
        }
    }
}

/// Viewport `(x, y, width, height)` of the camera rect clipped to the output; `None` when nothing
/// of it is visible.
pub fn blit_viewport(pixel_rect: (u32, u32, u32, u32), output_size: (u32, u32)) -> Option<[f32; 4]> {
    let (x, y, w, h) = pixel_rect;
    let (out_w, out_h) = output_size;
    if x >= out_w || y >= out_h {
        return None;
    }
    let w = w.min(out_w - x);
    let h = h.min(out_h - y);
    if w == 0 || h == 0 {
        return None;
    }
    Some([x as f32, y as f32, w as f32, h as f32])
}

/// The camera rect covers the whole output, so the blit may clear instead of load.
pub fn covers_output(pixel_rect: (u32, u32, u32, u32), output_size: (u32, u32)) -> bool {
    let (x, y, w, h) = pixel_rect;
    x == 0 && y == 0 && w >= output_size.0 && h >= output_size.1
}

pub struct FinalBlitPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    tone_mapping: ToneMapping,
    params_buf: wgpu::Buffer,
}

impl FinalBlitPass {
    pub fn new(
        device: &wgpu::Device,
        kernels: &KernelRegistry,
        output_format: wgpu::TextureFormat,
        tone_mapping: ToneMapping,
    ) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("final_blit_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("final_blit_bind_group_layout"),
            entries: &[
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
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<BlitParams>() as u64),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("final_blit_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = kernels.module(Kernel::FinalBlit);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("final_blit_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let params_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("final_blit_params"),
            size: std::mem::size_of::<BlitParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { pipeline, bind_group_layout, sampler, tone_mapping, params_buf }
    }

    pub fn prepare(&self, queue: &wgpu::Queue, output: OutputTarget) {
        let params = BlitParams::for_target(output, self.tone_mapping);
        queue.write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&params));
    }

    /// Blit `LightingColor` into the `Backbuffer` registered in `frame`, inside `pixel_rect`.
    pub fn record<'a>(
        &'a self,
        graph: &mut RenderGraph<'a>,
        frame: &FrameResources,
        pixel_rect: (u32, u32, u32, u32),
        output_size: (u32, u32),
    ) -> RenderResult<TextureHandle> {
        let source = frame.require(FrameResource::LightingColor)?;
        let destination = frame.require(FrameResource::Backbuffer)?;
        let viewport = blit_viewport(pixel_rect, output_size);
        let load = if covers_output(pixel_rect, output_size) {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };

        let mut pass = graph.add_pass("final_blit");
        pass.read_texture(source);
        pass.write_texture(destination);
        pass.set_render_func(move |ctx| -> RenderResult<()> {
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("final_blit_bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(ctx.resources.texture_view(source)?),
                    },
                    wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                    wgpu::BindGroupEntry { binding: 2, resource: self.params_buf.as_entire_binding() },
                ],
            });
            let target = ctx.resources.texture_view(destination)?;
            let mut rp = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("final_blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations { load, store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let Some([x, y, w, h]) = viewport else {
                return Ok(());
            };
            rp.set_viewport(x, y, w, h, 0.0, 1.0);
            rp.set_pipeline(&self.pipeline);
            rp.set_bind_group(0, &bind_group, &[]);
            rp.draw(0..3, 0..1);
            Ok(())
        });
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_follows_output_convention() {
        let top = BlitParams::for_target(OutputTarget::Backbuffer { uv_starts_at_top: true }, ToneMapping::Reinhard);
        assert_eq!(top.scale_bias, NO_FLIP);
        assert_eq!(top.tone_mode, 0);
        let bottom = BlitParams::for_target(OutputTarget::Backbuffer { uv_starts_at_top: false }, ToneMapping::None);
        assert_eq!(bottom.scale_bias, FLIP_Y);
        assert_eq!(bottom.tone_mode, 1);
        let offscreen = BlitParams::for_target(OutputTarget::Offscreen { flip_y: true }, ToneMapping::Reinhard);
        assert_eq!(offscreen.scale_bias, FLIP_Y);
        let plain = BlitParams::for_target(OutputTarget::Offscreen { flip_y: false }, ToneMapping::Reinhard);
        assert_eq!(plain.scale_bias, NO_FLIP);
    }

    #[test]
    fn flipped_uv_maps_top_to_bottom() {
        let [sx, sy, bx, by] = FLIP_Y;
        assert_eq!((0.0 * sx + bx, 0.0 * sy + by), (0.0, 1.0));
        assert_eq!((1.0 * sx + bx, 1.0 * sy + by), (1.0, 0.0));
    }

    #[test]
    fn viewport_is_clipped_to_output() {
        assert_eq!(blit_viewport((0, 0, 800, 600), (800, 600)), Some([0.0, 0.0, 800.0, 600.0]));
        assert_eq!(blit_viewport((400, 300, 800, 600), (800, 600)), Some([400.0, 300.0, 400.0, 300.0]));
        assert_eq!(blit_viewport((800, 0, 10, 10), (800, 600)), None);
        assert_eq!(blit_viewport((0, 0, 0, 10), (800, 600)), None);
    }

    #[test]
    fn split_screen_rect_loads_instead_of_clearing() {
        assert!(covers_output((0, 0, 800, 600), (800, 600)));
        assert!(!covers_output((400, 0, 400, 600), (800, 600)));
    }

    #[test]
    fn params_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<BlitParams>(), 32);
    }
}
