//! GGX cubemap prefilter. Mip 0 is copied unfiltered; every further mip is convolved with
//! roughness `mip / (mip_count - 1)` from the source's unfiltered mip chain.

use bytemuck::{Pod, Zeroable};

use crate::kernels::{Kernel, KernelRegistry};

/// Mips of a filtered probe, before capping by resolution.
pub const FILTERED_MIP_COUNT: u32 = 7;
const SAMPLE_COUNT: u32 = 64;
const FACES: u32 = 6;

/// Mip count of a filtered probe of the given face resolution.
pub fn filtered_mip_count(resolution: u32) -> u32 {
    FILTERED_MIP_COUNT.min(full_mip_count(resolution))
}

pub fn full_mip_count(resolution: u32) -> u32 {
    resolution.max(1).ilog2() + 1
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FilterParams {
    pub face: u32,
    pub mip: u32,
    pub roughness: f32,
    pub sample_count: u32,
    pub source_resolution: f32,
    pub source_max_lod: f32,
    pub _pad: [f32; 2],
}

impl FilterParams {
    pub fn new(face: u32, mip: u32, mip_count: u32, source_resolution: u32) -> Self {
        Self {
            face,
            mip,
            roughness: mip as f32 / (mip_count.max(2) - 1) as f32,
            sample_count: SAMPLE_COUNT,
            source_resolution: source_resolution as f32,
            source_max_lod: (full_mip_count(source_resolution) - 1) as f32,
            _pad: [0.0; 2],
        }
    }
}

pub struct CubemapFilter {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    params_buf: wgpu::Buffer,
    params_stride: u64,
    resolution: u32,
    mip_count: u32,
}

impl CubemapFilter {
    /// `format` is the working format of both source and target cubes.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kernels: &KernelRegistry,
        resolution: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let mip_count = filtered_mip_count(resolution);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cubemap_filter_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<FilterParams>() as u64),
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
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cubemap_filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = kernels.module(Kernel::CubemapFilter);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("cubemap_filter_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_filter"),
                targets: &[Some(format.into())],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("cubemap_filter_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Parameters never change for a given resolution: write every (mip, face) block once.
        let params_stride = align_to(
            std::mem::size_of::<FilterParams>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let mut blocks = vec![0u8; (params_stride * (mip_count * FACES) as u64) as usize];
        for mip in 0..mip_count {
            for face in 0..FACES {
                let offset = (params_stride * (mip * FACES + face) as u64) as usize;
                let params = FilterParams::new(face, mip, mip_count, resolution);
                blocks[offset..offset + std::mem::size_of::<FilterParams>()].copy_from_slice(bytemuck::bytes_of(&params));
            }
        }
        let params_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cubemap_filter_params"),
            size: blocks.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&params_buf, 0, &blocks);

        Self { pipeline, bind_group_layout, sampler, params_buf, params_stride, resolution, mip_count }
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// `source`: cube with a full unfiltered mip chain. `target`: cube with `mip_count` mips.
    pub fn filter(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::Texture,
        target: &wgpu::Texture,
    ) {
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d { width: self.resolution, height: self.resolution, depth_or_array_layers: FACES },
        );

        let source_view = source.create_view(&wgpu::TextureViewDescriptor {
            label: Some("cubemap_filter_source"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cubemap_filter_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.params_buf,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<FilterParams>() as u64),
                    }),
                },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&source_view) },
            ],
        });

        for mip in 1..self.mip_count {
            for face in 0..FACES {
                let target_view = target.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("cubemap_filter_target"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: face,
                    array_layer_count: Some(1),
                    ..Default::default()
                });
                let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("cubemap_filter"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target_view,
                        resolve_target: None,
                        ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                let offset = (self.params_stride * (mip * FACES + face) as u64) as u32;
                rp.set_pipeline(&self.pipeline);
                rp.set_bind_group(0, &bind_group, &[offset]);
                rp.draw(0..3, 0..1);
            }
        }
    }
}

pub(crate) fn align_to(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_capped_by_resolution() {
        assert_eq!(filtered_mip_count(128), 7);
        assert_eq!(filtered_mip_count(512), 7);
        assert_eq!(filtered_mip_count(16), 5);
        assert_eq!(full_mip_count(128), 8);
    }

    #[test]
    fn roughness_spans_mip_chain() {
        assert_eq!(FilterParams::new(0, 0, 7, 128).roughness, 0.0);
        assert_eq!(FilterParams::new(0, 6, 7, 128).roughness, 1.0);
        assert!((FilterParams::new(3, 3, 7, 128).roughness - 0.5).abs() < 1e-6);
        assert_eq!(FilterParams::new(0, 1, 7, 128).source_max_lod, 7.0);
    }

    #[test]
    fn params_fit_uniform_alignment() {
        assert_eq!(std::mem::size_of::<FilterParams>(), 32);
        assert_eq!(align_to(32, 256), 256);
        assert_eq!(align_to(512, 256), 512);
    }
}
