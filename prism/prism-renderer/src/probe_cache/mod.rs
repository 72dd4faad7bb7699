//! Reflection probe cache: a fixed array of GGX-prefiltered cubemaps shared by every env light of
//! the frame, filled on demand and kept across frames.

mod bc6h;
mod source;
mod texture_cache;

pub use bc6h::{block_layout, MipBlocks};
pub use source::{texture_format, ProbeSource, ProbeSources};
pub use texture_cache::{Reservation, TextureCache, TextureIdentity};

use std::collections::HashSet;

use bytemuck::{Pod, Zeroable};

use crate::config::PrismConfig;
use crate::cubemap_filter::{align_to, full_mip_count, CubemapFilter};
use crate::error::{RenderError, RenderResult};
use crate::kernels::{Kernel, KernelRegistry};
use crate::lights::EnvSlotSource;
use bc6h::Bc6hEncoder;

const FACES: u32 = 6;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
struct BlitFace {
    face: u32,
    lod: f32,
    _pad: [f32; 2],
}

/// Face conversion and mip downsampling draws.
struct CubeBlitter {
    convert_pipeline: wgpu::RenderPipeline,
    downsample_pipeline: wgpu::RenderPipeline,
    convert_layout: wgpu::BindGroupLayout,
    downsample_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    faces_buf: wgpu::Buffer,
    face_stride: u64,
}

impl CubeBlitter {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue, kernels: &KernelRegistry, format: wgpu::TextureFormat) -> Self {
        let texture_entry = |binding: u32, view_dimension: wgpu::TextureViewDimension| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let convert_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cube_convert_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<BlitFace>() as u64),
                    },
                    count: None,
                },
                sampler_entry,
                texture_entry(2, wgpu::TextureViewDimension::Cube),
            ],
        });
        let downsample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cube_downsample_bind_group_layout"),
            entries: &[sampler_entry, texture_entry(3, wgpu::TextureViewDimension::D2)],
        });
        let shader = kernels.module(Kernel::CubeBlit);
        let pipeline = |label: &str, layout: &wgpu::BindGroupLayout, fs: &str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_fullscreen"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some(fs),
                    targets: &[Some(format.into())],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };
        let convert_pipeline = pipeline("cube_convert_pipeline", &convert_layout, "fs_convert");
        let downsample_pipeline = pipeline("cube_downsample_pipeline", &downsample_layout, "fs_downsample");
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("cube_blit_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let face_stride = align_to(
            std::mem::size_of::<BlitFace>() as u64,
            device.limits().min_uniform_buffer_offset_alignment as u64,
        );
        let mut blocks = vec![0u8; (face_stride * FACES as u64) as usize];
        for face in 0..FACES {
            let offset = (face_stride * face as u64) as usize;
            let params = BlitFace { face, lod: 0.0, _pad: [0.0; 2] };
            blocks[offset..offset + std::mem::size_of::<BlitFace>()].copy_from_slice(bytemuck::bytes_of(&params));
        }
        let faces_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cube_blit_faces"),
            size: blocks.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&faces_buf, 0, &blocks);

        Self {
            convert_pipeline,
            downsample_pipeline,
            convert_layout,
            downsample_layout,
            sampler,
            faces_buf,
            face_stride,
        }
    }

    fn face_view(texture: &wgpu::Texture, mip: u32, face: u32) -> wgpu::TextureView {
        texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("cube_face_view"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: face,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }

    fn draw(encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView, pipeline: &wgpu::RenderPipeline, bind_group: &wgpu::BindGroup, offsets: &[u32]) {
        let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("cube_blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: wgpu::StoreOp::Store },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rp.set_pipeline(pipeline);
        rp.set_bind_group(0, bind_group, offsets);
        rp.draw(0..3, 0..1);
    }

    /// Resample mip 0 of every face of `source` into mip 0 of `target`.
    fn convert(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, source: &ProbeSource, target: &wgpu::Texture) {
        let source_view = source.cube_view();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cube_convert_bind_group"),
            layout: &self.convert_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.faces_buf,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<BlitFace>() as u64),
                    }),
                },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(&source_view) },
            ],
        });
        for face in 0..FACES {
            let target_view = Self::face_view(target, 0, face);
            let offset = (self.face_stride * face as u64) as u32;
            Self::draw(encoder, &target_view, &self.convert_pipeline, &bind_group, &[offset]);
        }
    }

    /// Fill mips 1.. of every face by 2x box downsampling of the previous mip.
    fn generate_mips(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, mip_count: u32) {
        for mip in 1..mip_count {
            for face in 0..FACES {
                let source_view = Self::face_view(texture, mip - 1, face);
                let target_view = Self::face_view(texture, mip, face);
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("cube_downsample_bind_group"),
                    layout: &self.downsample_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                        wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::TextureView(&source_view) },
                    ],
                });
                Self::draw(encoder, &target_view, &self.downsample_pipeline, &bind_group, &[]);
            }
        }
    }
}

/// How a source reaches the staging cube.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StagingPath {
    Copy,
    Convert,
}

pub fn staging_path(source_size: u32, source_format: wgpu::TextureFormat, probe_size: u32, working_format: wgpu::TextureFormat) -> StagingPath {
    if source_size == probe_size && source_format == working_format {
        StagingPath::Copy
    } else {
        StagingPath::Convert
    }
}

pub struct ReflectionProbeCache {
    texture_cache: TextureCache,
    blitter: CubeBlitter,
    bc6h: Option<Bc6hEncoder>,
    /// Unfiltered input with a full mip chain.
    staging: wgpu::Texture,
    /// Filtered output, `mip_count` mips.
    convolution: wgpu::Texture,
    cache: wgpu::Texture,
    cache_view: wgpu::TextureView,
    resolution: u32,
    mip_count: u32,
    working_format: wgpu::TextureFormat,
    warned: HashSet<TextureIdentity>,
}

impl ReflectionProbeCache {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kernels: &KernelRegistry,
        config: &PrismConfig,
        mip_count: u32,
    ) -> RenderResult<Self> {
        config.validate()?;
        let format = config.probe_format;
        if format.is_block_compressed() && !device.features().contains(wgpu::Features::TEXTURE_COMPRESSION_BC) {
            return Err(RenderError::Config(
                "BC6H probe cache needs Features::TEXTURE_COMPRESSION_BC on the device".to_string(),
            ));
        }
        let working_format = format.working_format();
        if working_format == wgpu::TextureFormat::Rg11b10Ufloat
            && !device.features().contains(wgpu::Features::RG11B10UFLOAT_RENDERABLE)
        {
            return Err(RenderError::Config(
                "R11G11B10 probe cache needs Features::RG11B10UFLOAT_RENDERABLE on the device".to_string(),
            ));
        }

        let resolution = config.probe_resolution;
        let capacity = config.probe_cache_capacity;
        let cube = |label: &str, mips: u32, usage: wgpu::TextureUsages| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d { width: resolution, height: resolution, depth_or_array_layers: FACES },
                mip_level_count: mips,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: working_format,
                usage,
                view_formats: &[],
            })
        };
        let staging = cube(
            "probe_staging_cube",
            full_mip_count(resolution),
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        );
        let convolution = cube(
            "probe_convolution_cube",
            mip_count,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        );
        let cache = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("reflection_probe_cache"),
            size: wgpu::Extent3d { width: resolution, height: resolution, depth_or_array_layers: FACES * capacity },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format.texture_format(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let cache_view = cache.create_view(&wgpu::TextureViewDescriptor {
            label: Some("reflection_probe_cache_view"),
            dimension: Some(wgpu::TextureViewDimension::CubeArray),
            ..Default::default()
        });
        let bc6h = format
            .is_block_compressed()
            .then(|| Bc6hEncoder::new(device, queue, kernels, resolution, mip_count));

        log::info!(
            "reflection probe cache: {} x {}px cubes, {:?}, {} mips",
            capacity,
            resolution,
            format.texture_format(),
            mip_count
        );
        Ok(Self {
            texture_cache: TextureCache::new(capacity),
            blitter: CubeBlitter::new(device, queue, kernels, working_format),
            bc6h,
            staging,
            convolution,
            cache,
            cache_view,
            resolution,
            mip_count,
            working_format,
            warned: HashSet::new(),
        })
    }

    pub fn new_frame(&mut self) {
        self.texture_cache.new_frame();
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.texture_cache
    }

    /// Cube-array view of every slot, bound by the lighting pass.
    pub fn cache_view(&self) -> &wgpu::TextureView {
        &self.cache_view
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Slot holding the prefiltered `source`, convolving it first if the slot is new or stale.
    /// `None` when the cache is full this frame or the source is not a cubemap.
    pub fn fetch_slice(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        filter: &CubemapFilter,
        source: &ProbeSource,
    ) -> Option<u32> {
        let reservation = self.texture_cache.reserve(source.identity, source.content_hash())?;
        if reservation.needs_update {
            if !self.convolve_and_store(device, encoder, filter, source, reservation.slot) {
                self.texture_cache.release(reservation.slot);
                return None;
            }
            self.texture_cache.set_slot_hash(reservation.slot, source.content_hash());
        }
        Some(reservation.slot)
    }

    /// Prefilter `source` into `slot`. Returns false (and records nothing) for non-cube sources.
    pub fn convolve_and_store(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        filter: &CubemapFilter,
        source: &ProbeSource,
        slot: u32,
    ) -> bool {
        if !source.is_cube() {
            if self.warned.insert(source.identity) {
                log::warn!(
                    "{} probe texture {} has {} layers; reflection probes must be cubemaps, skipping",
                    if source.realtime { "realtime" } else { "baked" },
                    source.identity.handle,
                    source.layers
                );
            }
            return false;
        }

        match staging_path(source.size, source.format, self.resolution, self.working_format) {
            StagingPath::Convert => self.blitter.convert(device, encoder, source, &self.staging),
            StagingPath::Copy => encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &source.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &self.staging,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d { width: self.resolution, height: self.resolution, depth_or_array_layers: FACES },
            ),
        }
        self.blitter
            .generate_mips(device, encoder, &self.staging, full_mip_count(self.resolution));
        filter.filter(device, encoder, &self.staging, &self.convolution);

        match &self.bc6h {
            Some(bc6h) => bc6h.encode(device, encoder, &self.convolution, &self.cache, slot),
            None => {
                for mip in 0..self.mip_count {
                    let size = (self.resolution >> mip).max(1);
                    encoder.copy_texture_to_texture(
                        wgpu::ImageCopyTexture {
                            texture: &self.convolution,
                            mip_level: mip,
                            origin: wgpu::Origin3d::ZERO,
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::ImageCopyTexture {
                            texture: &self.cache,
                            mip_level: mip,
                            origin: wgpu::Origin3d { x: 0, y: 0, z: slot * FACES },
                            aspect: wgpu::TextureAspect::All,
                        },
                        wgpu::Extent3d { width: size, height: size, depth_or_array_layers: FACES },
                    );
                }
            }
        }
        log::debug!("probe cache: convolved texture {:?} into slot {}", source.identity, slot);
        true
    }

    /// When nothing was convolved this frame, reconvolve one probe fetched this frame, cycling
    /// through them across frames. Clears the frame's prepared sources either way.
    pub fn relight(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        filter: &CubemapFilter,
        sources: &ProbeSources,
        probe_count: u32,
    ) {
        if probe_count > 0 && !self.texture_cache.updated_this_frame() {
            if let Some((slot, identity)) = self.texture_cache.next_relight() {
                match sources.get(identity.handle).filter(|s| s.identity == identity) {
                    Some(source) => {
                        if self.convolve_and_store(device, encoder, filter, source, slot) {
                            self.texture_cache.set_slot_hash(slot, source.content_hash());
                        }
                    }
                    None => log::debug!("probe cache: relight source {:?} no longer uploaded", identity),
                }
            }
        }
        self.texture_cache.clear_prepared();
    }
}

/// `EnvSlotSource` backed by the GPU cache; convolutions are recorded into `encoder`.
pub struct ProbeSlotFetcher<'a> {
    pub cache: &'a mut ReflectionProbeCache,
    pub sources: &'a ProbeSources,
    pub filter: &'a CubemapFilter,
    pub device: &'a wgpu::Device,
    pub encoder: &'a mut wgpu::CommandEncoder,
}

impl EnvSlotSource for ProbeSlotFetcher<'_> {
    fn fetch_slice(&mut self, texture_id: u64) -> Option<u32> {
        let Some(source) = self.sources.get(texture_id) else {
            log::debug!("probe cache: texture {} not uploaded, probe skipped", texture_id);
            return None;
        };
        self.cache.fetch_slice(self.device, self.encoder, self.filter, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_source_is_copied() {
        let f = wgpu::TextureFormat::Rgba16Float;
        assert_eq!(staging_path(128, f, 128, f), StagingPath::Copy);
    }

    #[test]
    fn size_or_format_mismatch_is_converted() {
        let f = wgpu::TextureFormat::Rgba16Float;
        assert_eq!(staging_path(256, f, 128, f), StagingPath::Convert);
        assert_eq!(staging_path(128, wgpu::TextureFormat::Rgba8Unorm, 128, f), StagingPath::Convert);
    }

    #[test]
    fn blit_params_match_wgsl() {
        assert_eq!(std::mem::size_of::<BlitFace>(), 16);
    }
}
