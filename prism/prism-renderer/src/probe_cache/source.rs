//! GPU copies of host probe textures, keyed by host texture id, with generation tracking.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use render_api::{ExtractedProbeTexture, ProbeTextureFormat};

use super::texture_cache::TextureIdentity;

pub fn texture_format(format: ProbeTextureFormat) -> wgpu::TextureFormat {
    match format {
        ProbeTextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ProbeTextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ProbeTextureFormat::Rg11b10Ufloat => wgpu::TextureFormat::Rg11b10Ufloat,
    }
}

/// One uploaded probe source.
pub struct ProbeSource {
    pub identity: TextureIdentity,
    pub texture: wgpu::Texture,
    pub size: u32,
    pub format: wgpu::TextureFormat,
    pub layers: u32,
    pub realtime: bool,
    pub version: u64,
}

impl ProbeSource {
    pub fn is_cube(&self) -> bool {
        self.layers == 6
    }

    /// Deterministic hash of what the texture holds; equal hashes mean the cached convolution is
    /// still valid.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.identity.hash(&mut hasher);
        self.version.hash(&mut hasher);
        hasher.finish()
    }

    pub fn cube_view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("probe_source_cube_view"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct ProbeSources {
    sources: HashMap<u64, ProbeSource>,
    generations: HashMap<u64, u32>,
}

impl ProbeSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, texture_id: u64) -> Option<&ProbeSource> {
        self.sources.get(&texture_id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Create or refresh the GPU copy of a host probe texture. A changed size, format or layer
    /// count recreates the texture under a new generation.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, extracted: &ExtractedProbeTexture) {
        let format = texture_format(extracted.format);
        let size = extracted.size.max(1);
        let layers = extracted.layers.max(1);
        let reusable = self
            .sources
            .get(&extracted.texture_id)
            .is_some_and(|s| s.size == size && s.format == format && s.layers == layers);

        if !reusable {
            let generation = self
                .generations
                .entry(extracted.texture_id)
                .and_modify(|g| *g = g.wrapping_add(1))
                .or_insert(0);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some("probe_source"),
                size: wgpu::Extent3d { width: size, height: size, depth_or_array_layers: layers },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            self.sources.insert(
                extracted.texture_id,
                ProbeSource {
                    identity: TextureIdentity { handle: extracted.texture_id, generation: *generation },
                    texture,
                    size,
                    format,
                    layers,
                    realtime: extracted.realtime,
                    version: extracted.version.wrapping_add(1),
                },
            );
        }

        let Some(source) = self.sources.get_mut(&extracted.texture_id) else {
            return;
        };
        source.realtime = extracted.realtime;
        if source.version == extracted.version {
            return;
        }
        let bpp = extracted.format.bytes_per_texel();
        let expected = size as usize * size as usize * layers as usize * bpp;
        if extracted.data.len() != expected {
            log::warn!(
                "probe texture {}: {} bytes of data, expected {} ({}x{}x{} {:?}); contents not uploaded",
                extracted.texture_id,
                extracted.data.len(),
                expected,
                size,
                size,
                layers,
                extracted.format
            );
            return;
        }
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &extracted.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(size * bpp as u32),
                rows_per_image: Some(size),
            },
            wgpu::Extent3d { width: size, height: size, depth_or_array_layers: layers },
        );
        source.version = extracted.version;
    }

    /// Drop sources the host no longer extracts.
    pub fn retain(&mut self, live: impl Fn(u64) -> bool) {
        self.sources.retain(|id, _| live(*id));
    }
}
