//! Reuse of transient graph resources across frames, keyed by their description.

use std::collections::HashMap;

use super::{BufferDesc, TextureDesc};

/// Frames an idle resource stays pooled before it is dropped.
const MAX_IDLE_FRAMES: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct TextureKey {
    width: u32,
    height: u32,
    layers: u32,
    mips: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
}

impl From<&TextureDesc> for TextureKey {
    fn from(desc: &TextureDesc) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            layers: desc.depth_or_array_layers,
            mips: desc.mip_level_count,
            format: desc.format,
            usage: desc.usage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BufferKey {
    size: u64,
    usage: wgpu::BufferUsages,
}

impl From<&BufferDesc> for BufferKey {
    fn from(desc: &BufferDesc) -> Self {
        Self { size: desc.size, usage: desc.usage }
    }
}

struct Pooled<T> {
    resource: T,
    last_used: u64,
}

#[derive(Default)]
pub struct TransientPool {
    frame: u64,
    textures: HashMap<TextureKey, Vec<Pooled<wgpu::Texture>>>,
    buffers: HashMap<BufferKey, Vec<Pooled<wgpu::Buffer>>>,
}

impl TransientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the frame counter and drop resources nobody asked for recently.
    pub fn begin_frame(&mut self) {
        self.frame += 1;
        let frame = self.frame;
        self.textures.retain(|_, list| {
            list.retain(|p| frame - p.last_used <= MAX_IDLE_FRAMES);
            !list.is_empty()
        });
        self.buffers.retain(|_, list| {
            list.retain(|p| frame - p.last_used <= MAX_IDLE_FRAMES);
            !list.is_empty()
        });
    }

    pub(super) fn acquire_texture(&mut self, device: &wgpu::Device, desc: &TextureDesc) -> wgpu::Texture {
        if let Some(pooled) = self.textures.get_mut(&TextureKey::from(desc)).and_then(|list| list.pop()) {
            return pooled.resource;
        }
        log::debug!("transient pool: allocating texture '{}' {}x{}", desc.label, desc.width, desc.height);
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth_or_array_layers,
            },
            mip_level_count: desc.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        })
    }

    pub(super) fn release_texture(&mut self, desc: &TextureDesc, texture: wgpu::Texture) {
        let last_used = self.frame;
        self.textures
            .entry(TextureKey::from(desc))
            .or_default()
            .push(Pooled { resource: texture, last_used });
    }

    pub(super) fn acquire_buffer(&mut self, device: &wgpu::Device, desc: &BufferDesc) -> wgpu::Buffer {
        if let Some(pooled) = self.buffers.get_mut(&BufferKey::from(desc)).and_then(|list| list.pop()) {
            return pooled.resource;
        }
        log::debug!("transient pool: allocating buffer '{}' ({} bytes)", desc.label, desc.size);
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: desc.usage,
            mapped_at_creation: false,
        })
    }

    pub(super) fn release_buffer(&mut self, desc: &BufferDesc, buffer: wgpu::Buffer) {
        let last_used = self.frame;
        self.buffers
            .entry(BufferKey::from(desc))
            .or_default()
            .push(Pooled { resource: buffer, last_used });
    }

    pub fn pooled_texture_count(&self) -> usize {
        self.textures.values().map(Vec::len).sum()
    }

    pub fn pooled_buffer_count(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }
}
