//! Frame resources: logical id -> graph handle for the current frame. Cleared at frame start, so
//! a handle never leaks into the next frame's graph.

use std::collections::HashMap;

use crate::error::{RenderError, RenderResult};
use crate::graph::{TextureDesc, TextureHandle};

pub const GBUFFER0_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const GBUFFER1_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const GBUFFER2_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const GBUFFER3_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const LIGHTING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameResource {
    /// World normal.
    GBuffer0,
    /// Albedo.
    GBuffer1,
    /// Metallic, roughness, occlusion.
    GBuffer2,
    /// Baked GI.
    GBuffer3,
    Depth,
    /// HDR output of the lighting resolve.
    LightingColor,
    Backbuffer,
}

impl FrameResource {
    pub const GBUFFERS: [FrameResource; 4] =
        [FrameResource::GBuffer0, FrameResource::GBuffer1, FrameResource::GBuffer2, FrameResource::GBuffer3];

    pub fn label(&self) -> &'static str {
        match self {
            FrameResource::GBuffer0 => "gbuffer0",
            FrameResource::GBuffer1 => "gbuffer1",
            FrameResource::GBuffer2 => "gbuffer2",
            FrameResource::GBuffer3 => "gbuffer3",
            FrameResource::Depth => "depth",
            FrameResource::LightingColor => "lighting_color",
            FrameResource::Backbuffer => "backbuffer",
        }
    }

    /// Format of renderer-owned targets; `None` for the imported backbuffer.
    pub fn format(&self) -> Option<wgpu::TextureFormat> {
        match self {
            FrameResource::GBuffer0 => Some(GBUFFER0_FORMAT),
            FrameResource::GBuffer1 => Some(GBUFFER1_FORMAT),
            FrameResource::GBuffer2 => Some(GBUFFER2_FORMAT),
            FrameResource::GBuffer3 => Some(GBUFFER3_FORMAT),
            FrameResource::Depth => Some(DEPTH_FORMAT),
            FrameResource::LightingColor => Some(LIGHTING_FORMAT),
            FrameResource::Backbuffer => None,
        }
    }

    /// Transient description at the given size, cleared to black by its first writer.
    pub fn desc(&self, width: u32, height: u32) -> Option<TextureDesc> {
        let format = self.format()?;
        let desc = TextureDesc::render_target(self.label(), width, height, format);
        Some(match self {
            FrameResource::Depth => desc,
            _ => desc.with_clear(wgpu::Color::TRANSPARENT),
        })
    }
}

#[derive(Default)]
pub struct FrameResources {
    handles: HashMap<FrameResource, TextureHandle>,
    width: u32,
    height: u32,
}

impl FrameResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self, width: u32, height: u32) {
        self.handles.clear();
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set(&mut self, id: FrameResource, handle: TextureHandle) {
        self.handles.insert(id, handle);
    }

    pub fn get(&self, id: FrameResource) -> Option<TextureHandle> {
        self.handles.get(&id).copied()
    }

    pub fn require(&self, id: FrameResource) -> RenderResult<TextureHandle> {
        self.get(id).ok_or_else(|| {
            RenderError::resource(format!("frame resource {} not produced this frame", id.label()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RenderGraph;

    #[test]
    fn handles_do_not_survive_the_frame() {
        let mut graph = RenderGraph::new();
        let mut resources = FrameResources::new();
        resources.begin_frame(64, 32);
        let desc = FrameResource::GBuffer0.desc(64, 32).unwrap();
        resources.set(FrameResource::GBuffer0, graph.create_texture(desc));
        assert!(resources.require(FrameResource::GBuffer0).is_ok());

        resources.begin_frame(64, 32);
        assert_eq!(resources.get(FrameResource::GBuffer0), None);
        assert!(matches!(resources.require(FrameResource::GBuffer0), Err(RenderError::Resource(_))));
    }

    #[test]
    fn gbuffer_layout() {
        assert_eq!(FrameResource::GBuffer0.format(), Some(wgpu::TextureFormat::Rgba16Float));
        assert_eq!(FrameResource::GBuffer1.format(), Some(wgpu::TextureFormat::Rgba8Unorm));
        assert_eq!(FrameResource::GBuffer2.format(), Some(wgpu::TextureFormat::Rgba8Unorm));
        assert_eq!(FrameResource::GBuffer3.format(), Some(wgpu::TextureFormat::Rgba16Float));
        assert_eq!(FrameResource::Depth.format(), Some(wgpu::TextureFormat::Depth32Float));
        assert!(FrameResource::Backbuffer.desc(8, 8).is_none());
    }

    #[test]
    fn color_targets_clear_and_depth_does_not_use_color_clear() {
        assert!(FrameResource::LightingColor.desc(8, 8).unwrap().clear_color.is_some());
        assert!(FrameResource::Depth.desc(8, 8).unwrap().clear_color.is_none());
    }

    #[test]
    fn zero_sized_frame_is_clamped() {
        let mut resources = FrameResources::new();
        resources.begin_frame(0, 0);
        assert_eq!((resources.width(), resources.height()), (1, 1));
    }
}
