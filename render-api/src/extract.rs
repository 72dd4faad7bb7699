//! Data types for extraction from the host engine into the render world.
//! The host culls its scene and fills these each frame, once per camera.

use std::collections::HashMap;

/// Per-mesh instance data extracted from the main world.
#[derive(Clone, Debug)]
pub struct ExtractedMesh {
    /// Host-defined entity or instance id.
    pub entity_id: u64,
    /// Vertex data: position + normal, 6 f32 per vertex (24 bytes).
    pub vertex_data: Vec<u8>,
    /// Index data (u32 indices).
    pub index_data: Vec<u8>,
    /// World transform: column-major 4x4 matrix (WGSL/wgpu convention).
    /// Index [col*4+row]; e.g. m[0..4] is the first column.
    pub transform: [f32; 16],
    /// Flat surface description written into the GBuffer.
    pub material: ExtractedMaterial,
    /// Whether this instance is visible.
    pub visible: bool,
}

/// Flat PBR material. Linear RGB.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExtractedMaterial {
    pub albedo: [f32; 3],
    pub metallic: f32,
    pub roughness: f32,
    pub occlusion: f32,
    /// Baked diffuse GI (lightmap / probe result) already resolved by the host.
    pub baked_gi: [f32; 3],
}

impl Default for ExtractedMaterial {
    fn default() -> Self {
        Self {
            albedo: [0.8, 0.8, 0.8],
            metallic: 0.0,
            roughness: 0.5,
            occlusion: 1.0,
            baked_gi: [0.03, 0.03, 0.03],
        }
    }
}

/// Pixel format of a host probe texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeTextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rg11b10Ufloat,
}

impl ProbeTextureFormat {
    pub fn bytes_per_texel(&self) -> usize {
        match self {
            ProbeTextureFormat::Rgba8Unorm => 4,
            ProbeTextureFormat::Rgba16Float => 8,
            ProbeTextureFormat::Rg11b10Ufloat => 4,
        }
    }
}

/// Source texture of a reflection probe: baked cubemap or realtime render target contents.
#[derive(Clone, Debug)]
pub struct ExtractedProbeTexture {
    /// Host texture id. Used as the cache identity together with a generation the backend tracks.
    pub texture_id: u64,
    /// Face edge length in texels.
    pub size: u32,
    pub format: ProbeTextureFormat,
    /// Number of array layers the host texture has; a valid cubemap has 6.
    pub layers: u32,
    /// Realtime probes are re-rendered by the host; baked probes are static assets.
    pub realtime: bool,
    /// Bumped by the host whenever the texel contents change.
    pub version: u64,
    /// Mip 0 of every layer, tightly packed, layer-major.
    pub data: Vec<u8>,
}

/// All extracted scene data the backend uploads and caches.
#[derive(Default, Debug)]
pub struct ExtractedScene {
    pub meshes: HashMap<u64, ExtractedMesh>,
    pub probe_textures: HashMap<u64, ExtractedProbeTexture>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// A light that survived the host's frustum culling.
#[derive(Clone, Debug)]
pub struct ExtractedLight {
    pub kind: LightKind,
    /// Light local-to-world, column-major. Column 2 is the light forward, column 3 the position.
    pub local_to_world: [f32; 16],
    pub range: f32,
    /// Final linear color (color * intensity).
    pub color: [f32; 3],
    /// Full cone angle in degrees (spot lights only).
    pub spot_angle: f32,
}

/// A reflection probe that survived the host's frustum culling.
#[derive(Clone, Debug)]
pub struct ExtractedReflectionProbe {
    pub bounds_center: [f32; 3],
    pub bounds_extents: [f32; 3],
    pub blend_distance: f32,
    /// Id of an `ExtractedProbeTexture` registered through `prepare`; None when the probe has nothing baked.
    pub texture_id: Option<u64>,
    pub active: bool,
}

/// Where the final image goes; decides the vertical flip of the final blit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputTarget {
    /// On-screen backbuffer of a graphics API whose UV origin is top-left when `uv_starts_at_top`.
    Backbuffer { uv_starts_at_top: bool },
    /// Host-owned render texture sampled later with the host's own convention.
    Offscreen { flip_y: bool },
}

/// View/camera data for the current frame.
#[derive(Clone, Debug)]
pub struct ExtractedView {
    /// World-to-view, column-major, right-handed (-Z forward).
    pub world_to_view: [f32; 16],
    /// View-to-clip, column-major, wgpu NDC (z in [0, 1]).
    pub projection: [f32; 16],
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    /// Camera pixel rect inside the output: (x, y, width, height).
    pub pixel_rect: (u32, u32, u32, u32),
    /// Size of the output the pixel rect lives in.
    pub viewport_size: (u32, u32),
    pub output: OutputTarget,
    pub lights: Vec<ExtractedLight>,
    pub reflection_probes: Vec<ExtractedReflectionProbe>,
}

impl ExtractedView {
    pub fn aspect(&self) -> f32 {
        let (_, _, w, h) = self.pixel_rect;
        if h == 0 {
            1.0
        } else {
            w as f32 / h as f32
        }
    }
}

impl Default for ExtractedView {
    fn default() -> Self {
        let identity = [
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ];
        Self {
            world_to_view: identity,
            projection: identity,
            fov_y: 60.0,
            near: 0.1,
            far: 100.0,
            pixel_rect: (0, 0, 800, 600),
            viewport_size: (800, 600),
            output: OutputTarget::Backbuffer { uv_starts_at_top: true },
            lights: Vec::new(),
            reflection_probes: Vec::new(),
        }
    }
}
