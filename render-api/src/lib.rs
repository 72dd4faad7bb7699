//! Shared render backend API.
//! Defines Extract types and the RenderBackend trait so the host drives the Prism plugin
//! through one code path (prepare + render_frame) without touching wgpu.

mod extract;
mod backend;

pub use extract::{
    ExtractedLight, ExtractedMaterial, ExtractedMesh, ExtractedProbeTexture, ExtractedReflectionProbe,
    ExtractedScene, ExtractedView, LightKind, OutputTarget, ProbeTextureFormat,
};
pub use backend::{RenderBackend, RenderBackendWindow};
pub use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
