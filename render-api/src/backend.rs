//! Trait for render backends. Host uses this to call prepare/render_frame uniformly.

use crate::{ExtractedScene, ExtractedView};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Render backend driven by the host once per frame per camera.
pub trait RenderBackend: Send {
    /// Prepare phase: upload extracted meshes and probe textures to the GPU and register resources.
    fn prepare(&mut self, extracted: &ExtractedScene);

    /// Render one camera. Submits work internally; caller does not need to submit command buffers.
    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String>;
}

/// Extension for backends that can present to a window. Host passes raw handles (e.g. from winit);
/// the backend owns swapchain/surface and performs get_current_texture + present internally.
pub trait RenderBackendWindow: RenderBackend + Send {
    /// Render one frame and present to the window identified by the given raw handles.
    /// The backend configures the surface from `view.viewport_size` and submits work.
    fn render_frame_to_window(
        &mut self,
        view: &ExtractedView,
        raw_window_handle: RawWindowHandle,
        raw_display_handle: RawDisplayHandle,
    ) -> Result<(), String>;
}
