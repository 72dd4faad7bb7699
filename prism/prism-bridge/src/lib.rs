//! Prism bridge: implements render_api::RenderBackend using prism-renderer.

mod plugin;
mod window_backend;

pub use plugin::PrismPlugin;
pub use window_backend::PrismWindowBackend;
