//! Prism configuration: light budgets, cluster grid, probe cache, tone mapping, swapchain.

use crate::error::{RenderError, RenderResult};

/// Size of the per-invocation light list in the grid build kernel.
pub const MAX_LIGHTS_PER_CLUSTER_LIMIT: u32 = 64;

/// Tone mapping mode for the final blit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapping {
    #[default]
    Reinhard,
    /// No tone mapping (clamp).
    None,
}

/// Storage format of the reflection probe cache array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeFormat {
    /// Block compressed HDR (BC6H unsigned). Needs `Features::TEXTURE_COMPRESSION_BC`.
    Bc6hRgbUfloat,
    /// Packed float RGB.
    Rg11b10Ufloat,
    /// Half float RGBA.
    Rgba16Float,
    /// Anything else the host asked for; rejected by `PrismConfig::validate`.
    Unsupported(wgpu::TextureFormat),
}

impl ProbeFormat {
    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match self {
            ProbeFormat::Bc6hRgbUfloat => wgpu::TextureFormat::Bc6hRgbUfloat,
            ProbeFormat::Rg11b10Ufloat => wgpu::TextureFormat::Rg11b10Ufloat,
            ProbeFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            ProbeFormat::Unsupported(f) => *f,
        }
    }

    /// Format the convolution runs in before the result lands in the cache.
    pub fn working_format(&self) -> wgpu::TextureFormat {
        match self {
            ProbeFormat::Rg11b10Ufloat => wgpu::TextureFormat::Rg11b10Ufloat,
            _ => wgpu::TextureFormat::Rgba16Float,
        }
    }

    pub fn is_block_compressed(&self) -> bool {
        matches!(self, ProbeFormat::Bc6hRgbUfloat)
    }
}

/// Renderer and bridge configuration. Checked once by `Renderer::new_with_config`.
#[derive(Clone, Debug)]
pub struct PrismConfig {
    pub max_directional_lights: u32,
    pub max_punctual_lights: u32,
    pub max_env_lights: u32,
    /// Cluster tile edge in pixels.
    pub cluster_tile_size: u32,
    /// Number of geometric depth slices.
    pub cluster_depth_slices: u32,
    /// Max light indices stored per cluster (all categories).
    pub cluster_max_lights: u32,
    /// Face edge length of every cubemap in the probe cache.
    pub probe_resolution: u32,
    /// Number of cubemaps the probe cache holds.
    pub probe_cache_capacity: u32,
    pub probe_format: ProbeFormat,
    /// Tone mapping for the final blit.
    pub tone_mapping: ToneMapping,
    /// Swapchain texture format for the final blit (e.g. Rgba8Unorm or Bgra8Unorm).
    pub swapchain_format: wgpu::TextureFormat,
}

impl Default for PrismConfig {
    fn default() -> Self {
        Self {
            max_directional_lights: 16,
            max_punctual_lights: 512,
            max_env_lights: 16,
            cluster_tile_size: 32,
            cluster_depth_slices: 64,
            cluster_max_lights: 32,
            probe_resolution: 128,
            probe_cache_capacity: 16,
            probe_format: ProbeFormat::Rgba16Float,
            tone_mapping: ToneMapping::default(),
            swapchain_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

impl PrismConfig {
    /// Misconfiguration is fatal: this runs once at construction and never per frame.
    pub fn validate(&self) -> RenderResult<()> {
        if matches!(self.probe_format, ProbeFormat::Unsupported(_)) {
            return Err(RenderError::Config(format!(
                "reflection probe cache format {:?} is unsupported; use BC6H, R11G11B10 or RGBA16F",
                self.probe_format.texture_format()
            )));
        }
        if !self.probe_resolution.is_power_of_two() || !(4..=2048).contains(&self.probe_resolution) {
            return Err(RenderError::Config(format!(
                "probe resolution {} must be a power of two in 4..=2048",
                self.probe_resolution
            )));
        }
        if self.probe_cache_capacity == 0 {
            return Err(RenderError::Config("probe cache capacity must be > 0".to_string()));
        }
        if self.cluster_tile_size == 0 {
            return Err(RenderError::Config("cluster tile size must be > 0".to_string()));
        }
        if !(1..=128).contains(&self.cluster_depth_slices) {
            return Err(RenderError::Config(format!(
                "cluster depth slices {} out of range 1..=128",
                self.cluster_depth_slices
            )));
        }
        if !(1..=MAX_LIGHTS_PER_CLUSTER_LIMIT).contains(&self.cluster_max_lights) {
            return Err(RenderError::Config(format!(
                "cluster max lights {} out of range 1..={}",
                self.cluster_max_lights, MAX_LIGHTS_PER_CLUSTER_LIMIT
            )));
        }
        Ok(())
    }

    /// Lights that take part in clustering.
    pub fn max_clustered_lights(&self) -> u32 {
        self.max_punctual_lights + self.max_env_lights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PrismConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_clustered_lights(), 528);
    }

    #[test]
    fn unsupported_probe_format_is_fatal() {
        let config = PrismConfig {
            probe_format: ProbeFormat::Unsupported(wgpu::TextureFormat::Rgba8Unorm),
            ..PrismConfig::default()
        };
        assert!(matches!(config.validate(), Err(RenderError::Config(_))));
    }

    #[test]
    fn every_listed_probe_format_is_accepted() {
        for format in [ProbeFormat::Bc6hRgbUfloat, ProbeFormat::Rg11b10Ufloat, ProbeFormat::Rgba16Float] {
            let config = PrismConfig { probe_format: format, ..PrismConfig::default() };
            assert!(config.validate().is_ok(), "{format:?}");
        }
    }

    #[test]
    fn cluster_light_list_is_bounded_by_kernel() {
        let config = PrismConfig { cluster_max_lights: MAX_LIGHTS_PER_CLUSTER_LIMIT + 1, ..PrismConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_power_of_two_probe_resolution_rejected() {
        let config = PrismConfig { probe_resolution: 100, ..PrismConfig::default() };
        assert!(config.validate().is_err());
    }
}
