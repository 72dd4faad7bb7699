//! Shader kernel registry: every WGSL program is compiled once at renderer construction and looked
//! up by `Kernel` afterwards.

macro_rules! shader {
    ($name:literal) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/", $name))
    };
}

const LIGHT_TYPES: &str = shader!("light_types.wgsl");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    GBuffer,
    BuildLightGrid,
    DeferredLighting,
    CubeBlit,
    CubemapFilter,
    Bc6hEncode,
    FinalBlit,
}

impl Kernel {
    pub const ALL: [Kernel; 7] = [
        Kernel::GBuffer,
        Kernel::BuildLightGrid,
        Kernel::DeferredLighting,
        Kernel::CubeBlit,
        Kernel::CubemapFilter,
        Kernel::Bc6hEncode,
        Kernel::FinalBlit,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Kernel::GBuffer => "gbuffer_shader",
            Kernel::BuildLightGrid => "build_light_grid_shader",
            Kernel::DeferredLighting => "deferred_lighting_shader",
            Kernel::CubeBlit => "cube_blit_shader",
            Kernel::CubemapFilter => "cubemap_filter_shader",
            Kernel::Bc6hEncode => "bc6h_encode_shader",
            Kernel::FinalBlit => "final_blit_shader",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Kernel::GBuffer => shader!("gbuffer.wgsl"),
            Kernel::BuildLightGrid => shader!("build_light_grid.wgsl"),
            Kernel::DeferredLighting => shader!("deferred_lighting.wgsl"),
            Kernel::CubeBlit => shader!("cube_blit.wgsl"),
            Kernel::CubemapFilter => shader!("cubemap_filter.wgsl"),
            Kernel::Bc6hEncode => shader!("bc6h_encode.wgsl"),
            Kernel::FinalBlit => shader!("final_blit.wgsl"),
        }
    }

    fn uses_light_types(&self) -> bool {
        matches!(self, Kernel::BuildLightGrid | Kernel::DeferredLighting)
    }

    /// Full WGSL source, with the shared light/cluster declarations prepended where needed.
    pub fn source(&self) -> String {
        if self.uses_light_types() {
            format!("{}\n{}", LIGHT_TYPES, self.body())
        } else {
            self.body().to_string()
        }
    }
}

pub struct KernelRegistry {
    modules: Vec<wgpu::ShaderModule>,
}

impl KernelRegistry {
    pub fn new(device: &wgpu::Device) -> Self {
        let modules = Kernel::ALL
            .iter()
            .map(|kernel| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(kernel.label()),
                    source: wgpu::ShaderSource::Wgsl(kernel.source().into()),
                })
            })
            .collect();
        log::info!("kernel registry: compiled {} shader modules", Kernel::ALL.len());
        Self { modules }
    }

    pub fn module(&self, kernel: Kernel) -> &wgpu::ShaderModule {
        &self.modules[kernel as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_order_matches_discriminants() {
        for (i, kernel) in Kernel::ALL.iter().enumerate() {
            assert_eq!(*kernel as usize, i);
        }
    }

    #[test]
    fn cluster_kernels_share_light_types() {
        assert!(Kernel::BuildLightGrid.source().contains("struct LightBound"));
        assert!(Kernel::DeferredLighting.source().contains("struct ClusterConstants"));
        assert!(!Kernel::FinalBlit.source().contains("struct LightBound"));
    }

    #[test]
    fn entry_points_present() {
        let grid = Kernel::BuildLightGrid.source();
        assert!(grid.contains("fn clear_global_counter"));
        assert!(grid.contains("fn build_cluster_light_grid"));
        assert!(Kernel::CubemapFilter.source().contains("fn fs_filter"));
        assert!(Kernel::Bc6hEncode.source().contains("fn encode_bc6h"));
    }
}
