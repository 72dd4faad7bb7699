//! Prism plugin: implements RenderBackend for the host.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use prism_renderer::{MeshDraw, PrismConfig, Renderer};
use render_api::{ExtractedMaterial, ExtractedScene, ExtractedView, RenderBackend};

/// Cached GPU buffers, world transform and material for one mesh.
struct CachedMesh {
    vertex_buf: Arc<wgpu::Buffer>,
    index_buf: Arc<wgpu::Buffer>,
    index_count: u32,
    vertex_len: usize,
    index_len: usize,
    transform: [f32; 16],
    material: ExtractedMaterial,
}

/// Render target used by `render_frame` when the host gives no output of its own.
struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

/// Prism plugin: owns the renderer (and through it the device and queue); implements RenderBackend.
pub struct PrismPlugin {
    renderer: Renderer,
    /// Cache by entity_id. Updated in prepare() from ExtractedScene.
    mesh_cache: HashMap<u64, CachedMesh>,
    offscreen: Option<OffscreenTarget>,
}

impl PrismPlugin {
    /// Create with wgpu device and queue (default config).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, String> {
        Self::new_with_config(device, queue, PrismConfig::default())
    }

    /// Create with config (output format, cluster grid, light limits, probe cache).
    pub fn new_with_config(device: wgpu::Device, queue: wgpu::Queue, config: PrismConfig) -> Result<Self, String> {
        let renderer = Renderer::new_with_config(device, queue, config).map_err(|e| e.to_string())?;
        Ok(Self { renderer, mesh_cache: HashMap::new(), offscreen: None })
    }

    /// Access device/queue if the host needs them (e.g. for swapchain).
    pub fn device(&self) -> &wgpu::Device {
        self.renderer.device()
    }
    pub fn queue(&self) -> &wgpu::Queue {
        self.renderer.queue()
    }
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Texture written by the last `render_frame`, if any.
    pub fn offscreen_texture(&self) -> Option<&wgpu::Texture> {
        self.offscreen.as_ref().map(|o| &o.texture)
    }

    /// Render one camera into a host-provided view of the configured output format.
    pub fn render_frame_to_view(&mut self, view: &ExtractedView, output: &wgpu::TextureView) -> Result<(), String> {
        let meshes = self.mesh_draws();
        self.renderer
            .render_to_view(view, &meshes, output)
            .map_err(|e| e.to_string())
    }

    fn mesh_draws(&self) -> Vec<MeshDraw> {
        self.mesh_cache
            .values()
            .map(|c| MeshDraw {
                vertex_buf: Arc::clone(&c.vertex_buf),
                index_buf: Arc::clone(&c.index_buf),
                index_count: c.index_count,
                transform: c.transform,
                material: c.material,
            })
            .collect()
    }

    fn ensure_offscreen(&mut self, size: (u32, u32)) {
        let size = (size.0.max(1), size.1.max(1));
        if self.offscreen.as_ref().is_some_and(|o| o.size == size) {
            return;
        }
        let texture = self.renderer.device().create_texture(&wgpu::TextureDescriptor {
            label: Some("prism_offscreen_output"),
            size: wgpu::Extent3d { width: size.0, height: size.1, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.renderer.config().swapchain_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        log::debug!("offscreen output resized to {}x{}", size.0, size.1);
        self.offscreen = Some(OffscreenTarget { texture, view, size });
    }

    fn upload_meshes(&mut self, extracted: &ExtractedScene) {
        let device = self.renderer.device();
        let queue = self.renderer.queue();
        let current_entities: HashSet<u64> = extracted.meshes.keys().copied().collect();
        self.mesh_cache.retain(|k, _| current_entities.contains(k));
        for (&entity_id, mesh) in &extracted.meshes {
            if !mesh.visible || mesh.vertex_data.is_empty() || mesh.index_data.is_empty() {
                self.mesh_cache.remove(&entity_id);
                continue;
            }
            let vertex_len = mesh.vertex_data.len();
            let index_len = mesh.index_data.len();
            let index_count = (index_len / 4) as u32;
            if let Some(cached) = self.mesh_cache.get_mut(&entity_id) {
                if cached.vertex_len == vertex_len && cached.index_len == index_len {
                    queue.write_buffer(&cached.vertex_buf, 0, &mesh.vertex_data);
                    queue.write_buffer(&cached.index_buf, 0, &mesh.index_data);
                    cached.transform = mesh.transform;
                    cached.material = mesh.material;
                    continue;
                }
            }
            let vertex_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("prism_mesh_vertex"),
                size: vertex_len as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&vertex_buf, 0, &mesh.vertex_data);
            let index_buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("prism_mesh_index"),
                size: index_len as u64,
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&index_buf, 0, &mesh.index_data);
            self.mesh_cache.insert(
                entity_id,
                CachedMesh {
                    vertex_buf: Arc::new(vertex_buf),
                    index_buf: Arc::new(index_buf),
                    index_count,
                    vertex_len,
                    index_len,
                    transform: mesh.transform,
                    material: mesh.material,
                },
            );
        }
    }
}

impl RenderBackend for PrismPlugin {
    fn prepare(&mut self, extracted: &ExtractedScene) {
        self.upload_meshes(extracted);
        for texture in extracted.probe_textures.values() {
            self.renderer.upload_probe_texture(texture);
        }
        self.renderer
            .retain_probe_textures(|id| extracted.probe_textures.contains_key(&id));
    }

    fn render_frame(&mut self, view: &ExtractedView) -> Result<(), String> {
        self.ensure_offscreen(view.viewport_size);
        let meshes = self.mesh_draws();
        let Some(offscreen) = self.offscreen.as_ref() else {
            return Err("offscreen output missing".to_string());
        };
        self.renderer
            .render_to_view(view, &meshes, &offscreen.view)
            .map_err(|e| e.to_string())
    }
}
