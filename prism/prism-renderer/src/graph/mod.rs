//! Prism render graph: per-frame resource declarations, read/write dependencies and pass ordering.
//!
//! Passes declare the resources they read and write; edges are derived from those
//! declarations (read-after-write, write-after-read, write-after-write) and passes run in a
//! stable topological order. Transient resources come from a `TransientPool`, live for one
//! `execute` and go back to the pool afterwards. Imported resources are borrowed for the frame.

mod pool;

pub use pool::TransientPool;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub ResourceId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub ResourceId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    Read,
    Write,
    ReadWrite,
}

impl ResourceUsage {
    pub fn is_write(&self) -> bool {
        matches!(self, ResourceUsage::Write | ResourceUsage::ReadWrite)
    }
    pub fn is_read(&self) -> bool {
        matches!(self, ResourceUsage::Read | ResourceUsage::ReadWrite)
    }
    fn merge(self, other: ResourceUsage) -> ResourceUsage {
        if self == other {
            self
        } else {
            ResourceUsage::ReadWrite
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    /// Cleared by the first pass that writes it (via `PassContext::color_load_op`).
    pub clear_color: Option<wgpu::Color>,
}

impl TextureDesc {
    /// Single-mip 2D render target.
    pub fn render_target(label: &'static str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label,
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
            mip_level_count: 1,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            clear_color: None,
        }
    }

    pub fn with_clear(mut self, color: wgpu::Color) -> Self {
        self.clear_color = Some(color);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: wgpu::BufferUsages,
}

enum ResourceEntry<'a> {
    TransientTexture(TextureDesc),
    TransientBuffer(BufferDesc),
    ImportedTexture { texture: &'a wgpu::Texture, view: wgpu::TextureView },
    ImportedView(&'a wgpu::TextureView),
    ImportedBuffer(&'a wgpu::Buffer),
}

impl ResourceEntry<'_> {
    fn is_transient(&self) -> bool {
        matches!(self, ResourceEntry::TransientTexture(_) | ResourceEntry::TransientBuffer(_))
    }
}

type RenderFunc<'a> = Box<dyn FnOnce(&mut PassContext<'_>) -> RenderResult<()> + 'a>;

struct PassNode<'a> {
    name: &'static str,
    usage: Vec<(ResourceId, ResourceUsage)>,
    async_compute: bool,
    render_func: Option<RenderFunc<'a>>,
}

/// One frame's worth of passes and resources.
pub struct RenderGraph<'a> {
    passes: Vec<PassNode<'a>>,
    resources: Vec<ResourceEntry<'a>>,
}

impl Default for RenderGraph<'_> {
    fn default() -> Self {
        Self { passes: Vec::new(), resources: Vec::new() }
    }
}

impl<'a> RenderGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_resource(&mut self, entry: ResourceEntry<'a>) -> ResourceId {
        let id = ResourceId(self.resources.len());
        self.resources.push(entry);
        id
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> TextureHandle {
        TextureHandle(self.add_resource(ResourceEntry::TransientTexture(desc)))
    }

    pub fn create_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        BufferHandle(self.add_resource(ResourceEntry::TransientBuffer(desc)))
    }

    pub fn import_texture(&mut self, texture: &'a wgpu::Texture, view_desc: &wgpu::TextureViewDescriptor) -> TextureHandle {
        let view = texture.create_view(view_desc);
        TextureHandle(self.add_resource(ResourceEntry::ImportedTexture { texture, view }))
    }

    /// Import a bare view (e.g. a swapchain image the host owns).
    pub fn import_view(&mut self, view: &'a wgpu::TextureView) -> TextureHandle {
        TextureHandle(self.add_resource(ResourceEntry::ImportedView(view)))
    }

    pub fn import_buffer(&mut self, buffer: &'a wgpu::Buffer) -> BufferHandle {
        BufferHandle(self.add_resource(ResourceEntry::ImportedBuffer(buffer)))
    }

    pub fn add_pass(&mut self, name: &'static str) -> PassBuilder<'_, 'a> {
        let index = self.passes.len();
        self.passes.push(PassNode { name, usage: Vec::new(), async_compute: false, render_func: None });
        PassBuilder { graph: self, index }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Derive dependencies and order the passes. Does not touch the GPU.
    pub fn compile(&self) -> RenderResult<CompiledGraph> {
        let n = self.passes.len();
        let mut edges: Vec<(NodeId, NodeId)> = Vec::new();
        let mut last_writer: HashMap<ResourceId, usize> = HashMap::new();
        let mut readers: HashMap<ResourceId, Vec<usize>> = HashMap::new();
        for (p, pass) in self.passes.iter().enumerate() {
            for &(res, usage) in &pass.usage {
                if res.0 >= self.resources.len() {
                    return Err(RenderError::graph(format!("pass '{}' uses unknown resource {:?}", pass.name, res)));
                }
                if usage.is_read() {
                    match last_writer.get(&res) {
                        Some(&w) if w != p => edges.push((NodeId(w), NodeId(p))),
                        Some(_) => {}
                        None if self.resources[res.0].is_transient() && !usage.is_write() => {
                            return Err(RenderError::graph(format!(
                                "pass '{}' reads transient resource {:?} before any pass writes it",
                                pass.name, res
                            )));
                        }
                        None => {}
                    }
                }
                if usage.is_write() {
                    if let Some(&w) = last_writer.get(&res) {
                        if w != p {
                            edges.push((NodeId(w), NodeId(p)));
                        }
                    }
                    for &r in readers.get(&res).into_iter().flatten() {
                        if r != p {
                            edges.push((NodeId(r), NodeId(p)));
                        }
                    }
                    last_writer.insert(res, p);
                    readers.remove(&res);
                } else {
                    readers.entry(res).or_default().push(p);
                }
            }
        }
        edges.sort();
        edges.dedup();

        let order = topological_order(n, &edges)?;
        let mut position = vec![0usize; n];
        for (i, &p) in order.iter().enumerate() {
            position[p] = i;
        }

        let mut lifetimes: HashMap<ResourceId, (usize, usize)> = HashMap::new();
        let mut first_writer: HashMap<ResourceId, usize> = HashMap::new();
        for &p in &order {
            for &(res, usage) in &self.passes[p].usage {
                let pos = position[p];
                lifetimes
                    .entry(res)
                    .and_modify(|(first, last)| {
                        *first = (*first).min(pos);
                        *last = (*last).max(pos);
                    })
                    .or_insert((pos, pos));
                if usage.is_write() {
                    first_writer.entry(res).or_insert(p);
                }
            }
        }

        let async_passes: Vec<usize> = (0..n).filter(|&p| self.passes[p].async_compute).collect();
        let join_points: Vec<(usize, usize)> = edges
            .iter()
            .filter(|(a, b)| self.passes[a.0].async_compute && !self.passes[b.0].async_compute)
            .map(|&(a, b)| (a.0, b.0))
            .collect();

        Ok(CompiledGraph {
            pass_names: self.passes.iter().map(|p| p.name).collect(),
            order,
            edges,
            async_passes,
            join_points,
            lifetimes,
            first_writer,
        })
    }

    /// Compile, realize transient resources and record every pass into `encoder`.
    /// Transient resources return to `pool` when this returns, so none outlive the frame.
    pub fn execute(
        mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        pool: &mut TransientPool,
    ) -> RenderResult<CompiledGraph> {
        let compiled = self.compile()?;
        log::debug!(
            "render graph: {} passes, order {:?}, async {:?}, joins {:?}",
            compiled.pass_names.len(),
            compiled.ordered_names(),
            compiled.async_passes,
            compiled.join_points
        );

        let resources = std::mem::take(&mut self.resources);
        let mut realized = Vec::with_capacity(resources.len());
        for (i, entry) in resources.into_iter().enumerate() {
            let used = compiled.lifetimes.contains_key(&ResourceId(i));
            realized.push(match entry {
                ResourceEntry::TransientTexture(desc) if used => {
                    let texture = pool.acquire_texture(device, &desc);
                    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                    Realized::Texture { texture, view, desc }
                }
                ResourceEntry::TransientBuffer(desc) if used => Realized::Buffer { buffer: pool.acquire_buffer(device, &desc), desc },
                ResourceEntry::TransientTexture(_) | ResourceEntry::TransientBuffer(_) => Realized::Unused,
                ResourceEntry::ImportedTexture { texture, view } => Realized::ImportedTexture { texture, view },
                ResourceEntry::ImportedView(view) => Realized::ImportedView(view),
                ResourceEntry::ImportedBuffer(buffer) => Realized::ImportedBuffer(buffer),
            });
        }
        let resources = GraphResources { entries: realized, first_writer: compiled.first_writer.clone() };

        let mut result = Ok(());
        for &p in &compiled.order {
            let Some(render_func) = self.passes[p].render_func.take() else {
                continue;
            };
            let mut ctx = PassContext { device, queue, encoder: &mut *encoder, resources: &resources, pass: p };
            if let Err(e) = render_func(&mut ctx) {
                result = Err(RenderError::graph(format!("pass '{}': {}", self.passes[p].name, e)));
                break;
            }
        }

        for entry in resources.entries {
            match entry {
                Realized::Texture { texture, desc, .. } => pool.release_texture(&desc, texture),
                Realized::Buffer { buffer, desc } => pool.release_buffer(&desc, buffer),
                _ => {}
            }
        }
        result.map(|_| compiled)
    }
}

/// Kahn's algorithm, always taking the lowest ready pass index so declaration order is kept
/// wherever dependencies allow it.
fn topological_order(n: usize, edges: &[(NodeId, NodeId)]) -> RenderResult<Vec<usize>> {
    let mut in_degree = vec![0usize; n];
    let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(NodeId(a), NodeId(b)) in edges {
        if a < n && b < n {
            in_degree[b] += 1;
            out_edges[a].push(b);
        }
    }
    let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(u)) = ready.pop() {
        order.push(u);
        for &v in &out_edges[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                ready.push(Reverse(v));
            }
        }
    }
    if order.len() != n {
        return Err(RenderError::graph("Render graph has a cycle"));
    }
    Ok(order)
}

/// Declares one pass's resource usage and its recording callback.
pub struct PassBuilder<'g, 'a> {
    graph: &'g mut RenderGraph<'a>,
    index: usize,
}

impl<'g, 'a> PassBuilder<'g, 'a> {
    fn declare(&mut self, res: ResourceId, usage: ResourceUsage) {
        let list = &mut self.graph.passes[self.index].usage;
        match list.iter_mut().find(|(r, _)| *r == res) {
            Some(entry) => entry.1 = entry.1.merge(usage),
            None => list.push((res, usage)),
        }
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> TextureHandle {
        self.graph.create_texture(desc)
    }

    pub fn create_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        self.graph.create_buffer(desc)
    }

    pub fn import_buffer(&mut self, buffer: &'a wgpu::Buffer) -> BufferHandle {
        self.graph.import_buffer(buffer)
    }

    pub fn import_texture(&mut self, texture: &'a wgpu::Texture, view_desc: &wgpu::TextureViewDescriptor) -> TextureHandle {
        self.graph.import_texture(texture, view_desc)
    }

    pub fn read_texture(&mut self, handle: TextureHandle) -> TextureHandle {
        self.declare(handle.0, ResourceUsage::Read);
        handle
    }

    pub fn write_texture(&mut self, handle: TextureHandle) -> TextureHandle {
        self.declare(handle.0, ResourceUsage::Write);
        handle
    }

    pub fn read_buffer(&mut self, handle: BufferHandle) -> BufferHandle {
        self.declare(handle.0, ResourceUsage::Read);
        handle
    }

    pub fn write_buffer(&mut self, handle: BufferHandle) -> BufferHandle {
        self.declare(handle.0, ResourceUsage::Write);
        handle
    }

    /// The pass has no dependency on rasterization and may overlap it on a compute queue.
    pub fn enable_async_compute(&mut self, enabled: bool) {
        self.graph.passes[self.index].async_compute = enabled;
    }

    pub fn id(&self) -> NodeId {
        NodeId(self.index)
    }

    pub fn set_render_func<F>(self, render_func: F) -> NodeId
    where
        F: FnOnce(&mut PassContext<'_>) -> RenderResult<()> + 'a,
    {
        self.graph.passes[self.index].render_func = Some(Box::new(render_func));
        NodeId(self.index)
    }
}

enum Realized<'a> {
    Unused,
    Texture { texture: wgpu::Texture, view: wgpu::TextureView, desc: TextureDesc },
    Buffer { buffer: wgpu::Buffer, desc: BufferDesc },
    ImportedTexture { texture: &'a wgpu::Texture, view: wgpu::TextureView },
    ImportedView(&'a wgpu::TextureView),
    ImportedBuffer(&'a wgpu::Buffer),
}

/// Resources realized for the frame being executed.
pub struct GraphResources<'a> {
    entries: Vec<Realized<'a>>,
    first_writer: HashMap<ResourceId, usize>,
}

impl GraphResources<'_> {
    fn entry(&self, id: ResourceId) -> RenderResult<&Realized<'_>> {
        self.entries.get(id.0).ok_or_else(|| RenderError::resource(format!("unknown resource {:?}", id)))
    }

    pub fn texture_view(&self, handle: TextureHandle) -> RenderResult<&wgpu::TextureView> {
        match self.entry(handle.0)? {
            Realized::Texture { view, .. } | Realized::ImportedTexture { view, .. } => Ok(view),
            Realized::ImportedView(view) => Ok(*view),
            _ => Err(RenderError::resource(format!("{:?} is not a realized texture", handle))),
        }
    }

    pub fn texture(&self, handle: TextureHandle) -> RenderResult<&wgpu::Texture> {
        match self.entry(handle.0)? {
            Realized::Texture { texture, .. } => Ok(texture),
            Realized::ImportedTexture { texture, .. } => Ok(*texture),
            _ => Err(RenderError::resource(format!("{:?} has no texture object", handle))),
        }
    }

    pub fn buffer(&self, handle: BufferHandle) -> RenderResult<&wgpu::Buffer> {
        match self.entry(handle.0)? {
            Realized::Buffer { buffer, .. } => Ok(buffer),
            Realized::ImportedBuffer(buffer) => Ok(*buffer),
            _ => Err(RenderError::resource(format!("{:?} is not a realized buffer", handle))),
        }
    }

    fn clear_color(&self, handle: TextureHandle) -> Option<wgpu::Color> {
        match self.entries.get(handle.0 .0)? {
            Realized::Texture { desc, .. } => desc.clear_color,
            _ => None,
        }
    }
}

/// Handed to each pass callback while the graph executes.
pub struct PassContext<'p> {
    pub device: &'p wgpu::Device,
    pub queue: &'p wgpu::Queue,
    pub encoder: &'p mut wgpu::CommandEncoder,
    pub resources: &'p GraphResources<'p>,
    pass: usize,
}

impl PassContext<'_> {
    /// Clear if the texture asks for it and this pass is its first writer, otherwise load.
    pub fn color_load_op(&self, handle: TextureHandle) -> wgpu::LoadOp<wgpu::Color> {
        let first = self.resources.first_writer.get(&handle.0).copied();
        match (self.resources.clear_color(handle), first) {
            (Some(color), Some(p)) if p == self.pass => wgpu::LoadOp::Clear(color),
            _ => wgpu::LoadOp::Load,
        }
    }
}

/// Result of `RenderGraph::compile`.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    pass_names: Vec<&'static str>,
    order: Vec<usize>,
    edges: Vec<(NodeId, NodeId)>,
    async_passes: Vec<usize>,
    join_points: Vec<(usize, usize)>,
    lifetimes: HashMap<ResourceId, (usize, usize)>,
    first_writer: HashMap<ResourceId, usize>,
}

impl CompiledGraph {
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn ordered_names(&self) -> Vec<&'static str> {
        self.order.iter().map(|&p| self.pass_names[p]).collect()
    }

    pub fn depends_on(&self, after: NodeId, before: NodeId) -> bool {
        self.edges.contains(&(before, after))
    }

    pub fn async_passes(&self) -> &[usize] {
        &self.async_passes
    }

    /// (async producer, graphics consumer) pairs where queues must synchronize.
    pub fn join_points(&self) -> &[(usize, usize)] {
        &self.join_points
    }

    /// First and last position in the execution order at which the resource is used.
    pub fn lifetime(&self, id: ResourceId) -> Option<(usize, usize)> {
        self.lifetimes.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(label: &'static str) -> BufferDesc {
        BufferDesc { label, size: 16, usage: wgpu::BufferUsages::STORAGE }
    }

    fn rt(label: &'static str) -> TextureDesc {
        TextureDesc::render_target(label, 64, 64, wgpu::TextureFormat::Rgba16Float)
    }

    /// GBuffer and grid build are independent; lighting joins both; blit follows lighting.
    fn frame_graph<'a>() -> (RenderGraph<'a>, [NodeId; 4]) {
        let mut graph = RenderGraph::new();
        let gbuffer = graph.create_texture(rt("gbuffer0"));
        let grid = graph.create_buffer(storage("cluster_lights"));
        let color = graph.create_texture(rt("lighting").with_clear(wgpu::Color::BLACK));
        let backbuffer = graph.create_texture(rt("backbuffer"));

        let mut pass = graph.add_pass("gbuffer");
        pass.write_texture(gbuffer);
        let gbuffer_pass = pass.set_render_func(|_| Ok(()));

        let mut pass = graph.add_pass("build_light_grid");
        pass.enable_async_compute(true);
        pass.write_buffer(grid);
        let grid_pass = pass.set_render_func(|_| Ok(()));

        let mut pass = graph.add_pass("deferred_lighting");
        pass.read_texture(gbuffer);
        pass.read_buffer(grid);
        pass.write_texture(color);
        let lighting_pass = pass.set_render_func(|_| Ok(()));

        let mut pass = graph.add_pass("final_blit");
        pass.read_texture(color);
        pass.write_texture(backbuffer);
        let blit_pass = pass.set_render_func(|_| Ok(()));

        (graph, [gbuffer_pass, grid_pass, lighting_pass, blit_pass])
    }

    #[test]
    fn lighting_joins_gbuffer_and_grid() {
        let (graph, [gbuffer, grid, lighting, blit]) = frame_graph();
        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.ordered_names(),
            vec!["gbuffer", "build_light_grid", "deferred_lighting", "final_blit"]
        );
        assert!(compiled.depends_on(lighting, gbuffer));
        assert!(compiled.depends_on(lighting, grid));
        assert!(compiled.depends_on(blit, lighting));
        assert!(!compiled.depends_on(grid, gbuffer));
        assert!(!compiled.depends_on(gbuffer, grid));
    }

    #[test]
    fn async_grid_build_has_single_join() {
        let (graph, [_, grid, lighting, _]) = frame_graph();
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.async_passes(), &[grid.0]);
        assert_eq!(compiled.join_points(), &[(grid.0, lighting.0)]);
    }

    #[test]
    fn declaration_order_kept_for_independent_passes() {
        let mut graph = RenderGraph::new();
        for name in ["a", "b", "c"] {
            let buffer = graph.create_buffer(storage(name));
            let mut pass = graph.add_pass(name);
            pass.write_buffer(buffer);
            pass.set_render_func(|_| Ok(()));
        }
        assert_eq!(graph.compile().unwrap().ordered_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn write_after_read_is_ordered() {
        let mut graph = RenderGraph::new();
        let buffer = graph.create_buffer(storage("shared"));
        let mut pass = graph.add_pass("producer");
        pass.write_buffer(buffer);
        pass.set_render_func(|_| Ok(()));
        let mut pass = graph.add_pass("consumer");
        pass.read_buffer(buffer);
        let consumer = pass.set_render_func(|_| Ok(()));
        let mut pass = graph.add_pass("overwrite");
        pass.write_buffer(buffer);
        let overwrite = pass.set_render_func(|_| Ok(()));
        let compiled = graph.compile().unwrap();
        assert!(compiled.depends_on(overwrite, consumer));
    }

    #[test]
    fn reading_unwritten_transient_is_an_error() {
        let mut graph = RenderGraph::new();
        let buffer = graph.create_buffer(storage("never_written"));
        let mut pass = graph.add_pass("reader");
        pass.read_buffer(buffer);
        pass.set_render_func(|_| Ok(()));
        assert!(matches!(graph.compile(), Err(RenderError::Graph(_))));
    }

    #[test]
    fn read_write_in_one_pass_merges_usage() {
        let mut graph = RenderGraph::new();
        let buffer = graph.create_buffer(storage("counter"));
        let mut pass = graph.add_pass("clear_and_build");
        pass.write_buffer(buffer);
        pass.read_buffer(buffer);
        pass.set_render_func(|_| Ok(()));
        assert_eq!(graph.passes[0].usage, vec![(buffer.0, ResourceUsage::ReadWrite)]);
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn transient_lifetimes_span_first_to_last_use() {
        let (graph, _) = frame_graph();
        let compiled = graph.compile().unwrap();
        // "lighting" color target: written at position 2, read at position 3.
        assert_eq!(compiled.lifetime(ResourceId(2)), Some((2, 3)));
        assert_eq!(compiled.lifetime(ResourceId(0)), Some((0, 2)));
    }

    #[test]
    fn topological_order_rejects_cycles() {
        let edges = [(NodeId(0), NodeId(1)), (NodeId(1), NodeId(0))];
        assert!(topological_order(2, &edges).is_err());
    }
}
