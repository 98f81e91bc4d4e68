//! The data-driven render graph: owns the parameter groups
//! ([`GpuBindings`]), the resolution-relative render buffers, a
//! framebuffer cache, and an ordered list of passes. Orchestration
//! (`init`/`resize`/`render`/`shutdown`) follows the original engine's
//! `RenderGraph` one-to-one; only the pass representation changed.

use std::collections::HashMap;

use serde::Deserialize as _;
use triton_vulkan::{CommandBufferHandle, Device, SwapChainHandle};

use crate::error::{Error, Result};
use crate::framebuffer_cache::FrameBufferCache;
use crate::gpu_bindings::GpuBindings;
use crate::pass::{GraphContext, RenderPass};
use crate::render_buffer::RenderBuffer;

type PassFactory = Box<dyn Fn(String) -> Box<dyn RenderPass>>;

/// Reads and writes whole graph documents. Narrower than
/// [`crate::capabilities::FileSystem`] (which only maps bytes for
/// hot-reload staleness checks): `RenderGraph::load`/`save` need a whole
/// string round-trip, so this is its own trait rather than a reuse.
pub trait GraphStorage {
    fn read(&self, path: &str) -> Result<String>;
    fn write(&self, path: &str, contents: &str) -> Result<()>;
}

pub struct RenderGraph {
    gpu_bindings: GpuBindings,
    render_buffers: Vec<RenderBuffer>,
    framebuffer_cache: FrameBufferCache,
    pass_factories: HashMap<String, PassFactory>,
    /// `(instance name, registered type name, pass)`. The type name is
    /// carried alongside the instance so `serialize` can write back the
    /// `type:` field a `deserialize` pass was (or could be) built from.
    passes: Vec<(String, String, Box<dyn RenderPass>)>,
    width: u32,
    height: u32,
    swap_chain: Option<SwapChainHandle>,
}

impl RenderGraph {
    pub fn new(swap_chain: Option<SwapChainHandle>) -> Self {
        Self {
            gpu_bindings: GpuBindings::new(),
            render_buffers: Vec::new(),
            framebuffer_cache: FrameBufferCache::new(),
            pass_factories: HashMap::new(),
            passes: Vec::new(),
            width: 1,
            height: 1,
            swap_chain,
        }
    }

    pub fn gpu_bindings(&mut self) -> &mut GpuBindings {
        &mut self.gpu_bindings
    }

    pub fn add_render_buffer(&mut self, buffer: RenderBuffer) -> Result<()> {
        if self.render_buffers.iter().any(|b| b.name == buffer.name) {
            return Err(Error::DuplicateRenderBuffer(buffer.name));
        }
        self.render_buffers.push(buffer);
        Ok(())
    }

    /// Swaps two render buffers' GPU state (texture + bind set) in place.
    /// Neither buffer's name changes, so passes that reference either name
    /// keep working unmodified across the swap. Rejects (as a no-op) a pair
    /// whose format or downscale don't match, rather than swapping
    /// incompatible state under the same two names.
    pub fn swap_render_buffers(&mut self, a: &str, b: &str) -> Result<()> {
        let index_a = self
            .render_buffers
            .iter()
            .position(|buf| buf.name == a)
            .ok_or_else(|| Error::UnknownRenderBuffer(a.to_string()))?;
        let index_b = self
            .render_buffers
            .iter()
            .position(|buf| buf.name == b)
            .ok_or_else(|| Error::UnknownRenderBuffer(b.to_string()))?;
        if index_a == index_b {
            return Ok(());
        }
        if !self.render_buffers[index_a].is_compatible_with(&self.render_buffers[index_b]) {
            return Err(Error::FormatMismatch(a.to_string(), b.to_string()));
        }
        let (lo, hi) = if index_a < index_b { (index_a, index_b) } else { (index_b, index_a) };
        let (left, right) = self.render_buffers.split_at_mut(hi);
        left[lo].swap_state(&mut right[0]);
        Ok(())
    }

    pub fn register_pass_type<F>(&mut self, type_name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(String) -> Box<dyn RenderPass> + 'static,
    {
        let type_name = type_name.into();
        if self.pass_factories.contains_key(&type_name) {
            return Err(Error::DuplicatePassType(type_name));
        }
        self.pass_factories.insert(type_name, Box::new(factory));
        Ok(())
    }

    pub fn add_pass(&mut self, type_name: impl Into<String>, pass: Box<dyn RenderPass>) -> Result<()> {
        let name = pass.name().to_string();
        if self.passes.iter().any(|(n, _, _)| n == &name) {
            return Err(Error::DuplicatePassName(name));
        }
        self.passes.push((name, type_name.into(), pass));
        Ok(())
    }

    /// Builds a pass through its registered type factory and adds it under
    /// `name`. The factory receives `name` so the constructed pass's
    /// `RenderPass::name()` matches what the graph files it under.
    pub fn create_pass(&mut self, type_name: &str, name: impl Into<String>) -> Result<()> {
        let pass = match self.pass_factories.get(type_name) {
            Some(factory) => factory(name.into()),
            None => return Err(Error::UnknownPassType(type_name.to_string())),
        };
        self.add_pass(type_name, pass)
    }

    fn each_pass_ctx<'a>(
        device: &'a Device,
        render_buffers: &'a [RenderBuffer],
        gpu_bindings: &'a GpuBindings,
        framebuffer_cache: &'a mut FrameBufferCache,
        width: u32,
        height: u32,
        swap_chain: Option<SwapChainHandle>,
    ) -> GraphContext<'a> {
        GraphContext {
            device,
            render_buffers,
            gpu_bindings,
            framebuffer_cache,
            width,
            height,
            swap_chain,
        }
    }

    /// Flushes groups and render buffers, runs `init` on every pass, then
    /// runs `invalidate` on every pass if any flush actually allocated
    /// something (a pass built during `init` may read another pass's
    /// freshly created render-buffer bind set).
    pub fn init(&mut self, device: &Device, width: u32, height: u32) -> Result<()> {
        self.width = width.max(1);
        self.height = height.max(1);

        let mut dirty = self.gpu_bindings.flush(device)?;
        for buffer in &mut self.render_buffers {
            dirty |= buffer.flush(device, self.width, self.height)?;
        }

        for (_, _, pass) in &mut self.passes {
            let mut ctx = Self::each_pass_ctx(
                device,
                &self.render_buffers,
                &self.gpu_bindings,
                &mut self.framebuffer_cache,
                self.width,
                self.height,
                self.swap_chain,
            );
            pass.init(&mut ctx)?;
        }

        if dirty {
            for (_, _, pass) in &mut self.passes {
                let mut ctx = Self::each_pass_ctx(
                    device,
                    &self.render_buffers,
                    &self.gpu_bindings,
                    &mut self.framebuffer_cache,
                    self.width,
                    self.height,
                    self.swap_chain,
                );
                pass.invalidate(&mut ctx)?;
            }
        }

        Ok(())
    }

    pub fn shutdown(&mut self, device: &Device) {
        for (_, _, pass) in &mut self.passes {
            let mut ctx = Self::each_pass_ctx(
                device,
                &self.render_buffers,
                &self.gpu_bindings,
                &mut self.framebuffer_cache,
                self.width,
                self.height,
                self.swap_chain,
            );
            pass.shutdown(&mut ctx);
        }
        for buffer in &mut self.render_buffers {
            buffer.invalidate(device);
        }
        self.gpu_bindings.invalidate(device);
        self.framebuffer_cache.invalidate(device);
    }

    /// Invalidates render buffers and every pass unconditionally (no
    /// `init`, since passes already exist) and reflushes render buffers at
    /// the new size.
    pub fn resize(&mut self, device: &Device, width: u32, height: u32) -> Result<()> {
        self.width = width.max(1);
        self.height = height.max(1);

        for buffer in &mut self.render_buffers {
            buffer.invalidate(device);
        }
        self.framebuffer_cache.invalidate(device);
        for buffer in &mut self.render_buffers {
            buffer.flush(device, self.width, self.height)?;
        }

        for (_, _, pass) in &mut self.passes {
            let mut ctx = Self::each_pass_ctx(
                device,
                &self.render_buffers,
                &self.gpu_bindings,
                &mut self.framebuffer_cache,
                self.width,
                self.height,
                self.swap_chain,
            );
            pass.invalidate(&mut ctx)?;
        }
        Ok(())
    }

    /// Flushes groups and render buffers, then renders each pass in
    /// declared order. Any pass whose `can_render` returns false is
    /// skipped for this frame only. Passes that declare swap pairs (see
    /// [`crate::pass::SwapRenderBuffersPass`]) have them applied after
    /// every pass has rendered, so later passes in the same frame still
    /// see pre-swap state.
    pub fn render(&mut self, device: &Device, cb: CommandBufferHandle) -> Result<()> {
        let mut dirty = self.gpu_bindings.flush(device)?;
        for buffer in &mut self.render_buffers {
            dirty |= buffer.flush(device, self.width, self.height)?;
        }

        if dirty {
            for (_, _, pass) in &mut self.passes {
                let mut ctx = Self::each_pass_ctx(
                    device,
                    &self.render_buffers,
                    &self.gpu_bindings,
                    &mut self.framebuffer_cache,
                    self.width,
                    self.height,
                    self.swap_chain,
                );
                pass.invalidate(&mut ctx)?;
            }
        }

        let mut swaps: Vec<(String, String)> = Vec::new();
        for index in 0..self.passes.len() {
            let mut ctx = Self::each_pass_ctx(
                device,
                &self.render_buffers,
                &self.gpu_bindings,
                &mut self.framebuffer_cache,
                self.width,
                self.height,
                self.swap_chain,
            );
            let (_, _, pass) = &mut self.passes[index];
            if !pass.can_render(&ctx) {
                continue;
            }
            pass.render(cb, &mut ctx)?;
            if let Some(pairs) = pass.swap_pairs() {
                swaps.extend(pairs.iter().cloned());
            }
        }

        for (a, b) in swaps {
            self.swap_render_buffers(&a, &b)?;
        }

        Ok(())
    }

    pub fn load(&mut self, fs: &dyn GraphStorage, path: &str) -> Result<()> {
        let contents = fs.read(path)?;
        self.deserialize(&contents)
    }

    pub fn save(&self, fs: &dyn GraphStorage, path: &str) -> Result<()> {
        let contents = self.serialize()?;
        fs.write(path, &contents)
    }

    /// Groups, then the render-buffer sequence, then one document per pass
    /// in declared order — the same order `deserialize` requires, since
    /// later entries reference earlier ones by name. Each document is
    /// written as its own `---`-separated stream entry.
    pub fn serialize(&self) -> Result<String> {
        let mut docs = self.gpu_bindings.serialize();

        if !self.render_buffers.is_empty() {
            let buffers: Vec<RenderBufferDoc> = self
                .render_buffers
                .iter()
                .map(|buffer| RenderBufferDoc {
                    name: buffer.name.clone(),
                    format: format!("{:?}", buffer.format),
                    downscale: buffer.downscale,
                })
                .collect();
            let mut root = serde_yaml::Mapping::new();
            root.insert(
                serde_yaml::Value::String("RenderBuffers".to_string()),
                serde_yaml::to_value(buffers)?,
            );
            docs.push(serde_yaml::Value::Mapping(root));
        }

        for (name, type_name, pass) in &self.passes {
            let mut config = pass.serialize_config();
            config.insert(
                serde_yaml::Value::String("name".to_string()),
                serde_yaml::Value::String(name.clone()),
            );
            config.insert(
                serde_yaml::Value::String("type".to_string()),
                serde_yaml::Value::String(type_name.clone()),
            );
            let mut root = serde_yaml::Mapping::new();
            root.insert(
                serde_yaml::Value::String("RenderPass".to_string()),
                serde_yaml::Value::Mapping(config),
            );
            docs.push(serde_yaml::Value::Mapping(root));
        }

        let mut out = String::new();
        for doc in &docs {
            out.push_str("---\n");
            out.push_str(&serde_yaml::to_string(doc)?);
        }
        Ok(out)
    }

    /// Parses a multi-document YAML stream and applies its contents in the
    /// fixed order later entries depend on: parameter groups, then render
    /// buffers, then passes (each built via its registered type and
    /// configured from its document). Unknown or malformed entries are
    /// logged and skipped rather than aborting the whole load.
    pub fn deserialize(&mut self, yaml: &str) -> Result<()> {
        let docs: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(yaml)
            .map(serde_yaml::Value::deserialize)
            .collect::<std::result::Result<_, _>>()?;

        self.gpu_bindings.deserialize(&docs)?;

        for doc in &docs {
            let Some(buffers) = doc.get("RenderBuffers").and_then(|v| v.as_sequence()) else {
                continue;
            };
            for entry in buffers {
                let parsed = match serde_yaml::from_value::<RenderBufferDoc>(entry.clone()) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        warn!("skipping malformed RenderBuffer entry: {error}");
                        continue;
                    }
                };
                let format = match parse_format(&parsed.format) {
                    Ok(format) => format,
                    Err(error) => {
                        warn!("skipping RenderBuffer {:?}: {error}", parsed.name);
                        continue;
                    }
                };
                if let Err(error) = self.add_render_buffer(RenderBuffer::new(parsed.name, format, parsed.downscale)) {
                    warn!("skipping duplicate RenderBuffer entry: {error}");
                }
            }
        }

        for doc in &docs {
            let Some(rp) = doc.get("RenderPass") else { continue };
            let Some(name) = rp.get("name").and_then(|v| v.as_str()) else {
                warn!("skipping RenderPass document missing \"name\"");
                continue;
            };
            let Some(type_name) = rp.get("type").and_then(|v| v.as_str()) else {
                warn!("skipping RenderPass document missing \"type\"");
                continue;
            };
            let mut pass = match self.pass_factories.get(type_name) {
                Some(factory) => factory(name.to_string()),
                None => {
                    warn!("skipping RenderPass {name:?} with unregistered type {type_name:?}");
                    continue;
                }
            };
            if let Err(error) = pass.configure(rp) {
                warn!("skipping RenderPass {name:?}: {error}");
                continue;
            }
            if let Err(error) = self.add_pass(type_name, pass) {
                warn!("skipping RenderPass {name:?}: {error}");
            }
        }

        Ok(())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RenderBufferDoc {
    name: String,
    format: String,
    downscale: u32,
}

fn parse_format(name: &str) -> Result<triton_vulkan::Format> {
    use triton_vulkan::Format::*;
    Ok(match name {
        "R8Unorm" => R8Unorm,
        "R8G8Unorm" => R8G8Unorm,
        "R8G8B8A8Unorm" => R8G8B8A8Unorm,
        "R16G16B16A16Sfloat" => R16G16B16A16Sfloat,
        "R32G32B32A32Sfloat" => R32G32B32A32Sfloat,
        "D32Sfloat" => D32Sfloat,
        "D24UnormS8Uint" => D24UnormS8Uint,
        other => return Err(Error::other(format!("unknown render buffer format {other:?}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{GraphicsPass, SwapRenderBuffersPass};
    use triton_vulkan::Format;

    #[test]
    fn register_pass_type_rejects_duplicates() {
        let mut graph = RenderGraph::new(None);
        graph
            .register_pass_type("swap", |name| Box::new(SwapRenderBuffersPass::new(name, Vec::new())))
            .unwrap();
        let err = graph
            .register_pass_type("swap", |name| Box::new(SwapRenderBuffersPass::new(name, Vec::new())))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePassType(_)));
    }

    #[test]
    fn add_pass_rejects_duplicate_names() {
        let mut graph = RenderGraph::new(None);
        graph
            .add_pass("swap", Box::new(SwapRenderBuffersPass::new("p", Vec::new())))
            .unwrap();
        let err = graph
            .add_pass("swap", Box::new(SwapRenderBuffersPass::new("p", Vec::new())))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePassName(_)));
    }

    #[test]
    fn create_pass_dispatches_through_the_registry() {
        let mut graph = RenderGraph::new(None);
        graph
            .register_pass_type("swap", |name| Box::new(SwapRenderBuffersPass::new(name, Vec::new())))
            .unwrap();
        graph.create_pass("swap", "ping_pong").unwrap();
        let err = graph.create_pass("missing", "x").unwrap_err();
        assert!(matches!(err, Error::UnknownPassType(_)));
    }

    #[test]
    fn add_render_buffer_rejects_duplicate_names() {
        let mut graph = RenderGraph::new(None);
        graph.add_render_buffer(RenderBuffer::new("color", Format::R8G8B8A8Unorm, 1)).unwrap();
        let err = graph
            .add_render_buffer(RenderBuffer::new("color", Format::R8G8B8A8Unorm, 1))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRenderBuffer(_)));
    }

    #[test]
    fn swap_render_buffers_requires_known_names() {
        let mut graph = RenderGraph::new(None);
        let err = graph.swap_render_buffers("a", "b").unwrap_err();
        assert!(matches!(err, Error::UnknownRenderBuffer(_)));
    }

    #[test]
    fn swap_render_buffers_rejects_format_mismatch() {
        let mut graph = RenderGraph::new(None);
        graph.add_render_buffer(RenderBuffer::new("a", Format::R8G8B8A8Unorm, 1)).unwrap();
        graph.add_render_buffer(RenderBuffer::new("b", Format::R8G8B8A8Unorm, 2)).unwrap();
        let err = graph.swap_render_buffers("a", "b").unwrap_err();
        assert!(matches!(err, Error::FormatMismatch(_, _)));
    }

    #[test]
    fn swap_render_buffers_accepts_matching_format_and_downscale() {
        let mut graph = RenderGraph::new(None);
        graph.add_render_buffer(RenderBuffer::new("a", Format::R8G8B8A8Unorm, 1)).unwrap();
        graph.add_render_buffer(RenderBuffer::new("b", Format::R8G8B8A8Unorm, 1)).unwrap();
        graph.swap_render_buffers("a", "b").unwrap();
    }

    fn sample_graph() -> RenderGraph {
        let mut graph = RenderGraph::new(None);

        graph.gpu_bindings().add_group("lighting").unwrap();
        graph.gpu_bindings().add_group_parameter("lighting", "intensity", 4, 1).unwrap();
        graph.gpu_bindings().add_group_parameter("lighting", "color", 4, 3).unwrap();
        graph.gpu_bindings().add_group("post").unwrap();
        graph.gpu_bindings().add_group_parameter("post", "exposure", 4, 1).unwrap();

        graph.add_render_buffer(RenderBuffer::new("scene_color", Format::R8G8B8A8Unorm, 1)).unwrap();
        graph.add_render_buffer(RenderBuffer::new("scene_depth", Format::D32Sfloat, 1)).unwrap();
        graph.add_render_buffer(RenderBuffer::new("blur_history", Format::R16G16B16A16Sfloat, 4)).unwrap();

        graph
            .register_pass_type("graphics", |name| {
                Box::new(
                    GraphicsPass::new(name, Box::new(|_, _, _, _| Ok(())))
                        .with_input_group("lighting")
                        .with_input_render_buffer("blur_history")
                        .with_color_output("scene_color", crate::pass::AttachmentOp::clear([0.0, 0.0, 0.0, 1.0]))
                        .with_depthstencil_output("scene_depth", crate::pass::AttachmentOp::clear([1.0, 0.0, 0.0, 0.0]))
                        .with_shader_uris("shaders/scene.vert", "shaders/scene.frag"),
                )
            })
            .unwrap();
        graph
            .register_pass_type("fullscreen", |name| {
                Box::new(
                    GraphicsPass::new(name, Box::new(|_, _, _, _| Ok(())))
                        .with_input_render_buffer("scene_color")
                        .with_swap_chain_output(crate::pass::AttachmentOp::clear([0.0, 0.0, 0.0, 1.0]))
                        .with_shader_uris("shaders/tonemap.vert", "shaders/tonemap.frag"),
                )
            })
            .unwrap();
        graph
            .register_pass_type("swap", |name| Box::new(SwapRenderBuffersPass::new(name, Vec::new())))
            .unwrap();

        graph.create_pass("graphics", "scene").unwrap();
        graph.create_pass("graphics", "blur").unwrap();
        graph
            .add_pass(
                "swap",
                Box::new(SwapRenderBuffersPass::new(
                    "finish",
                    vec![("scene_color".to_string(), "blur_history".to_string())],
                )),
            )
            .unwrap();
        graph.create_pass("fullscreen", "present").unwrap();

        graph
    }

    #[test]
    fn serialize_round_trips_groups_buffers_and_passes() {
        let original = sample_graph();
        let yaml = original.serialize().unwrap();

        let mut reloaded = sample_graph_skeleton();
        reloaded.deserialize(&yaml).unwrap();

        assert_eq!(reloaded.render_buffers.len(), original.render_buffers.len());
        for (a, b) in reloaded.render_buffers.iter().zip(original.render_buffers.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.format, b.format);
            assert_eq!(a.downscale, b.downscale);
        }

        assert_eq!(reloaded.passes.len(), original.passes.len());
        for ((a_name, a_type, _), (b_name, b_type, _)) in reloaded.passes.iter().zip(original.passes.iter()) {
            assert_eq!(a_name, b_name);
            assert_eq!(a_type, b_type);
        }

        let round_tripped = reloaded.serialize().unwrap();
        assert_eq!(round_tripped, yaml);
    }

    /// A fresh graph with the same pass-type registry as `sample_graph` but
    /// none of its groups, buffers, or passes populated yet — the target of
    /// a `deserialize` call in the round-trip test above.
    fn sample_graph_skeleton() -> RenderGraph {
        let mut graph = RenderGraph::new(None);
        graph
            .register_pass_type("graphics", |name| {
                Box::new(GraphicsPass::new(name, Box::new(|_, _, _, _| Ok(()))))
            })
            .unwrap();
        graph
            .register_pass_type("fullscreen", |name| {
                Box::new(GraphicsPass::new(name, Box::new(|_, _, _, _| Ok(()))))
            })
            .unwrap();
        graph
            .register_pass_type("swap", |name| Box::new(SwapRenderBuffersPass::new(name, Vec::new())))
            .unwrap();
        graph
    }
}
