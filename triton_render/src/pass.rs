//! Render passes as a single concrete `GraphicsPass` (inputs/outputs
//! declared data, draw logic supplied as a closure) instead of the deep
//! virtual `IRenderPass` hierarchy the original engine builds around a base
//! class with five overridable hooks. `GraphicsPass` covers both hook
//! shapes a render graph actually needs — draw something into color/depth
//! render buffers, or draw a fullscreen triangle into the swap chain;
//! anything stranger implements the `RenderPass` trait directly.

use triton_vulkan::{
    AttachmentDesc, BindSetHandle, BlendState, CommandBufferHandle, CullMode, Device, Format,
    FrameBufferHandle, GraphicsPipelineHandle, LoadOp, PrimitiveTopology, RenderPassHandle, RenderTarget,
    ShaderHandle, ShaderStage, StoreOp, SwapChainHandle, TextureHandle, VertexStreamDesc,
};

use crate::error::{Error, Result};
use crate::framebuffer_cache::FrameBufferCache;
use crate::gpu_bindings::GpuBindings;
use crate::render_buffer::RenderBuffer;

/// Read-only view of graph state plus the one piece of mutable shared
/// state (the framebuffer cache) a pass needs while rendering.
pub struct GraphContext<'a> {
    pub device: &'a Device,
    pub render_buffers: &'a [RenderBuffer],
    pub gpu_bindings: &'a GpuBindings,
    pub framebuffer_cache: &'a mut FrameBufferCache,
    pub width: u32,
    pub height: u32,
    pub swap_chain: Option<SwapChainHandle>,
}

impl<'a> GraphContext<'a> {
    pub fn render_buffer_texture(&self, name: &str) -> Option<TextureHandle> {
        self.render_buffers.iter().find(|b| b.name == name).and_then(|b| b.texture)
    }

    pub fn render_buffer_format(&self, name: &str) -> Option<Format> {
        self.render_buffers.iter().find(|b| b.name == name).map(|b| b.format)
    }

    pub fn render_buffer_bind_set(&self, name: &str) -> Option<BindSetHandle> {
        self.render_buffers.iter().find(|b| b.name == name).and_then(|b| b.bind_set)
    }

    pub fn group_bind_set(&self, name: &str) -> Option<BindSetHandle> {
        self.gpu_bindings.bind_set(name)
    }

    /// The render pass compatible with the swap chain's own images.
    /// `triton_vulkan` builds exactly one of these per swap chain (for its
    /// own acquire/present framebuffers) and exposes it rather than letting
    /// callers build a second, separately tracked one.
    pub fn swap_chain_render_pass(&self) -> Result<RenderPassHandle> {
        let handle = self
            .swap_chain
            .ok_or_else(|| Error::other("pass declares a swap-chain output but no swap chain is attached"))?;
        self.device
            .swap_chain_render_pass(handle)
            .ok_or_else(|| Error::other("unknown swap chain"))
    }

    pub fn fetch_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        render_buffer_names: &[&str],
        width: u32,
        height: u32,
    ) -> Result<FrameBufferHandle> {
        let textures = render_buffer_names
            .iter()
            .map(|name| {
                self.render_buffer_texture(name)
                    .ok_or_else(|| Error::UnknownRenderBuffer(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.framebuffer_cache.fetch(self.device, render_pass, &textures, width, height)
    }
}

/// Load/store/clear behavior for one attachment.
#[derive(Clone, Copy)]
pub struct AttachmentOp {
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: [f32; 4],
}

impl AttachmentOp {
    pub fn clear(color: [f32; 4]) -> Self {
        Self {
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: color,
        }
    }

    pub fn load() -> Self {
        Self {
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_value: [0.0; 4],
        }
    }
}

struct ColorOutput {
    render_buffer: String,
    op: AttachmentOp,
}

/// The operations every render pass in the graph supports. `init`/
/// `shutdown`/`invalidate` default to no-ops; only `render` (and usually
/// `can_render`) need overriding.
pub trait RenderPass {
    fn name(&self) -> &str;

    fn init(&mut self, ctx: &mut GraphContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn shutdown(&mut self, ctx: &mut GraphContext) {
        let _ = ctx;
    }

    fn invalidate(&mut self, ctx: &mut GraphContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn can_render(&self, ctx: &GraphContext) -> bool {
        let _ = ctx;
        true
    }

    fn render(&mut self, cb: CommandBufferHandle, ctx: &mut GraphContext) -> Result<()>;

    /// Applies pass-specific YAML config (e.g. `GraphicsPass`'s inputs and
    /// outputs, `SwapRenderBuffersPass`'s buffer-name pairs) loaded
    /// alongside the pass's registered type name. Passes with no
    /// data-driven config of their own can leave this at the default no-op.
    fn configure(&mut self, doc: &serde_yaml::Value) -> Result<()> {
        let _ = doc;
        Ok(())
    }

    /// The inverse of `configure`: the fields `RenderGraph::serialize`
    /// writes back out under this pass's `RenderPass` document, alongside
    /// its name and registered type. Defaults to an empty mapping for
    /// passes with no data-driven config.
    fn serialize_config(&self) -> serde_yaml::Mapping {
        serde_yaml::Mapping::new()
    }

    /// Buffer-name pairs this pass wants swapped after it renders. Only
    /// `SwapRenderBuffersPass` returns anything; the graph checks this
    /// instead of downcasting trait objects.
    fn swap_pairs(&self) -> Option<&[(String, String)]> {
        None
    }
}

fn yaml_str(value: impl Into<String>) -> serde_yaml::Value {
    serde_yaml::Value::String(value.into())
}

fn yaml_str_seq(values: &[String]) -> serde_yaml::Value {
    serde_yaml::Value::Sequence(values.iter().map(|v| yaml_str(v.clone())).collect())
}

fn load_op_tag(op: LoadOp) -> &'static str {
    match op {
        LoadOp::Load => "LOAD",
        LoadOp::Clear => "CLEAR",
        LoadOp::DontCare => "DONT_CARE",
    }
}

fn parse_load_op(tag: &str) -> Result<LoadOp> {
    Ok(match tag {
        "LOAD" => LoadOp::Load,
        "CLEAR" => LoadOp::Clear,
        "DONT_CARE" => LoadOp::DontCare,
        other => return Err(Error::other(format!("unknown load_op {other:?}"))),
    })
}

fn store_op_tag(op: StoreOp) -> &'static str {
    match op {
        StoreOp::Store => "STORE",
        StoreOp::DontCare => "DONT_CARE",
    }
}

fn parse_store_op(tag: &str) -> Result<StoreOp> {
    Ok(match tag {
        "STORE" => StoreOp::Store,
        "DONT_CARE" => StoreOp::DontCare,
        other => return Err(Error::other(format!("unknown store_op {other:?}"))),
    })
}

fn format_clear_color(value: [f32; 4]) -> String {
    format!("{},{},{},{}", value[0], value[1], value[2], value[3])
}

fn parse_clear_color(text: &str) -> Result<[f32; 4]> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != 4 {
        return Err(Error::other(format!("clear_color {text:?} must have 4 components")));
    }
    let mut out = [0f32; 4];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| Error::other(format!("invalid clear_color component {part:?}")))?;
    }
    Ok(out)
}

fn format_clear_depthstencil(depth: f32, stencil: u32) -> String {
    format!("{depth},{stencil}")
}

fn parse_clear_depthstencil(text: &str) -> Result<(f32, u32)> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != 2 {
        return Err(Error::other(format!("clear_depthstencil {text:?} must have 2 components")));
    }
    let depth: f32 = parts[0]
        .trim()
        .parse()
        .map_err(|_| Error::other(format!("invalid clear_depthstencil depth {:?}", parts[0])))?;
    let stencil: u32 = parts[1]
        .trim()
        .parse()
        .map_err(|_| Error::other(format!("invalid clear_depthstencil stencil {:?}", parts[1])))?;
    Ok((depth, stencil))
}

type DrawFn = Box<dyn FnMut(&Device, CommandBufferHandle, GraphicsPipelineHandle, &GraphContext) -> Result<()>>;

/// A declared set of inputs/outputs plus a draw closure. The closure does
/// the actual drawing: a scene-geometry pass iterates a scene query and
/// issues one `draw_indexed_primitive_instanced` per chunk, a fullscreen
/// pass issues a single `draw_primitive_instanced` with no bound buffers.
pub struct GraphicsPass {
    name: String,
    input_groups: Vec<String>,
    input_render_buffers: Vec<String>,
    color_outputs: Vec<ColorOutput>,
    depthstencil_output: Option<(String, AttachmentOp)>,
    swap_chain_output: Option<AttachmentOp>,
    vertex_shader: Option<ShaderHandle>,
    fragment_shader: Option<ShaderHandle>,
    vertex_shader_uri: Option<String>,
    fragment_shader_uri: Option<String>,
    vertex_streams: Vec<VertexStreamDesc>,
    cull_mode: CullMode,
    topology: PrimitiveTopology,
    blend: Option<BlendState>,
    draw: DrawFn,
    render_pass: Option<RenderPassHandle>,
    pipeline: Option<GraphicsPipelineHandle>,
}

impl GraphicsPass {
    pub fn new(name: impl Into<String>, draw: DrawFn) -> Self {
        Self {
            name: name.into(),
            input_groups: Vec::new(),
            input_render_buffers: Vec::new(),
            color_outputs: Vec::new(),
            depthstencil_output: None,
            swap_chain_output: None,
            vertex_shader: None,
            fragment_shader: None,
            vertex_shader_uri: None,
            fragment_shader_uri: None,
            vertex_streams: Vec::new(),
            cull_mode: CullMode::Back,
            topology: PrimitiveTopology::TriangleList,
            blend: None,
            draw,
            render_pass: None,
            pipeline: None,
        }
    }

    pub fn with_input_group(mut self, name: impl Into<String>) -> Self {
        self.input_groups.push(name.into());
        self
    }

    pub fn with_input_render_buffer(mut self, name: impl Into<String>) -> Self {
        self.input_render_buffers.push(name.into());
        self
    }

    pub fn with_color_output(mut self, render_buffer: impl Into<String>, op: AttachmentOp) -> Self {
        self.color_outputs.push(ColorOutput {
            render_buffer: render_buffer.into(),
            op,
        });
        self
    }

    pub fn with_depthstencil_output(mut self, render_buffer: impl Into<String>, op: AttachmentOp) -> Self {
        self.depthstencil_output = Some((render_buffer.into(), op));
        self
    }

    pub fn with_swap_chain_output(mut self, op: AttachmentOp) -> Self {
        self.swap_chain_output = Some(op);
        self
    }

    pub fn with_shaders(mut self, vertex: ShaderHandle, fragment: ShaderHandle) -> Self {
        self.vertex_shader = Some(vertex);
        self.fragment_shader = Some(fragment);
        self
    }

    /// Records the shader URIs a data-driven pass was configured with, so
    /// `serialize_config` can write them back out. Compiling them into
    /// `ShaderHandle`s is the caller's job (via a `ShaderCompiler`
    /// capability) before `init` runs.
    pub fn with_shader_uris(mut self, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.vertex_shader_uri = Some(vertex.into());
        self.fragment_shader_uri = Some(fragment.into());
        self
    }

    pub fn with_vertex_stream(mut self, stream: VertexStreamDesc) -> Self {
        self.vertex_streams.push(stream);
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    fn build_render_pass(&mut self, ctx: &GraphContext) -> Result<RenderPassHandle> {
        if self.swap_chain_output.is_some() {
            let handle = ctx.swap_chain_render_pass()?;
            self.render_pass = Some(handle);
            return Ok(handle);
        }

        let color_attachments: Vec<AttachmentDesc> = self
            .color_outputs
            .iter()
            .map(|output| {
                ctx.render_buffer_format(&output.render_buffer)
                    .map(|format| AttachmentDesc {
                        format,
                        load_op: output.op.load_op,
                        store_op: output.op.store_op,
                    })
                    .ok_or_else(|| Error::UnknownRenderBuffer(output.render_buffer.clone()))
            })
            .collect::<Result<_>>()?;

        let depth_attachment = match &self.depthstencil_output {
            Some((name, op)) => {
                let format = ctx
                    .render_buffer_format(name)
                    .ok_or_else(|| Error::UnknownRenderBuffer(name.clone()))?;
                Some(AttachmentDesc {
                    format,
                    load_op: op.load_op,
                    store_op: op.store_op,
                })
            }
            None => None,
        };

        let handle = ctx.device.create_render_pass(&color_attachments, depth_attachment)?;
        self.render_pass = Some(handle);
        Ok(handle)
    }

    fn build_pipeline(&mut self, ctx: &GraphContext, render_pass: RenderPassHandle) -> Result<GraphicsPipelineHandle> {
        let handle = ctx.device.create_graphics_pipeline();
        let color_count = if self.swap_chain_output.is_some() {
            1
        } else {
            self.color_outputs.len() as u32
        };

        let vertex_shader = self.vertex_shader;
        let fragment_shader = self.fragment_shader;
        let vertex_streams = self.vertex_streams.clone();
        let cull_mode = self.cull_mode;
        let topology = self.topology;
        let blend = self.blend;

        let mut bind_sets = Vec::new();
        for group in &self.input_groups {
            if let Some(set) = ctx.group_bind_set(group) {
                bind_sets.push(set);
            }
        }
        for name in &self.input_render_buffers {
            if let Some(set) = ctx.render_buffer_bind_set(name) {
                bind_sets.push(set);
            }
        }

        ctx.device.with_graphics_pipeline(handle, |pipeline| {
            for stream in vertex_streams {
                pipeline.push_vertex_stream(stream);
            }
            pipeline.set_shader(ShaderStage::Vertex, vertex_shader);
            pipeline.set_shader(ShaderStage::Fragment, fragment_shader);
            pipeline.set_cull_mode(cull_mode);
            pipeline.set_topology(topology);
            pipeline.set_blend_state(blend);
            pipeline.set_target(render_pass, 1, color_count);
            for (slot, set) in bind_sets.into_iter().enumerate() {
                pipeline.set_bind_set(slot, Some(set));
            }
        });

        Ok(handle)
    }

    fn rebuild(&mut self, ctx: &mut GraphContext) -> Result<()> {
        self.teardown(ctx);
        let render_pass = self.build_render_pass(ctx)?;
        let pipeline = self.build_pipeline(ctx, render_pass)?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn teardown(&mut self, ctx: &GraphContext) {
        if let Some(pipeline) = self.pipeline.take() {
            ctx.device.destroy_graphics_pipeline(pipeline);
        }
        if let Some(render_pass) = self.render_pass.take() {
            if self.swap_chain_output.is_none() {
                ctx.device.destroy_render_pass(render_pass);
            }
        }
    }
}

impl RenderPass for GraphicsPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &mut GraphContext) -> Result<()> {
        self.rebuild(ctx)
    }

    fn shutdown(&mut self, ctx: &mut GraphContext) {
        self.teardown(ctx);
    }

    fn invalidate(&mut self, ctx: &mut GraphContext) -> Result<()> {
        self.rebuild(ctx)
    }

    fn render(&mut self, cb: CommandBufferHandle, ctx: &mut GraphContext) -> Result<()> {
        let pipeline = self.pipeline.ok_or_else(|| Error::other("render called before init"))?;
        let render_pass = self.render_pass.ok_or_else(|| Error::other("render called before init"))?;

        let (target, clear_values) = if let Some(op) = &self.swap_chain_output {
            let handle = ctx
                .swap_chain
                .ok_or_else(|| Error::other("pass declares a swap-chain output but no swap chain is attached"))?;
            (RenderTarget::SwapChain(handle), vec![color_clear(op.clear_value)])
        } else {
            let names: Vec<&str> = self
                .color_outputs
                .iter()
                .map(|o| o.render_buffer.as_str())
                .chain(self.depthstencil_output.as_ref().map(|(n, _)| n.as_str()))
                .collect();
            let framebuffer = ctx.fetch_framebuffer(render_pass, &names, ctx.width, ctx.height)?;
            let mut clears: Vec<triton_vulkan::ash::vk::ClearValue> =
                self.color_outputs.iter().map(|o| color_clear(o.op.clear_value)).collect();
            if let Some((_, op)) = &self.depthstencil_output {
                clears.push(depth_clear(op.clear_value[0], op.clear_value[1] as u32));
            }
            (RenderTarget::FrameBuffer(framebuffer), clears)
        };

        ctx.device.begin_render_pass(cb, render_pass, target, &clear_values)?;
        (self.draw)(ctx.device, cb, pipeline, ctx)?;
        ctx.device.end_render_pass(cb)?;
        Ok(())
    }

    fn configure(&mut self, doc: &serde_yaml::Value) -> Result<()> {
        if let Some(groups) = doc.get("input_groups").and_then(|v| v.as_sequence()) {
            self.input_groups = groups.iter().filter_map(|v| v.as_str().map(String::from)).collect();
        }
        if let Some(buffers) = doc.get("input_renderbuffers").and_then(|v| v.as_sequence()) {
            self.input_render_buffers = buffers.iter().filter_map(|v| v.as_str().map(String::from)).collect();
        }

        if let Some(colors) = doc.get("output_colors").and_then(|v| v.as_sequence()) {
            self.color_outputs.clear();
            for entry in colors {
                let name = entry
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::other("output_colors entry missing \"name\""))?;
                let load_op = parse_load_op(entry.get("load_op").and_then(|v| v.as_str()).unwrap_or("CLEAR"))?;
                let store_op = parse_store_op(entry.get("store_op").and_then(|v| v.as_str()).unwrap_or("STORE"))?;
                let clear_value = match entry.get("clear_color").and_then(|v| v.as_str()) {
                    Some(text) => parse_clear_color(text)?,
                    None => [0.0; 4],
                };
                self.color_outputs.push(ColorOutput {
                    render_buffer: name.to_string(),
                    op: AttachmentOp { load_op, store_op, clear_value },
                });
            }
        }

        if let Some(ds) = doc.get("output_depthstencil") {
            let name = ds
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::other("output_depthstencil missing \"name\""))?;
            let load_op = parse_load_op(ds.get("load_op").and_then(|v| v.as_str()).unwrap_or("CLEAR"))?;
            let store_op = parse_store_op(ds.get("store_op").and_then(|v| v.as_str()).unwrap_or("STORE"))?;
            let (depth, stencil) = match ds.get("clear_depthstencil").and_then(|v| v.as_str()) {
                Some(text) => parse_clear_depthstencil(text)?,
                None => (1.0, 0),
            };
            self.depthstencil_output = Some((
                name.to_string(),
                AttachmentOp {
                    load_op,
                    store_op,
                    clear_value: [depth, stencil as f32, 0.0, 0.0],
                },
            ));
        }

        if let Some(sc) = doc.get("output_swapchain") {
            let load_op = parse_load_op(sc.get("load_op").and_then(|v| v.as_str()).unwrap_or("CLEAR"))?;
            let store_op = parse_store_op(sc.get("store_op").and_then(|v| v.as_str()).unwrap_or("STORE"))?;
            let clear_value = match sc.get("clear_color").and_then(|v| v.as_str()) {
                Some(text) => parse_clear_color(text)?,
                None => [0.0; 4],
            };
            self.swap_chain_output = Some(AttachmentOp { load_op, store_op, clear_value });
        }

        if let Some(uri) = doc.get("vertex_shader").and_then(|v| v.as_str()) {
            self.vertex_shader_uri = Some(uri.to_string());
        }
        if let Some(uri) = doc.get("fragment_shader").and_then(|v| v.as_str()) {
            self.fragment_shader_uri = Some(uri.to_string());
        }

        Ok(())
    }

    fn serialize_config(&self) -> serde_yaml::Mapping {
        let mut map = serde_yaml::Mapping::new();
        map.insert(yaml_str("input_groups"), yaml_str_seq(&self.input_groups));
        map.insert(yaml_str("input_renderbuffers"), yaml_str_seq(&self.input_render_buffers));

        if !self.color_outputs.is_empty() {
            let colors: Vec<serde_yaml::Value> = self
                .color_outputs
                .iter()
                .map(|output| {
                    let mut entry = serde_yaml::Mapping::new();
                    entry.insert(yaml_str("name"), yaml_str(output.render_buffer.clone()));
                    entry.insert(yaml_str("load_op"), yaml_str(load_op_tag(output.op.load_op)));
                    entry.insert(yaml_str("store_op"), yaml_str(store_op_tag(output.op.store_op)));
                    entry.insert(yaml_str("clear_color"), yaml_str(format_clear_color(output.op.clear_value)));
                    serde_yaml::Value::Mapping(entry)
                })
                .collect();
            map.insert(yaml_str("output_colors"), serde_yaml::Value::Sequence(colors));
        }

        if let Some((name, op)) = &self.depthstencil_output {
            let mut entry = serde_yaml::Mapping::new();
            entry.insert(yaml_str("name"), yaml_str(name.clone()));
            entry.insert(yaml_str("load_op"), yaml_str(load_op_tag(op.load_op)));
            entry.insert(yaml_str("store_op"), yaml_str(store_op_tag(op.store_op)));
            entry.insert(
                yaml_str("clear_depthstencil"),
                yaml_str(format_clear_depthstencil(op.clear_value[0], op.clear_value[1] as u32)),
            );
            map.insert(yaml_str("output_depthstencil"), serde_yaml::Value::Mapping(entry));
        }

        if let Some(op) = &self.swap_chain_output {
            let mut entry = serde_yaml::Mapping::new();
            entry.insert(yaml_str("load_op"), yaml_str(load_op_tag(op.load_op)));
            entry.insert(yaml_str("store_op"), yaml_str(store_op_tag(op.store_op)));
            entry.insert(yaml_str("clear_color"), yaml_str(format_clear_color(op.clear_value)));
            map.insert(yaml_str("output_swapchain"), serde_yaml::Value::Mapping(entry));
        }

        if let Some(uri) = &self.vertex_shader_uri {
            map.insert(yaml_str("vertex_shader"), yaml_str(uri.clone()));
        }
        if let Some(uri) = &self.fragment_shader_uri {
            map.insert(yaml_str("fragment_shader"), yaml_str(uri.clone()));
        }

        map
    }
}

fn color_clear(value: [f32; 4]) -> triton_vulkan::ash::vk::ClearValue {
    triton_vulkan::ash::vk::ClearValue {
        color: triton_vulkan::ash::vk::ClearColorValue { float32: value },
    }
}

fn depth_clear(depth: f32, stencil: u32) -> triton_vulkan::ash::vk::ClearValue {
    triton_vulkan::ash::vk::ClearValue {
        depth_stencil: triton_vulkan::ash::vk::ClearDepthStencilValue { depth, stencil },
    }
}

/// Swaps the GPU state of two render buffers in place, run at render time.
/// Grounded in the original engine's `RenderPassSwapRenderBuffers`, used to
/// implement ping-pong passes (iterative blur, history buffers) without the
/// graph itself knowing about ping-ponging.
pub struct SwapRenderBuffersPass {
    name: String,
    pairs: Vec<(String, String)>,
}

impl SwapRenderBuffersPass {
    pub fn new(name: impl Into<String>, pairs: Vec<(String, String)>) -> Self {
        Self { name: name.into(), pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl RenderPass for SwapRenderBuffersPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, _cb: CommandBufferHandle, _ctx: &mut GraphContext) -> Result<()> {
        // The graph itself performs the swap (it alone can mutably borrow
        // two render buffers at once); this pass exists only so the graph
        // sees a uniformly-ordered `RenderPass` list to iterate.
        Ok(())
    }

    fn configure(&mut self, doc: &serde_yaml::Value) -> Result<()> {
        let pairs = doc
            .get("pairs")
            .and_then(|v| v.as_sequence())
            .ok_or_else(|| Error::other("SwapRenderBuffersPass config missing \"pairs\""))?;

        self.pairs.clear();
        for pair in pairs {
            let src = pair
                .get("src")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::other("swap pair missing \"src\""))?;
            let dst = pair
                .get("dst")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::other("swap pair missing \"dst\""))?;
            self.pairs.push((src.to_string(), dst.to_string()));
        }
        Ok(())
    }

    fn swap_pairs(&self) -> Option<&[(String, String)]> {
        Some(&self.pairs)
    }

    fn serialize_config(&self) -> serde_yaml::Mapping {
        let pairs: Vec<serde_yaml::Value> = self
            .pairs
            .iter()
            .map(|(src, dst)| {
                let mut entry = serde_yaml::Mapping::new();
                entry.insert(yaml_str("src"), yaml_str(src.clone()));
                entry.insert(yaml_str("dst"), yaml_str(dst.clone()));
                serde_yaml::Value::Mapping(entry)
            })
            .collect();
        let mut map = serde_yaml::Mapping::new();
        map.insert(yaml_str("pairs"), serde_yaml::Value::Sequence(pairs));
        map
    }
}

/// Builds a `GraphicsPass` that draws a single vertex-pulling triangle (no
/// bound vertex/index buffers — the vertex shader derives position and UV
/// from `gl_VertexIndex`) covering the whole viewport. Used for post-process
/// and tonemap passes that sample `input_render_buffers` and write one
/// color output or the swap chain.
pub fn fullscreen_pass(name: impl Into<String>, vertex_shader: ShaderHandle, fragment_shader: ShaderHandle) -> GraphicsPass {
    GraphicsPass::new(
        name,
        Box::new(|device, cb, pipeline, _ctx| {
            device.draw_primitive_instanced(cb, pipeline, &[], 3, 0, 1, 0)?;
            Ok(())
        }),
    )
    .with_shaders(vertex_shader, fragment_shader)
    .with_topology(PrimitiveTopology::TriangleList)
    .with_cull_mode(CullMode::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPass(&'static str);
    impl RenderPass for NoopPass {
        fn name(&self) -> &str {
            self.0
        }
        fn render(&mut self, _cb: CommandBufferHandle, _ctx: &mut GraphContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn can_render_defaults_to_true() {
        let pass = NoopPass("p");
        assert_eq!(pass.name(), "p");
    }

    #[test]
    fn swap_render_buffers_pass_carries_its_pairs() {
        let pass = SwapRenderBuffersPass::new("swap", vec![("a".into(), "b".into())]);
        assert_eq!(pass.pairs(), &[("a".to_string(), "b".to_string())]);
    }
}
