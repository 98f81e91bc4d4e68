//! Graphics pipeline: a mutable builder-style draw-time state container.
//! `flush` resolves the concrete `VkPipeline` through the pipeline cache,
//! rebuilding only when the hashed state has actually changed.

use crate::device::Device;
use crate::format::Format;
use crate::handles::{BindSetHandle, GraphicsPipelineHandle, RenderPassHandle, ShaderHandle};
use crate::Result;
use ash::vk;

pub const MAX_PIPELINE_BIND_SETS: usize = 16;
pub const MAX_VERTEX_STREAMS: usize = 16;
const MAX_PUSH_CONSTANT_BYTES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub shader_location: u32,
    pub format: Format,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexStreamDesc {
    pub stride: u32,
    pub per_instance: bool,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
}

const SHADER_STAGE_COUNT: usize = 5;

impl ShaderStage {
    fn index(self) -> usize {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::TessellationControl => 1,
            ShaderStage::TessellationEvaluation => 2,
            ShaderStage::Geometry => 3,
            ShaderStage::Fragment => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

impl BlendFactor {
    fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

impl CullMode {
    fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

impl PrimitiveTopology {
    fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

pub struct GraphicsPipeline {
    bind_sets: [Option<BindSetHandle>; MAX_PIPELINE_BIND_SETS],
    vertex_streams: Vec<VertexStreamDesc>,
    shaders: [Option<ShaderHandle>; SHADER_STAGE_COUNT],
    cull_mode: CullMode,
    topology: PrimitiveTopology,
    depth_test_enable: bool,
    depth_write_enable: bool,
    depth_compare: CompareOp,
    blend: Option<BlendState>,
    push_constants: [u8; MAX_PUSH_CONSTANT_BYTES],
    push_constant_len: usize,
    render_pass: Option<RenderPassHandle>,
    sample_count: u32,
    color_attachment_count: u32,
    last_key: Option<u64>,
    pipeline: Option<vk::Pipeline>,
    layout: Option<vk::PipelineLayout>,
}

impl Default for GraphicsPipeline {
    fn default() -> Self {
        Self {
            bind_sets: [None; MAX_PIPELINE_BIND_SETS],
            vertex_streams: Vec::new(),
            shaders: [None; SHADER_STAGE_COUNT],
            cull_mode: CullMode::Back,
            topology: PrimitiveTopology::TriangleList,
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare: CompareOp::Less,
            blend: None,
            push_constants: [0; MAX_PUSH_CONSTANT_BYTES],
            push_constant_len: 0,
            render_pass: None,
            sample_count: 1,
            color_attachment_count: 0,
            last_key: None,
            pipeline: None,
            layout: None,
        }
    }
}

impl GraphicsPipeline {
    pub fn set_bind_set(&mut self, slot: usize, set: Option<BindSetHandle>) {
        self.bind_sets[slot] = set;
    }

    pub fn clear_vertex_streams(&mut self) {
        self.vertex_streams.clear();
    }

    pub fn push_vertex_stream(&mut self, stream: VertexStreamDesc) {
        assert!(self.vertex_streams.len() < MAX_VERTEX_STREAMS);
        self.vertex_streams.push(stream);
    }

    pub fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderHandle>) {
        self.shaders[stage.index()] = shader;
    }

    pub fn set_cull_mode(&mut self, cull_mode: CullMode) {
        self.cull_mode = cull_mode;
    }

    pub fn set_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    pub fn set_depth_state(&mut self, test_enable: bool, write_enable: bool, compare: CompareOp) {
        self.depth_test_enable = test_enable;
        self.depth_write_enable = write_enable;
        self.depth_compare = compare;
    }

    pub fn set_blend_state(&mut self, blend: Option<BlendState>) {
        self.blend = blend;
    }

    pub fn set_push_constants(&mut self, data: &[u8]) {
        assert!(data.len() <= MAX_PUSH_CONSTANT_BYTES);
        self.push_constants[..data.len()].copy_from_slice(data);
        self.push_constant_len = data.len();
    }

    pub fn set_target(&mut self, render_pass: RenderPassHandle, sample_count: u32, color_attachment_count: u32) {
        self.render_pass = Some(render_pass);
        self.sample_count = sample_count;
        self.color_attachment_count = color_attachment_count;
    }

    fn state_key(&self) -> u64 {
        let attributes: Vec<(u32, Vec<VertexAttribute>, bool)> = self
            .vertex_streams
            .iter()
            .map(|s| (s.stride, s.attributes.clone(), s.per_instance))
            .collect();
        crate::caches::hash_key((
            self.render_pass,
            attributes,
            self.topology,
            self.shaders,
            self.cull_mode,
            self.depth_test_enable,
            self.depth_write_enable,
            self.depth_compare,
            self.blend,
            self.color_attachment_count,
            self.sample_count,
        ))
    }
}

impl Device {
    pub fn create_graphics_pipeline(&self) -> GraphicsPipelineHandle {
        self.graphics_pipelines.lock().unwrap().insert(GraphicsPipeline::default())
    }

    pub fn destroy_graphics_pipeline(&self, handle: GraphicsPipelineHandle) {
        self.graphics_pipelines.lock().unwrap().remove(handle);
    }

    pub fn with_graphics_pipeline<R>(
        &self,
        handle: GraphicsPipelineHandle,
        f: impl FnOnce(&mut GraphicsPipeline) -> R,
    ) -> Option<R> {
        self.graphics_pipelines.lock().unwrap().get_mut(handle).map(f)
    }

    /// Flushes each bound bind-set's layout into a pipeline layout, then
    /// fetch-or-builds the `VkPipeline` itself, per spec.md §4.2's graphics
    /// pipeline-cache key.
    pub fn flush_graphics_pipeline(&self, handle: GraphicsPipelineHandle) -> Result<vk::Pipeline> {
        let mut pipelines = self.graphics_pipelines.lock().unwrap();
        let pipeline = pipelines
            .get_mut(handle)
            .ok_or_else(|| crate::Error::other("unknown graphics pipeline"))?;

        let render_pass_handle = pipeline
            .render_pass
            .ok_or_else(|| crate::Error::other("graphics pipeline has no target render pass set"))?;

        let set_layouts: Vec<vk::DescriptorSetLayout> = pipeline
            .bind_sets
            .iter()
            .filter_map(|s| *s)
            .filter_map(|s| self.bind_set_layout(s))
            .collect();

        let layout_key = crate::caches::hash_key((&set_layouts, pipeline.push_constant_len as u32));
        let core = &self.core;
        let push_constant_len = pipeline.push_constant_len as u32;
        let layout = *self.pipeline_layout_cache.lock().unwrap().fetch_or_build(layout_key, || {
            let push_constant_ranges = if push_constant_len > 0 {
                vec![vk::PushConstantRange {
                    stage_flags: vk::ShaderStageFlags::ALL,
                    offset: 0,
                    size: push_constant_len,
                }]
            } else {
                Vec::new()
            };
            let layout = unsafe {
                core.create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::builder()
                        .set_layouts(&set_layouts)
                        .push_constant_ranges(&push_constant_ranges),
                    None,
                )
            }?;
            Ok(layout)
        })?;
        pipeline.layout = Some(layout);

        let key = pipeline.state_key();
        if pipeline.last_key == Some(key) {
            return Ok(pipeline.pipeline.unwrap());
        }

        let render_passes = self.render_passes.lock().unwrap();
        let render_pass = render_passes
            .get(render_pass_handle)
            .ok_or_else(|| crate::Error::other("unknown render pass"))?
            .handle;
        drop(render_passes);

        let shaders = self.shaders.lock().unwrap();
        let mut stages = Vec::new();
        let entry_point = std::ffi::CString::new("main").unwrap();
        for (index, shader) in pipeline.shaders.iter().enumerate() {
            if let Some(handle) = shader {
                let module = *shaders
                    .get(*handle)
                    .ok_or_else(|| crate::Error::other("unknown shader"))?;
                let stage = match index {
                    0 => vk::ShaderStageFlags::VERTEX,
                    1 => vk::ShaderStageFlags::TESSELLATION_CONTROL,
                    2 => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
                    3 => vk::ShaderStageFlags::GEOMETRY,
                    _ => vk::ShaderStageFlags::FRAGMENT,
                };
                stages.push(
                    vk::PipelineShaderStageCreateInfo::builder()
                        .stage(stage)
                        .module(module)
                        .name(entry_point.as_c_str())
                        .build(),
                );
            }
        }
        drop(shaders);

        let mut bindings = Vec::with_capacity(pipeline.vertex_streams.len());
        let mut attribute_descs = Vec::new();
        for (i, stream) in pipeline.vertex_streams.iter().enumerate() {
            bindings.push(vk::VertexInputBindingDescription {
                binding: i as u32,
                stride: stream.stride,
                input_rate: if stream.per_instance {
                    vk::VertexInputRate::INSTANCE
                } else {
                    vk::VertexInputRate::VERTEX
                },
            });
            for attribute in &stream.attributes {
                attribute_descs.push(vk::VertexInputAttributeDescription {
                    binding: i as u32,
                    location: attribute.shader_location,
                    format: attribute.format.to_vk(),
                    offset: attribute.offset,
                });
            }
        }
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attribute_descs);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(pipeline.topology.to_vk())
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport::default()];
        let scissors = [vk::Rect2D::default()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(pipeline.cull_mode.to_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let sample_count_flags = match pipeline.sample_count {
            1 => vk::SampleCountFlags::TYPE_1,
            2 => vk::SampleCountFlags::TYPE_2,
            4 => vk::SampleCountFlags::TYPE_4,
            8 => vk::SampleCountFlags::TYPE_8,
            _ => vk::SampleCountFlags::TYPE_1,
        };
        let multisample_state =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(sample_count_flags);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(pipeline.depth_test_enable)
            .depth_write_enable(pipeline.depth_write_enable)
            .depth_compare_op(pipeline.depth_compare.to_vk())
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachment = match pipeline.blend {
            Some(blend) => vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(true)
                .src_color_blend_factor(blend.src_factor.to_vk())
                .dst_color_blend_factor(blend.dst_factor.to_vk())
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(blend.src_alpha_factor.to_vk())
                .dst_alpha_blend_factor(blend.dst_alpha_factor.to_vk())
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .build(),
            None => vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .build(),
        };
        let blend_attachments = vec![blend_attachment; pipeline.color_attachment_count as usize];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let vk_pipeline = *self.pipeline_cache.lock().unwrap().fetch_or_build(key, || {
            let pipelines = unsafe {
                self.core
                    .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
            }
            .map_err(|(_, err)| err)?;
            Ok(pipelines[0])
        })?;

        pipeline.last_key = Some(key);
        pipeline.pipeline = Some(vk_pipeline);
        Ok(vk_pipeline)
    }

    pub(crate) fn graphics_pipeline_layout(&self, handle: GraphicsPipelineHandle) -> Option<vk::PipelineLayout> {
        self.graphics_pipelines.lock().unwrap().get(handle).and_then(|p| p.layout)
    }

    pub(crate) fn graphics_pipeline_bind_sets(&self, handle: GraphicsPipelineHandle) -> Vec<BindSetHandle> {
        self.graphics_pipelines
            .lock()
            .unwrap()
            .get(handle)
            .map(|p| p.bind_sets.iter().filter_map(|s| *s).collect())
            .unwrap_or_default()
    }

    pub(crate) fn graphics_pipeline_vertex_stream_count(&self, handle: GraphicsPipelineHandle) -> usize {
        self.graphics_pipelines
            .lock()
            .unwrap()
            .get(handle)
            .map(|p| p.vertex_streams.len())
            .unwrap_or_default()
    }

    pub(crate) fn graphics_pipeline_push_constants(&self, handle: GraphicsPipelineHandle) -> Option<Vec<u8>> {
        self.graphics_pipelines
            .lock()
            .unwrap()
            .get(handle)
            .filter(|p| p.push_constant_len > 0)
            .map(|p| p.push_constants[..p.push_constant_len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_state_hashes_equal() {
        let mut a = GraphicsPipeline::default();
        let mut b = GraphicsPipeline::default();
        a.set_cull_mode(CullMode::Back);
        b.set_cull_mode(CullMode::Back);
        a.set_target(RenderPassHandle::default(), 1, 1);
        b.set_target(RenderPassHandle::default(), 1, 1);
        assert_eq!(a.state_key(), b.state_key());
    }

    #[test]
    fn differing_cull_mode_hashes_differ() {
        let mut a = GraphicsPipeline::default();
        let mut b = GraphicsPipeline::default();
        a.set_target(RenderPassHandle::default(), 1, 1);
        b.set_target(RenderPassHandle::default(), 1, 1);
        a.set_cull_mode(CullMode::Back);
        b.set_cull_mode(CullMode::None);
        assert_ne!(a.state_key(), b.state_key());
    }
}
