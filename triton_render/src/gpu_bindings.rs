//! Named parameter groups: a CPU-side byte blob per group, packed into a
//! single uniform buffer with std140-like padding, plus an ordered list of
//! texture slots. `flush` is the only place state actually reaches the GPU;
//! everything else just edits the CPU-side copy and sets a dirty flag.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use triton_vulkan::{BindSetHandle, Device, TextureHandle, UniformBufferHandle};

use crate::error::{Error, Result};
use crate::hash::hash_key;

const UBO_ALIGNMENT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Float,
    Int,
    Uint,
    Vec2,
    Vec3,
    Vec4,
    Ivec2,
    Ivec3,
    Ivec4,
    Uvec2,
    Uvec3,
    Uvec4,
    Mat3,
    Mat4,
}

enum NumKind {
    Float,
    Int,
    Uint,
}

impl ParameterType {
    pub fn element_size(self) -> usize {
        use ParameterType::*;
        match self {
            Float | Int | Uint => 4,
            Vec2 | Ivec2 | Uvec2 => 8,
            Vec3 | Ivec3 | Uvec3 => 12,
            Vec4 | Ivec4 | Uvec4 => 16,
            Mat3 => 36,
            Mat4 => 64,
        }
    }

    fn component_count(self) -> usize {
        use ParameterType::*;
        match self {
            Float | Int | Uint => 1,
            Vec2 | Ivec2 | Uvec2 => 2,
            Vec3 | Ivec3 | Uvec3 => 3,
            Vec4 | Ivec4 | Uvec4 => 4,
            Mat3 => 9,
            Mat4 => 16,
        }
    }

    fn component_kind(self) -> NumKind {
        use ParameterType::*;
        match self {
            Float | Vec2 | Vec3 | Vec4 | Mat3 | Mat4 => NumKind::Float,
            Int | Ivec2 | Ivec3 | Ivec4 => NumKind::Int,
            Uint | Uvec2 | Uvec3 | Uvec4 => NumKind::Uint,
        }
    }
}

struct Parameter {
    name: String,
    element_size: usize,
    num_elements: usize,
    memory: Vec<u8>,
}

impl Parameter {
    fn byte_len(&self) -> usize {
        self.element_size * self.num_elements
    }
}

struct TextureSlot {
    name: String,
    texture: Option<TextureHandle>,
}

pub struct ParameterGroup {
    name: String,
    parameters: Vec<Parameter>,
    textures: Vec<TextureSlot>,
    uniform_buffer: Option<UniformBufferHandle>,
    bind_set: Option<BindSetHandle>,
    buffer_size: usize,
    dirty: bool,
}

impl ParameterGroup {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            textures: Vec::new(),
            uniform_buffer: None,
            bind_set: None,
            buffer_size: 0,
            dirty: true,
        }
    }
}

/// Computes the std140-like offset of each parameter plus the buffer's total
/// byte size: a parameter that would straddle a 16-byte boundary is bumped
/// to the next one, everything else packs back to back.
fn layout_parameters(parameters: &[Parameter]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(parameters.len());
    let mut current_offset: usize = 0;
    let mut ubo_size: usize = 0;

    for parameter in parameters {
        let total_size = parameter.byte_len();
        let padding = UBO_ALIGNMENT - current_offset % UBO_ALIGNMENT;
        if current_offset > 0 && current_offset + total_size > UBO_ALIGNMENT {
            ubo_size += padding;
        }
        offsets.push(ubo_size);
        ubo_size += total_size;
        current_offset = (current_offset + total_size) % UBO_ALIGNMENT;
    }

    (offsets, ubo_size)
}

#[derive(Default)]
pub struct GpuBindings {
    groups: Vec<ParameterGroup>,
    index: HashMap<u64, usize>,
}

impl GpuBindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_index(&self, name: &str) -> Option<usize> {
        self.index.get(&hash_key(name)).copied()
    }

    fn parameter_index(group: &ParameterGroup, name: &str) -> Option<usize> {
        group.parameters.iter().position(|p| p.name == name)
    }

    fn texture_index(group: &ParameterGroup, name: &str) -> Option<usize> {
        group.textures.iter().position(|t| t.name == name)
    }

    pub fn add_group(&mut self, name: &str) -> Result<()> {
        if self.group_index(name).is_some() {
            return Err(Error::DuplicateGroup(name.to_string()));
        }
        self.index.insert(hash_key(name), self.groups.len());
        self.groups.push(ParameterGroup::new(name));
        Ok(())
    }

    /// Removes a group, rebuilding the hash index since later groups shift
    /// down by one slot (groups are expected to be few; this is not a
    /// hot-path call).
    pub fn remove_group(&mut self, device: &Device, name: &str) -> Result<()> {
        let index = self.group_index(name).ok_or_else(|| Error::UnknownGroup(name.to_string()))?;
        let group = self.groups.remove(index);
        if let Some(ubo) = group.uniform_buffer {
            device.destroy_uniform_buffer(ubo);
        }
        if let Some(set) = group.bind_set {
            device.destroy_bind_set(set);
        }
        self.index.clear();
        for (i, group) in self.groups.iter().enumerate() {
            self.index.insert(hash_key(&group.name), i);
        }
        Ok(())
    }

    /// Drops every parameter and texture slot, keeping the group itself;
    /// the next `flush` sees a fresh layout and (if it shrank to zero)
    /// tears down the uniform buffer.
    pub fn clear_group(&mut self, name: &str) -> Result<()> {
        let index = self.group_index(name).ok_or_else(|| Error::UnknownGroup(name.to_string()))?;
        let group = &mut self.groups[index];
        group.parameters.clear();
        group.textures.clear();
        group.dirty = true;
        Ok(())
    }

    pub fn add_group_parameter(
        &mut self,
        group: &str,
        name: &str,
        element_size: usize,
        num_elements: usize,
    ) -> Result<()> {
        let index = self.group_index(group).ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let group = &mut self.groups[index];
        group.parameters.push(Parameter {
            name: name.to_string(),
            element_size,
            num_elements: num_elements.max(1),
            memory: vec![0u8; element_size * num_elements.max(1)],
        });
        group.dirty = true;
        Ok(())
    }

    pub fn add_group_parameter_typed(
        &mut self,
        group: &str,
        name: &str,
        ty: ParameterType,
        num_elements: usize,
    ) -> Result<()> {
        self.add_group_parameter(group, name, ty.element_size(), num_elements)
    }

    pub fn add_group_texture(&mut self, group: &str, name: &str) -> Result<()> {
        let index = self.group_index(group).ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let group = &mut self.groups[index];
        group.textures.push(TextureSlot {
            name: name.to_string(),
            texture: None,
        });
        group.dirty = true;
        Ok(())
    }

    pub fn set_group_texture(&mut self, group: &str, name: &str, texture: TextureHandle) -> Result<()> {
        let index = self.group_index(group).ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let group = &mut self.groups[index];
        let texture_index =
            Self::texture_index(group, name).ok_or_else(|| Error::UnknownParameter {
                group: group.name.clone(),
                parameter: name.to_string(),
            })?;
        group.textures[texture_index].texture = Some(texture);
        group.dirty = true;
        Ok(())
    }

    /// Copies `src` into parameter `name` starting at element `dst_index`.
    /// `src.len()` must be an exact multiple of the parameter's element
    /// size; the element count it implies must fit within the parameter's
    /// declared length starting at `dst_index`.
    pub fn set_group_parameter(&mut self, group: &str, name: &str, dst_index: usize, src: &[u8]) -> Result<()> {
        let group_index = self.group_index(group).ok_or_else(|| Error::UnknownGroup(group.to_string()))?;
        let group = &mut self.groups[group_index];
        let parameter_index = Self::parameter_index(group, name).ok_or_else(|| Error::UnknownParameter {
            group: group.name.clone(),
            parameter: name.to_string(),
        })?;
        let parameter = &mut group.parameters[parameter_index];

        if parameter.element_size == 0 || src.len() % parameter.element_size != 0 {
            return Err(Error::ParameterSizeMismatch {
                parameter: name.to_string(),
                expected: parameter.element_size,
                size: parameter.element_size,
                actual: src.len(),
            });
        }
        let num_src_elements = src.len() / parameter.element_size;
        if dst_index >= parameter.num_elements || parameter.num_elements - dst_index < num_src_elements {
            return Err(Error::IndexOutOfRange {
                parameter: name.to_string(),
                index: dst_index,
                len: parameter.num_elements,
            });
        }

        let start = dst_index * parameter.element_size;
        parameter.memory[start..start + src.len()].copy_from_slice(src);
        group.dirty = true;
        Ok(())
    }

    pub fn bind_set(&self, group: &str) -> Option<BindSetHandle> {
        let index = self.group_index(group)?;
        self.groups[index].bind_set
    }

    fn flush_group(device: &Device, group: &mut ParameterGroup) -> Result<bool> {
        if !group.dirty {
            return Ok(false);
        }

        let mut should_invalidate = false;
        let (offsets, ubo_size) = layout_parameters(&group.parameters);

        if group.buffer_size < ubo_size {
            if let Some(old) = group.uniform_buffer.take() {
                device.destroy_uniform_buffer(old);
            }
            if ubo_size > 0 {
                group.uniform_buffer = Some(device.create_uniform_buffer(ubo_size as u64)?);
            }
            group.buffer_size = ubo_size;
            should_invalidate = true;
        }

        if group.buffer_size > 0 {
            let mut data = vec![0u8; group.buffer_size];
            for (parameter, &offset) in group.parameters.iter().zip(&offsets) {
                let len = parameter.byte_len();
                data[offset..offset + len].copy_from_slice(&parameter.memory);
            }
            if let Some(ubo) = group.uniform_buffer {
                device.write_uniform_buffer(ubo, &data);
            }
        }

        if group.bind_set.is_none() {
            group.bind_set = Some(device.create_bind_set());
            should_invalidate = true;
        }
        let bind_set = group.bind_set.unwrap();

        if let Some(ubo) = group.uniform_buffer {
            device.bind_uniform_buffer(bind_set, 0, ubo);
        }
        for (i, slot) in group.textures.iter().enumerate() {
            if let Some(texture) = slot.texture {
                // No per-slot sampler is modeled at the graph level; bound
                // textures fall back to the device's default sampler.
                device.bind_texture(bind_set, i + 1, texture, None);
            }
        }
        device.flush_bind_set(bind_set)?;

        group.dirty = false;
        Ok(should_invalidate)
    }

    /// Flushes every dirty group, returning whether any of them resized
    /// its uniform buffer or (re)built its bind set — a signal the render
    /// graph uses to invalidate dependent pipelines.
    pub fn flush(&mut self, device: &Device) -> Result<bool> {
        let mut should_invalidate = false;
        for group in &mut self.groups {
            should_invalidate |= Self::flush_group(device, group)?;
        }
        Ok(should_invalidate)
    }

    pub fn invalidate(&mut self, device: &Device) {
        for group in &mut self.groups {
            if let Some(ubo) = group.uniform_buffer.take() {
                device.destroy_uniform_buffer(ubo);
            }
            if let Some(set) = group.bind_set.take() {
                device.destroy_bind_set(set);
            }
            group.buffer_size = 0;
            group.dirty = true;
        }
    }

    pub fn serialize(&self) -> Vec<serde_yaml::Value> {
        self.groups
            .iter()
            .map(|group| {
                let parameters: Vec<ParameterDoc> = group
                    .parameters
                    .iter()
                    .map(|p| ParameterDoc::Sized {
                        name: p.name.clone(),
                        size: p.element_size,
                        elements: p.num_elements,
                    })
                    .collect();
                let textures: Vec<TextureDoc> = group
                    .textures
                    .iter()
                    .map(|t| TextureDoc { name: t.name.clone(), path: None })
                    .collect();
                let doc = ParameterGroupDoc {
                    name: group.name.clone(),
                    parameters,
                    textures,
                };
                let mut root = serde_yaml::Mapping::new();
                root.insert(
                    serde_yaml::Value::String("ParameterGroup".to_string()),
                    serde_yaml::to_value(doc).unwrap(),
                );
                serde_yaml::Value::Mapping(root)
            })
            .collect()
    }

    /// Scans every document in `docs` for a top-level `ParameterGroup` key
    /// and applies them in order; documents without that key are left for
    /// the render graph to interpret. Malformed entries are logged and
    /// skipped rather than aborting the whole load.
    pub fn deserialize(&mut self, docs: &[serde_yaml::Value]) -> Result<()> {
        for doc in docs {
            let Some(mapping) = doc.as_mapping() else { continue };
            let Some(value) = mapping.get(&serde_yaml::Value::String("ParameterGroup".to_string())) else {
                continue;
            };
            let parsed: ParameterGroupDoc = match serde_yaml::from_value(value.clone()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("skipping malformed ParameterGroup document: {e}");
                    continue;
                }
            };
            if parsed.name.is_empty() {
                warn!("skipping ParameterGroup document with an empty name");
                continue;
            }
            if self.add_group(&parsed.name).is_err() {
                warn!("skipping duplicate ParameterGroup {:?}", parsed.name);
                continue;
            }
            for parameter in &parsed.parameters {
                match parameter {
                    ParameterDoc::Typed {
                        name,
                        type_tag,
                        elements,
                        value,
                    } => {
                        if self
                            .add_group_parameter_typed(&parsed.name, name, *type_tag, *elements)
                            .is_err()
                        {
                            warn!("skipping malformed parameter {:?} in group {:?}", name, parsed.name);
                            continue;
                        }
                        if let Some(value) = value {
                            let bytes = encode_value(*type_tag, value, *elements);
                            let _ = self.set_group_parameter(&parsed.name, name, 0, &bytes);
                        }
                    }
                    ParameterDoc::Sized { name, size, elements } => {
                        if self.add_group_parameter(&parsed.name, name, *size, *elements).is_err() {
                            warn!("skipping malformed parameter {:?} in group {:?}", name, parsed.name);
                        }
                    }
                }
            }
            for texture in &parsed.textures {
                let _ = self.add_group_texture(&parsed.name, &texture.name);
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct ParameterGroupDoc {
    name: String,
    #[serde(default)]
    parameters: Vec<ParameterDoc>,
    #[serde(default)]
    textures: Vec<TextureDoc>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ParameterDoc {
    Typed {
        name: String,
        #[serde(rename = "type")]
        type_tag: ParameterType,
        #[serde(default = "default_one")]
        elements: usize,
        #[serde(default)]
        value: Option<serde_yaml::Value>,
    },
    Sized {
        name: String,
        size: usize,
        #[serde(default = "default_one")]
        elements: usize,
    },
}

fn default_one() -> usize {
    1
}

#[derive(Serialize, Deserialize)]
struct TextureDoc {
    name: String,
    #[serde(default)]
    path: Option<String>,
}

fn flatten_numbers(value: &serde_yaml::Value, out: &mut Vec<f64>) {
    match value {
        serde_yaml::Value::Number(n) => out.push(n.as_f64().unwrap_or(0.0)),
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                flatten_numbers(item, out);
            }
        }
        _ => {}
    }
}

/// Packs a YAML scalar-or-sequence into `elements` copies of `ty`'s byte
/// layout, cycling through the flattened numbers and zero-padding any the
/// document didn't supply.
fn encode_value(ty: ParameterType, value: &serde_yaml::Value, elements: usize) -> Vec<u8> {
    let mut scalars = Vec::new();
    flatten_numbers(value, &mut scalars);

    let components = ty.component_count();
    let kind = ty.component_kind();
    let mut out = vec![0u8; ty.element_size() * elements.max(1)];
    let mut cursor = 0usize;

    for element in 0..elements.max(1) {
        for component in 0..components {
            let scalar = scalars.get(cursor % scalars.len().max(1)).copied().unwrap_or(0.0);
            cursor += 1;
            let offset = element * ty.element_size() + component * 4;
            let bytes = match kind {
                NumKind::Float => (scalar as f32).to_le_bytes(),
                NumKind::Int => (scalar as i32).to_le_bytes(),
                NumKind::Uint => (scalar as u32).to_le_bytes(),
            };
            out[offset..offset + 4].copy_from_slice(&bytes);
        }
        if scalars.is_empty() {
            cursor = 0;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_packs_back_to_back_within_sixteen_bytes() {
        let parameters = vec![
            Parameter {
                name: "a".into(),
                element_size: 4,
                num_elements: 1,
                memory: vec![0; 4],
            },
            Parameter {
                name: "b".into(),
                element_size: 4,
                num_elements: 1,
                memory: vec![0; 4],
            },
        ];
        let (offsets, size) = layout_parameters(&parameters);
        assert_eq!(offsets, vec![0, 4]);
        assert_eq!(size, 8);
    }

    #[test]
    fn layout_pads_parameter_that_would_straddle_sixteen_bytes() {
        let parameters = vec![
            Parameter {
                name: "vec3".into(),
                element_size: 12,
                num_elements: 1,
                memory: vec![0; 12],
            },
            Parameter {
                name: "vec4".into(),
                element_size: 16,
                num_elements: 1,
                memory: vec![0; 16],
            },
        ];
        let (offsets, size) = layout_parameters(&parameters);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 16);
        assert_eq!(size, 32);
    }

    #[test]
    fn duplicate_group_is_rejected() {
        let mut bindings = GpuBindings::new();
        bindings.add_group("lighting").unwrap();
        assert!(matches!(bindings.add_group("lighting"), Err(Error::DuplicateGroup(_))));
    }

    #[test]
    fn set_group_parameter_rejects_out_of_range_index() {
        let mut bindings = GpuBindings::new();
        bindings.add_group("g").unwrap();
        bindings.add_group_parameter("g", "p", 4, 1).unwrap();
        let err = bindings.set_group_parameter("g", "p", 1, &[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { .. }));
    }

    #[test]
    fn set_group_parameter_rejects_mismatched_size() {
        let mut bindings = GpuBindings::new();
        bindings.add_group("g").unwrap();
        bindings.add_group_parameter("g", "p", 4, 2).unwrap();
        let err = bindings.set_group_parameter("g", "p", 0, &[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::ParameterSizeMismatch { .. }));
    }

    #[test]
    fn unknown_group_is_reported() {
        let mut bindings = GpuBindings::new();
        assert!(matches!(
            bindings.add_group_parameter("nope", "p", 4, 1),
            Err(Error::UnknownGroup(_))
        ));
    }
}
