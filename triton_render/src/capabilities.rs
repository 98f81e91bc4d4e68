//! Traits the host supplies to the graph: file I/O, shader compilation,
//! typed resource storage, and ECS-style scene queries. `triton_render`
//! depends on none of these concretely — it only ever holds `&dyn Trait`.

use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

pub type Stream = u64;

/// Narrow file-access surface: map/unmap for bulk reads (shader sources,
/// YAML graphs), `mtime` for hot-reload staleness checks.
pub trait FileSystem {
    fn open(&self, uri: &str, mode: &str) -> Option<Stream>;
    fn close(&self, stream: Stream);
    fn map(&self, uri: &str) -> Option<Vec<u8>>;
    fn unmap(&self, bytes: Vec<u8>);
    fn mtime(&self, uri: &str) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlType {
    Spirv,
}

/// Compiled intermediate language, always SPIR-V words here since
/// `triton_vulkan::create_shader` takes `&[u32]` directly.
#[derive(Debug, Clone)]
pub struct Il {
    pub stage: ShaderStage,
    pub il_type: IlType,
    pub byte_size: usize,
    pub bytes: Vec<u32>,
}

pub trait ShaderCompiler {
    fn compile_il(&self, stage: ShaderStage, src_bytes: &[u8], src_path: Option<&str>) -> crate::Result<Il>;
    fn release(&self, il: Il);
    fn hash(&self, stage: ShaderStage, uri: &str) -> u64;
}

/// Generation-counted handle into caller-owned storage. `hash` is the
/// content hash the resource was last built from, so a `ResourceManager`
/// can detect a stale handle without walking its own generation table.
pub struct ResourceHandle<T> {
    pub generation: u32,
    pub index: u32,
    pub hash: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceHandle<T> {
    pub fn new(generation: u32, index: u32, hash: u64) -> Self {
        Self {
            generation,
            index,
            hash,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ResourceHandle<T> {}
impl<T> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && self.index == other.index && self.hash == other.hash
    }
}
impl<T> Eq for ResourceHandle<T> {}
impl<T> Hash for ResourceHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.generation.hash(state);
        self.index.hash(state);
        self.hash.hash(state);
    }
}
impl<T> std::fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("generation", &self.generation)
            .field("index", &self.index)
            .field("hash", &self.hash)
            .finish()
    }
}

/// Caller-owned typed storage (`Texture`, `Shader`, `Mesh`, `RenderMaterial`,
/// `IBLTexture`, `Material`, `RenderGraph` in the original taxonomy); the
/// core only ever resolves, never allocates, through this trait.
pub trait ResourceManager<T> {
    fn resolve(&self, handle: ResourceHandle<T>) -> Option<&T>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentDescriptor {
    pub type_hash: u64,
    pub size: usize,
    pub mutable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct QueryChunk {
    pub query: QueryHandle,
    pub len: usize,
}

/// ECS-agnostic scene query surface: a query is created once against a set
/// of component descriptors, then iterated chunk by chunk.
pub trait SceneQuerySource {
    fn create_query(&self, components: &[ComponentDescriptor]) -> QueryHandle;
    fn begin(&self, query: QueryHandle);
    fn next(&self, query: QueryHandle) -> Option<QueryChunk>;
    fn num_components(&self, chunk: QueryChunk) -> usize;
    fn components_ptr(&self, chunk: QueryChunk, i: usize) -> &[u8];
}

/// A fixed tuple of component types a pass wants to iterate. Building the
/// descriptor list from `T` at compile time keeps call sites free of the
/// hand-written descriptor arrays the dynamic `create_query` needs.
pub trait QueryTuple {
    fn descriptors() -> Vec<ComponentDescriptor>;
}

pub struct Query<T: QueryTuple> {
    handle: QueryHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T: QueryTuple> Query<T> {
    pub fn new(source: &dyn SceneQuerySource) -> Self {
        let handle = source.create_query(&T::descriptors());
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn begin(&self, source: &dyn SceneQuerySource) {
        source.begin(self.handle);
    }

    pub fn next(&self, source: &dyn SceneQuerySource) -> Option<QueryChunk> {
        source.next(self.handle)
    }
}
