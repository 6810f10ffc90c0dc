//! Reflected shader interface
//!
//! Descriptor bindings, push constant blocks, stage inputs/outputs and
//! entry points. These are the records a Vulkan host consumes when it builds
//! descriptor set layouts, pipeline layouts and vertex input state.

use std::collections::BTreeMap;

use ash::vk;
use spirv::Word;

use crate::decoration::Decorations;
use crate::types::{ArrayLength, ImageTraits, Specializable};

/// Descriptor resource kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
    CombinedImageSampler,
    InputAttachment,
    AccelerationStructure,
    UniformTexelBuffer,
    StorageTexelBuffer,
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
            DescriptorKind::AccelerationStructure => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
            DescriptorKind::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            DescriptorKind::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        }
    }

    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer
        )
    }
}

/// Layout of a buffer block or one of its members.
///
/// Offsets are in bytes. `padded_size` extends a member up to the next
/// member's offset (or, for the last member, up to the 16-byte rounded end
/// of the block).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockVariable {
    pub name: Option<String>,
    pub type_ref: Word,
    pub offset: u32,
    pub absolute_offset: u32,
    pub size: u32,
    pub padded_size: u32,
    pub decorations: Decorations,
    pub array_dims: Vec<ArrayLength>,
    pub members: Vec<BlockVariable>,
}

impl BlockVariable {
    /// Find a member by name, descending with a dotted path (`"light.color"`).
    pub fn member(&self, path: &str) -> Option<&BlockVariable> {
        let mut current = self;
        for part in path.split('.') {
            current = current
                .members
                .iter()
                .find(|m| m.name.as_deref() == Some(part))?;
        }
        Some(current)
    }
}

/// A resource variable bound through a descriptor set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub variable_id: Word,
    pub name: Option<String>,
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Type of the resource behind the variable's pointer.
    pub type_ref: Word,
    /// Array dimensions, outermost first. Empty when not an array.
    pub array_dims: Vec<ArrayLength>,
    /// Total descriptor count; 0 for runtime-sized arrays.
    pub count: u32,
    pub image: Option<ImageTraits>,
    pub input_attachment_index: Option<u32>,
    /// Layout of uniform and storage buffer blocks.
    pub block: Option<BlockVariable>,
    pub decorations: Decorations,
    /// The set index came from the missing-set default, not a decoration.
    pub set_defaulted: bool,
    /// Statically referenced by at least one entry point.
    pub accessed: bool,
    /// Byte offset of the `OpVariable`.
    pub offset: usize,
}

impl DescriptorBinding {
    /// Number of array dimensions (0 if not an array).
    pub fn array_dimension(&self) -> usize {
        self.array_dims.len()
    }

    pub fn is_runtime_array(&self) -> bool {
        self.count == 0
    }
}

/// Bindings sharing one set index, in ascending binding order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorSet {
    pub set: u32,
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSet {
    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

/// Borrowed view of the bindings one entry point references in a set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPointSet<'a> {
    pub set: u32,
    pub bindings: Vec<&'a DescriptorBinding>,
}

/// A push constant block: a struct-typed binding without set or binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushConstantBlock {
    pub variable_id: Word,
    pub name: Option<String>,
    pub block: BlockVariable,
    pub accessed: bool,
    pub offset: usize,
}

/// Member of a struct-typed stage input or output (e.g. `gl_PerVertex`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceMember {
    pub name: Option<String>,
    pub type_ref: Word,
    pub location: Option<u32>,
    pub built_in: Option<u32>,
    pub format: vk::Format,
    pub decorations: Decorations,
}

/// A stage input or output variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceVariable {
    pub variable_id: Word,
    pub name: Option<String>,
    pub storage_class: spirv::StorageClass,
    /// Type behind the variable's pointer.
    pub type_ref: Word,
    pub location: Option<u32>,
    pub component: Option<u32>,
    /// Raw `BuiltIn` operand of the variable.
    pub built_in: Option<u32>,
    pub semantic: Option<String>,
    pub array_dims: Vec<ArrayLength>,
    pub members: Vec<InterfaceMember>,
    /// Attribute format derived from the numeric traits.
    pub format: vk::Format,
    pub decorations: Decorations,
    pub offset: usize,
}

impl InterfaceVariable {
    pub fn is_input(&self) -> bool {
        self.storage_class == spirv::StorageClass::Input
    }

    pub fn is_output(&self) -> bool {
        self.storage_class == spirv::StorageClass::Output
    }

    /// Built-in variables, including blocks whose members are all built-ins.
    pub fn is_built_in(&self) -> bool {
        self.built_in.is_some()
            || (!self.members.is_empty() && self.members.iter().all(|m| m.built_in.is_some()))
    }

    pub fn built_in_kind(&self) -> Option<spirv::BuiltIn> {
        self.built_in.and_then(spirv::BuiltIn::from_u32)
    }
}

/// Workgroup size of a compute-like entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalSize {
    pub x: Specializable<u32>,
    pub y: Specializable<u32>,
    pub z: Specializable<u32>,
}

impl LocalSize {
    pub fn from_literals(x: u32, y: u32, z: u32) -> Self {
        LocalSize {
            x: Specializable::Known(x),
            y: Specializable::Known(y),
            z: Specializable::Known(z),
        }
    }

    pub fn is_specialization_dependent(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .any(Specializable::is_specialization_dependent)
    }

    /// All three dimensions, if none depends on a specialization constant.
    pub fn known(&self) -> Result<[u32; 3], crate::ReflectError> {
        Ok([self.x.known()?, self.y.known()?, self.z.known()?])
    }
}

/// One `OpExecutionMode` or `OpExecutionModeId`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionModeInfo {
    /// Raw mode operand.
    pub mode: u32,
    /// Literal operands, or constant ids for `OpExecutionModeId`.
    pub operands: Vec<u32>,
    pub operands_are_ids: bool,
}

impl ExecutionModeInfo {
    pub fn execution_mode(&self) -> Option<spirv::ExecutionMode> {
        spirv::ExecutionMode::from_u32(self.mode)
    }
}

/// Module-level `OpCapability`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Capability {
    pub value: u32,
    pub offset: usize,
}

impl Capability {
    pub fn capability(&self) -> Option<spirv::Capability> {
        spirv::Capability::from_u32(self.value)
    }
}

/// A named, stage-tagged function the host can launch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub execution_model: spirv::ExecutionModel,
    pub function_id: Word,
    /// Stage input/output variable ids from the interface list, in
    /// declaration order.
    pub interface_variables: Vec<Word>,
    /// Every id the `OpEntryPoint` lists (SPIR-V 1.4+ lists all globals).
    pub declared_interface: Vec<Word>,
    /// Referenced descriptor slots: set index to ascending binding indices.
    pub descriptor_slots: BTreeMap<u32, Vec<u32>>,
    /// Push constant variables the entry point reaches.
    pub push_constants: Vec<Word>,
    /// Every global variable reached from the entry function.
    pub accessed_variables: Vec<Word>,
    pub local_size: Option<LocalSize>,
    pub invocations: Option<u32>,
    pub output_vertices: Option<u32>,
    pub execution_modes: Vec<ExecutionModeInfo>,
    pub capabilities: Vec<Capability>,
    pub offset: usize,
}

impl EntryPoint {
    pub fn shader_stage(&self) -> vk::ShaderStageFlags {
        shader_stage(self.execution_model)
    }

    pub fn has_execution_mode(&self, mode: spirv::ExecutionMode) -> bool {
        self.execution_modes
            .iter()
            .any(|m| m.execution_mode() == Some(mode))
    }

    pub fn references_binding(&self, set: u32, binding: u32) -> bool {
        self.descriptor_slots
            .get(&set)
            .is_some_and(|bindings| bindings.contains(&binding))
    }
}

/// Vulkan stage flag for an execution model (`empty()` for kernels).
pub fn shader_stage(model: spirv::ExecutionModel) -> vk::ShaderStageFlags {
    use spirv::ExecutionModel as M;
    match model {
        M::Vertex => vk::ShaderStageFlags::VERTEX,
        M::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        M::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        M::Geometry => vk::ShaderStageFlags::GEOMETRY,
        M::Fragment => vk::ShaderStageFlags::FRAGMENT,
        M::GLCompute => vk::ShaderStageFlags::COMPUTE,
        M::TaskNV | M::TaskEXT => vk::ShaderStageFlags::TASK_EXT,
        M::MeshNV | M::MeshEXT => vk::ShaderStageFlags::MESH_EXT,
        M::RayGenerationKHR => vk::ShaderStageFlags::RAYGEN_KHR,
        M::IntersectionKHR => vk::ShaderStageFlags::INTERSECTION_KHR,
        M::AnyHitKHR => vk::ShaderStageFlags::ANY_HIT_KHR,
        M::ClosestHitKHR => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        M::MissKHR => vk::ShaderStageFlags::MISS_KHR,
        M::CallableKHR => vk::ShaderStageFlags::CALLABLE_KHR,
        _ => vk::ShaderStageFlags::empty(),
    }
}

/// Source-language metadata from `OpSource` and friends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceInfo {
    /// Raw source language operand.
    pub language: u32,
    pub language_version: u32,
    pub file: Option<String>,
    /// Embedded source text, concatenated with `OpSourceContinued`.
    pub text: Option<String>,
    pub extensions: Vec<String>,
    pub processes: Vec<String>,
}

impl SourceInfo {
    pub fn source_language(&self) -> Option<spirv::SourceLanguage> {
        spirv::SourceLanguage::from_u32(self.language)
    }
}

/// A specialization constant declared with a `SpecId`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecializationConstant {
    pub id: Word,
    pub spec_id: u32,
    pub name: Option<String>,
    pub type_ref: Word,
    /// Default value words (low word first for 64-bit; 0/1 for booleans).
    pub default: Vec<u32>,
    pub offset: usize,
}
