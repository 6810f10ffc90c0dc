//! Reflected shader module
//!
//! Owns (or borrows) the SPIR-V words together with the complete reflection
//! graph built from them. Everything is computed once at construction and is
//! read-only afterwards.

use std::borrow::Cow;

use spirv::Word;

use crate::error::{ReflectError, Warning};
use crate::interface::{
    Capability, DescriptorBinding, DescriptorSet, EntryPoint, EntryPointSet, InterfaceVariable,
    PushConstantBlock, SourceInfo, SpecializationConstant,
};
use crate::options::{BufferOwnership, ReflectOptions};
use crate::parse::{self, Reflection};
use crate::types::{TypeArena, TypeDescription};
use crate::validation::{self, Generator, Header};

/// A parsed SPIR-V module and everything reflected from it.
///
/// `'a` is the lifetime of the caller's buffer when the module borrows it
/// ([`BufferOwnership::Borrow`]); owned modules are `ShaderModule<'static>`.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderModule<'a> {
    code: Cow<'a, [Word]>,
    reflection: Reflection,
}

impl<'a> ShaderModule<'a> {
    /// Parse SPIR-V bytes with default options (copying the input).
    ///
    /// # Errors
    ///
    /// Any [`ReflectError`]; no partially built module is returned.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, ReflectError> {
        Self::from_bytes_with_options(bytes, &ReflectOptions::default())
    }

    /// Parse SPIR-V bytes.
    ///
    /// With [`BufferOwnership::Borrow`] the words are viewed in place when the
    /// buffer is 4-byte aligned on a little-endian host, and copied otherwise.
    pub fn from_bytes_with_options(
        bytes: &'a [u8],
        options: &ReflectOptions,
    ) -> Result<Self, ReflectError> {
        validation::validate_spirv(bytes)?;

        let code: Cow<'a, [Word]> = match options.ownership {
            BufferOwnership::Borrow if cfg!(target_endian = "little") => {
                match bytemuck::try_cast_slice::<u8, Word>(bytes) {
                    Ok(words) => Cow::Borrowed(words),
                    Err(e) => {
                        log::debug!("cannot borrow SPIR-V buffer ({:?}), copying", e);
                        Cow::Owned(words_from_le_bytes(bytes))
                    }
                }
            }
            _ => Cow::Owned(words_from_le_bytes(bytes)),
        };
        Self::build(code, options)
    }

    /// Parse an already word-aligned module with default options.
    pub fn from_words(words: impl Into<Cow<'a, [Word]>>) -> Result<Self, ReflectError> {
        Self::from_words_with_options(words, &ReflectOptions::default())
    }

    /// Parse an already word-aligned module.
    ///
    /// A borrowed slice is kept borrowed unless `options` ask for a copy.
    pub fn from_words_with_options(
        words: impl Into<Cow<'a, [Word]>>,
        options: &ReflectOptions,
    ) -> Result<Self, ReflectError> {
        let code = match (words.into(), options.ownership) {
            (Cow::Borrowed(words), BufferOwnership::Copy) => Cow::Owned(words.to_vec()),
            (code, _) => code,
        };
        Self::build(code, options)
    }

    fn build(code: Cow<'a, [Word]>, options: &ReflectOptions) -> Result<Self, ReflectError> {
        let reflection = parse::reflect(&code, options)?;
        log::debug!(
            "Reflected ShaderModule: {} words, {} entry points, {} descriptor sets, {} warnings{}",
            code.len(),
            reflection.entry_points.len(),
            reflection.descriptor_sets.len(),
            reflection.warnings.len(),
            if matches!(code, Cow::Borrowed(_)) { " (borrowed)" } else { "" }
        );
        Ok(ShaderModule { code, reflection })
    }

    /// Detach from the caller's buffer by copying it if borrowed.
    pub fn into_owned(self) -> ShaderModule<'static> {
        ShaderModule {
            code: Cow::Owned(self.code.into_owned()),
            reflection: self.reflection,
        }
    }

    /// Whether the words are a view into the caller's buffer.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.code, Cow::Borrowed(_))
    }

    /// Release the module and every derived structure.
    pub fn destroy(self) {
        log::debug!(
            "Destroying ShaderModule ({} words, {} types)",
            self.code.len(),
            self.reflection.types.len()
        );
    }

    // Module metadata

    pub fn header(&self) -> &Header {
        &self.reflection.header
    }

    /// SPIR-V `(major, minor)` version.
    pub fn version(&self) -> (u8, u8) {
        self.reflection.header.version
    }

    pub fn generator(&self) -> Generator {
        self.reflection.header.generator
    }

    pub fn bound(&self) -> u32 {
        self.reflection.header.bound
    }

    pub fn schema(&self) -> u32 {
        self.reflection.header.schema
    }

    pub fn code(&self) -> &[Word] {
        &self.code
    }

    /// Size of the module in bytes.
    pub fn code_size(&self) -> usize {
        self.code.len() * std::mem::size_of::<Word>()
    }

    pub fn source(&self) -> &SourceInfo {
        &self.reflection.source
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.reflection.capabilities
    }

    pub fn has_capability(&self, capability: spirv::Capability) -> bool {
        self.reflection
            .capabilities
            .iter()
            .any(|c| c.value == capability as u32)
    }

    pub fn extensions(&self) -> &[String] {
        &self.reflection.extensions
    }

    /// Extended instruction sets (`OpExtInstImport`), e.g. `GLSL.std.450`.
    pub fn ext_inst_imports(&self) -> &[String] {
        &self.reflection.ext_inst_imports
    }

    pub fn addressing_model(&self) -> Option<spirv::AddressingModel> {
        self.reflection
            .addressing_model
            .and_then(spirv::AddressingModel::from_u32)
    }

    pub fn memory_model(&self) -> Option<spirv::MemoryModel> {
        self.reflection
            .memory_model
            .and_then(spirv::MemoryModel::from_u32)
    }

    /// Recoverable anomalies found while parsing.
    pub fn warnings(&self) -> &[Warning] {
        &self.reflection.warnings
    }

    pub fn dangling_decoration_count(&self) -> usize {
        self.reflection.dangling_decorations
    }

    // Entry points

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.reflection.entry_points
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.reflection.entry_points.iter().find(|ep| ep.name == name)
    }

    pub fn entry_point_at(&self, index: usize) -> Option<&EntryPoint> {
        self.reflection.entry_points.get(index)
    }

    // Descriptors

    /// All descriptor sets of the module, ascending by set index.
    pub fn descriptor_sets(&self) -> &[DescriptorSet] {
        &self.reflection.descriptor_sets
    }

    pub fn descriptor_set(&self, set: u32) -> Option<&DescriptorSet> {
        self.reflection.descriptor_sets.iter().find(|s| s.set == set)
    }

    pub fn descriptor_binding(&self, set: u32, binding: u32) -> Option<&DescriptorBinding> {
        self.descriptor_set(set)?.binding(binding)
    }

    pub fn descriptor_binding_by_name(&self, name: &str) -> Option<&DescriptorBinding> {
        self.reflection
            .descriptor_sets
            .iter()
            .flat_map(|s| s.bindings.iter())
            .find(|b| b.name.as_deref() == Some(name))
    }

    /// The descriptor sets an entry point actually references, restricted
    /// to the referenced bindings. `None` for an unknown entry point.
    pub fn entry_point_descriptor_sets(&self, entry_point: &str) -> Option<Vec<EntryPointSet<'_>>> {
        let ep = self.entry_point(entry_point)?;
        let sets = ep
            .descriptor_slots
            .iter()
            .filter_map(|(&set, bindings)| {
                let module_set = self.descriptor_set(set)?;
                let bindings = bindings
                    .iter()
                    .filter_map(|&b| module_set.binding(b))
                    .collect();
                Some(EntryPointSet { set, bindings })
            })
            .collect();
        Some(sets)
    }

    pub fn push_constant_blocks(&self) -> &[PushConstantBlock] {
        &self.reflection.push_constants
    }

    pub fn entry_point_push_constants(&self, entry_point: &str) -> Option<Vec<&PushConstantBlock>> {
        let ep = self.entry_point(entry_point)?;
        Some(
            self.reflection
                .push_constants
                .iter()
                .filter(|b| ep.push_constants.contains(&b.variable_id))
                .collect(),
        )
    }

    // Stage interface

    /// Every module-scope `Input`/`Output` variable.
    pub fn interface_variables(&self) -> &[InterfaceVariable] {
        &self.reflection.interface_variables
    }

    fn entry_interface(&self, entry_point: &str) -> Option<Vec<&InterfaceVariable>> {
        let ep = self.entry_point(entry_point)?;
        Some(
            ep.interface_variables
                .iter()
                .filter_map(|id| {
                    self.reflection
                        .interface_variables
                        .iter()
                        .find(|v| v.variable_id == *id)
                })
                .collect(),
        )
    }

    pub fn input_variables(&self, entry_point: &str) -> Option<Vec<&InterfaceVariable>> {
        let mut vars = self.entry_interface(entry_point)?;
        vars.retain(|v| v.is_input());
        Some(vars)
    }

    pub fn output_variables(&self, entry_point: &str) -> Option<Vec<&InterfaceVariable>> {
        let mut vars = self.entry_interface(entry_point)?;
        vars.retain(|v| v.is_output());
        Some(vars)
    }

    pub fn input_variable_by_location(&self, entry_point: &str, location: u32) -> Option<&InterfaceVariable> {
        self.input_variables(entry_point)?
            .into_iter()
            .find(|v| v.location == Some(location))
    }

    pub fn output_variable_by_location(&self, entry_point: &str, location: u32) -> Option<&InterfaceVariable> {
        self.output_variables(entry_point)?
            .into_iter()
            .find(|v| v.location == Some(location))
    }

    /// Lookup by HLSL semantic (`UserSemantic` decoration).
    pub fn input_variable_by_semantic(&self, entry_point: &str, semantic: &str) -> Option<&InterfaceVariable> {
        self.input_variables(entry_point)?
            .into_iter()
            .find(|v| v.semantic.as_deref() == Some(semantic))
    }

    pub fn output_variable_by_semantic(&self, entry_point: &str, semantic: &str) -> Option<&InterfaceVariable> {
        self.output_variables(entry_point)?
            .into_iter()
            .find(|v| v.semantic.as_deref() == Some(semantic))
    }

    // Types

    pub fn types(&self) -> &TypeArena {
        &self.reflection.types
    }

    pub fn type_description(&self, id: Word) -> Option<&TypeDescription> {
        self.reflection.types.get(id)
    }

    /// Type of the resource bound at `(set, binding)`, descriptor arrays
    /// included.
    pub fn binding_type(&self, set: u32, binding: u32) -> Option<&TypeDescription> {
        let binding = self.descriptor_binding(set, binding)?;
        self.reflection.types.get(binding.type_ref)
    }

    /// Specialization constants with a `SpecId`, in declaration order.
    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.reflection.specialization_constants
    }
}

fn words_from_le_bytes(bytes: &[u8]) -> Vec<Word> {
    bytes
        .chunks_exact(4)
        .map(|c| Word::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
