//! Module construction
//!
//! Three phases in strict order: Index, then Resolve (decorations,
//! constants, types, variables), then Assemble (entry points). The first
//! failure aborts the whole construction.

pub(crate) mod constants;
pub(crate) mod decorations;
pub(crate) mod entry_points;
pub(crate) mod index;
pub(crate) mod types;
pub(crate) mod variables;

use spirv::{Op, Word};

use crate::error::{Diagnostics, ReflectError, Warning};
use crate::interface::{
    Capability, DescriptorSet, EntryPoint, InterfaceVariable, PushConstantBlock, SourceInfo,
    SpecializationConstant,
};
use crate::options::ReflectOptions;
use crate::types::TypeArena;
use crate::validation::Header;

use self::constants::ConstantTable;
use self::decorations::DecorationTable;
use self::entry_points::EntryPointAssembler;
use self::index::InstructionIndex;
use self::types::TypeResolver;
use self::variables::VariableBuilder;

/// Everything derived from one module, owned and immutable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reflection {
    pub header: Header,
    pub source: SourceInfo,
    pub capabilities: Vec<Capability>,
    pub extensions: Vec<String>,
    pub ext_inst_imports: Vec<String>,
    pub addressing_model: Option<u32>,
    pub memory_model: Option<u32>,
    pub types: TypeArena,
    pub descriptor_sets: Vec<DescriptorSet>,
    pub push_constants: Vec<PushConstantBlock>,
    pub interface_variables: Vec<InterfaceVariable>,
    pub specialization_constants: Vec<SpecializationConstant>,
    pub entry_points: Vec<EntryPoint>,
    pub warnings: Vec<Warning>,
    pub dangling_decorations: usize,
}

/// Build the full reflection graph of a word stream.
pub(crate) fn reflect(words: &[Word], options: &ReflectOptions) -> Result<Reflection, ReflectError> {
    let mut diagnostics = Diagnostics::new(options.strict);

    let index = InstructionIndex::build(words)?;
    log::debug!(
        "indexed {} instructions (SPIR-V {}.{}, bound {})",
        index.instructions().len(),
        index.header.version.0,
        index.header.version.1,
        index.header.bound
    );

    let decorations = DecorationTable::collect(&index, &mut diagnostics)?;
    let constants = ConstantTable::collect(&index)?;
    let types = TypeResolver::resolve_all(&index, &decorations, &constants)?;
    let mut globals =
        VariableBuilder::new(&index, &decorations, &types, options).build(&mut diagnostics)?;
    let module = ModuleInfo::collect(&index)?;

    let entry_points = EntryPointAssembler::new(
        &index,
        &decorations,
        &constants,
        &globals,
        &module.capabilities,
    )
    .assemble(&mut diagnostics)?;

    let accessed = entry_points
        .iter()
        .flat_map(|ep| ep.accessed_variables.iter().copied())
        .collect();
    globals.mark_accessed(&accessed);

    Ok(Reflection {
        header: index.header,
        source: module.source,
        capabilities: module.capabilities,
        extensions: module.extensions,
        ext_inst_imports: module.ext_inst_imports,
        addressing_model: module.addressing_model,
        memory_model: module.memory_model,
        types,
        descriptor_sets: globals.descriptor_sets,
        push_constants: globals.push_constants,
        interface_variables: globals.interface_variables,
        specialization_constants: constants.specialization_constants(&decorations),
        entry_points,
        warnings: diagnostics.into_warnings(),
        dangling_decorations: decorations.dangling_count(),
    })
}

/// Module-level declarations outside the type graph.
#[derive(Debug, Default)]
struct ModuleInfo {
    source: SourceInfo,
    capabilities: Vec<Capability>,
    extensions: Vec<String>,
    ext_inst_imports: Vec<String>,
    addressing_model: Option<u32>,
    memory_model: Option<u32>,
}

impl ModuleInfo {
    fn collect(index: &InstructionIndex<'_>) -> Result<Self, ReflectError> {
        let mut info = ModuleInfo::default();
        for inst in index.instructions() {
            match inst.op {
                Some(Op::Capability) => info.capabilities.push(Capability {
                    value: inst.operand(0)?,
                    offset: inst.byte_offset(),
                }),
                Some(Op::Extension) => info.extensions.push(inst.string(0)?.0),
                Some(Op::ExtInstImport) => info.ext_inst_imports.push(inst.string(1)?.0),
                Some(Op::MemoryModel) => {
                    info.addressing_model = Some(inst.operand(0)?);
                    info.memory_model = Some(inst.operand(1)?);
                }
                Some(Op::Source) => {
                    info.source.language = inst.operand(0)?;
                    info.source.language_version = inst.operand(1)?;
                    if let Some(&file) = inst.operands().get(2) {
                        info.source.file = match index.get(file) {
                            Some(string) if string.op == Some(Op::String) => {
                                Some(string.string(1)?.0)
                            }
                            _ => None,
                        };
                    }
                    if inst.operands().len() > 3 {
                        info.source.text = Some(inst.string(3)?.0);
                    }
                }
                Some(Op::SourceContinued) => {
                    let more = inst.string(0)?.0;
                    info.source.text.get_or_insert_with(String::new).push_str(&more);
                }
                Some(Op::SourceExtension) => info.source.extensions.push(inst.string(0)?.0),
                Some(Op::ModuleProcessed) => info.source.processes.push(inst.string(0)?.0),
                _ => {}
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::SpirvBuilder;
    use spirv::{AddressingModel, Capability as Cap, MemoryModel, SourceLanguage};

    #[test]
    fn test_module_info() {
        let mut b = SpirvBuilder::new();
        b.capability(Cap::Shader);
        b.capability(Cap::Float16);
        b.extension("SPV_KHR_storage_buffer_storage_class");
        b.ext_inst_import("GLSL.std.450");
        b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let file = b.string("shaders/blur.comp");
        b.source(SourceLanguage::GLSL, 450, Some(file), Some("#version 450\n"));
        b.source_continued("void main() {}\n");
        b.source_extension("GL_GOOGLE_include_directive");
        b.module_processed("client vulkan100");

        let reflection = reflect(&b.build(), &ReflectOptions::default()).unwrap();
        let caps: Vec<u32> = reflection.capabilities.iter().map(|c| c.value).collect();
        assert_eq!(caps, vec![Cap::Shader as u32, Cap::Float16 as u32]);
        assert_eq!(reflection.extensions, vec!["SPV_KHR_storage_buffer_storage_class"]);
        assert_eq!(reflection.ext_inst_imports, vec!["GLSL.std.450"]);
        assert_eq!(reflection.memory_model, Some(MemoryModel::GLSL450 as u32));

        let source = &reflection.source;
        assert_eq!(source.source_language(), Some(SourceLanguage::GLSL));
        assert_eq!(source.language_version, 450);
        assert_eq!(source.file.as_deref(), Some("shaders/blur.comp"));
        assert_eq!(
            source.text.as_deref(),
            Some("#version 450\nvoid main() {}\n")
        );
        assert_eq!(source.extensions, vec!["GL_GOOGLE_include_directive"]);
        assert_eq!(source.processes, vec!["client vulkan100"]);
    }

    #[test]
    fn test_failure_is_atomic() {
        let mut b = SpirvBuilder::new();
        let missing = b.id();
        let float = b.type_float(32);
        b.type_vector(float, 4);
        b.type_vector(missing, 2);
        let err = reflect(&b.build(), &ReflectOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnresolvedTypeReference);
    }
}
