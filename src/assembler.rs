//! Programmatic SPIR-V assembly
//!
//! `SpirvBuilder` emits well-formed word streams for tests and tools without
//! an external compiler. Instructions are buffered per logical layout section
//! and concatenated in section order by [`SpirvBuilder::build`], so callers
//! may declare things in whatever order reads best.

use spirv::{
    AddressingModel, Capability, Decoration, Dim, ExecutionMode, ExecutionModel, ImageFormat,
    MemoryModel, Op, SourceLanguage, StorageClass, Word,
};

/// Version word emitted in the header (SPIR-V 1.5).
const VERSION: Word = 0x0001_0500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Capability,
    Extension,
    ExtInstImport,
    MemoryModel,
    EntryPoint,
    ExecutionMode,
    DebugStrings,
    DebugNames,
    DebugModuleProcessed,
    Annotations,
    Globals,
    Functions,
}

const SECTIONS: usize = Section::Functions as usize + 1;

fn section_of(op: Op) -> Section {
    match op {
        Op::Capability => Section::Capability,
        Op::Extension => Section::Extension,
        Op::ExtInstImport => Section::ExtInstImport,
        Op::MemoryModel => Section::MemoryModel,
        Op::EntryPoint => Section::EntryPoint,
        Op::ExecutionMode | Op::ExecutionModeId => Section::ExecutionMode,
        Op::String | Op::SourceExtension | Op::Source | Op::SourceContinued => {
            Section::DebugStrings
        }
        Op::Name | Op::MemberName => Section::DebugNames,
        Op::ModuleProcessed => Section::DebugModuleProcessed,
        Op::Decorate
        | Op::MemberDecorate
        | Op::DecorationGroup
        | Op::GroupDecorate
        | Op::GroupMemberDecorate
        | Op::DecorateId
        | Op::DecorateString
        | Op::MemberDecorateString => Section::Annotations,
        Op::Variable
        | Op::Undef
        | Op::Constant
        | Op::ConstantTrue
        | Op::ConstantFalse
        | Op::ConstantComposite
        | Op::ConstantNull
        | Op::ConstantSampler
        | Op::SpecConstant
        | Op::SpecConstantTrue
        | Op::SpecConstantFalse
        | Op::SpecConstantComposite
        | Op::SpecConstantOp => Section::Globals,
        op if crate::parse::types::is_type_declaration(Some(op)) => Section::Globals,
        _ => Section::Functions,
    }
}

/// Literal string operand: UTF-8, nul-terminated, padded to a word boundary.
pub fn string_words(text: &str) -> Vec<Word> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Incremental builder for SPIR-V modules.
///
/// ```
/// use hlx_reflect::assembler::SpirvBuilder;
/// use hlx_reflect::ShaderModule;
///
/// let mut b = SpirvBuilder::new();
/// b.capability(spirv::Capability::Shader);
/// b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
/// let void = b.type_void();
/// let fn_ty = b.type_function(void, &[]);
/// let main = b.begin_function(void, fn_ty);
/// b.ret();
/// b.end_function();
/// b.entry_point(spirv::ExecutionModel::GLCompute, main, "main", &[]);
/// b.execution_mode(main, spirv::ExecutionMode::LocalSize, &[64, 1, 1]);
///
/// let module = ShaderModule::from_words(b.build()).unwrap();
/// assert_eq!(module.entry_points()[0].name, "main");
/// ```
#[derive(Debug, Clone)]
pub struct SpirvBuilder {
    next_id: Word,
    sections: [Vec<Word>; SECTIONS],
    generator: Word,
}

impl Default for SpirvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirvBuilder {
    pub fn new() -> Self {
        SpirvBuilder {
            next_id: 1,
            sections: Default::default(),
            generator: 0,
        }
    }

    /// Generator magic written to the header (tool id in the high half).
    pub fn generator(&mut self, tool: u16, version: u16) -> &mut Self {
        self.generator = (Word::from(tool) << 16) | Word::from(version);
        self
    }

    /// Allocate a fresh result id without emitting anything.
    pub fn id(&mut self) -> Word {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Emit an instruction with explicit operands into its layout section.
    pub fn raw(&mut self, op: Op, operands: &[Word]) -> &mut Self {
        let words = &mut self.sections[section_of(op) as usize];
        words.push(((operands.len() as Word + 1) << 16) | op as Word);
        words.extend_from_slice(operands);
        self
    }

    /// Emit `op` with a fresh result id after `result_type`, for opcodes
    /// without a dedicated helper (arithmetic, conversions...).
    pub fn instruction(&mut self, op: Op, result_type: Word, operands: &[Word]) -> Word {
        self.typed_result(op, result_type, operands)
    }

    fn emit(&mut self, op: Op, parts: &[&[Word]]) {
        let operands: Vec<Word> = parts.concat();
        self.raw(op, &operands);
    }

    fn result(&mut self, op: Op, operands: &[Word]) -> Word {
        let id = self.id();
        self.emit(op, &[&[id], operands]);
        id
    }

    fn typed_result(&mut self, op: Op, result_type: Word, operands: &[Word]) -> Word {
        let id = self.id();
        self.emit(op, &[&[result_type, id], operands]);
        id
    }

    /// Finished module: header plus every section in layout order.
    pub fn build(&self) -> Vec<Word> {
        let mut words = vec![
            spirv::MAGIC_NUMBER,
            VERSION,
            self.generator,
            self.next_id,
            0,
        ];
        for section in &self.sections {
            words.extend_from_slice(section);
        }
        words
    }

    /// Little-endian byte form of [`SpirvBuilder::build`].
    pub fn build_bytes(&self) -> Vec<u8> {
        self.build()
            .into_iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    // Mode setting

    pub fn capability(&mut self, capability: Capability) -> &mut Self {
        self.raw(Op::Capability, &[capability as Word])
    }

    pub fn extension(&mut self, name: &str) -> &mut Self {
        self.raw(Op::Extension, &string_words(name))
    }

    pub fn ext_inst_import(&mut self, name: &str) -> Word {
        self.result(Op::ExtInstImport, &string_words(name))
    }

    pub fn memory_model(&mut self, addressing: AddressingModel, memory: MemoryModel) -> &mut Self {
        self.raw(Op::MemoryModel, &[addressing as Word, memory as Word])
    }

    pub fn entry_point(
        &mut self,
        model: ExecutionModel,
        function: Word,
        name: &str,
        interface: &[Word],
    ) -> &mut Self {
        self.emit(
            Op::EntryPoint,
            &[&[model as Word, function], &string_words(name), interface],
        );
        self
    }

    pub fn execution_mode(&mut self, function: Word, mode: ExecutionMode, literals: &[u32]) -> &mut Self {
        self.emit(Op::ExecutionMode, &[&[function, mode as Word], literals]);
        self
    }

    pub fn execution_mode_id(&mut self, function: Word, mode: ExecutionMode, ids: &[Word]) -> &mut Self {
        self.emit(Op::ExecutionModeId, &[&[function, mode as Word], ids]);
        self
    }

    // Debug

    pub fn string(&mut self, text: &str) -> Word {
        self.result(Op::String, &string_words(text))
    }

    pub fn source(
        &mut self,
        language: SourceLanguage,
        version: u32,
        file: Option<Word>,
        text: Option<&str>,
    ) -> &mut Self {
        let mut operands = vec![language as Word, version];
        match (file, text) {
            (Some(file), Some(text)) => {
                operands.push(file);
                operands.extend(string_words(text));
            }
            (Some(file), None) => operands.push(file),
            (None, _) => {}
        }
        self.raw(Op::Source, &operands)
    }

    pub fn source_continued(&mut self, text: &str) -> &mut Self {
        self.raw(Op::SourceContinued, &string_words(text))
    }

    pub fn source_extension(&mut self, name: &str) -> &mut Self {
        self.raw(Op::SourceExtension, &string_words(name))
    }

    pub fn module_processed(&mut self, process: &str) -> &mut Self {
        self.raw(Op::ModuleProcessed, &string_words(process))
    }

    pub fn name(&mut self, target: Word, name: &str) -> &mut Self {
        self.emit(Op::Name, &[&[target], &string_words(name)]);
        self
    }

    pub fn member_name(&mut self, target: Word, member: u32, name: &str) -> &mut Self {
        self.emit(Op::MemberName, &[&[target, member], &string_words(name)]);
        self
    }

    // Annotations

    pub fn decorate(&mut self, target: Word, decoration: Decoration, literals: &[u32]) -> &mut Self {
        self.emit(Op::Decorate, &[&[target, decoration as Word], literals]);
        self
    }

    pub fn decorate_id(&mut self, target: Word, decoration: Decoration, ids: &[Word]) -> &mut Self {
        self.emit(Op::DecorateId, &[&[target, decoration as Word], ids]);
        self
    }

    pub fn decorate_string(&mut self, target: Word, decoration: Decoration, text: &str) -> &mut Self {
        self.emit(
            Op::DecorateString,
            &[&[target, decoration as Word], &string_words(text)],
        );
        self
    }

    pub fn member_decorate(
        &mut self,
        target: Word,
        member: u32,
        decoration: Decoration,
        literals: &[u32],
    ) -> &mut Self {
        self.emit(
            Op::MemberDecorate,
            &[&[target, member, decoration as Word], literals],
        );
        self
    }

    pub fn decoration_group(&mut self) -> Word {
        self.result(Op::DecorationGroup, &[])
    }

    pub fn group_decorate(&mut self, group: Word, targets: &[Word]) -> &mut Self {
        self.emit(Op::GroupDecorate, &[&[group], targets]);
        self
    }

    pub fn group_member_decorate(&mut self, group: Word, targets: &[(Word, u32)]) -> &mut Self {
        let pairs: Vec<Word> = targets.iter().flat_map(|&(t, m)| [t, m]).collect();
        self.emit(Op::GroupMemberDecorate, &[&[group], &pairs]);
        self
    }

    // Types

    pub fn type_void(&mut self) -> Word {
        self.result(Op::TypeVoid, &[])
    }

    pub fn type_bool(&mut self) -> Word {
        self.result(Op::TypeBool, &[])
    }

    pub fn type_int(&mut self, width: u32, signed: bool) -> Word {
        self.result(Op::TypeInt, &[width, signed as Word])
    }

    pub fn type_float(&mut self, width: u32) -> Word {
        self.result(Op::TypeFloat, &[width])
    }

    pub fn type_vector(&mut self, component: Word, count: u32) -> Word {
        self.result(Op::TypeVector, &[component, count])
    }

    pub fn type_matrix(&mut self, column: Word, columns: u32) -> Word {
        self.result(Op::TypeMatrix, &[column, columns])
    }

    /// Non-depth, non-arrayed, single-sampled image.
    pub fn type_image(&mut self, sampled_type: Word, dim: Dim, sampled: u32, format: ImageFormat) -> Word {
        self.result(
            Op::TypeImage,
            &[sampled_type, dim as Word, 0, 0, 0, sampled, format as Word],
        )
    }

    pub fn type_sampler(&mut self) -> Word {
        self.result(Op::TypeSampler, &[])
    }

    pub fn type_sampled_image(&mut self, image: Word) -> Word {
        self.result(Op::TypeSampledImage, &[image])
    }

    pub fn type_array(&mut self, element: Word, length: Word) -> Word {
        self.result(Op::TypeArray, &[element, length])
    }

    pub fn type_runtime_array(&mut self, element: Word) -> Word {
        self.result(Op::TypeRuntimeArray, &[element])
    }

    pub fn type_struct(&mut self, members: &[Word]) -> Word {
        self.result(Op::TypeStruct, members)
    }

    pub fn type_pointer(&mut self, storage_class: StorageClass, pointee: Word) -> Word {
        self.result(Op::TypePointer, &[storage_class as Word, pointee])
    }

    pub fn type_function(&mut self, return_type: Word, parameters: &[Word]) -> Word {
        let id = self.id();
        self.emit(Op::TypeFunction, &[&[id, return_type], parameters]);
        id
    }

    pub fn type_acceleration_structure(&mut self) -> Word {
        self.result(Op::TypeAccelerationStructureKHR, &[])
    }

    // Constants and globals

    pub fn constant_u32(&mut self, ty: Word, value: u32) -> Word {
        self.typed_result(Op::Constant, ty, &[value])
    }

    pub fn spec_constant_u32(&mut self, ty: Word, default: u32) -> Word {
        self.typed_result(Op::SpecConstant, ty, &[default])
    }

    pub fn constant_composite(&mut self, ty: Word, parts: &[Word]) -> Word {
        self.typed_result(Op::ConstantComposite, ty, parts)
    }

    pub fn spec_constant_composite(&mut self, ty: Word, parts: &[Word]) -> Word {
        self.typed_result(Op::SpecConstantComposite, ty, parts)
    }

    /// Module-scope variable; `pointer_type` must point into `storage_class`.
    pub fn variable(&mut self, pointer_type: Word, storage_class: StorageClass) -> Word {
        self.typed_result(Op::Variable, pointer_type, &[storage_class as Word])
    }

    // Functions

    /// Open a function with a fresh id and its entry block label.
    pub fn begin_function(&mut self, return_type: Word, function_type: Word) -> Word {
        let id = self.id();
        self.begin_function_with_id(id, return_type, function_type);
        id
    }

    /// Open a function under an id allocated earlier, for forward calls.
    pub fn begin_function_with_id(&mut self, id: Word, return_type: Word, function_type: Word) -> &mut Self {
        self.raw(
            Op::Function,
            &[return_type, id, spirv::FunctionControl::NONE.bits(), function_type],
        );
        let label = self.id();
        self.raw(Op::Label, &[label])
    }

    pub fn ret(&mut self) -> &mut Self {
        self.raw(Op::Return, &[])
    }

    pub fn end_function(&mut self) -> &mut Self {
        self.raw(Op::FunctionEnd, &[])
    }

    pub fn load(&mut self, result_type: Word, pointer: Word) -> Word {
        self.typed_result(Op::Load, result_type, &[pointer])
    }

    pub fn store(&mut self, pointer: Word, object: Word) -> &mut Self {
        self.raw(Op::Store, &[pointer, object])
    }

    pub fn access_chain(&mut self, result_type: Word, base: Word, indices: &[Word]) -> Word {
        let id = self.id();
        self.emit(Op::AccessChain, &[&[result_type, id, base], indices]);
        id
    }

    pub fn function_call(&mut self, result_type: Word, function: Word, arguments: &[Word]) -> Word {
        let id = self.id();
        self.emit(Op::FunctionCall, &[&[result_type, id, function], arguments]);
        id
    }

    /// `scope` and `semantics` are constant ids.
    pub fn atomic_iadd(
        &mut self,
        result_type: Word,
        pointer: Word,
        scope: Word,
        semantics: Word,
        value: Word,
    ) -> Word {
        self.typed_result(
            Op::AtomicIAdd,
            result_type,
            &[pointer, scope, semantics, value],
        )
    }
}
