//! Instruction index
//!
//! A single linear scan that splits the word stream into instructions and
//! maps every defined result id back to its defining instruction.

use std::collections::HashMap;
use std::ops::Range;

use rspirv::grammar::{CoreInstructionTable, OperandKind};
use spirv::{Op, Word};

use crate::error::ReflectError;
use crate::validation::{self, Header, HEADER_WORDS};

/// Where an opcode puts its result id, if it has one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResultLayout {
    None,
    /// Result id in the first operand.
    Result,
    /// Result type in the first operand, result id in the second.
    TypedResult,
}

/// Result layout of an opcode, read from the core grammar. Opcodes the
/// grammar does not know define no result.
pub(crate) fn result_layout(opcode: u16) -> ResultLayout {
    let Some(grammar) = CoreInstructionTable::lookup_opcode(opcode) else {
        return ResultLayout::None;
    };
    match grammar.operands {
        [first, second, ..]
            if matches!(first.kind, OperandKind::IdResultType)
                && matches!(second.kind, OperandKind::IdResult) =>
        {
            ResultLayout::TypedResult
        }
        [first, ..] if matches!(first.kind, OperandKind::IdResult) => ResultLayout::Result,
        _ => ResultLayout::None,
    }
}

/// One decoded instruction; `words` includes the leading count/opcode word.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Instruction<'m> {
    pub opcode: u16,
    pub op: Option<Op>,
    pub word_offset: usize,
    pub words: &'m [Word],
    pub result_type: Option<Word>,
    pub result_id: Option<Word>,
    /// Id of the enclosing function, for instructions inside a body.
    pub function: Option<Word>,
}

impl<'m> Instruction<'m> {
    pub fn byte_offset(&self) -> usize {
        self.word_offset * 4
    }

    pub fn operands(&self) -> &'m [Word] {
        &self.words[1..]
    }

    /// Operand `index` (0 is the first word after the opcode word).
    pub fn operand(&self, index: usize) -> Result<Word, ReflectError> {
        self.operands().get(index).copied().ok_or_else(|| {
            ReflectError::malformed(
                self.byte_offset(),
                format!(
                    "{} is missing operand {}",
                    self.op_name(),
                    index
                ),
            )
        })
    }

    pub fn operands_from(&self, index: usize) -> &'m [Word] {
        self.operands().get(index..).unwrap_or(&[])
    }

    /// Literal string starting at operand `index`; returns the string and the
    /// index of the first operand after it.
    pub fn string(&self, index: usize) -> Result<(String, usize), ReflectError> {
        let words = self.operands_from(index);
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for (consumed, word) in words.iter().enumerate() {
            for byte in word.to_le_bytes() {
                if byte == 0 {
                    let text = String::from_utf8(bytes).map_err(|_| {
                        ReflectError::malformed(
                            self.byte_offset(),
                            format!("{} has a string that is not UTF-8", self.op_name()),
                        )
                    })?;
                    return Ok((text, index + consumed + 1));
                }
                bytes.push(byte);
            }
        }
        Err(ReflectError::malformed(
            self.byte_offset(),
            format!("{} has an unterminated string", self.op_name()),
        ))
    }

    pub fn op_name(&self) -> String {
        match self.op {
            Some(op) => format!("Op{:?}", op),
            None => format!("opcode {}", self.opcode),
        }
    }
}

/// Ordered instructions plus the id table.
#[derive(Debug)]
pub(crate) struct InstructionIndex<'m> {
    pub header: Header,
    instructions: Vec<Instruction<'m>>,
    by_id: HashMap<Word, usize>,
    functions: Vec<(Word, Range<usize>)>,
}

impl<'m> InstructionIndex<'m> {
    /// Scan the whole word stream.
    ///
    /// # Errors
    ///
    /// `MalformedInput` for a bad header, a zero or overlong word count, a
    /// result id of 0 or at/above the bound, a duplicate result id, or an
    /// unbalanced `OpFunction`/`OpFunctionEnd`.
    pub fn build(words: &'m [Word]) -> Result<Self, ReflectError> {
        let header = validation::parse_header(words)?;

        let mut instructions = Vec::new();
        let mut by_id = HashMap::new();
        let mut functions = Vec::new();
        let mut current_function: Option<(Word, usize)> = None;
        let mut cursor = HEADER_WORDS;

        while cursor < words.len() {
            let first = words[cursor];
            let word_count = (first >> 16) as usize;
            let opcode = (first & 0xFFFF) as u16;
            let byte_offset = cursor * 4;

            if word_count == 0 {
                return Err(ReflectError::malformed(
                    byte_offset,
                    format!("opcode {} has a word count of 0", opcode),
                ));
            }
            if cursor + word_count > words.len() {
                return Err(ReflectError::malformed(
                    byte_offset,
                    format!(
                        "opcode {} claims {} words but only {} remain",
                        opcode,
                        word_count,
                        words.len() - cursor
                    ),
                ));
            }

            let op = Op::from_u32(opcode as u32);
            if op.is_none() {
                log::trace!("unknown opcode {} at byte {}", opcode, byte_offset);
            }
            let inst_words = &words[cursor..cursor + word_count];
            let layout = result_layout(opcode);
            let (result_type, result_id) = match layout {
                ResultLayout::None => (None, None),
                ResultLayout::Result => (None, inst_words.get(1).copied()),
                ResultLayout::TypedResult => {
                    (inst_words.get(1).copied(), inst_words.get(2).copied())
                }
            };
            if layout != ResultLayout::None && result_id.is_none() {
                return Err(ReflectError::malformed(
                    byte_offset,
                    format!("opcode {} is too short to hold its result id", opcode),
                ));
            }

            let position = instructions.len();
            if op == Some(Op::Function) {
                if let Some((outer, _)) = current_function {
                    return Err(ReflectError::malformed(
                        byte_offset,
                        format!("OpFunction nested inside function %{}", outer),
                    ));
                }
                // result_id is present: checked above
                current_function = Some((result_id.unwrap_or(0), position));
            }
            let function = current_function.map(|(id, _)| id);
            if op == Some(Op::FunctionEnd) {
                match current_function.take() {
                    Some((id, start)) => functions.push((id, start..position + 1)),
                    None => {
                        return Err(ReflectError::malformed(
                            byte_offset,
                            "OpFunctionEnd outside of a function",
                        ))
                    }
                }
            }

            if let Some(id) = result_id {
                if id == 0 || id >= header.bound {
                    return Err(ReflectError::malformed(
                        byte_offset,
                        format!("result id %{} outside of bound {}", id, header.bound),
                    ));
                }
                if by_id.insert(id, position).is_some() {
                    return Err(ReflectError::malformed(
                        byte_offset,
                        format!("result id %{} is defined twice", id),
                    ));
                }
            }

            instructions.push(Instruction {
                opcode,
                op,
                word_offset: cursor,
                words: inst_words,
                result_type,
                result_id,
                function,
            });
            cursor += word_count;
        }

        if let Some((id, start)) = current_function {
            return Err(ReflectError::malformed(
                instructions[start].byte_offset(),
                format!("function %{} has no OpFunctionEnd", id),
            ));
        }

        log::debug!(
            "indexed {} instructions, {} result ids, {} functions",
            instructions.len(),
            by_id.len(),
            functions.len()
        );

        Ok(InstructionIndex {
            header,
            instructions,
            by_id,
            functions,
        })
    }

    pub fn instructions(&self) -> &[Instruction<'m>] {
        &self.instructions
    }

    /// Defining instruction of a result id.
    pub fn get(&self, id: Word) -> Option<&Instruction<'m>> {
        self.by_id.get(&id).map(|&i| &self.instructions[i])
    }

    pub fn is_defined(&self, id: Word) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Instructions with the given opcode, in module order.
    pub fn with_op(&self, op: Op) -> impl Iterator<Item = &Instruction<'m>> + '_ {
        self.instructions.iter().filter(move |i| i.op == Some(op))
    }

    /// Functions in declaration order with their instruction ranges
    /// (`OpFunction` through `OpFunctionEnd`).
    pub fn functions(&self) -> &[(Word, Range<usize>)] {
        &self.functions
    }

    pub fn function_body(&self, id: Word) -> Option<&[Instruction<'m>]> {
        self.functions
            .iter()
            .find(|(f, _)| *f == id)
            .map(|(_, range)| &self.instructions[range.clone()])
    }

    /// Whether `id` is an `OpVariable` at module scope.
    pub fn is_global_variable(&self, id: Word) -> bool {
        self.get(id)
            .is_some_and(|i| i.op == Some(Op::Variable) && i.function.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::SpirvBuilder;
    use crate::error::ErrorKind;

    fn header(bound: u32) -> Vec<Word> {
        vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, bound, 0]
    }

    #[test]
    fn test_index_maps_result_ids() {
        let mut b = SpirvBuilder::new();
        let void = b.type_void();
        let int = b.type_int(32, true);
        let words = b.build();

        let index = InstructionIndex::build(&words).unwrap();
        assert_eq!(index.get(void).unwrap().op, Some(Op::TypeVoid));
        assert_eq!(index.get(int).unwrap().operands(), &[int, 32, 1]);
        assert!(index.get(99).is_none());
    }

    #[test]
    fn test_truncated_instruction() {
        let mut words = header(10);
        // OpTypeInt claims 4 words, only 2 present
        words.extend_from_slice(&[(4 << 16) | Op::TypeInt as u32, 1]);
        let err = InstructionIndex::build(&words).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert_eq!(err.offset(), Some(20));
    }

    #[test]
    fn test_zero_word_count() {
        let mut words = header(10);
        words.push(Op::Nop as u32);
        let err = InstructionIndex::build(&words).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_id_beyond_bound() {
        let mut words = header(3);
        words.extend_from_slice(&[(2 << 16) | Op::TypeVoid as u32, 7]);
        let err = InstructionIndex::build(&words).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert_eq!(err.offset(), Some(20));
    }

    #[test]
    fn test_duplicate_result_id() {
        let mut words = header(10);
        words.extend_from_slice(&[(2 << 16) | Op::TypeVoid as u32, 1]);
        words.extend_from_slice(&[(2 << 16) | Op::TypeBool as u32, 1]);
        let err = InstructionIndex::build(&words).unwrap_err();
        assert_eq!(err.offset(), Some(28));
    }

    #[test]
    fn test_unterminated_function() {
        let mut b = SpirvBuilder::new();
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let id = b.id();
        b.raw(Op::Function, &[void, id, 0, fn_ty]);
        let err = InstructionIndex::build(&b.build()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_function_ranges_and_strings() {
        let mut b = SpirvBuilder::new();
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let main = b.begin_function(void, fn_ty);
        b.ret();
        b.end_function();
        b.name(main, "main");
        let words = b.build();

        let index = InstructionIndex::build(&words).unwrap();
        assert_eq!(index.functions().len(), 1);
        let body = index.function_body(main).unwrap();
        assert_eq!(body.first().unwrap().op, Some(Op::Function));
        assert_eq!(body.last().unwrap().op, Some(Op::FunctionEnd));
        assert!(body.iter().all(|i| i.function == Some(main)));

        let name = index.with_op(Op::Name).next().unwrap();
        assert_eq!(name.string(1).unwrap(), ("main".to_string(), 3));
    }

    #[test]
    fn test_every_result_opcode_is_indexed() {
        let mut b = SpirvBuilder::new();
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let float = b.type_float(32);
        let vec2 = b.type_vector(float, 2);
        let one = b.constant_u32(float, 0x3f80_0000);
        let main = b.begin_function(void, fn_ty);
        let product = b.instruction(Op::FMul, float, &[one, one]);
        let pair = b.instruction(Op::CompositeConstruct, vec2, &[product, one]);
        let first = b.instruction(Op::CompositeExtract, float, &[pair, 0]);
        b.ret();
        b.end_function();
        let words = b.build();

        let index = InstructionIndex::build(&words).unwrap();
        for id in [product, pair, first] {
            let inst = index.get(id).unwrap();
            assert_eq!(inst.function, Some(main));
        }
        assert_eq!(index.get(product).unwrap().result_type, Some(float));
        assert_eq!(index.get(pair).unwrap().result_type, Some(vec2));
        assert_eq!(result_layout(Op::Store as u16), ResultLayout::None);
        assert_eq!(result_layout(Op::TypeInt as u16), ResultLayout::Result);
        assert_eq!(result_layout(0xFFFF), ResultLayout::None);
    }

    #[test]
    fn test_duplicate_arithmetic_result_id() {
        let mut b = SpirvBuilder::new();
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let float = b.type_float(32);
        let one = b.constant_u32(float, 0x3f80_0000);
        b.begin_function(void, fn_ty);
        let product = b.instruction(Op::FMul, float, &[one, one]);
        b.raw(Op::FAdd, &[float, product, one, one]);
        b.ret();
        b.end_function();

        let err = InstructionIndex::build(&b.build()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }
}
