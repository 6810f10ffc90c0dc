//! Constant table
//!
//! Literal and specialization constants, used for array lengths,
//! `LocalSizeId` operands and the `WorkgroupSize` built-in.

use std::collections::HashMap;

use spirv::{Op, Word};

use super::decorations::DecorationTable;
use super::index::InstructionIndex;
use crate::error::ReflectError;
use crate::interface::SpecializationConstant;
use crate::types::Specializable;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConstantValue {
    /// Literal words, low word first.
    Scalar(Vec<Word>),
    Bool(bool),
    Composite(Vec<Word>),
    Null,
    /// `OpSpecConstantOp`, `OpConstantSampler`: no literal value.
    Opaque,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Constant {
    pub id: Word,
    pub type_id: Word,
    pub value: ConstantValue,
    pub specialization: bool,
    pub offset: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ConstantTable {
    constants: HashMap<Word, Constant>,
    /// Declaration order, for deterministic enumeration.
    order: Vec<Word>,
}

impl ConstantTable {
    pub fn collect(index: &InstructionIndex<'_>) -> Result<Self, ReflectError> {
        let mut table = ConstantTable::default();
        for inst in index.instructions() {
            let (value, specialization) = match inst.op {
                Some(Op::Constant) => (ConstantValue::Scalar(inst.operands_from(2).to_vec()), false),
                Some(Op::SpecConstant) => {
                    (ConstantValue::Scalar(inst.operands_from(2).to_vec()), true)
                }
                Some(Op::ConstantTrue) => (ConstantValue::Bool(true), false),
                Some(Op::ConstantFalse) => (ConstantValue::Bool(false), false),
                Some(Op::SpecConstantTrue) => (ConstantValue::Bool(true), true),
                Some(Op::SpecConstantFalse) => (ConstantValue::Bool(false), true),
                Some(Op::ConstantComposite) => (
                    ConstantValue::Composite(inst.operands_from(2).to_vec()),
                    false,
                ),
                Some(Op::SpecConstantComposite) => (
                    ConstantValue::Composite(inst.operands_from(2).to_vec()),
                    true,
                ),
                Some(Op::ConstantNull) => (ConstantValue::Null, false),
                Some(Op::ConstantSampler) => (ConstantValue::Opaque, false),
                Some(Op::SpecConstantOp) => (ConstantValue::Opaque, true),
                _ => continue,
            };
            if matches!(value, ConstantValue::Scalar(ref words) if words.is_empty()) {
                return Err(ReflectError::malformed(
                    inst.byte_offset(),
                    format!("{} has no value", inst.op_name()),
                ));
            }
            let (Some(type_id), Some(id)) = (inst.result_type, inst.result_id) else {
                continue;
            };
            table.order.push(id);
            table.constants.insert(
                id,
                Constant {
                    id,
                    type_id,
                    value,
                    specialization,
                    offset: inst.byte_offset(),
                },
            );
        }
        log::debug!("collected {} constants", table.constants.len());
        Ok(table)
    }

    pub fn get(&self, id: Word) -> Option<&Constant> {
        self.constants.get(&id)
    }

    /// Value of a 32-bit scalar constant.
    ///
    /// # Errors
    ///
    /// `MalformedInput` at `referrer` when `id` is not a scalar constant.
    pub fn scalar_u32(
        &self,
        id: Word,
        decorations: &DecorationTable,
        referrer: usize,
    ) -> Result<Specializable<u32>, ReflectError> {
        let constant = self.get(id).ok_or_else(|| {
            ReflectError::malformed(referrer, format!("%{} is not a constant", id))
        })?;
        let literal = match constant.value {
            ConstantValue::Scalar(ref words) => words.first().copied(),
            ConstantValue::Null => Some(0),
            ConstantValue::Opaque => None,
            ConstantValue::Bool(_) | ConstantValue::Composite(_) => {
                return Err(ReflectError::malformed(
                    referrer,
                    format!("constant %{} is not an integer scalar", id),
                ))
            }
        };
        match (constant.specialization, literal) {
            (false, Some(value)) => Ok(Specializable::Known(value)),
            (false, None) => Err(ReflectError::malformed(
                referrer,
                format!("constant %{} has no literal value", id),
            )),
            (true, default) => Ok(Specializable::SpecializationDependent {
                id,
                spec_id: decorations.get(id).and_then(|d| d.spec_id),
                default,
            }),
        }
    }

    /// Components of a composite constant, each as a 32-bit scalar.
    pub fn composite_u32(
        &self,
        id: Word,
        decorations: &DecorationTable,
        referrer: usize,
    ) -> Result<Vec<Specializable<u32>>, ReflectError> {
        match self.get(id).map(|c| &c.value) {
            Some(ConstantValue::Composite(parts)) => parts
                .iter()
                .map(|&part| self.scalar_u32(part, decorations, referrer))
                .collect(),
            _ => Err(ReflectError::malformed(
                referrer,
                format!("%{} is not a composite constant", id),
            )),
        }
    }

    /// Specialization constants carrying a `SpecId`, in declaration order.
    pub fn specialization_constants(
        &self,
        decorations: &DecorationTable,
    ) -> Vec<SpecializationConstant> {
        self.order
            .iter()
            .filter_map(|id| self.constants.get(id))
            .filter(|c| c.specialization)
            .filter_map(|c| {
                let spec_id = decorations.get(c.id).and_then(|d| d.spec_id)?;
                let default = match c.value {
                    ConstantValue::Scalar(ref words) => words.clone(),
                    ConstantValue::Bool(value) => vec![value as u32],
                    _ => Vec::new(),
                };
                Some(SpecializationConstant {
                    id: c.id,
                    spec_id,
                    name: decorations.name(c.id),
                    type_ref: c.type_id,
                    default,
                    offset: c.offset,
                })
            })
            .collect()
    }
}
