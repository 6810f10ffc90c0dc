//! Type resolver
//!
//! Depth-first, memoized resolution of every type declaration into the
//! [`TypeArena`]. A type reached again while it is still being resolved is
//! a cycle: legal when the cycle passes through a pointer (buffer references
//! built with `OpTypeForwardPointer`), malformed otherwise.

use spirv::{Op, Word};

use super::constants::ConstantTable;
use super::decorations::DecorationTable;
use super::index::{Instruction, InstructionIndex};
use crate::error::ReflectError;
use crate::types::{
    ImageDim, ImageTraits, ImageUsage, ScalarKind, ScalarTraits, StructLayout, StructMember,
    TypeArena, TypeDescription, TypeInner,
};

/// Nesting limit for composite types.
const MAX_DEPTH: usize = 128;

pub(crate) fn is_type_declaration(op: Option<Op>) -> bool {
    use Op as O;
    matches!(
        op,
        Some(
            O::TypeVoid
                | O::TypeBool
                | O::TypeInt
                | O::TypeFloat
                | O::TypeVector
                | O::TypeMatrix
                | O::TypeImage
                | O::TypeSampler
                | O::TypeSampledImage
                | O::TypeArray
                | O::TypeRuntimeArray
                | O::TypeStruct
                | O::TypeOpaque
                | O::TypePointer
                | O::TypeFunction
                | O::TypeEvent
                | O::TypeDeviceEvent
                | O::TypeReserveId
                | O::TypeQueue
                | O::TypePipe
                | O::TypePipeStorage
                | O::TypeNamedBarrier
                | O::TypeAccelerationStructureKHR
                | O::TypeRayQueryKHR
        )
    )
}

pub(crate) struct TypeResolver<'a, 'm> {
    index: &'a InstructionIndex<'m>,
    decorations: &'a DecorationTable,
    constants: &'a ConstantTable,
    arena: TypeArena,
    /// Types being resolved, innermost last, with whether each is a pointer.
    stack: Vec<(Word, bool)>,
}

impl<'a, 'm> TypeResolver<'a, 'm> {
    /// Resolve every type declaration in the module.
    ///
    /// # Errors
    ///
    /// * `UnresolvedTypeReference` - a type operand names an id that is not a type
    /// * `UnsupportedType` - the module declares a type kind outside the modeled set
    /// * `MalformedInput` - invalid numeric traits, decreasing member offsets,
    ///   a non-pointer cycle, or nesting deeper than the resolver allows
    pub fn resolve_all(
        index: &'a InstructionIndex<'m>,
        decorations: &'a DecorationTable,
        constants: &'a ConstantTable,
    ) -> Result<TypeArena, ReflectError> {
        let mut resolver = TypeResolver {
            index,
            decorations,
            constants,
            arena: TypeArena::default(),
            stack: Vec::new(),
        };

        for inst in index.instructions() {
            if let (true, Some(id)) = (is_type_declaration(inst.op), inst.result_id) {
                resolver.resolve(id, inst.byte_offset())?;
            }
            if inst.op == Some(Op::TypeForwardPointer) {
                let pointer = inst.operand(0)?;
                let is_pointer = index
                    .get(pointer)
                    .is_some_and(|i| i.op == Some(Op::TypePointer));
                if !is_pointer {
                    return Err(ReflectError::UnresolvedTypeReference {
                        id: pointer,
                        offset: inst.byte_offset(),
                    });
                }
            }
        }

        log::debug!("resolved {} types", resolver.arena.len());
        Ok(resolver.arena)
    }

    /// Resolve `id`, memoized. `referrer` is the byte offset of the
    /// instruction that names it.
    fn resolve(&mut self, id: Word, referrer: usize) -> Result<(), ReflectError> {
        if self.arena.contains(id) {
            return Ok(());
        }

        if let Some(position) = self.stack.iter().position(|&(open, _)| open == id) {
            if self.stack[position..].iter().any(|&(_, pointer)| pointer) {
                log::trace!("type %{} reached again through a pointer", id);
                return Ok(());
            }
            return Err(ReflectError::malformed(
                referrer,
                format!("type %{} contains itself", id),
            ));
        }

        if self.stack.len() >= MAX_DEPTH {
            return Err(ReflectError::malformed(
                referrer,
                format!("type nesting deeper than {} levels", MAX_DEPTH),
            ));
        }

        let index = self.index;
        let inst = index
            .get(id)
            .filter(|i| is_type_declaration(i.op))
            .ok_or(ReflectError::UnresolvedTypeReference {
                id,
                offset: referrer,
            })?;

        self.stack.push((id, inst.op == Some(Op::TypePointer)));
        let inner = self.build(id, inst);
        self.stack.pop();
        let inner = inner?;

        log::trace!("type %{} = {:?}", id, inner);
        self.arena.insert(TypeDescription {
            id,
            name: self.decorations.name(id),
            inner,
            decorations: self.decorations.of(id),
        });
        Ok(())
    }

    fn get(&self, id: Word) -> Option<&TypeInner> {
        self.arena.get(id).map(|t| &t.inner)
    }

    fn build(&mut self, id: Word, inst: &Instruction<'m>) -> Result<TypeInner, ReflectError> {
        let offset = inst.byte_offset();
        let malformed = |reason: String| ReflectError::malformed(offset, reason);

        // Checked by is_type_declaration
        let Some(op) = inst.op else {
            return Err(ReflectError::UnresolvedTypeReference { id, offset });
        };

        let inner = match op {
            Op::TypeVoid => TypeInner::Void,
            Op::TypeBool => TypeInner::Bool,
            Op::TypeInt => {
                let width = inst.operand(1)?;
                let kind = match inst.operand(2)? {
                    0 => ScalarKind::Uint,
                    1 => ScalarKind::Sint,
                    other => return Err(malformed(format!("int signedness {}", other))),
                };
                if !matches!(width, 8 | 16 | 32 | 64) {
                    return Err(malformed(format!("int width {}", width)));
                }
                TypeInner::Scalar(ScalarTraits { kind, width })
            }
            Op::TypeFloat => {
                let width = inst.operand(1)?;
                if !matches!(width, 16 | 32 | 64) {
                    return Err(malformed(format!("float width {}", width)));
                }
                TypeInner::Scalar(ScalarTraits {
                    kind: ScalarKind::Float,
                    width,
                })
            }
            Op::TypeVector => {
                let component = inst.operand(1)?;
                let count = inst.operand(2)?;
                self.resolve(component, offset)?;
                let scalar = match self.get(component) {
                    Some(TypeInner::Scalar(scalar)) => *scalar,
                    Some(TypeInner::Bool) => ScalarTraits {
                        kind: ScalarKind::Bool,
                        width: 32,
                    },
                    _ => return Err(malformed(format!("vector component %{} is not a scalar", component))),
                };
                if !matches!(count, 2 | 3 | 4 | 8 | 16) {
                    return Err(malformed(format!("vector component count {}", count)));
                }
                TypeInner::Vector {
                    component,
                    scalar,
                    count,
                }
            }
            Op::TypeMatrix => {
                let column = inst.operand(1)?;
                let columns = inst.operand(2)?;
                self.resolve(column, offset)?;
                let (scalar, rows) = match self.get(column) {
                    Some(&TypeInner::Vector { scalar, count, .. })
                        if scalar.kind == ScalarKind::Float =>
                    {
                        (scalar, count)
                    }
                    _ => {
                        return Err(malformed(format!(
                            "matrix column %{} is not a float vector",
                            column
                        )))
                    }
                };
                if !matches!(columns, 2..=4) {
                    return Err(malformed(format!("matrix column count {}", columns)));
                }
                TypeInner::Matrix {
                    column,
                    scalar,
                    columns,
                    rows,
                }
            }
            Op::TypeImage => {
                let sampled_type = inst.operand(1)?;
                self.resolve(sampled_type, offset)?;
                let raw_dim = inst.operand(2)?;
                let dim = spirv::Dim::from_u32(raw_dim)
                    .and_then(ImageDim::from_spirv)
                    .ok_or_else(|| malformed(format!("image dim {}", raw_dim)))?;
                let usage = match inst.operand(6)? {
                    0 => ImageUsage::Unknown,
                    1 => ImageUsage::Sampled,
                    2 => ImageUsage::Storage,
                    other => return Err(malformed(format!("image sampled operand {}", other))),
                };
                TypeInner::Image(ImageTraits {
                    sampled_type,
                    dim,
                    depth: inst.operand(3)?,
                    arrayed: inst.operand(4)? != 0,
                    multisampled: inst.operand(5)? != 0,
                    usage,
                    format: inst.operand(7)?,
                    access: inst.operands().get(8).copied(),
                })
            }
            Op::TypeSampler => TypeInner::Sampler,
            Op::TypeSampledImage => {
                let image = inst.operand(1)?;
                self.resolve(image, offset)?;
                if !matches!(self.get(image), Some(TypeInner::Image(_))) {
                    return Err(malformed(format!("sampled image of non-image %{}", image)));
                }
                TypeInner::SampledImage { image }
            }
            Op::TypeArray => {
                let element = inst.operand(1)?;
                let length_id = inst.operand(2)?;
                self.resolve(element, offset)?;
                let length = self
                    .constants
                    .scalar_u32(length_id, self.decorations, offset)?;
                if self.is_descriptor_element(element) {
                    TypeInner::BindingArray {
                        element,
                        count: Some(length),
                    }
                } else {
                    TypeInner::Array { element, length }
                }
            }
            Op::TypeRuntimeArray => {
                let element = inst.operand(1)?;
                self.resolve(element, offset)?;
                if self.is_descriptor_element(element) {
                    TypeInner::BindingArray {
                        element,
                        count: None,
                    }
                } else {
                    TypeInner::RuntimeArray { element }
                }
            }
            Op::TypeStruct => self.build_struct(id, inst)?,
            Op::TypePointer => {
                let raw_class = inst.operand(1)?;
                let storage_class = spirv::StorageClass::from_u32(raw_class)
                    .ok_or_else(|| malformed(format!("storage class {}", raw_class)))?;
                let pointee = inst.operand(2)?;
                self.resolve(pointee, offset)?;
                TypeInner::Pointer {
                    storage_class,
                    pointee,
                }
            }
            Op::TypeFunction => {
                let return_type = inst.operand(1)?;
                self.resolve(return_type, offset)?;
                let parameters = inst.operands_from(2).to_vec();
                for &parameter in &parameters {
                    self.resolve(parameter, offset)?;
                }
                TypeInner::Function {
                    return_type,
                    parameters,
                }
            }
            Op::TypeAccelerationStructureKHR => TypeInner::AccelerationStructure,
            Op::TypeRayQueryKHR => TypeInner::RayQuery,
            _ => {
                return Err(ReflectError::UnsupportedType {
                    id,
                    opcode: inst.opcode,
                    offset,
                })
            }
        };
        Ok(inner)
    }

    fn build_struct(&mut self, id: Word, inst: &Instruction<'m>) -> Result<TypeInner, ReflectError> {
        let offset = inst.byte_offset();
        let mut members = Vec::new();
        for (index, &type_ref) in inst.operands_from(1).iter().enumerate() {
            self.resolve(type_ref, offset)?;
            let index = index as u32;
            members.push(StructMember {
                name: self.decorations.member_name(id, index),
                type_ref,
                decorations: self.decorations.of_member(id, index),
            });
        }

        let explicit = members.iter().filter(|m| m.offset().is_some()).count();
        let layout = match explicit {
            _ if members.is_empty() => StructLayout::Empty,
            0 => StructLayout::Implicit,
            n if n == members.len() => StructLayout::Explicit,
            _ => StructLayout::Partial,
        };

        let mut previous: Option<u32> = None;
        for (index, member) in members.iter().enumerate() {
            let Some(current) = member.offset() else {
                continue;
            };
            if let Some(previous) = previous.filter(|&p| current < p) {
                return Err(ReflectError::malformed(
                    offset,
                    format!(
                        "struct %{} member {} offset {} is below the previous offset {}",
                        id, index, current, previous
                    ),
                ));
            }
            previous = Some(current);
        }

        if layout == StructLayout::Implicit || layout == StructLayout::Partial {
            log::debug!("struct %{} has {:?} member offsets", id, layout);
        }
        Ok(TypeInner::Struct { members, layout })
    }

    /// Elements that turn an array into an array of descriptors.
    fn is_descriptor_element(&self, element: Word) -> bool {
        match self.arena.get(element) {
            Some(ty) => {
                ty.inner.is_opaque()
                    || matches!(ty.inner, TypeInner::BindingArray { .. })
                    || (matches!(ty.inner, TypeInner::Struct { .. }) && ty.is_block())
            }
            None => false,
        }
    }
}
