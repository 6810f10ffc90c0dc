//! Variable & binding builder
//!
//! Joins every module-scope `OpVariable` with its resolved type, its
//! decorations and its debug name. Resource classes become descriptor
//! bindings grouped by set, `PushConstant` becomes a push constant block and
//! `Input`/`Output` become interface variables.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ash::vk;
use spirv::{Decoration, Op, StorageClass, Word};

use super::decorations::{require_name, DecorationTable};
use super::index::{Instruction, InstructionIndex};
use crate::decoration::{DecorationFlags, Decorations};
use crate::error::{Diagnostics, ReflectError, Warning};
use crate::interface::{
    BlockVariable, DescriptorBinding, DescriptorKind, DescriptorSet, InterfaceMember,
    InterfaceVariable, PushConstantBlock,
};
use crate::options::{MissingSetPolicy, ReflectOptions};
use crate::types::{
    ArrayLength, ImageDim, ImageTraits, ImageUsage, SizeCache, Specializable, TypeArena,
    TypeDescription, TypeInner,
};

/// Block sizes are padded to this alignment.
const BLOCK_ALIGNMENT: u32 = 16;

/// Upper bound on block layout nodes built for one module.
const MAX_BLOCK_NODES: usize = 1 << 16;

fn round_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment).saturating_mul(alignment)
}

/// Shared state while expanding buffer block layouts.
#[derive(Debug, Default)]
struct BlockLayout {
    sizes: SizeCache,
    nodes: usize,
}

/// Module-scope variables sorted into their roles.
#[derive(Debug, Default)]
pub(crate) struct GlobalVariables {
    pub descriptor_sets: Vec<DescriptorSet>,
    pub push_constants: Vec<PushConstantBlock>,
    pub interface_variables: Vec<InterfaceVariable>,
}

impl GlobalVariables {
    pub fn bindings(&self) -> impl Iterator<Item = &DescriptorBinding> {
        self.descriptor_sets.iter().flat_map(|s| s.bindings.iter())
    }

    /// Set `accessed` on every binding and push constant block reached by
    /// some entry point.
    pub fn mark_accessed(&mut self, accessed: &BTreeSet<Word>) {
        for binding in self
            .descriptor_sets
            .iter_mut()
            .flat_map(|s| s.bindings.iter_mut())
        {
            binding.accessed = accessed.contains(&binding.variable_id);
        }
        for block in &mut self.push_constants {
            block.accessed = accessed.contains(&block.variable_id);
        }
    }
}

pub(crate) struct VariableBuilder<'a, 'm> {
    index: &'a InstructionIndex<'m>,
    decorations: &'a DecorationTable,
    types: &'a TypeArena,
    options: &'a ReflectOptions,
}

impl<'a, 'm> VariableBuilder<'a, 'm> {
    pub fn new(
        index: &'a InstructionIndex<'m>,
        decorations: &'a DecorationTable,
        types: &'a TypeArena,
        options: &'a ReflectOptions,
    ) -> Self {
        VariableBuilder {
            index,
            decorations,
            types,
            options,
        }
    }

    /// Build bindings, push constant blocks and interface variables.
    ///
    /// # Errors
    ///
    /// * `MissingBindingDecoration` - a resource variable has no `Binding`
    ///   (or no `DescriptorSet` under `MissingSetPolicy::Reject`)
    /// * `ConflictingDecoration` - two variables share a `(set, binding)` slot
    /// * `UnresolvedTypeReference` / `MalformedInput` - bad variable type
    pub fn build(&self, diagnostics: &mut Diagnostics) -> Result<GlobalVariables, ReflectError> {
        let mut sets: BTreeMap<u32, Vec<DescriptorBinding>> = BTreeMap::new();
        let mut slots: HashMap<(u32, u32), Word> = HashMap::new();
        let mut globals = GlobalVariables::default();
        let mut layout = BlockLayout::default();

        let variables = self
            .index
            .with_op(Op::Variable)
            .filter(|inst| inst.function.is_none());
        for inst in variables {
            let (Some(pointer_type), Some(id)) = (inst.result_type, inst.result_id) else {
                continue;
            };
            let raw_class = inst.operand(2)?;
            let storage_class = StorageClass::from_u32(raw_class).ok_or_else(|| {
                ReflectError::malformed(inst.byte_offset(), format!("storage class {}", raw_class))
            })?;
            let pointee = match self.types.get(pointer_type).map(|t| &t.inner) {
                Some(&TypeInner::Pointer { pointee, .. }) => pointee,
                Some(_) => {
                    return Err(ReflectError::malformed(
                        inst.byte_offset(),
                        format!("variable %{} does not have a pointer type", id),
                    ))
                }
                None => {
                    return Err(ReflectError::UnresolvedTypeReference {
                        id: pointer_type,
                        offset: inst.byte_offset(),
                    })
                }
            };

            match storage_class {
                StorageClass::UniformConstant | StorageClass::Uniform | StorageClass::StorageBuffer => {
                    let binding = self.descriptor_binding(
                        inst,
                        id,
                        storage_class,
                        pointee,
                        &mut layout,
                        diagnostics,
                    )?;
                    let Some(binding) = binding else {
                        continue;
                    };
                    if let Some(&previous) = slots.get(&(binding.set, binding.binding)) {
                        return Err(ReflectError::ConflictingDecoration {
                            id,
                            member: None,
                            decoration: Decoration::Binding,
                            detail: format!(
                                "set {} binding {} is already used by %{}",
                                binding.set, binding.binding, previous
                            ),
                            offset: inst.byte_offset(),
                        });
                    }
                    slots.insert((binding.set, binding.binding), id);
                    sets.entry(binding.set).or_default().push(binding);
                }
                StorageClass::PushConstant => {
                    let block =
                        self.push_constant_block(inst, id, pointee, &mut layout, diagnostics)?;
                    globals.push_constants.push(block);
                }
                StorageClass::Input | StorageClass::Output => {
                    let variable =
                        self.interface_variable(inst, id, storage_class, pointee, diagnostics)?;
                    globals.interface_variables.push(variable);
                }
                other => {
                    log::trace!("skipping %{} in storage class {:?}", id, other);
                }
            }
        }

        if globals.push_constants.len() > 1 {
            diagnostics.report(Warning::MultiplePushConstantBlocks {
                variables: globals.push_constants.iter().map(|b| b.variable_id).collect(),
            })?;
        }

        globals.descriptor_sets = sets
            .into_iter()
            .map(|(set, mut bindings)| {
                bindings.sort_by_key(|b| b.binding);
                DescriptorSet { set, bindings }
            })
            .collect();

        log::debug!(
            "built {} descriptor sets, {} push constant blocks, {} interface variables",
            globals.descriptor_sets.len(),
            globals.push_constants.len(),
            globals.interface_variables.len()
        );
        Ok(globals)
    }

    fn type_of(&self, id: Word, offset: usize) -> Result<&'a TypeDescription, ReflectError> {
        self.types
            .get(id)
            .ok_or(ReflectError::UnresolvedTypeReference { id, offset })
    }

    /// Peel descriptor array levels off a resource type.
    fn descriptor_element(
        &self,
        mut id: Word,
        offset: usize,
    ) -> Result<(Vec<ArrayLength>, &'a TypeDescription), ReflectError> {
        let mut dims = Vec::new();
        loop {
            let ty = self.type_of(id, offset)?;
            match ty.inner {
                TypeInner::BindingArray { element, count } => {
                    dims.push(count.unwrap_or(Specializable::Known(0)));
                    id = element;
                }
                _ => return Ok((dims, ty)),
            }
        }
    }

    fn image_traits(&self, ty: &TypeDescription) -> Option<ImageTraits> {
        match ty.inner {
            TypeInner::Image(traits) => Some(traits),
            TypeInner::SampledImage { image } => match self.types.get(image)?.inner {
                TypeInner::Image(traits) => Some(traits),
                _ => None,
            },
            _ => None,
        }
    }

    fn classify(&self, storage_class: StorageClass, ty: &TypeDescription) -> Option<DescriptorKind> {
        let kind = match ty.inner {
            TypeInner::Struct { .. } => match storage_class {
                StorageClass::StorageBuffer => DescriptorKind::StorageBuffer,
                StorageClass::Uniform
                    if ty.decorations.flags.contains(DecorationFlags::BUFFER_BLOCK) =>
                {
                    DescriptorKind::StorageBuffer
                }
                StorageClass::Uniform => DescriptorKind::UniformBuffer,
                _ => return None,
            },
            TypeInner::Image(traits) => match (traits.dim, traits.usage) {
                (ImageDim::SubpassData, _) => DescriptorKind::InputAttachment,
                (ImageDim::Buffer, ImageUsage::Storage) => DescriptorKind::StorageTexelBuffer,
                (ImageDim::Buffer, _) => DescriptorKind::UniformTexelBuffer,
                (_, ImageUsage::Storage) => DescriptorKind::StorageImage,
                _ => DescriptorKind::SampledImage,
            },
            TypeInner::SampledImage { .. } => match self.image_traits(ty) {
                Some(traits) if traits.dim == ImageDim::Buffer => {
                    DescriptorKind::UniformTexelBuffer
                }
                _ => DescriptorKind::CombinedImageSampler,
            },
            TypeInner::Sampler => DescriptorKind::Sampler,
            TypeInner::AccelerationStructure => DescriptorKind::AccelerationStructure,
            _ => return None,
        };
        Some(kind)
    }

    fn descriptor_binding(
        &self,
        inst: &Instruction<'m>,
        id: Word,
        storage_class: StorageClass,
        pointee: Word,
        layout: &mut BlockLayout,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<DescriptorBinding>, ReflectError> {
        let offset = inst.byte_offset();
        let (array_dims, element) = self.descriptor_element(pointee, offset)?;
        let Some(kind) = self.classify(storage_class, element) else {
            log::debug!(
                "%{} in {:?} is not a descriptor resource, skipping",
                id,
                storage_class
            );
            return Ok(None);
        };

        let decorations = self.decorations.of(id);
        let binding = decorations
            .binding
            .ok_or(ReflectError::MissingBindingDecoration {
                id,
                decoration: Decoration::Binding,
                offset,
            })?;
        let (set, set_defaulted) = match (decorations.descriptor_set, self.options.missing_set) {
            (Some(set), _) => (set, false),
            (None, MissingSetPolicy::DefaultToZero) => {
                log::debug!("%{} has no DescriptorSet, defaulting to set 0", id);
                (0, true)
            }
            (None, MissingSetPolicy::Reject) => {
                return Err(ReflectError::MissingBindingDecoration {
                    id,
                    decoration: Decoration::DescriptorSet,
                    offset,
                })
            }
        };

        let count = array_dims
            .iter()
            .try_fold(1u32, |total, dim| {
                total.checked_mul(dim.value_or_default().unwrap_or(1))
            })
            .ok_or_else(|| {
                ReflectError::malformed(offset, format!("descriptor count of %{} overflows", id))
            })?;

        let variable_name = self.decorations.name(id).filter(|n| !n.is_empty());
        let name = match variable_name {
            Some(name) => Some(name),
            None if kind.is_buffer() => element.name.clone().filter(|n| !n.is_empty()),
            None => None,
        };
        if name.is_none() {
            require_name(self.decorations, inst, id, diagnostics)?;
        }

        let block = if kind.is_buffer() {
            Some(self.root_block(element.id, name.clone(), offset, layout)?)
        } else {
            None
        };

        Ok(Some(DescriptorBinding {
            variable_id: id,
            name,
            set,
            binding,
            kind,
            type_ref: pointee,
            array_dims,
            count,
            image: self.image_traits(element),
            input_attachment_index: decorations.input_attachment_index,
            block,
            decorations,
            set_defaulted,
            accessed: false,
            offset,
        }))
    }

    fn push_constant_block(
        &self,
        inst: &Instruction<'m>,
        id: Word,
        pointee: Word,
        layout: &mut BlockLayout,
        diagnostics: &mut Diagnostics,
    ) -> Result<PushConstantBlock, ReflectError> {
        let ty = self.type_of(pointee, inst.byte_offset())?;
        if !matches!(ty.inner, TypeInner::Struct { .. }) {
            return Err(ReflectError::malformed(
                inst.byte_offset(),
                format!("push constant %{} is not a struct", id),
            ));
        }
        let name = match self.decorations.name(id).filter(|n| !n.is_empty()) {
            Some(name) => Some(name),
            None => ty.name.clone().filter(|n| !n.is_empty()),
        };
        if name.is_none() {
            require_name(self.decorations, inst, id, diagnostics)?;
        }
        Ok(PushConstantBlock {
            variable_id: id,
            block: self.root_block(pointee, name.clone(), inst.byte_offset(), layout)?,
            name,
            accessed: false,
            offset: inst.byte_offset(),
        })
    }

    /// Layout tree of a whole buffer block.
    ///
    /// Fails with `MalformedInput` once the module's blocks expand to more
    /// than `MAX_BLOCK_NODES` members in total.
    fn root_block(
        &self,
        type_ref: Word,
        name: Option<String>,
        byte_offset: usize,
        layout: &mut BlockLayout,
    ) -> Result<BlockVariable, ReflectError> {
        let mut root =
            self.block_variable(type_ref, name, Decorations::default(), 0, byte_offset, layout)?;
        root.padded_size = round_up(root.size, BLOCK_ALIGNMENT);
        Ok(root)
    }

    fn block_variable(
        &self,
        type_ref: Word,
        name: Option<String>,
        decorations: Decorations,
        parent_offset: u32,
        byte_offset: usize,
        layout: &mut BlockLayout,
    ) -> Result<BlockVariable, ReflectError> {
        layout.nodes += 1;
        if layout.nodes > MAX_BLOCK_NODES {
            return Err(ReflectError::malformed(
                byte_offset,
                format!(
                    "buffer block layouts expand to more than {} members",
                    MAX_BLOCK_NODES
                ),
            ));
        }

        let offset = decorations.offset.unwrap_or(0);
        let absolute_offset = parent_offset.saturating_add(offset);
        let size = self.types.byte_size_cached(
            type_ref,
            decorations.is_row_major(),
            decorations.matrix_stride,
            &mut layout.sizes,
        );

        let mut array_dims = Vec::new();
        let mut element = type_ref;
        while let Some(ty) = self.types.get(element) {
            match ty.inner {
                TypeInner::Array { element: inner, length } => {
                    array_dims.push(length);
                    element = inner;
                }
                TypeInner::RuntimeArray { element: inner } => {
                    array_dims.push(Specializable::Known(0));
                    element = inner;
                }
                _ => break,
            }
        }

        let mut members: Vec<BlockVariable> = match self.types.get(element).map(|t| &t.inner) {
            Some(TypeInner::Struct { members, .. }) => members
                .iter()
                .map(|m| {
                    self.block_variable(
                        m.type_ref,
                        m.name.clone(),
                        m.decorations.clone(),
                        absolute_offset,
                        byte_offset,
                        layout,
                    )
                })
                .collect::<Result<Vec<_>, ReflectError>>()?,
            _ => Vec::new(),
        };

        let next_offsets: Vec<Option<u32>> = members
            .iter()
            .skip(1)
            .map(|m| Some(m.offset))
            .chain(std::iter::once(None))
            .collect();
        for (member, next) in members.iter_mut().zip(next_offsets) {
            member.padded_size = match next {
                Some(next) => next.saturating_sub(member.offset),
                None => round_up(member.offset.saturating_add(member.size), BLOCK_ALIGNMENT)
                    .saturating_sub(member.offset),
            };
        }

        Ok(BlockVariable {
            name,
            type_ref,
            offset,
            absolute_offset,
            size,
            padded_size: size,
            decorations,
            array_dims,
            members,
        })
    }

    fn attribute_format(&self, type_ref: Word) -> vk::Format {
        match self.types.get(type_ref).map(|t| &t.inner) {
            Some(TypeInner::Scalar(scalar)) => scalar.vk_format(1),
            Some(&TypeInner::Vector { scalar, count, .. }) => scalar.vk_format(count),
            _ => vk::Format::UNDEFINED,
        }
    }

    fn interface_variable(
        &self,
        inst: &Instruction<'m>,
        id: Word,
        storage_class: StorageClass,
        pointee: Word,
        diagnostics: &mut Diagnostics,
    ) -> Result<InterfaceVariable, ReflectError> {
        let offset = inst.byte_offset();
        let decorations = self.decorations.of(id);

        let mut array_dims = Vec::new();
        let mut element = self.type_of(pointee, offset)?;
        loop {
            match element.inner {
                TypeInner::Array { element: inner, length } => {
                    array_dims.push(length);
                    element = self.type_of(inner, offset)?;
                }
                TypeInner::RuntimeArray { element: inner } => {
                    array_dims.push(Specializable::Known(0));
                    element = self.type_of(inner, offset)?;
                }
                _ => break,
            }
        }

        let members = match element.inner {
            TypeInner::Struct { ref members, .. } => members
                .iter()
                .map(|m| InterfaceMember {
                    name: m.name.clone(),
                    type_ref: m.type_ref,
                    location: m.decorations.location,
                    built_in: m.decorations.built_in,
                    format: self.attribute_format(m.type_ref),
                    decorations: m.decorations.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };

        let variable = InterfaceVariable {
            variable_id: id,
            name: self.decorations.name(id).filter(|n| !n.is_empty()),
            storage_class,
            type_ref: pointee,
            location: decorations.location,
            component: decorations.component,
            built_in: decorations.built_in,
            semantic: decorations.user_semantic.clone(),
            array_dims,
            members,
            format: self.attribute_format(element.id),
            decorations,
            offset,
        };
        if variable.name.is_none() && !variable.is_built_in() {
            require_name(self.decorations, inst, id, diagnostics)?;
        }
        Ok(variable)
    }
}
