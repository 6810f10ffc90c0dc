//! Vulkan pipeline layout helpers
//!
//! Turns reflected entry points into the `ash` structures a host fills in
//! when creating descriptor set layouts, pipeline layouts and vertex input
//! state.

use std::collections::BTreeMap;

use ash::vk;

use crate::error::ReflectError;
use crate::interface::{DescriptorBinding, EntryPoint};
use crate::shader::ShaderModule;

/// Layout bindings of one descriptor set.
#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutData {
    pub set_number: u32,
    pub bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSetLayoutData {
    pub fn binding(&self, binding: u32) -> Option<&vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

fn layout_binding(
    binding: &DescriptorBinding,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding.binding)
        .descriptor_type(binding.kind.to_vk())
        .descriptor_count(binding.count)
        .stage_flags(stages)
}

/// The referenced bindings of `entry_point` as one layout per set.
///
/// Runtime-sized descriptor arrays report a count of 0; the host supplies
/// the real count through variable descriptor counts.
pub fn descriptor_set_layouts(
    module: &ShaderModule<'_>,
    entry_point: &EntryPoint,
) -> Vec<DescriptorSetLayoutData> {
    let stage = entry_point.shader_stage();
    entry_point
        .descriptor_slots
        .iter()
        .map(|(&set, slots)| DescriptorSetLayoutData {
            set_number: set,
            bindings: slots
                .iter()
                .filter_map(|&b| module.descriptor_binding(set, b))
                .map(|binding| layout_binding(binding, stage))
                .collect(),
        })
        .collect()
}

/// Merge the descriptor usage of several stages into one pipeline layout.
///
/// Stage flags are OR-ed per slot.
///
/// # Errors
///
/// `ConflictingDecoration` when two stages bind different descriptor kinds
/// or counts to the same `(set, binding)`.
pub fn merge_stages(
    stages: &[(&ShaderModule<'_>, &EntryPoint)],
) -> Result<Vec<DescriptorSetLayoutData>, ReflectError> {
    let mut merged: BTreeMap<u32, BTreeMap<u32, (&DescriptorBinding, vk::ShaderStageFlags)>> =
        BTreeMap::new();

    for (module, entry_point) in stages {
        let stage = entry_point.shader_stage();
        for (&set, slots) in &entry_point.descriptor_slots {
            for &slot in slots {
                let Some(binding) = module.descriptor_binding(set, slot) else {
                    continue;
                };
                let set_bindings = merged.entry(set).or_default();
                match set_bindings.get_mut(&slot) {
                    Some((existing, flags)) => {
                        if existing.kind != binding.kind || existing.count != binding.count {
                            return Err(ReflectError::ConflictingDecoration {
                                id: binding.variable_id,
                                member: None,
                                decoration: spirv::Decoration::Binding,
                                detail: format!(
                                    "set {} binding {} is {:?}[{}] in '{}' but {:?}[{}] in an earlier stage",
                                    set,
                                    slot,
                                    binding.kind,
                                    binding.count,
                                    entry_point.name,
                                    existing.kind,
                                    existing.count
                                ),
                                offset: binding.offset,
                            });
                        }
                        *flags |= stage;
                    }
                    None => {
                        set_bindings.insert(slot, (binding, stage));
                    }
                }
            }
        }
    }

    log::debug!(
        "merged {} stages into {} descriptor set layouts",
        stages.len(),
        merged.len()
    );
    Ok(merged
        .into_iter()
        .map(|(set, bindings)| DescriptorSetLayoutData {
            set_number: set,
            bindings: bindings
                .into_values()
                .map(|(binding, flags)| layout_binding(binding, flags))
                .collect(),
        })
        .collect())
}

/// Push constant ranges used by the given stages. Stages sharing a range
/// share one entry with combined stage flags.
pub fn push_constant_ranges(
    stages: &[(&ShaderModule<'_>, &EntryPoint)],
) -> Vec<vk::PushConstantRange> {
    let mut ranges: Vec<vk::PushConstantRange> = Vec::new();
    for (module, entry_point) in stages {
        let blocks = module
            .push_constant_blocks()
            .iter()
            .filter(|b| entry_point.push_constants.contains(&b.variable_id));
        for block in blocks {
            let offset = block
                .block
                .members
                .iter()
                .map(|m| m.offset)
                .min()
                .unwrap_or(0);
            let size = block.block.size.saturating_sub(offset);
            let stage = entry_point.shader_stage();
            match ranges
                .iter_mut()
                .find(|r| r.offset == offset && r.size == size)
            {
                Some(range) => range.stage_flags |= stage,
                None => ranges.push(
                    vk::PushConstantRange::default()
                        .stage_flags(stage)
                        .offset(offset)
                        .size(size),
                ),
            }
        }
    }
    ranges
}

/// Vertex buffer layout for a vertex entry point: every non-built-in input
/// with a location, tightly packed into binding 0 in location order.
pub fn vertex_input_layout(
    module: &ShaderModule<'_>,
    entry_point: &EntryPoint,
) -> (
    vk::VertexInputBindingDescription,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let mut inputs: Vec<_> = module
        .input_variables(&entry_point.name)
        .unwrap_or_default()
        .into_iter()
        .filter(|v| !v.is_built_in())
        .filter_map(|v| v.location.map(|location| (location, v)))
        .collect();
    inputs.sort_by_key(|&(location, _)| location);

    let mut offset = 0;
    let mut attributes = Vec::with_capacity(inputs.len());
    for (location, variable) in inputs {
        attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format: variable.format,
            offset,
        });
        offset += module.types().byte_size(variable.type_ref, false, None);
    }

    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: offset,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    (binding, attributes)
}
