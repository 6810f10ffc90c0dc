//! JSON summary of a reflected module
//!
//! A stable, human-readable digest for tooling and snapshot tests. Ids are
//! kept as numbers; enumerants are rendered with their SPIR-V names.

use serde_json::{json, Value};

use crate::interface::{
    BlockVariable, DescriptorBinding, EntryPoint, InterfaceVariable, PushConstantBlock,
};
use crate::shader::ShaderModule;
use crate::types::{ArrayLength, Specializable};

fn length(dim: &ArrayLength) -> Value {
    match *dim {
        Specializable::Known(n) => json!(n),
        Specializable::SpecializationDependent {
            id,
            spec_id,
            default,
        } => json!({ "spec_constant": id, "spec_id": spec_id, "default": default }),
    }
}

fn block(block: &BlockVariable) -> Value {
    json!({
        "name": block.name,
        "offset": block.offset,
        "absolute_offset": block.absolute_offset,
        "size": block.size,
        "padded_size": block.padded_size,
        "array": block.array_dims.iter().map(length).collect::<Vec<_>>(),
        "members": block.members.iter().map(self::block).collect::<Vec<_>>(),
    })
}

fn binding(binding: &DescriptorBinding) -> Value {
    json!({
        "name": binding.name,
        "set": binding.set,
        "binding": binding.binding,
        "kind": format!("{:?}", binding.kind),
        "count": binding.count,
        "array": binding.array_dims.iter().map(length).collect::<Vec<_>>(),
        "type": binding.type_ref,
        "accessed": binding.accessed,
        "set_defaulted": binding.set_defaulted,
        "block": binding.block.as_ref().map(block),
    })
}

fn push_constant(pc: &PushConstantBlock) -> Value {
    json!({
        "name": pc.name,
        "variable": pc.variable_id,
        "accessed": pc.accessed,
        "block": block(&pc.block),
    })
}

fn interface_variable(var: &InterfaceVariable) -> Value {
    json!({
        "name": var.name,
        "storage_class": format!("{:?}", var.storage_class),
        "location": var.location,
        "built_in": var.built_in_kind().map(|b| format!("{:?}", b)),
        "semantic": var.semantic,
        "format": format!("{:?}", var.format),
    })
}

fn entry_point(module: &ShaderModule<'_>, ep: &EntryPoint) -> Value {
    let local_size = ep.local_size.map(|size| {
        [size.x, size.y, size.z]
            .iter()
            .map(length)
            .collect::<Vec<_>>()
    });
    let sets: Vec<Value> = ep
        .descriptor_slots
        .iter()
        .map(|(set, bindings)| json!({ "set": set, "bindings": bindings }))
        .collect();
    let interface: Vec<Value> = ep
        .interface_variables
        .iter()
        .filter_map(|id| {
            module
                .interface_variables()
                .iter()
                .find(|v| v.variable_id == *id)
        })
        .map(interface_variable)
        .collect();
    json!({
        "name": ep.name,
        "execution_model": format!("{:?}", ep.execution_model),
        "local_size": local_size,
        "descriptor_sets": sets,
        "push_constants": ep.push_constants,
        "interface": interface,
        "execution_modes": ep
            .execution_modes
            .iter()
            .map(|m| match m.execution_mode() {
                Some(mode) => format!("{:?}", mode),
                None => m.mode.to_string(),
            })
            .collect::<Vec<_>>(),
    })
}

/// Render the module as a JSON document.
pub fn to_json(module: &ShaderModule<'_>) -> Value {
    let (major, minor) = module.version();
    let generator = module.generator();
    json!({
        "version": format!("{}.{}", major, minor),
        "generator": {
            "tool": generator.tool,
            "name": generator.tool_name(),
            "version": generator.version,
        },
        "source_language": module.source().source_language().map(|l| format!("{:?}", l)),
        "capabilities": module
            .capabilities()
            .iter()
            .map(|c| match c.capability() {
                Some(cap) => format!("{:?}", cap),
                None => c.value.to_string(),
            })
            .collect::<Vec<_>>(),
        "extensions": module.extensions(),
        "entry_points": module
            .entry_points()
            .iter()
            .map(|ep| entry_point(module, ep))
            .collect::<Vec<_>>(),
        "descriptor_bindings": module
            .descriptor_sets()
            .iter()
            .flat_map(|s| s.bindings.iter())
            .map(binding)
            .collect::<Vec<_>>(),
        "push_constants": module
            .push_constant_blocks()
            .iter()
            .map(push_constant)
            .collect::<Vec<_>>(),
        "specialization_constants": module
            .specialization_constants()
            .iter()
            .map(|c| json!({ "spec_id": c.spec_id, "name": c.name, "default": c.default }))
            .collect::<Vec<_>>(),
        "warnings": module
            .warnings()
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::SpirvBuilder;
    use spirv::{Decoration, ExecutionMode, ExecutionModel, StorageClass};

    #[test]
    fn test_summary_shape() {
        let mut b = SpirvBuilder::new();
        b.capability(spirv::Capability::Shader);
        b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
        b.generator(8, 11);
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let float = b.type_float(32);
        let runtime = b.type_runtime_array(float);
        b.decorate(runtime, Decoration::ArrayStride, &[4]);
        let block = b.type_struct(&[runtime]);
        b.decorate(block, Decoration::Block, &[]);
        b.member_decorate(block, 0, Decoration::Offset, &[0]);
        let ptr = b.type_pointer(StorageClass::StorageBuffer, block);
        let data = b.variable(ptr, StorageClass::StorageBuffer);
        b.name(data, "data");
        b.decorate(data, Decoration::DescriptorSet, &[1]);
        b.decorate(data, Decoration::Binding, &[2]);
        let main = b.begin_function(void, fn_ty);
        b.load(block, data);
        b.ret();
        b.end_function();
        b.entry_point(ExecutionModel::GLCompute, main, "main", &[data]);
        b.execution_mode(main, ExecutionMode::LocalSize, &[8, 8, 1]);

        let module = ShaderModule::from_words(b.build()).unwrap();
        let summary = to_json(&module);

        assert_eq!(summary["version"], "1.5");
        assert_eq!(summary["generator"]["name"], "Glslang Reference Front End");
        assert_eq!(summary["capabilities"][0], "Shader");
        let ep = &summary["entry_points"][0];
        assert_eq!(ep["execution_model"], "GLCompute");
        assert_eq!(ep["local_size"], json!([8, 8, 1]));
        assert_eq!(ep["descriptor_sets"], json!([{ "set": 1, "bindings": [2] }]));
        let binding = &summary["descriptor_bindings"][0];
        assert_eq!(binding["kind"], "StorageBuffer");
        assert_eq!(binding["name"], "data");
        assert_eq!(binding["accessed"], true);
        assert_eq!(binding["block"]["members"][0]["array"], json!([0]));
        assert_eq!(summary["warnings"], json!([]));
    }
}
