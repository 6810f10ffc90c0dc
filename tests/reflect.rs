//! End-to-end reflection scenarios on hand-assembled modules.

use ash::vk;
use hlx_reflect::assembler::SpirvBuilder;
use hlx_reflect::layout;
use hlx_reflect::{
    DescriptorKind, ErrorKind, MissingSetPolicy, ReflectError, ReflectOptions, ReflectionCache,
    ShaderModule, Warning,
};
use pretty_assertions::assert_eq;
use spirv::{
    AddressingModel, Decoration, ExecutionMode, ExecutionModel, MemoryModel, StorageClass, Word,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn builder() -> SpirvBuilder {
    let mut b = SpirvBuilder::new();
    b.capability(spirv::Capability::Shader);
    b.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
    b
}

/// `buffer { float data[]; }` in the StorageBuffer class.
fn storage_buffer(b: &mut SpirvBuilder, name: &str) -> (Word, Word) {
    let float = b.type_float(32);
    let runtime = b.type_runtime_array(float);
    b.decorate(runtime, Decoration::ArrayStride, &[4]);
    let block = b.type_struct(&[runtime]);
    b.decorate(block, Decoration::Block, &[]);
    b.member_decorate(block, 0, Decoration::Offset, &[0]);
    let ptr = b.type_pointer(StorageClass::StorageBuffer, block);
    let var = b.variable(ptr, StorageClass::StorageBuffer);
    b.name(var, name);
    (var, block)
}

fn compute_module(resources: impl FnOnce(&mut SpirvBuilder) -> Vec<Word>) -> Vec<Word> {
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let used = resources(&mut b);
    let main = b.begin_function(void, fn_ty);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::GLCompute, main, "main", &used);
    b.execution_mode(main, ExecutionMode::LocalSize, &[8, 8, 1]);
    b.build()
}

#[test]
fn test_compute_local_size() {
    init_logger();
    let module = ShaderModule::from_words(compute_module(|_| Vec::new())).unwrap();

    let ep = module.entry_point("main").unwrap();
    assert_eq!(ep.execution_model, ExecutionModel::GLCompute);
    assert_eq!(ep.shader_stage(), vk::ShaderStageFlags::COMPUTE);
    assert_eq!(ep.local_size.unwrap().known().unwrap(), [8, 8, 1]);
    assert!(module.entry_point("missing").is_none());
    assert!(module.entry_point_descriptor_sets("missing").is_none());
}

#[test]
fn test_storage_buffer_at_set_and_binding() {
    init_logger();
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let (data, block) = storage_buffer(&mut b, "particles");
    b.decorate(data, Decoration::DescriptorSet, &[2]);
    b.decorate(data, Decoration::Binding, &[3]);
    let main = b.begin_function(void, fn_ty);
    b.load(block, data);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::GLCompute, main, "main", &[data]);
    b.execution_mode(main, ExecutionMode::LocalSize, &[64, 1, 1]);

    let module = ShaderModule::from_words(b.build()).unwrap();
    let binding = module.descriptor_binding(2, 3).unwrap();
    assert_eq!(binding.kind, DescriptorKind::StorageBuffer);
    assert_eq!(binding.name.as_deref(), Some("particles"));
    assert_eq!(binding.count, 1);
    assert!(binding.accessed);
    assert!(!binding.set_defaulted);

    let sets = module.entry_point_descriptor_sets("main").unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].set, 2);
    assert_eq!(sets[0].bindings[0].binding, 3);

    let layouts = layout::descriptor_set_layouts(&module, module.entry_point("main").unwrap());
    assert_eq!(layouts[0].set_number, 2);
    let vk_binding = layouts[0].binding(3).unwrap();
    assert_eq!(vk_binding.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
    assert_eq!(vk_binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
}

#[test]
fn test_missing_binding_is_rejected() {
    let words = compute_module(|b| {
        let (data, _) = storage_buffer(b, "data");
        b.decorate(data, Decoration::DescriptorSet, &[0]);
        vec![data]
    });
    let err = ShaderModule::from_words(words).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingBindingDecoration);
    assert!(matches!(
        err,
        ReflectError::MissingBindingDecoration {
            decoration: Decoration::Binding,
            ..
        }
    ));
    assert!(err.offset().is_some());
}

#[test]
fn test_missing_set_defaults_to_zero() {
    let words = compute_module(|b| {
        let (data, _) = storage_buffer(b, "data");
        b.decorate(data, Decoration::Binding, &[5]);
        vec![data]
    });

    let module = ShaderModule::from_words(words.as_slice()).unwrap();
    let binding = module.descriptor_binding(0, 5).unwrap();
    assert!(binding.set_defaulted);

    let reject = ReflectOptions::default().with_missing_set(MissingSetPolicy::Reject);
    let err = ShaderModule::from_words_with_options(words.as_slice(), &reject).unwrap_err();
    assert!(matches!(
        err,
        ReflectError::MissingBindingDecoration {
            decoration: Decoration::DescriptorSet,
            ..
        }
    ));
}

#[test]
fn test_recursive_call_graph_fails() {
    init_logger();
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let ping = b.id();
    let pong = b.id();

    let main = b.begin_function(void, fn_ty);
    b.function_call(void, ping, &[]);
    b.ret();
    b.end_function();

    b.begin_function_with_id(ping, void, fn_ty);
    b.function_call(void, pong, &[]);
    b.ret();
    b.end_function();

    b.begin_function_with_id(pong, void, fn_ty);
    b.function_call(void, ping, &[]);
    b.ret();
    b.end_function();

    b.entry_point(ExecutionModel::GLCompute, main, "main", &[]);
    b.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);

    let err = ShaderModule::from_words(b.build()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecursiveCallGraph);
    match err {
        ReflectError::RecursiveCallGraph { function, .. } => {
            assert!(function == ping || function == pong)
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unreferenced_resource_stays_in_module() {
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let (used, block) = storage_buffer(&mut b, "used");
    b.decorate(used, Decoration::DescriptorSet, &[0]);
    b.decorate(used, Decoration::Binding, &[0]);
    let unused = {
        let ptr = b.type_pointer(StorageClass::StorageBuffer, block);
        let var = b.variable(ptr, StorageClass::StorageBuffer);
        b.name(var, "unused");
        b.decorate(var, Decoration::DescriptorSet, &[0]);
        b.decorate(var, Decoration::Binding, &[1]);
        var
    };
    let main = b.begin_function(void, fn_ty);
    b.load(block, used);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::GLCompute, main, "main", &[used, unused]);
    b.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);

    let module = ShaderModule::from_words(b.build()).unwrap();
    assert_eq!(module.descriptor_set(0).unwrap().bindings.len(), 2);
    assert!(!module.descriptor_binding(0, 1).unwrap().accessed);

    let ep = module.entry_point("main").unwrap();
    assert!(ep.references_binding(0, 0));
    assert!(!ep.references_binding(0, 1));
    assert!(ep.accessed_variables.contains(&used));
    assert!(!ep.accessed_variables.contains(&unused));
}

#[test]
fn test_member_decorations_attach_to_member() {
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let float = b.type_float(32);
    let vec4 = b.type_vector(float, 4);
    let block = b.type_struct(&[vec4, float]);
    b.name(block, "Light");
    b.member_name(block, 0, "color");
    b.member_name(block, 1, "intensity");
    b.decorate(block, Decoration::Block, &[]);
    b.member_decorate(block, 0, Decoration::Offset, &[0]);
    b.member_decorate(block, 1, Decoration::Offset, &[16]);
    b.member_decorate(block, 1, Decoration::RelaxedPrecision, &[]);
    let ptr = b.type_pointer(StorageClass::Uniform, block);
    let light = b.variable(ptr, StorageClass::Uniform);
    b.decorate(light, Decoration::DescriptorSet, &[0]);
    b.decorate(light, Decoration::Binding, &[0]);
    let main = b.begin_function(void, fn_ty);
    b.load(block, light);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::Fragment, main, "main", &[]);
    b.execution_mode(main, ExecutionMode::OriginUpperLeft, &[]);

    let module = ShaderModule::from_words(b.build()).unwrap();
    let binding = module.descriptor_binding(0, 0).unwrap();
    assert_eq!(binding.kind, DescriptorKind::UniformBuffer);
    // Unnamed variable falls back to its block type name
    assert_eq!(binding.name.as_deref(), Some("Light"));

    let block = binding.block.as_ref().unwrap();
    let color = block.member("color").unwrap();
    let intensity = block.member("intensity").unwrap();
    assert_eq!(color.offset, 0);
    assert_eq!(intensity.offset, 16);
    assert_eq!(intensity.size, 4);
    assert!(intensity
        .decorations
        .flags
        .contains(hlx_reflect::DecorationFlags::RELAXED_PRECISION));
    assert!(!color
        .decorations
        .flags
        .contains(hlx_reflect::DecorationFlags::RELAXED_PRECISION));
}

#[test]
fn test_reflection_is_deterministic() {
    let words = compute_module(|b| {
        let (a, _) = storage_buffer(b, "a");
        b.decorate(a, Decoration::DescriptorSet, &[1]);
        b.decorate(a, Decoration::Binding, &[0]);
        let (c, _) = storage_buffer(b, "c");
        b.decorate(c, Decoration::DescriptorSet, &[0]);
        b.decorate(c, Decoration::Binding, &[4]);
        vec![a, c]
    });
    let first = ShaderModule::from_words(words.as_slice()).unwrap();
    let second = ShaderModule::from_words(words.clone()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        hlx_reflect::json::to_json(&first),
        hlx_reflect::json::to_json(&second)
    );

    let sets: Vec<u32> = first.descriptor_sets().iter().map(|s| s.set).collect();
    assert_eq!(sets, vec![0, 1]);
}

#[test]
fn test_strict_mode_upgrades_warnings() {
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let ghost = b.id();
    b.decorate(ghost, Decoration::RelaxedPrecision, &[]);
    let main = b.begin_function(void, fn_ty);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::GLCompute, main, "main", &[]);
    b.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);
    let words = b.build();

    let lenient = ShaderModule::from_words(words.as_slice()).unwrap();
    assert_eq!(lenient.dangling_decoration_count(), 1);
    assert!(matches!(
        lenient.warnings()[0],
        Warning::DanglingDecoration { target, .. } if target == ghost
    ));

    let strict = ReflectOptions::default().with_strict(true);
    let err = ShaderModule::from_words_with_options(words.as_slice(), &strict).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Anomaly);
}

/// Vertex stage reading `vec3 position; vec2 uv;` plus a camera UBO, and a
/// fragment stage writing one color and reading the same UBO.
fn graphics_pair() -> (Vec<Word>, Vec<Word>) {
    fn camera(b: &mut SpirvBuilder) -> (Word, Word) {
        let float = b.type_float(32);
        let vec4 = b.type_vector(float, 4);
        let mat4 = b.type_matrix(vec4, 4);
        let block = b.type_struct(&[mat4]);
        b.name(block, "Camera");
        b.member_name(block, 0, "view_proj");
        b.decorate(block, Decoration::Block, &[]);
        b.member_decorate(block, 0, Decoration::Offset, &[0]);
        b.member_decorate(block, 0, Decoration::ColMajor, &[]);
        b.member_decorate(block, 0, Decoration::MatrixStride, &[16]);
        let ptr = b.type_pointer(StorageClass::Uniform, block);
        let var = b.variable(ptr, StorageClass::Uniform);
        b.name(var, "camera");
        b.decorate(var, Decoration::DescriptorSet, &[0]);
        b.decorate(var, Decoration::Binding, &[0]);
        (var, block)
    }

    let vertex = {
        let mut b = builder();
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let (cam, cam_block) = camera(&mut b);
        let float = b.type_float(32);
        let vec3 = b.type_vector(float, 3);
        let vec2 = b.type_vector(float, 2);
        let in_vec3 = b.type_pointer(StorageClass::Input, vec3);
        let in_vec2 = b.type_pointer(StorageClass::Input, vec2);
        let position = b.variable(in_vec3, StorageClass::Input);
        b.name(position, "position");
        b.decorate(position, Decoration::Location, &[0]);
        let uv = b.variable(in_vec2, StorageClass::Input);
        b.name(uv, "uv");
        b.decorate(uv, Decoration::Location, &[1]);
        let main = b.begin_function(void, fn_ty);
        b.load(cam_block, cam);
        b.load(vec3, position);
        b.load(vec2, uv);
        b.ret();
        b.end_function();
        b.entry_point(ExecutionModel::Vertex, main, "main", &[cam, position, uv]);
        b.build()
    };

    let fragment = {
        let mut b = builder();
        let void = b.type_void();
        let fn_ty = b.type_function(void, &[]);
        let (cam, cam_block) = camera(&mut b);
        let float = b.type_float(32);
        let vec4 = b.type_vector(float, 4);
        let out_vec4 = b.type_pointer(StorageClass::Output, vec4);
        let color = b.variable(out_vec4, StorageClass::Output);
        b.name(color, "color");
        b.decorate(color, Decoration::Location, &[0]);
        let main = b.begin_function(void, fn_ty);
        b.load(cam_block, cam);
        b.ret();
        b.end_function();
        b.entry_point(ExecutionModel::Fragment, main, "main", &[cam, color]);
        b.execution_mode(main, ExecutionMode::OriginUpperLeft, &[]);
        b.build()
    };

    (vertex, fragment)
}

#[test]
fn test_vertex_fragment_pipeline_layout() {
    init_logger();
    let (vertex, fragment) = graphics_pair();
    let vs = ShaderModule::from_words(vertex).unwrap();
    let fs = ShaderModule::from_words(fragment).unwrap();
    let vs_main = vs.entry_point("main").unwrap();
    let fs_main = fs.entry_point("main").unwrap();

    let merged = layout::merge_stages(&[(&vs, vs_main), (&fs, fs_main)]).unwrap();
    assert_eq!(merged.len(), 1);
    let camera = merged[0].binding(0).unwrap();
    assert_eq!(camera.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    assert_eq!(
        camera.stage_flags,
        vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
    );

    let cam_block = vs.descriptor_binding_by_name("camera").unwrap();
    let block = cam_block.block.as_ref().unwrap();
    assert_eq!(block.size, 64);
    assert_eq!(block.member("view_proj").unwrap().size, 64);

    let (vertex_binding, attributes) = layout::vertex_input_layout(&vs, vs_main);
    assert_eq!(vertex_binding.stride, 20);
    assert_eq!(attributes.len(), 2);
    assert_eq!(attributes[0].format, vk::Format::R32G32B32_SFLOAT);
    assert_eq!(attributes[1].format, vk::Format::R32G32_SFLOAT);
    assert_eq!(attributes[1].offset, 12);

    let outputs = fs.output_variables("main").unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].name.as_deref(), Some("color"));
    assert_eq!(fs.output_variable_by_location("main", 0).unwrap().format, vk::Format::R32G32B32A32_SFLOAT);
    assert!(vs.input_variable_by_location("main", 1).is_some());
    assert!(vs.input_variable_by_location("main", 2).is_none());
}

#[test]
fn test_cache_round_trip() {
    init_logger();
    let (vertex, _) = graphics_pair();
    let bytes: Vec<u8> = vertex.iter().flat_map(|w| w.to_le_bytes()).collect();

    let mut cache = ReflectionCache::new();
    let (id, module) = cache.load(&bytes).unwrap();
    assert_eq!(id, hlx_reflect::compute_shader_id(&bytes));
    assert!(!module.is_borrowed());
    assert_eq!(module.code(), vertex.as_slice());

    let (_, again) = cache.load(&bytes).unwrap();
    assert_eq!(module, again);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_two_dimensional_texture_array() {
    init_logger();
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let float = b.type_float(32);
    let uint = b.type_int(32, false);
    let two = b.constant_u32(uint, 2);
    let three = b.constant_u32(uint, 3);
    let zero = b.constant_u32(uint, 0);
    let image = b.type_image(float, spirv::Dim::Dim2D, 1, spirv::ImageFormat::Unknown);
    let combined = b.type_sampled_image(image);
    let row = b.type_array(combined, three);
    let grid = b.type_array(row, two);
    let grid_ptr = b.type_pointer(StorageClass::UniformConstant, grid);
    let combined_ptr = b.type_pointer(StorageClass::UniformConstant, combined);
    let tex = b.variable(grid_ptr, StorageClass::UniformConstant);
    b.name(tex, "tex");
    b.decorate(tex, Decoration::DescriptorSet, &[0]);
    b.decorate(tex, Decoration::Binding, &[4]);
    let main = b.begin_function(void, fn_ty);
    let element = b.access_chain(combined_ptr, tex, &[zero, zero]);
    b.load(combined, element);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::Fragment, main, "main", &[tex]);
    b.execution_mode(main, ExecutionMode::OriginUpperLeft, &[]);

    let module = ShaderModule::from_words(b.build()).unwrap();
    let binding = module.descriptor_binding(0, 4).unwrap();
    assert_eq!(binding.kind, DescriptorKind::CombinedImageSampler);
    assert_eq!(binding.count, 6);
    assert!(binding.accessed);

    let ep = module.entry_point("main").unwrap();
    let layouts = layout::descriptor_set_layouts(&module, ep);
    assert_eq!(layouts[0].binding(4).unwrap().descriptor_count, 6);
}

#[test]
fn test_relaxed_precision_on_arithmetic_results() {
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let float = b.type_float(32);
    let half = b.constant_u32(float, 0x3f00_0000);
    let main = b.begin_function(void, fn_ty);
    let product = b.instruction(spirv::Op::FMul, float, &[half, half]);
    let sum = b.instruction(spirv::Op::FAdd, float, &[product, half]);
    b.ret();
    b.end_function();
    b.decorate(product, Decoration::RelaxedPrecision, &[]);
    b.decorate(sum, Decoration::NoContraction, &[]);
    b.entry_point(ExecutionModel::GLCompute, main, "main", &[]);
    b.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);
    let words = b.build();

    let strict = ReflectOptions::default().with_strict(true);
    let module = ShaderModule::from_words_with_options(words.as_slice(), &strict).unwrap();
    assert_eq!(module.dangling_decoration_count(), 0);
    assert!(module.warnings().is_empty());
}

#[test]
fn test_oversized_matrix_stride_saturates() {
    let mut b = builder();
    let void = b.type_void();
    let fn_ty = b.type_function(void, &[]);
    let float = b.type_float(32);
    let vec4 = b.type_vector(float, 4);
    let mat4 = b.type_matrix(vec4, 4);
    let block = b.type_struct(&[mat4]);
    b.member_name(block, 0, "transform");
    b.decorate(block, Decoration::Block, &[]);
    b.member_decorate(block, 0, Decoration::Offset, &[0]);
    b.member_decorate(block, 0, Decoration::ColMajor, &[]);
    b.member_decorate(block, 0, Decoration::MatrixStride, &[0x8000_0000]);
    let ptr = b.type_pointer(StorageClass::Uniform, block);
    let var = b.variable(ptr, StorageClass::Uniform);
    b.name(var, "huge");
    b.decorate(var, Decoration::DescriptorSet, &[0]);
    b.decorate(var, Decoration::Binding, &[0]);
    let main = b.begin_function(void, fn_ty);
    b.ret();
    b.end_function();
    b.entry_point(ExecutionModel::GLCompute, main, "main", &[var]);
    b.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);

    let module = ShaderModule::from_words(b.build()).unwrap();
    let block = module.descriptor_binding(0, 0).unwrap().block.as_ref().unwrap();
    assert_eq!(block.member("transform").unwrap().size, u32::MAX);
    assert_eq!(block.size, u32::MAX);
}

#[test]
fn test_shared_struct_nesting_fails_fast() {
    let words = compute_module(|b| {
        let mut inner = b.type_float(32);
        for _ in 0..20 {
            let level = b.type_struct(&[inner, inner]);
            b.member_decorate(level, 0, Decoration::Offset, &[0]);
            b.member_decorate(level, 1, Decoration::Offset, &[0]);
            inner = level;
        }
        b.decorate(inner, Decoration::Block, &[]);
        let ptr = b.type_pointer(StorageClass::StorageBuffer, inner);
        let var = b.variable(ptr, StorageClass::StorageBuffer);
        b.name(var, "nested");
        b.decorate(var, Decoration::DescriptorSet, &[0]);
        b.decorate(var, Decoration::Binding, &[0]);
        vec![var]
    });
    let err = ShaderModule::from_words(words).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}
