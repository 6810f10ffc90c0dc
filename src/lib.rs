//! SPIR-V shader reflection
//!
//! Parses a compiled SPIR-V module and reconstructs what a Vulkan host needs
//! to bind it: descriptor sets and bindings, push constant blocks, stage
//! input/output variables, entry points with their workgroup sizes, and the
//! full type graph behind all of them.
//!
//! ```
//! use hlx_reflect::{assembler::SpirvBuilder, ShaderModule};
//! use spirv::{Decoration, StorageClass};
//!
//! let mut b = SpirvBuilder::new();
//! b.capability(spirv::Capability::Shader);
//! b.memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450);
//! let void = b.type_void();
//! let fn_ty = b.type_function(void, &[]);
//! let float = b.type_float(32);
//! let image = b.type_image(float, spirv::Dim::Dim2D, 1, spirv::ImageFormat::Unknown);
//! let ptr = b.type_pointer(StorageClass::UniformConstant, image);
//! let tex = b.variable(ptr, StorageClass::UniformConstant);
//! b.name(tex, "tex");
//! b.decorate(tex, Decoration::DescriptorSet, &[1]);
//! b.decorate(tex, Decoration::Binding, &[0]);
//! let main = b.begin_function(void, fn_ty);
//! b.load(image, tex);
//! b.ret();
//! b.end_function();
//! b.entry_point(spirv::ExecutionModel::Fragment, main, "main", &[]);
//!
//! let bytes = b.build_bytes();
//! let module = ShaderModule::from_bytes(&bytes)?;
//! let sets = module.entry_point_descriptor_sets("main").unwrap();
//! assert_eq!(sets[0].set, 1);
//! assert_eq!(sets[0].bindings[0].name.as_deref(), Some("tex"));
//! # Ok::<(), hlx_reflect::ReflectError>(())
//! ```

pub mod assembler;
pub mod cache;
pub mod decoration;
pub mod error;
pub mod interface;
pub mod json;
pub mod layout;
pub mod options;
pub mod shader;
pub mod types;
pub mod validation;

mod parse;

pub use cache::{compute_shader_id, ReflectionCache};
pub use decoration::{DecorationFlags, Decorations};
pub use error::{ErrorKind, ReflectError, Warning};
pub use interface::{
    BlockVariable, Capability, DescriptorBinding, DescriptorKind, DescriptorSet, EntryPoint,
    EntryPointSet, ExecutionModeInfo, InterfaceMember, InterfaceVariable, LocalSize,
    PushConstantBlock, SourceInfo, SpecializationConstant,
};
pub use options::{BufferOwnership, MissingSetPolicy, ReflectOptions};
pub use shader::ShaderModule;
pub use types::{
    ArrayLength, ImageDim, ImageTraits, ImageUsage, ScalarKind, ScalarTraits, Specializable,
    StructLayout, StructMember, TypeArena, TypeDescription, TypeInner,
};
pub use validation::{is_spirv, validate_spirv, Generator, Header};
