//! Type descriptions
//!
//! Types live in an arena keyed by their SPIR-V result id. Composite types
//! refer to their parts by id, so shared types are stored once and pointer
//! cycles are plain back-references.

use std::collections::{BTreeMap, HashMap};

use ash::vk;
use spirv::Word;

use crate::decoration::Decorations;
use crate::error::ReflectError;

/// A value that is either known at parse time or supplied by a
/// specialization constant at pipeline creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Specializable<T> {
    Known(T),
    SpecializationDependent {
        /// Result id of the specialization constant.
        id: Word,
        /// `SpecId` decoration, absent for derived (`OpSpecConstantOp`) values.
        spec_id: Option<u32>,
        /// Default value, if the constant has a literal default.
        default: Option<T>,
    },
}

impl<T: Copy> Specializable<T> {
    /// The statically known value.
    ///
    /// # Errors
    ///
    /// Returns `ReflectError::SpecializationDependentValue` when the value is
    /// only determined at pipeline-creation time.
    pub fn known(&self) -> Result<T, ReflectError> {
        match *self {
            Specializable::Known(value) => Ok(value),
            Specializable::SpecializationDependent { id, spec_id, .. } => {
                Err(ReflectError::SpecializationDependentValue { id, spec_id })
            }
        }
    }

    /// Known value, or the default of the specialization constant.
    pub fn value_or_default(&self) -> Option<T> {
        match *self {
            Specializable::Known(value) => Some(value),
            Specializable::SpecializationDependent { default, .. } => default,
        }
    }

    pub fn is_specialization_dependent(&self) -> bool {
        matches!(self, Specializable::SpecializationDependent { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Sint,
    Uint,
    Float,
    Bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScalarTraits {
    pub kind: ScalarKind,
    /// Bit width.
    pub width: u32,
}

impl ScalarTraits {
    pub fn byte_size(&self) -> u32 {
        match self.kind {
            // Booleans have no physical size; 4 matches their use in blocks
            ScalarKind::Bool => 4,
            _ => self.width / 8,
        }
    }

    /// Vertex-attribute style format for a scalar or vector of this scalar.
    pub fn vk_format(&self, components: u32) -> vk::Format {
        use vk::Format as F;
        match (self.kind, self.width, components) {
            (ScalarKind::Float, 32, 1) => F::R32_SFLOAT,
            (ScalarKind::Float, 32, 2) => F::R32G32_SFLOAT,
            (ScalarKind::Float, 32, 3) => F::R32G32B32_SFLOAT,
            (ScalarKind::Float, 32, 4) => F::R32G32B32A32_SFLOAT,
            (ScalarKind::Sint, 32, 1) => F::R32_SINT,
            (ScalarKind::Sint, 32, 2) => F::R32G32_SINT,
            (ScalarKind::Sint, 32, 3) => F::R32G32B32_SINT,
            (ScalarKind::Sint, 32, 4) => F::R32G32B32A32_SINT,
            (ScalarKind::Uint, 32, 1) => F::R32_UINT,
            (ScalarKind::Uint, 32, 2) => F::R32G32_UINT,
            (ScalarKind::Uint, 32, 3) => F::R32G32B32_UINT,
            (ScalarKind::Uint, 32, 4) => F::R32G32B32A32_UINT,
            (ScalarKind::Float, 16, 1) => F::R16_SFLOAT,
            (ScalarKind::Float, 16, 2) => F::R16G16_SFLOAT,
            (ScalarKind::Float, 16, 3) => F::R16G16B16_SFLOAT,
            (ScalarKind::Float, 16, 4) => F::R16G16B16A16_SFLOAT,
            (ScalarKind::Sint, 16, 1) => F::R16_SINT,
            (ScalarKind::Sint, 16, 2) => F::R16G16_SINT,
            (ScalarKind::Sint, 16, 3) => F::R16G16B16_SINT,
            (ScalarKind::Sint, 16, 4) => F::R16G16B16A16_SINT,
            (ScalarKind::Uint, 16, 1) => F::R16_UINT,
            (ScalarKind::Uint, 16, 2) => F::R16G16_UINT,
            (ScalarKind::Uint, 16, 3) => F::R16G16B16_UINT,
            (ScalarKind::Uint, 16, 4) => F::R16G16B16A16_UINT,
            (ScalarKind::Float, 64, 1) => F::R64_SFLOAT,
            (ScalarKind::Float, 64, 2) => F::R64G64_SFLOAT,
            (ScalarKind::Float, 64, 3) => F::R64G64B64_SFLOAT,
            (ScalarKind::Float, 64, 4) => F::R64G64B64A64_SFLOAT,
            (ScalarKind::Sint, 64, 1) => F::R64_SINT,
            (ScalarKind::Sint, 64, 2) => F::R64G64_SINT,
            (ScalarKind::Sint, 64, 3) => F::R64G64B64_SINT,
            (ScalarKind::Sint, 64, 4) => F::R64G64B64A64_SINT,
            (ScalarKind::Uint, 64, 1) => F::R64_UINT,
            (ScalarKind::Uint, 64, 2) => F::R64G64_UINT,
            (ScalarKind::Uint, 64, 3) => F::R64G64B64_UINT,
            (ScalarKind::Uint, 64, 4) => F::R64G64B64A64_UINT,
            _ => F::UNDEFINED,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageDim {
    D1,
    D2,
    D3,
    Cube,
    Rect,
    Buffer,
    SubpassData,
}

impl ImageDim {
    pub fn from_spirv(dim: spirv::Dim) -> Option<Self> {
        Some(match dim {
            spirv::Dim::Dim1D => ImageDim::D1,
            spirv::Dim::Dim2D => ImageDim::D2,
            spirv::Dim::Dim3D => ImageDim::D3,
            spirv::Dim::DimCube => ImageDim::Cube,
            spirv::Dim::DimRect => ImageDim::Rect,
            spirv::Dim::DimBuffer => ImageDim::Buffer,
            spirv::Dim::DimSubpassData => ImageDim::SubpassData,
            _ => return None,
        })
    }
}

/// How an image is accessed, from the `Sampled` operand of `OpTypeImage`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageUsage {
    /// Operand 0: known only at run time.
    Unknown,
    /// Operand 1: used with a sampler.
    Sampled,
    /// Operand 2: read/write without a sampler.
    Storage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageTraits {
    pub sampled_type: Word,
    pub dim: ImageDim,
    /// Raw depth operand: 0 no, 1 yes, 2 unknown.
    pub depth: u32,
    pub arrayed: bool,
    pub multisampled: bool,
    pub usage: ImageUsage,
    /// Raw image format operand.
    pub format: u32,
    pub access: Option<u32>,
}

impl ImageTraits {
    pub fn image_format(&self) -> Option<spirv::ImageFormat> {
        spirv::ImageFormat::from_u32(self.format)
    }

    /// Vulkan format for the declared image format (`UNDEFINED` for
    /// `Unknown` or formats without a direct Vulkan counterpart).
    pub fn vk_format(&self) -> vk::Format {
        use spirv::ImageFormat as I;
        use vk::Format as F;
        match self.image_format() {
            Some(I::Rgba32f) => F::R32G32B32A32_SFLOAT,
            Some(I::Rgba16f) => F::R16G16B16A16_SFLOAT,
            Some(I::R32f) => F::R32_SFLOAT,
            Some(I::Rgba8) => F::R8G8B8A8_UNORM,
            Some(I::Rgba8Snorm) => F::R8G8B8A8_SNORM,
            Some(I::Rg32f) => F::R32G32_SFLOAT,
            Some(I::Rg16f) => F::R16G16_SFLOAT,
            Some(I::R11fG11fB10f) => F::B10G11R11_UFLOAT_PACK32,
            Some(I::R16f) => F::R16_SFLOAT,
            Some(I::Rgba16) => F::R16G16B16A16_UNORM,
            Some(I::Rgb10A2) => F::A2B10G10R10_UNORM_PACK32,
            Some(I::Rg16) => F::R16G16_UNORM,
            Some(I::Rg8) => F::R8G8_UNORM,
            Some(I::R16) => F::R16_UNORM,
            Some(I::R8) => F::R8_UNORM,
            Some(I::Rgba16Snorm) => F::R16G16B16A16_SNORM,
            Some(I::Rg16Snorm) => F::R16G16_SNORM,
            Some(I::Rg8Snorm) => F::R8G8_SNORM,
            Some(I::R16Snorm) => F::R16_SNORM,
            Some(I::R8Snorm) => F::R8_SNORM,
            Some(I::Rgba32i) => F::R32G32B32A32_SINT,
            Some(I::Rgba16i) => F::R16G16B16A16_SINT,
            Some(I::Rgba8i) => F::R8G8B8A8_SINT,
            Some(I::R32i) => F::R32_SINT,
            Some(I::Rg32i) => F::R32G32_SINT,
            Some(I::Rg16i) => F::R16G16_SINT,
            Some(I::Rg8i) => F::R8G8_SINT,
            Some(I::R16i) => F::R16_SINT,
            Some(I::R8i) => F::R8_SINT,
            Some(I::Rgba32ui) => F::R32G32B32A32_UINT,
            Some(I::Rgba16ui) => F::R16G16B16A16_UINT,
            Some(I::Rgba8ui) => F::R8G8B8A8_UINT,
            Some(I::R32ui) => F::R32_UINT,
            Some(I::Rg32ui) => F::R32G32_UINT,
            Some(I::Rg16ui) => F::R16G16_UINT,
            Some(I::Rg8ui) => F::R8G8_UINT,
            Some(I::R16ui) => F::R16_UINT,
            Some(I::R8ui) => F::R8_UINT,
            _ => F::UNDEFINED,
        }
    }
}

/// Length of an `OpTypeArray`.
pub type ArrayLength = Specializable<u32>;

/// Whether explicit member offsets were present on a struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructLayout {
    /// Every member carries an `Offset` decoration.
    Explicit,
    /// No member carries an `Offset`; no layout rules were applied.
    Implicit,
    /// Some members carry an `Offset` and some do not.
    Partial,
    /// The struct has no members.
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructMember {
    pub name: Option<String>,
    pub type_ref: Word,
    /// Member-level decorations (offset, matrix stride, majorness, built-in).
    pub decorations: Decorations,
}

impl StructMember {
    pub fn offset(&self) -> Option<u32> {
        self.decorations.offset
    }
}

/// The closed set of type kinds the resolver models.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeInner {
    Void,
    Bool,
    Scalar(ScalarTraits),
    Vector {
        component: Word,
        scalar: ScalarTraits,
        count: u32,
    },
    Matrix {
        column: Word,
        scalar: ScalarTraits,
        columns: u32,
        rows: u32,
    },
    Array {
        element: Word,
        length: ArrayLength,
    },
    RuntimeArray {
        element: Word,
    },
    /// Array of opaque handles or blocks: one descriptor per element.
    BindingArray {
        element: Word,
        /// `None` for runtime-sized arrays.
        count: Option<ArrayLength>,
    },
    Struct {
        members: Vec<StructMember>,
        layout: StructLayout,
    },
    Pointer {
        storage_class: spirv::StorageClass,
        pointee: Word,
    },
    Function {
        return_type: Word,
        parameters: Vec<Word>,
    },
    Image(ImageTraits),
    Sampler,
    SampledImage {
        image: Word,
    },
    AccelerationStructure,
    RayQuery,
}

impl TypeInner {
    /// Opaque handles are only usable through descriptors.
    pub fn is_opaque(&self) -> bool {
        matches!(
            self,
            TypeInner::Image(_)
                | TypeInner::Sampler
                | TypeInner::SampledImage { .. }
                | TypeInner::AccelerationStructure
        )
    }

    pub fn scalar(&self) -> Option<ScalarTraits> {
        match *self {
            TypeInner::Scalar(scalar)
            | TypeInner::Vector { scalar, .. }
            | TypeInner::Matrix { scalar, .. } => Some(scalar),
            _ => None,
        }
    }
}

/// One resolved type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescription {
    pub id: Word,
    pub name: Option<String>,
    pub inner: TypeInner,
    /// Type-level decorations (`Block`, `ArrayStride`, ...).
    pub decorations: Decorations,
}

impl TypeDescription {
    pub fn is_block(&self) -> bool {
        self.decorations.is_block()
    }
}

/// Memoized block sizes keyed by type id, majorness and matrix stride.
pub(crate) type SizeCache = HashMap<(Word, bool, Option<u32>), u32>;

/// All resolved types of a module keyed by result id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeArena {
    types: BTreeMap<Word, TypeDescription>,
}

impl TypeArena {
    pub(crate) fn insert(&mut self, ty: TypeDescription) {
        self.types.insert(ty.id, ty);
    }

    pub fn get(&self, id: Word) -> Option<&TypeDescription> {
        self.types.get(&id)
    }

    pub fn contains(&self, id: Word) -> bool {
        self.types.contains_key(&id)
    }

    /// Types in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescription> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Follow pointers down to the first non-pointer type.
    pub fn strip_pointers(&self, mut id: Word) -> Option<&TypeDescription> {
        // Pointer cycles are only possible through structs, so this
        // terminates after at most `len` steps.
        for _ in 0..=self.types.len() {
            let ty = self.get(id)?;
            match ty.inner {
                TypeInner::Pointer { pointee, .. } => id = pointee,
                _ => return Some(ty),
            }
        }
        None
    }

    /// Byte size of a type as laid out in a block.
    ///
    /// `row_major` and `matrix_stride` come from the enclosing member
    /// decorations; runtime arrays and opaque types have size 0. Sizes
    /// saturate at `u32::MAX`.
    pub fn byte_size(&self, id: Word, row_major: bool, matrix_stride: Option<u32>) -> u32 {
        self.byte_size_cached(id, row_major, matrix_stride, &mut SizeCache::new())
    }

    /// [`byte_size`](Self::byte_size) sharing `cache` across calls, so a
    /// struct reachable along many paths is sized once.
    pub(crate) fn byte_size_cached(
        &self,
        id: Word,
        row_major: bool,
        matrix_stride: Option<u32>,
        cache: &mut SizeCache,
    ) -> u32 {
        let key = (id, row_major, matrix_stride);
        if let Some(&size) = cache.get(&key) {
            return size;
        }
        let Some(ty) = self.get(id) else {
            return 0;
        };
        let size = match ty.inner {
            TypeInner::Bool => 4,
            TypeInner::Scalar(scalar) => scalar.byte_size(),
            TypeInner::Vector { scalar, count, .. } => scalar.byte_size().saturating_mul(count),
            TypeInner::Matrix {
                scalar,
                columns,
                rows,
                ..
            } => {
                let (vectors, natural) = if row_major {
                    (rows, columns.saturating_mul(scalar.byte_size()))
                } else {
                    (columns, rows.saturating_mul(scalar.byte_size()))
                };
                vectors.saturating_mul(matrix_stride.unwrap_or(natural))
            }
            TypeInner::Array { element, length } => {
                let count = length.value_or_default().unwrap_or(0);
                let stride = match ty.decorations.array_stride {
                    Some(stride) => stride,
                    None => self.byte_size_cached(element, row_major, matrix_stride, cache),
                };
                stride.saturating_mul(count)
            }
            TypeInner::Struct { ref members, .. } => {
                let mut end = 0;
                for member in members {
                    let size = self.byte_size_cached(
                        member.type_ref,
                        member.decorations.is_row_major(),
                        member.decorations.matrix_stride,
                        cache,
                    );
                    end = end.max(member.offset().unwrap_or(0).saturating_add(size));
                }
                end
            }
            TypeInner::Pointer { .. } => 8,
            _ => 0,
        };
        cache.insert(key, size);
        size
    }
}
