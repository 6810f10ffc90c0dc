//! Decorations attached to ids and struct members

use bitflags::bitflags;

bitflags! {
    /// Decorations that carry no operand.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DecorationFlags: u32 {
        const BLOCK = 1 << 0;
        const BUFFER_BLOCK = 1 << 1;
        const ROW_MAJOR = 1 << 2;
        const COLUMN_MAJOR = 1 << 3;
        const BUILT_IN = 1 << 4;
        const NON_WRITABLE = 1 << 5;
        const NON_READABLE = 1 << 6;
        const FLAT = 1 << 7;
        const NO_PERSPECTIVE = 1 << 8;
        const CENTROID = 1 << 9;
        const SAMPLE = 1 << 10;
        const PATCH = 1 << 11;
        const INVARIANT = 1 << 12;
        const RELAXED_PRECISION = 1 << 13;
        const RESTRICT = 1 << 14;
        const ALIASED = 1 << 15;
        const COHERENT = 1 << 16;
        const VOLATILE = 1 << 17;
    }
}

impl DecorationFlags {
    /// Flag for a fieldless decoration, `None` for decorations with operands
    /// or ones the reflection does not track.
    pub fn from_decoration(decoration: spirv::Decoration) -> Option<Self> {
        use spirv::Decoration as D;
        Some(match decoration {
            D::Block => Self::BLOCK,
            D::BufferBlock => Self::BUFFER_BLOCK,
            D::RowMajor => Self::ROW_MAJOR,
            D::ColMajor => Self::COLUMN_MAJOR,
            D::NonWritable => Self::NON_WRITABLE,
            D::NonReadable => Self::NON_READABLE,
            D::Flat => Self::FLAT,
            D::NoPerspective => Self::NO_PERSPECTIVE,
            D::Centroid => Self::CENTROID,
            D::Sample => Self::SAMPLE,
            D::Patch => Self::PATCH,
            D::Invariant => Self::INVARIANT,
            D::RelaxedPrecision => Self::RELAXED_PRECISION,
            D::Restrict => Self::RESTRICT,
            D::Aliased => Self::ALIASED,
            D::Coherent => Self::COHERENT,
            D::Volatile => Self::VOLATILE,
            _ => return None,
        })
    }
}

/// Every recognised decoration applied to one id or one struct member.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decorations {
    pub flags: DecorationFlags,
    pub binding: Option<u32>,
    pub descriptor_set: Option<u32>,
    pub location: Option<u32>,
    pub component: Option<u32>,
    pub offset: Option<u32>,
    pub array_stride: Option<u32>,
    pub matrix_stride: Option<u32>,
    pub spec_id: Option<u32>,
    /// Raw `BuiltIn` operand.
    pub built_in: Option<u32>,
    pub input_attachment_index: Option<u32>,
    pub user_semantic: Option<String>,
}

impl Decorations {
    pub fn is_empty(&self) -> bool {
        *self == Decorations::default()
    }

    pub fn built_in(&self) -> Option<spirv::BuiltIn> {
        self.built_in.and_then(spirv::BuiltIn::from_u32)
    }

    pub fn is_block(&self) -> bool {
        self.flags
            .intersects(DecorationFlags::BLOCK | DecorationFlags::BUFFER_BLOCK)
    }

    pub fn is_row_major(&self) -> bool {
        self.flags.contains(DecorationFlags::ROW_MAJOR)
    }
}
