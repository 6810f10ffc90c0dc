//! Decoration collector
//!
//! Builds the `(target, member)` to [`Decorations`] table and the debug-name
//! tables. Decoration groups are expanded onto their targets before the
//! values are merged, so a conflict is caught no matter how a decoration
//! reached its target.

use std::collections::HashMap;

use spirv::{Decoration, Op, Word};

use super::index::{Instruction, InstructionIndex};
use crate::decoration::{DecorationFlags, Decorations};
use crate::error::{Diagnostics, ReflectError, Warning};

/// A decoration as written, before it is merged into the table.
#[derive(Clone, Debug)]
struct RawDecoration {
    target: Word,
    member: Option<u32>,
    raw: u32,
    operands: Vec<Word>,
    string: Option<String>,
    offset: usize,
}

/// Decorations and debug names keyed by target id.
#[derive(Debug, Default)]
pub(crate) struct DecorationTable {
    targets: HashMap<Word, Decorations>,
    members: HashMap<(Word, u32), Decorations>,
    names: HashMap<Word, String>,
    member_names: HashMap<(Word, u32), String>,
    dangling: usize,
}

impl DecorationTable {
    /// Collect every decoration and debug name in the module.
    ///
    /// # Errors
    ///
    /// `ConflictingDecoration` when one target receives two different values
    /// for the same decoration, `MalformedInput` for truncated operands.
    pub fn collect(
        index: &InstructionIndex<'_>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, ReflectError> {
        let mut table = DecorationTable::default();
        let mut raw = Vec::new();
        let mut groups: HashMap<Word, Vec<RawDecoration>> = HashMap::new();

        for inst in index.instructions() {
            match inst.op {
                Some(Op::Name) => {
                    let (name, _) = inst.string(1)?;
                    table.names.insert(inst.operand(0)?, name);
                }
                Some(Op::MemberName) => {
                    let (name, _) = inst.string(2)?;
                    table
                        .member_names
                        .insert((inst.operand(0)?, inst.operand(1)?), name);
                }
                Some(Op::Decorate) | Some(Op::DecorateId) => {
                    raw.push(RawDecoration {
                        target: inst.operand(0)?,
                        member: None,
                        raw: inst.operand(1)?,
                        operands: inst.operands_from(2).to_vec(),
                        string: None,
                        offset: inst.byte_offset(),
                    });
                }
                Some(Op::DecorateString) => {
                    raw.push(RawDecoration {
                        target: inst.operand(0)?,
                        member: None,
                        raw: inst.operand(1)?,
                        operands: Vec::new(),
                        string: Some(inst.string(2)?.0),
                        offset: inst.byte_offset(),
                    });
                }
                Some(Op::MemberDecorate) => {
                    raw.push(RawDecoration {
                        target: inst.operand(0)?,
                        member: Some(inst.operand(1)?),
                        raw: inst.operand(2)?,
                        operands: inst.operands_from(3).to_vec(),
                        string: None,
                        offset: inst.byte_offset(),
                    });
                }
                Some(Op::MemberDecorateString) => {
                    raw.push(RawDecoration {
                        target: inst.operand(0)?,
                        member: Some(inst.operand(1)?),
                        raw: inst.operand(2)?,
                        operands: Vec::new(),
                        string: Some(inst.string(3)?.0),
                        offset: inst.byte_offset(),
                    });
                }
                _ => {}
            }
        }

        // Decorations aimed at a group id belong to the group, not an object
        let (grouped, direct): (Vec<_>, Vec<_>) = raw.into_iter().partition(|dec| {
            index
                .get(dec.target)
                .is_some_and(|i| i.op == Some(Op::DecorationGroup))
        });
        for dec in grouped {
            groups.entry(dec.target).or_default().push(dec);
        }

        let mut expanded = direct;
        for inst in index.instructions() {
            match inst.op {
                Some(Op::GroupDecorate) => {
                    let group = inst.operand(0)?;
                    let grouped = groups.get(&group).map(Vec::as_slice).unwrap_or(&[]);
                    for &target in inst.operands_from(1) {
                        expanded.extend(grouped.iter().map(|dec| RawDecoration {
                            target,
                            member: None,
                            offset: inst.byte_offset(),
                            ..dec.clone()
                        }));
                    }
                }
                Some(Op::GroupMemberDecorate) => {
                    let group = inst.operand(0)?;
                    let grouped = groups.get(&group).map(Vec::as_slice).unwrap_or(&[]);
                    for pair in inst.operands_from(1).chunks(2) {
                        let &[target, member] = pair else {
                            return Err(ReflectError::malformed(
                                inst.byte_offset(),
                                "OpGroupMemberDecorate has an unpaired target",
                            ));
                        };
                        expanded.extend(grouped.iter().map(|dec| RawDecoration {
                            target,
                            member: Some(member),
                            offset: inst.byte_offset(),
                            ..dec.clone()
                        }));
                    }
                }
                _ => {}
            }
        }

        for dec in expanded {
            if !table.has_valid_target(index, &dec) {
                table.dangling += 1;
                diagnostics.report(Warning::DanglingDecoration {
                    target: dec.target,
                    member: dec.member,
                    offset: dec.offset,
                })?;
                continue;
            }
            table.apply(dec)?;
        }

        log::debug!(
            "collected decorations for {} ids and {} members, {} dangling",
            table.targets.len(),
            table.members.len(),
            table.dangling
        );
        Ok(table)
    }

    fn has_valid_target(&self, index: &InstructionIndex<'_>, dec: &RawDecoration) -> bool {
        let Some(target) = index.get(dec.target) else {
            return false;
        };
        match dec.member {
            None => true,
            Some(member) => {
                target.op == Some(Op::TypeStruct)
                    && (member as usize) < target.operands().len().saturating_sub(1)
            }
        }
    }

    fn apply(&mut self, dec: RawDecoration) -> Result<(), ReflectError> {
        let Some(kind) = Decoration::from_u32(dec.raw) else {
            log::trace!("ignoring unknown decoration {} on %{}", dec.raw, dec.target);
            return Ok(());
        };
        let slot = match dec.member {
            Some(member) => self.members.entry((dec.target, member)).or_default(),
            None => self.targets.entry(dec.target).or_default(),
        };

        if let Some(flag) = DecorationFlags::from_decoration(kind) {
            let opposite = match flag {
                DecorationFlags::ROW_MAJOR => DecorationFlags::COLUMN_MAJOR,
                DecorationFlags::COLUMN_MAJOR => DecorationFlags::ROW_MAJOR,
                _ => DecorationFlags::empty(),
            };
            if slot.flags.intersects(opposite) {
                return Err(ReflectError::ConflictingDecoration {
                    id: dec.target,
                    member: dec.member,
                    decoration: kind,
                    detail: "RowMajor and ColMajor on the same member".to_string(),
                    offset: dec.offset,
                });
            }
            slot.flags |= flag;
            return Ok(());
        }

        let field = match kind {
            Decoration::Binding => &mut slot.binding,
            Decoration::DescriptorSet => &mut slot.descriptor_set,
            Decoration::Location => &mut slot.location,
            Decoration::Component => &mut slot.component,
            Decoration::Offset => &mut slot.offset,
            Decoration::ArrayStride => &mut slot.array_stride,
            Decoration::MatrixStride => &mut slot.matrix_stride,
            Decoration::SpecId => &mut slot.spec_id,
            Decoration::InputAttachmentIndex => &mut slot.input_attachment_index,
            Decoration::BuiltIn => {
                slot.flags |= DecorationFlags::BUILT_IN;
                &mut slot.built_in
            }
            Decoration::UserSemantic => {
                let Some(text) = dec.string else {
                    log::trace!("UserSemantic on %{} without a string", dec.target);
                    return Ok(());
                };
                return match slot.user_semantic {
                    Some(ref existing) if *existing != text => {
                        Err(ReflectError::ConflictingDecoration {
                            id: dec.target,
                            member: dec.member,
                            decoration: kind,
                            detail: format!("{:?} vs {:?}", existing, text),
                            offset: dec.offset,
                        })
                    }
                    _ => {
                        slot.user_semantic = Some(text);
                        Ok(())
                    }
                };
            }
            _ => {
                log::trace!("ignoring {:?} on %{}", kind, dec.target);
                return Ok(());
            }
        };

        let value = *dec.operands.first().ok_or_else(|| {
            ReflectError::malformed(dec.offset, format!("{:?} decoration has no operand", kind))
        })?;
        match *field {
            Some(existing) if existing != value => Err(ReflectError::ConflictingDecoration {
                id: dec.target,
                member: dec.member,
                decoration: kind,
                detail: format!("{} vs {}", existing, value),
                offset: dec.offset,
            }),
            _ => {
                *field = Some(value);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: Word) -> Option<&Decorations> {
        self.targets.get(&id)
    }

    /// Decorations of `id`, or an empty set.
    pub fn of(&self, id: Word) -> Decorations {
        self.targets.get(&id).cloned().unwrap_or_default()
    }

    pub fn of_member(&self, id: Word, member: u32) -> Decorations {
        self.members.get(&(id, member)).cloned().unwrap_or_default()
    }

    pub fn name(&self, id: Word) -> Option<String> {
        self.names.get(&id).cloned()
    }

    pub fn member_name(&self, id: Word, member: u32) -> Option<String> {
        self.member_names.get(&(id, member)).cloned()
    }

    /// Ids carrying a `BuiltIn` decoration with the given value.
    pub fn with_built_in(&self, built_in: spirv::BuiltIn) -> impl Iterator<Item = Word> + '_ {
        self.targets
            .iter()
            .filter(move |(_, d)| d.built_in == Some(built_in as u32))
            .map(|(&id, _)| id)
    }

    pub fn dangling_count(&self) -> usize {
        self.dangling
    }
}

/// Debug name or an anomaly report for a declaration that lacks one.
pub(crate) fn require_name(
    table: &DecorationTable,
    inst: &Instruction<'_>,
    id: Word,
    diagnostics: &mut Diagnostics,
) -> Result<Option<String>, ReflectError> {
    let name = table.name(id).filter(|n| !n.is_empty());
    if name.is_none() {
        diagnostics.report(Warning::MissingDebugName {
            id,
            offset: inst.byte_offset(),
        })?;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::SpirvBuilder;
    use crate::error::ErrorKind;

    fn collect(words: &[Word], strict: bool) -> Result<DecorationTable, ReflectError> {
        let index = InstructionIndex::build(words)?;
        let mut diagnostics = Diagnostics::new(strict);
        DecorationTable::collect(&index, &mut diagnostics)
    }

    #[test]
    fn test_member_decorations_stay_on_member() {
        let mut b = SpirvBuilder::new();
        let float = b.type_float(32);
        let vec4 = b.type_vector(float, 4);
        let mat4 = b.type_matrix(vec4, 4);
        let block = b.type_struct(&[vec4, mat4]);
        b.decorate(block, Decoration::Block, &[]);
        b.member_decorate(block, 0, Decoration::Offset, &[0]);
        b.member_decorate(block, 1, Decoration::Offset, &[16]);
        b.member_decorate(block, 1, Decoration::MatrixStride, &[16]);
        b.member_decorate(block, 1, Decoration::ColMajor, &[]);
        b.member_name(block, 1, "transform");

        let table = collect(&b.build(), false).unwrap();
        let top = table.of(block);
        assert!(top.is_block());
        assert_eq!(top.offset, None);
        assert_eq!(top.matrix_stride, None);

        let member = table.of_member(block, 1);
        assert_eq!(member.offset, Some(16));
        assert_eq!(member.matrix_stride, Some(16));
        assert!(member.flags.contains(DecorationFlags::COLUMN_MAJOR));
        assert_eq!(table.member_name(block, 1).as_deref(), Some("transform"));
    }

    #[test]
    fn test_conflicting_binding() {
        let mut b = SpirvBuilder::new();
        let float = b.type_float(32);
        b.decorate(float, Decoration::Binding, &[0]);
        b.decorate(float, Decoration::Binding, &[1]);
        let err = collect(&b.build(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingDecoration);
        match err {
            ReflectError::ConflictingDecoration { id, decoration, .. } => {
                assert_eq!(id, float);
                assert_eq!(decoration, Decoration::Binding);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_repeated_identical_value_is_fine() {
        let mut b = SpirvBuilder::new();
        let float = b.type_float(32);
        b.decorate(float, Decoration::Location, &[2]);
        b.decorate(float, Decoration::Location, &[2]);
        let table = collect(&b.build(), false).unwrap();
        assert_eq!(table.of(float).location, Some(2));
    }

    #[test]
    fn test_row_and_col_major_conflict() {
        let mut b = SpirvBuilder::new();
        let float = b.type_float(32);
        let block = b.type_struct(&[float]);
        b.member_decorate(block, 0, Decoration::RowMajor, &[]);
        b.member_decorate(block, 0, Decoration::ColMajor, &[]);
        let err = collect(&b.build(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingDecoration);
    }

    #[test]
    fn test_dangling_decorations_are_counted() {
        let mut b = SpirvBuilder::new();
        let float = b.type_float(32);
        let missing = b.id();
        b.decorate(missing, Decoration::Binding, &[0]);
        // Member index past the end of a one-member struct
        let block = b.type_struct(&[float]);
        b.member_decorate(block, 3, Decoration::Offset, &[0]);
        let words = b.build();

        let index = InstructionIndex::build(&words).unwrap();
        let mut diagnostics = Diagnostics::new(false);
        let table = DecorationTable::collect(&index, &mut diagnostics).unwrap();
        assert_eq!(table.dangling_count(), 2);
        assert_eq!(diagnostics.into_warnings().len(), 2);

        let err = collect(&words, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Anomaly);
    }

    #[test]
    fn test_group_decorations_expand() {
        let mut b = SpirvBuilder::new();
        let group = b.decoration_group();
        b.decorate(group, Decoration::DescriptorSet, &[1]);
        b.decorate(group, Decoration::NonWritable, &[]);
        let float = b.type_float(32);
        let int = b.type_int(32, true);
        b.group_decorate(group, &[float, int]);

        let table = collect(&b.build(), false).unwrap();
        for id in [float, int] {
            let decorations = table.of(id);
            assert_eq!(decorations.descriptor_set, Some(1));
            assert!(decorations.flags.contains(DecorationFlags::NON_WRITABLE));
        }
        assert_eq!(table.dangling_count(), 0);
    }

    #[test]
    fn test_user_semantic_string() {
        let mut b = SpirvBuilder::new();
        let float = b.type_float(32);
        b.decorate_string(float, Decoration::UserSemantic, "TEXCOORD0");
        let table = collect(&b.build(), false).unwrap();
        assert_eq!(table.of(float).user_semantic.as_deref(), Some("TEXCOORD0"));
    }
}
