//! Entry point assembler
//!
//! Builds one [`EntryPoint`] per `OpEntryPoint`: the interface list, the
//! execution modes and workgroup size, and the globals actually reached from
//! the entry function through the static call graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use spirv::{BuiltIn, ExecutionMode, ExecutionModel, Op, Word};

use super::constants::ConstantTable;
use super::decorations::DecorationTable;
use super::index::{Instruction, InstructionIndex};
use super::variables::GlobalVariables;
use crate::error::{Diagnostics, ReflectError, Warning};
use crate::interface::{Capability, EntryPoint, ExecutionModeInfo, LocalSize};

/// Ids in pointer position for the memory-touching instructions.
fn pointer_operands(inst: &Instruction<'_>) -> Vec<Word> {
    let operands = inst.operands();
    let pick = |positions: &[usize]| -> Vec<Word> {
        positions
            .iter()
            .filter_map(|&i| operands.get(i).copied())
            .collect()
    };
    let Some(op) = inst.op else {
        return Vec::new();
    };
    match op {
        Op::Load
        | Op::AccessChain
        | Op::InBoundsAccessChain
        | Op::PtrAccessChain
        | Op::InBoundsPtrAccessChain
        | Op::CopyObject
        | Op::ImageTexelPointer
        | Op::ArrayLength
        | Op::AtomicLoad
        | Op::AtomicExchange
        | Op::AtomicCompareExchange
        | Op::AtomicCompareExchangeWeak
        | Op::AtomicIIncrement
        | Op::AtomicIDecrement
        | Op::AtomicIAdd
        | Op::AtomicISub
        | Op::AtomicSMin
        | Op::AtomicUMin
        | Op::AtomicSMax
        | Op::AtomicUMax
        | Op::AtomicAnd
        | Op::AtomicOr
        | Op::AtomicXor
        | Op::AtomicFlagTestAndSet
        | Op::Bitcast
        | Op::CopyLogical
        | Op::GenericCastToPtr
        | Op::GenericCastToPtrExplicit
        | Op::PtrCastToGeneric
        | Op::ConvertPtrToU => pick(&[2]),
        Op::Store | Op::CopyMemory | Op::CopyMemorySized => pick(&[0, 1]),
        Op::AtomicStore | Op::AtomicFlagClear => pick(&[0]),
        Op::PtrEqual | Op::PtrNotEqual | Op::PtrDiff => pick(&[2, 3]),
        Op::Select => pick(&[3, 4]),
        Op::Phi => inst.operands_from(2).iter().step_by(2).copied().collect(),
        Op::ExtInst => inst.operands_from(4).to_vec(),
        Op::FunctionCall => inst.operands_from(3).to_vec(),
        _ => Vec::new(),
    }
}

fn is_compute_like(model: ExecutionModel) -> bool {
    matches!(
        model,
        ExecutionModel::GLCompute
            | ExecutionModel::Kernel
            | ExecutionModel::TaskNV
            | ExecutionModel::MeshNV
            | ExecutionModel::TaskEXT
            | ExecutionModel::MeshEXT
    )
}

/// A recursive component of the call graph and the first call closing it.
#[derive(Debug)]
struct Cycle {
    functions: BTreeSet<Word>,
    caller: Word,
    offset: usize,
}

/// Static call graph plus the globals each function touches directly.
#[derive(Debug, Default)]
struct CallGraph {
    graph: DiGraphMap<Word, ()>,
    accessed: HashMap<Word, BTreeSet<Word>>,
    cycles: Vec<Cycle>,
}

impl CallGraph {
    fn build(index: &InstructionIndex<'_>) -> Result<Self, ReflectError> {
        let mut graph = DiGraphMap::new();
        let mut accessed: HashMap<Word, BTreeSet<Word>> = HashMap::new();
        let mut call_sites: HashMap<(Word, Word), usize> = HashMap::new();

        for (function, range) in index.functions() {
            let function = *function;
            graph.add_node(function);
            let touched = accessed.entry(function).or_default();
            for inst in &index.instructions()[range.clone()] {
                if inst.op == Some(Op::FunctionCall) {
                    let callee = inst.operand(2)?;
                    if index.get(callee).and_then(|i| i.op) != Some(Op::Function) {
                        return Err(ReflectError::malformed(
                            inst.byte_offset(),
                            format!("call target %{} is not a function", callee),
                        ));
                    }
                    graph.add_edge(function, callee, ());
                    call_sites
                        .entry((function, callee))
                        .or_insert(inst.byte_offset());
                }
                touched.extend(
                    pointer_operands(inst)
                        .into_iter()
                        .filter(|&id| index.is_global_variable(id)),
                );
            }
        }

        let mut cycles = Vec::new();
        for component in tarjan_scc(&graph) {
            let Some(&first) = component.first() else {
                continue;
            };
            if component.len() == 1 && !graph.contains_edge(first, first) {
                continue;
            }
            let functions: BTreeSet<Word> = component.into_iter().collect();
            let closing = call_sites
                .iter()
                .filter(|((from, to), _)| functions.contains(from) && functions.contains(to))
                .map(|(&(from, _), &offset)| (offset, from))
                .min();
            let (offset, caller) = closing.unwrap_or((0, first));
            cycles.push(Cycle {
                functions,
                caller,
                offset,
            });
        }

        log::debug!(
            "call graph: {} functions, {} calls, {} cycles",
            graph.node_count(),
            graph.edge_count(),
            cycles.len()
        );
        Ok(CallGraph {
            graph,
            accessed,
            cycles,
        })
    }

    /// Functions reachable from `entry`.
    ///
    /// # Errors
    ///
    /// `RecursiveCallGraph` when a reachable function is part of a cycle.
    fn reachable_from(&self, entry: Word) -> Result<BTreeSet<Word>, ReflectError> {
        let mut reachable = BTreeSet::new();
        if !self.graph.contains_node(entry) {
            return Ok(reachable);
        }
        let mut dfs = Dfs::new(&self.graph, entry);
        while let Some(function) = dfs.next(&self.graph) {
            reachable.insert(function);
        }
        let cycle = self
            .cycles
            .iter()
            .filter(|c| !c.functions.is_disjoint(&reachable))
            .min_by_key(|c| c.offset);
        if let Some(cycle) = cycle {
            return Err(ReflectError::RecursiveCallGraph {
                function: cycle.caller,
                offset: cycle.offset,
            });
        }
        Ok(reachable)
    }

    fn accessed_by<'g>(
        &'g self,
        functions: &'g BTreeSet<Word>,
    ) -> impl Iterator<Item = Word> + 'g {
        functions
            .iter()
            .filter_map(|f| self.accessed.get(f))
            .flat_map(|globals| globals.iter().copied())
    }
}

type ModesByTarget = BTreeMap<Word, Vec<(ExecutionModeInfo, usize)>>;

pub(crate) struct EntryPointAssembler<'a, 'm> {
    index: &'a InstructionIndex<'m>,
    decorations: &'a DecorationTable,
    constants: &'a ConstantTable,
    globals: &'a GlobalVariables,
    capabilities: &'a [Capability],
}

impl<'a, 'm> EntryPointAssembler<'a, 'm> {
    pub fn new(
        index: &'a InstructionIndex<'m>,
        decorations: &'a DecorationTable,
        constants: &'a ConstantTable,
        globals: &'a GlobalVariables,
        capabilities: &'a [Capability],
    ) -> Self {
        EntryPointAssembler {
            index,
            decorations,
            constants,
            globals,
            capabilities,
        }
    }

    pub fn assemble(&self, diagnostics: &mut Diagnostics) -> Result<Vec<EntryPoint>, ReflectError> {
        let calls = CallGraph::build(self.index)?;
        let modes = self.execution_modes()?;
        let workgroup_size = self.workgroup_size()?;

        let entry_points = self
            .index
            .with_op(Op::EntryPoint)
            .map(|inst| self.entry_point(inst, &calls, &modes, workgroup_size))
            .collect::<Result<Vec<_>, _>>()?;

        for (&target, list) in &modes {
            if entry_points.iter().any(|ep| ep.function_id == target) {
                continue;
            }
            for &(_, offset) in list {
                diagnostics.report(Warning::OrphanExecutionMode { target, offset })?;
            }
        }

        log::debug!("assembled {} entry points", entry_points.len());
        Ok(entry_points)
    }

    fn execution_modes(&self) -> Result<ModesByTarget, ReflectError> {
        let mut modes = ModesByTarget::new();
        for inst in self.index.instructions() {
            let operands_are_ids = match inst.op {
                Some(Op::ExecutionMode) => false,
                Some(Op::ExecutionModeId) => true,
                _ => continue,
            };
            let target = inst.operand(0)?;
            let info = ExecutionModeInfo {
                mode: inst.operand(1)?,
                operands: inst.operands_from(2).to_vec(),
                operands_are_ids,
            };
            modes
                .entry(target)
                .or_default()
                .push((info, inst.byte_offset()));
        }
        Ok(modes)
    }

    /// A constant decorated `BuiltIn WorkgroupSize`, which overrides the
    /// execution modes of every compute-like entry point.
    fn workgroup_size(&self) -> Result<Option<LocalSize>, ReflectError> {
        let Some(constant) = self
            .decorations
            .with_built_in(BuiltIn::WorkgroupSize)
            .filter_map(|id| self.constants.get(id))
            .min_by_key(|c| c.id)
        else {
            return Ok(None);
        };
        let parts = self
            .constants
            .composite_u32(constant.id, self.decorations, constant.offset)?;
        match *parts.as_slice() {
            [x, y, z] => Ok(Some(LocalSize { x, y, z })),
            _ => Err(ReflectError::malformed(
                constant.offset,
                format!(
                    "WorkgroupSize constant %{} has {} components",
                    constant.id,
                    parts.len()
                ),
            )),
        }
    }

    fn local_size(
        &self,
        modes: &[(ExecutionModeInfo, usize)],
    ) -> Result<Option<LocalSize>, ReflectError> {
        for (mode, offset) in modes {
            let wrong_arity = || {
                ReflectError::malformed(
                    *offset,
                    format!("{:?} needs 3 operands", mode.execution_mode()),
                )
            };
            match mode.execution_mode() {
                Some(ExecutionMode::LocalSize) => {
                    let &[x, y, z] = mode.operands.as_slice() else {
                        return Err(wrong_arity());
                    };
                    return Ok(Some(LocalSize::from_literals(x, y, z)));
                }
                Some(ExecutionMode::LocalSizeId) => {
                    let &[x, y, z] = mode.operands.as_slice() else {
                        return Err(wrong_arity());
                    };
                    let resolve = |id| self.constants.scalar_u32(id, self.decorations, *offset);
                    return Ok(Some(LocalSize {
                        x: resolve(x)?,
                        y: resolve(y)?,
                        z: resolve(z)?,
                    }));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn entry_point(
        &self,
        inst: &Instruction<'m>,
        calls: &CallGraph,
        modes: &ModesByTarget,
        workgroup_size: Option<LocalSize>,
    ) -> Result<EntryPoint, ReflectError> {
        let offset = inst.byte_offset();
        let raw_model = inst.operand(0)?;
        let execution_model = ExecutionModel::from_u32(raw_model).ok_or_else(|| {
            ReflectError::malformed(offset, format!("execution model {}", raw_model))
        })?;
        let function_id = inst.operand(1)?;
        if self.index.get(function_id).and_then(|i| i.op) != Some(Op::Function) {
            return Err(ReflectError::malformed(
                offset,
                format!("entry point function %{} is not an OpFunction", function_id),
            ));
        }
        let (name, next) = inst.string(2)?;

        let declared_interface = inst.operands_from(next).to_vec();
        if let Some(&bad) = declared_interface
            .iter()
            .find(|&&id| !self.index.is_global_variable(id))
        {
            return Err(ReflectError::malformed(
                offset,
                format!("interface id %{} of '{}' is not a global variable", bad, name),
            ));
        }
        let mut interface_variables: Vec<Word> = Vec::new();
        for &id in &declared_interface {
            let is_stage_io = self
                .globals
                .interface_variables
                .iter()
                .any(|v| v.variable_id == id);
            if is_stage_io && !interface_variables.contains(&id) {
                interface_variables.push(id);
            }
        }

        let reachable = calls.reachable_from(function_id)?;
        let accessed: BTreeSet<Word> = calls.accessed_by(&reachable).collect();

        let mut descriptor_slots: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for binding in self.globals.bindings() {
            if accessed.contains(&binding.variable_id) {
                descriptor_slots
                    .entry(binding.set)
                    .or_default()
                    .push(binding.binding);
            }
        }
        let push_constants = self
            .globals
            .push_constants
            .iter()
            .filter(|b| accessed.contains(&b.variable_id))
            .map(|b| b.variable_id)
            .collect();

        let own_modes = modes.get(&function_id).map(Vec::as_slice).unwrap_or(&[]);
        let local_size = match workgroup_size {
            Some(size) if is_compute_like(execution_model) => Some(size),
            _ => self.local_size(own_modes)?,
        };
        let first_operand = |wanted: ExecutionMode| {
            own_modes
                .iter()
                .find(|(m, _)| m.execution_mode() == Some(wanted))
                .and_then(|(m, _)| m.operands.first().copied())
        };

        log::debug!(
            "entry point '{}' ({:?}): {} reachable functions, {} accessed globals",
            name,
            execution_model,
            reachable.len(),
            accessed.len()
        );

        Ok(EntryPoint {
            invocations: first_operand(ExecutionMode::Invocations),
            output_vertices: first_operand(ExecutionMode::OutputVertices),
            name,
            execution_model,
            function_id,
            interface_variables,
            declared_interface,
            descriptor_slots,
            push_constants,
            accessed_variables: accessed.into_iter().collect(),
            local_size,
            execution_modes: own_modes.iter().map(|(m, _)| m.clone()).collect(),
            capabilities: self.capabilities.to_vec(),
            offset,
        })
    }
}
