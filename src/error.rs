//! Reflection errors and warnings
//!
//! Every hard failure carries the byte offset of the first offending
//! instruction and, where one exists, the result id it concerns. Recoverable
//! anomalies are collected as [`Warning`]s on the finished module unless
//! strict mode turns them into [`ReflectError::Anomaly`].

use spirv::Word;

/// Hard failure while building a [`ShaderModule`](crate::ShaderModule).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ReflectError {
    #[error("malformed input at byte {offset}: {reason}")]
    MalformedInput { offset: usize, reason: String },

    #[error("id %{id} referenced at byte {offset} is not a type")]
    UnresolvedTypeReference { id: Word, offset: usize },

    #[error("type %{id} at byte {offset} uses unsupported opcode {opcode}")]
    UnsupportedType { id: Word, opcode: u16, offset: usize },

    #[error("conflicting {decoration:?} on %{id}{}: {detail}", member_suffix(.member))]
    ConflictingDecoration {
        id: Word,
        member: Option<u32>,
        decoration: spirv::Decoration,
        detail: String,
        offset: usize,
    },

    #[error("resource variable %{id} at byte {offset} has no {decoration:?} decoration")]
    MissingBindingDecoration {
        id: Word,
        decoration: spirv::Decoration,
        offset: usize,
    },

    #[error("function %{function} at byte {offset} is part of a recursive call cycle")]
    RecursiveCallGraph { function: Word, offset: usize },

    #[error("value of %{id} depends on specialization constant {spec_id:?}")]
    SpecializationDependentValue { id: Word, spec_id: Option<u32> },

    #[error("strict mode: {0}")]
    Anomaly(Warning),
}

fn member_suffix(member: &Option<u32>) -> String {
    match member {
        Some(index) => format!(" member {}", index),
        None => String::new(),
    }
}

/// Fieldless mirror of [`ReflectError`] for matching on the failure kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedInput,
    UnresolvedTypeReference,
    UnsupportedType,
    ConflictingDecoration,
    MissingBindingDecoration,
    RecursiveCallGraph,
    SpecializationDependentValue,
    Anomaly,
}

impl ReflectError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        ReflectError::MalformedInput {
            offset,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReflectError::MalformedInput { .. } => ErrorKind::MalformedInput,
            ReflectError::UnresolvedTypeReference { .. } => ErrorKind::UnresolvedTypeReference,
            ReflectError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            ReflectError::ConflictingDecoration { .. } => ErrorKind::ConflictingDecoration,
            ReflectError::MissingBindingDecoration { .. } => ErrorKind::MissingBindingDecoration,
            ReflectError::RecursiveCallGraph { .. } => ErrorKind::RecursiveCallGraph,
            ReflectError::SpecializationDependentValue { .. } => {
                ErrorKind::SpecializationDependentValue
            }
            ReflectError::Anomaly(_) => ErrorKind::Anomaly,
        }
    }

    /// Byte offset of the offending instruction, if the failure has one.
    pub fn offset(&self) -> Option<usize> {
        match *self {
            ReflectError::MalformedInput { offset, .. }
            | ReflectError::UnresolvedTypeReference { offset, .. }
            | ReflectError::UnsupportedType { offset, .. }
            | ReflectError::ConflictingDecoration { offset, .. }
            | ReflectError::MissingBindingDecoration { offset, .. }
            | ReflectError::RecursiveCallGraph { offset, .. } => Some(offset),
            ReflectError::SpecializationDependentValue { .. } => None,
            ReflectError::Anomaly(ref warning) => warning.offset(),
        }
    }
}

/// Anomaly that does not prevent a best-effort reflection result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Warning {
    #[error("decoration at byte {offset} has no valid target %{target}{}", member_suffix(.member))]
    DanglingDecoration {
        target: Word,
        member: Option<u32>,
        offset: usize,
    },

    #[error("%{id} declared at byte {offset} has no debug name")]
    MissingDebugName { id: Word, offset: usize },

    #[error("execution mode at byte {offset} targets %{target}, which is not an entry point")]
    OrphanExecutionMode { target: Word, offset: usize },

    #[error("module declares {} push constant blocks: {variables:?}", .variables.len())]
    MultiplePushConstantBlocks { variables: Vec<Word> },
}

impl Warning {
    /// Whether strict mode upgrades this warning into a hard failure.
    pub fn is_recoverable_anomaly(&self) -> bool {
        !matches!(self, Warning::MultiplePushConstantBlocks { .. })
    }

    pub fn offset(&self) -> Option<usize> {
        match *self {
            Warning::DanglingDecoration { offset, .. }
            | Warning::MissingDebugName { offset, .. }
            | Warning::OrphanExecutionMode { offset, .. } => Some(offset),
            Warning::MultiplePushConstantBlocks { .. } => None,
        }
    }
}

/// Collects warnings during construction, failing early in strict mode.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    strict: bool,
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub(crate) fn new(strict: bool) -> Self {
        Diagnostics {
            strict,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn report(&mut self, warning: Warning) -> Result<(), ReflectError> {
        if self.strict && warning.is_recoverable_anomaly() {
            return Err(ReflectError::Anomaly(warning));
        }
        log::warn!("{}", warning);
        self.warnings.push(warning);
        Ok(())
    }

    pub(crate) fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}
