//! Reflection options
//!
//! Caller-supplied configuration for module construction.

/// How the module holds the caller's SPIR-V buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferOwnership {
    /// Copy the words; the module is independent of the caller's buffer.
    #[default]
    Copy,
    /// Borrow the words; the module cannot outlive the caller's buffer.
    Borrow,
}

/// What to do with a resource variable that has a `Binding` but no
/// `DescriptorSet` decoration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingSetPolicy {
    /// Place the binding in set 0 and mark it `set_defaulted`.
    #[default]
    DefaultToZero,
    /// Fail with `MissingBindingDecoration`.
    Reject,
}

/// Configuration for [`ShaderModule`](crate::ShaderModule) construction.
///
/// # Example
///
/// ```
/// use hlx_reflect::{BufferOwnership, ReflectOptions};
///
/// let options = ReflectOptions::default()
///     .with_ownership(BufferOwnership::Borrow)
///     .with_strict(true);
/// assert!(options.strict);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReflectOptions {
    pub ownership: BufferOwnership,
    /// Upgrade recoverable anomalies (dangling decorations, missing debug
    /// names, orphan execution modes) to hard failures.
    pub strict: bool,
    pub missing_set: MissingSetPolicy,
}

impl ReflectOptions {
    pub fn with_ownership(mut self, ownership: BufferOwnership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_missing_set(mut self, policy: MissingSetPolicy) -> Self {
        self.missing_set = policy;
        self
    }
}
