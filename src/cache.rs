//! Content-addressed reflection cache
//!
//! Reflecting the same bytes twice yields the same module, so hosts that
//! load shaders repeatedly can key the result on a SHA-256 of the input.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::ReflectError;
use crate::options::{BufferOwnership, ReflectOptions};
use crate::shader::ShaderModule;

fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();

    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Shader id: lowercase hex SHA-256 of the SPIR-V bytes.
pub fn compute_shader_id(spirv_bytes: &[u8]) -> String {
    sha256_hash(spirv_bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Reflected modules keyed by shader id.
///
/// Cached modules own their words, so they outlive the buffers they were
/// loaded from.
#[derive(Debug, Default)]
pub struct ReflectionCache {
    options: ReflectOptions,
    modules: HashMap<String, Arc<ShaderModule<'static>>>,
}

impl ReflectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that reflects with `options`. Ownership is always forced to
    /// [`BufferOwnership::Copy`].
    pub fn with_options(options: ReflectOptions) -> Self {
        ReflectionCache {
            options: options.with_ownership(BufferOwnership::Copy),
            modules: HashMap::new(),
        }
    }

    /// Reflect `spirv_bytes`, or return the cached module for identical
    /// bytes.
    ///
    /// # Returns
    ///
    /// The shader id together with the shared module.
    ///
    /// # Errors
    ///
    /// Any [`ReflectError`] from parsing; failures are not cached.
    pub fn load(
        &mut self,
        spirv_bytes: &[u8],
    ) -> Result<(String, Arc<ShaderModule<'static>>), ReflectError> {
        let shader_id = compute_shader_id(spirv_bytes);

        if let Some(module) = self.modules.get(&shader_id) {
            log::debug!("Reflection cache HIT: {}", shader_id);
            return Ok((shader_id, Arc::clone(module)));
        }

        log::debug!("Reflection cache MISS: {} (parsing)", shader_id);
        let module = ShaderModule::from_bytes_with_options(spirv_bytes, &self.options)?;
        let module = Arc::new(module.into_owned());
        self.modules.insert(shader_id.clone(), Arc::clone(&module));

        log::info!(
            "Shader reflected: {} (size={}, entry_points={}, cache_size={})",
            shader_id,
            spirv_bytes.len(),
            module.entry_points().len(),
            self.modules.len()
        );
        Ok((shader_id, module))
    }

    pub fn get(&self, shader_id: &str) -> Option<Arc<ShaderModule<'static>>> {
        self.modules.get(shader_id).cloned()
    }

    pub fn is_cached(&self, shader_id: &str) -> bool {
        self.modules.contains_key(shader_id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Drop every cached module.
    pub fn clear(&mut self) {
        log::info!("Clearing reflection cache ({} entries)", self.modules.len());
        for (id, module) in self.modules.drain() {
            log::debug!("Releasing cached module: {}", id);
            if let Ok(module) = Arc::try_unwrap(module) {
                module.destroy();
            }
        }
    }
}
