//! Toolchain seam: compiling and instantiating accelerator modules
//!
//! The loader treats module artifacts as opaque: a toolchain turns raw bytes
//! into a [`CompiledModule`], then a compiled module into an instance plus
//! its callable export surface. Compiled objects are never persisted (only
//! raw bytes are), so compilation runs on every non-memory-cache-hit path.
//!
//! Compile and instantiate failures are distinguished only by their message
//! text; the loader wraps both into the same compilation error kind.

use crate::error::ToolchainError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque compiled artifact, owned by the toolchain that produced it.
///
/// Consumed by value on instantiation; compiled modules are not cached.
pub struct CompiledModule {
  inner: Box<dyn Any + Send + Sync>,
}

impl CompiledModule {
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self {
      inner: Box::new(value),
    }
  }

  /// Recovers the concrete artifact; fails with `self` back if the type
  /// does not match, mirroring `Box::downcast`.
  pub fn downcast<T: Any>(self) -> std::result::Result<Box<T>, CompiledModule> {
    match self.inner.downcast::<T>() {
      Ok(value) => Ok(value),
      Err(inner) => Err(CompiledModule { inner }),
    }
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.inner.downcast_ref::<T>()
  }
}

impl fmt::Debug for CompiledModule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompiledModule").finish_non_exhaustive()
  }
}

/// Opaque handle to a live module instance.
#[derive(Clone)]
pub struct ModuleInstance {
  inner: Arc<dyn Any + Send + Sync>,
}

impl ModuleInstance {
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self {
      inner: Arc::new(value),
    }
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.inner.downcast_ref::<T>()
  }
}

impl fmt::Debug for ModuleInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ModuleInstance").finish_non_exhaustive()
  }
}

/// Callable surface of an instantiated module.
pub trait ModuleExports: Send + Sync {
  /// Names of the entry points this module exposes.
  fn names(&self) -> Vec<String>;

  /// Downcast support for toolchain-specific surfaces.
  fn as_any(&self) -> &(dyn Any + Send + Sync);
}

/// Result of instantiating a compiled module.
pub struct InstantiatedModule {
  pub instance: ModuleInstance,
  pub exports: Arc<dyn ModuleExports>,
}

/// Turns raw module bytes into live instances.
pub trait ModuleToolchain: Send + Sync {
  fn compile(&self, bytes: &[u8]) -> std::result::Result<CompiledModule, ToolchainError>;

  fn instantiate(
    &self,
    module: CompiledModule,
  ) -> std::result::Result<InstantiatedModule, ToolchainError>;
}

impl<T: ModuleToolchain + ?Sized> ModuleToolchain for Arc<T> {
  fn compile(&self, bytes: &[u8]) -> std::result::Result<CompiledModule, ToolchainError> {
    (**self).compile(bytes)
  }

  fn instantiate(
    &self,
    module: CompiledModule,
  ) -> std::result::Result<InstantiatedModule, ToolchainError> {
    (**self).instantiate(module)
  }
}

#[cfg(feature = "wasm-runtime")]
pub use wasm::WasmToolchain;

#[cfg(feature = "wasm-runtime")]
mod wasm {
  use super::{CompiledModule, InstantiatedModule, ModuleExports, ModuleInstance, ModuleToolchain};
  use crate::error::ToolchainError;
  use std::any::Any;
  use std::sync::{Arc, Mutex};
  use wasmtime::{Engine, Instance, Module, Store};

  /// Toolchain backed by wasmtime core modules.
  pub struct WasmToolchain {
    engine: Engine,
  }

  /// Store and instance pair kept behind a lock; wasmtime stores are not
  /// shareable without one.
  pub struct WasmInstanceState {
    pub store: Store<()>,
    pub instance: Instance,
  }

  struct WasmExports {
    names: Vec<String>,
  }

  impl ModuleExports for WasmExports {
    fn names(&self) -> Vec<String> {
      self.names.clone()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
      self
    }
  }

  impl WasmToolchain {
    pub fn new() -> Self {
      Self {
        engine: Engine::default(),
      }
    }
  }

  impl Default for WasmToolchain {
    fn default() -> Self {
      Self::new()
    }
  }

  impl ModuleToolchain for WasmToolchain {
    fn compile(&self, bytes: &[u8]) -> Result<CompiledModule, ToolchainError> {
      let module = Module::new(&self.engine, bytes)
        .map_err(|err| ToolchainError(format!("compile: {err:#}")))?;
      Ok(CompiledModule::new(module))
    }

    fn instantiate(&self, compiled: CompiledModule) -> Result<InstantiatedModule, ToolchainError> {
      let module = compiled
        .downcast::<Module>()
        .map_err(|_| ToolchainError("instantiate: artifact is not a wasmtime module".to_string()))?;
      let names: Vec<String> = module
        .exports()
        .map(|export| export.name().to_string())
        .collect();

      let mut store = Store::new(&self.engine, ());
      let instance = Instance::new(&mut store, &module, &[])
        .map_err(|err| ToolchainError(format!("instantiate: {err:#}")))?;

      Ok(InstantiatedModule {
        instance: ModuleInstance::new(Mutex::new(WasmInstanceState { store, instance })),
        exports: Arc::new(WasmExports { names }),
      })
    }
  }
}
