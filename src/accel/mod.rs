//! On-demand accelerator module loading
//!
//! Everything needed to turn a deferred render-plan entry into a ready
//! renderer: the static module manifest, the tiered loader
//! (memory → persistent storage → network fetch-and-compile), the pluggable
//! storage/transport/toolchain seams, and the progress events surfaced to
//! loading UIs.

pub mod loader;
pub mod manifest;
pub mod progress;
pub mod storage;
pub mod toolchain;
pub mod transport;

pub use loader::{AcceleratorLoader, LoadedModule, LoaderConfig};
pub use manifest::{ManifestEntry, ModuleManifest};
pub use progress::{LoadPhase, LoadProgress, ProgressCallback};
pub use storage::{DiskStore, ModuleStore, NoopStore};
pub use toolchain::{
  CompiledModule, InstantiatedModule, ModuleExports, ModuleInstance, ModuleToolchain,
};
#[cfg(feature = "wasm-runtime")]
pub use toolchain::WasmToolchain;
pub use transport::{
  resolve_module_url, HttpTransport, ModuleTransport, ResponseBody, TransportResponse,
};
