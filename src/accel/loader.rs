//! Tiered accelerator-module loader
//!
//! Resolves a module identifier to a ready, instantiated module through a
//! three-tier cascade: an in-memory identity cache, a persistent byte store,
//! and finally a network fetch. Compiled module objects are never persisted,
//! so every non-memory-hit path compiles, including a persistent-cache hit.
//!
//! Concurrent loads of the same id share one underlying fetch/compile via an
//! in-flight table; each caller's progress callback still receives the
//! shared events. Cache entries are keyed by `"{id}@{version}"`, so a
//! manifest version bump bypasses stale persisted bytes without a purge.
//!
//! There is no cancellation: a load either completes or fails, and an
//! abandoned call keeps running in the background, still populating the
//! caches on completion.

use crate::accel::manifest::{ManifestEntry, ModuleManifest};
use crate::accel::progress::{LoadPhase, LoadProgress, ProgressCallback};
use crate::accel::storage::{DiskStore, ModuleStore, NoopStore};
use crate::accel::toolchain::{InstantiatedModule, ModuleExports, ModuleInstance, ModuleToolchain};
use crate::accel::transport::{resolve_module_url, HttpTransport, ModuleTransport, ResponseBody};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::{debug, warn};

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for [`AcceleratorLoader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
  /// Namespace of the persistent byte cache. Safe to share across loader
  /// instances: writes are idempotent and reads never mutate.
  pub cache_name: String,
  /// Directory holding the persistent cache. `None` skips the persistent
  /// tier entirely; an unopenable directory degrades to the same.
  pub cache_dir: Option<PathBuf>,
  /// Ceiling for reported download percent; the headroom up to 100 is
  /// reserved for compilation.
  pub download_percent_ceiling: f32,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      cache_name: "accelrender-modules".to_string(),
      cache_dir: None,
      download_percent_ceiling: 95.0,
    }
  }
}

impl LoaderConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
    self.cache_name = cache_name.into();
    self
  }

  pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
    self.cache_dir = Some(cache_dir.into());
    self
  }

  pub fn with_download_percent_ceiling(mut self, ceiling: f32) -> Self {
    self.download_percent_ceiling = ceiling.clamp(0.0, 100.0);
    self
  }
}

/// A ready, instantiated accelerator module.
///
/// Cached by identity: repeated loads of the same id return the same
/// `Arc<LoadedModule>`, never a re-instantiated copy.
pub struct LoadedModule {
  id: String,
  instance: ModuleInstance,
  exports: Arc<dyn ModuleExports>,
}

impl LoadedModule {
  pub fn id(&self) -> &str {
    &self.id
  }

  /// Opaque instance handle produced by the toolchain.
  pub fn instance(&self) -> &ModuleInstance {
    &self.instance
  }

  /// Callable surface produced by the toolchain.
  pub fn exports(&self) -> &Arc<dyn ModuleExports> {
    &self.exports
  }
}

impl std::fmt::Debug for LoadedModule {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoadedModule")
      .field("id", &self.id)
      .field("exports", &self.exports.names())
      .finish_non_exhaustive()
  }
}

#[derive(Clone)]
enum SharedLoadResult {
  Success(Arc<LoadedModule>),
  Error(Error),
}

impl SharedLoadResult {
  fn as_result(&self) -> Result<Arc<LoadedModule>> {
    match self {
      Self::Success(module) => Ok(Arc::clone(module)),
      Self::Error(err) => Err(err.clone()),
    }
  }
}

/// Shared state of one de-duplicated load: the settled result plus the
/// progress observers of every caller that joined.
struct LoadInFlight {
  result: Mutex<Option<SharedLoadResult>>,
  cv: Condvar,
  observers: Mutex<Vec<ProgressCallback>>,
  last_event: Mutex<Option<LoadProgress>>,
}

impl LoadInFlight {
  fn new() -> Self {
    Self {
      result: Mutex::new(None),
      cv: Condvar::new(),
      observers: Mutex::new(Vec::new()),
      last_event: Mutex::new(None),
    }
  }

  /// Registers a caller's callback, replaying the latest event so a late
  /// joiner starts from the current phase.
  ///
  /// Lock order is observers → last_event, matching `emit`, so a replay
  /// cannot race a concurrent emission into missed or reordered events.
  fn subscribe(&self, callback: ProgressCallback) {
    if let Ok(mut observers) = self.observers.lock() {
      if let Ok(last) = self.last_event.lock() {
        if let Some(event) = last.as_ref() {
          callback(event);
        }
      }
      observers.push(callback);
    }
  }

  /// Fans an event out to every observer, clamping percent so it never
  /// decreases within this load.
  fn emit(&self, mut progress: LoadProgress) {
    if let Ok(observers) = self.observers.lock() {
      if let Ok(mut last) = self.last_event.lock() {
        if let Some(previous) = last.as_ref() {
          if progress.percent < previous.percent {
            progress.percent = previous.percent;
          }
        }
        *last = Some(progress.clone());
      }
      for callback in observers.iter() {
        callback(&progress);
      }
    }
  }

  /// Emits the terminal error phase, retaining the last reported counters.
  fn emit_error(&self, module_id: &str) {
    let snapshot = self.last_event.lock().ok().and_then(|last| last.clone());
    let (bytes_loaded, bytes_total, percent) = snapshot
      .map(|event| (event.bytes_loaded, event.bytes_total, event.percent))
      .unwrap_or((0, 0, 0.0));
    self.emit(LoadProgress {
      module_id: module_id.to_string(),
      phase: LoadPhase::Error,
      bytes_loaded,
      bytes_total,
      percent,
    });
  }

  fn set(&self, result: SharedLoadResult) {
    if let Ok(mut slot) = self.result.lock() {
      *slot = Some(result);
      self.cv.notify_all();
    }
  }

  fn wait(&self) -> Result<Arc<LoadedModule>> {
    let mut guard = self.result.lock().unwrap();
    while guard.is_none() {
      guard = self.cv.wait(guard).unwrap();
    }
    guard.as_ref().unwrap().as_result()
  }
}

/// Loader for on-demand accelerator modules.
///
/// # Example
///
/// ```rust,no_run
/// # use accelrender::accel::loader::AcceleratorLoader;
/// # use accelrender::accel::manifest::ModuleManifest;
/// # use accelrender::accel::toolchain::ModuleToolchain;
/// # use std::sync::Arc;
/// # fn demo(toolchain: Arc<dyn ModuleToolchain>) -> accelrender::Result<()> {
/// let manifest = ModuleManifest::from_json(
///     r#"{"baseUrl": "https://cdn.example/",
///         "modules": [{"id": "chart", "url": "chart.wasm", "version": "1.0.0"}]}"#,
/// )?;
/// let loader = AcceleratorLoader::new(manifest, toolchain);
/// let module = loader.load("chart", None)?;
/// assert!(loader.is_loaded(module.id()));
/// # Ok(())
/// # }
/// ```
pub struct AcceleratorLoader {
  manifest: Arc<ModuleManifest>,
  /// In-memory identity cache of instantiated modules, keyed by module id.
  memory: Arc<Mutex<HashMap<String, Arc<LoadedModule>>>>,
  /// In-flight loads keyed by module id to de-duplicate concurrent work.
  in_flight: Arc<Mutex<HashMap<String, Arc<LoadInFlight>>>>,
  storage: Arc<dyn ModuleStore>,
  transport: Option<Arc<dyn ModuleTransport>>,
  toolchain: Arc<dyn ModuleToolchain>,
  config: LoaderConfig,
}

impl AcceleratorLoader {
  /// Creates a loader with the default configuration: HTTP transport, no
  /// persistent tier.
  pub fn new(manifest: ModuleManifest, toolchain: Arc<dyn ModuleToolchain>) -> Self {
    Self::with_config(manifest, toolchain, LoaderConfig::default())
  }

  /// Creates a loader, selecting the storage strategy once from the
  /// configuration: a disk store when a cache directory is configured and
  /// openable, the no-op store otherwise.
  pub fn with_config(
    manifest: ModuleManifest,
    toolchain: Arc<dyn ModuleToolchain>,
    config: LoaderConfig,
  ) -> Self {
    let storage = detect_store(&config);
    Self {
      manifest: Arc::new(manifest),
      memory: Arc::new(Mutex::new(HashMap::new())),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      storage,
      transport: Some(Arc::new(HttpTransport::new())),
      toolchain,
      config,
    }
  }

  /// Replaces the persistent store.
  pub fn with_storage(mut self, storage: Arc<dyn ModuleStore>) -> Self {
    self.storage = storage;
    self
  }

  /// Replaces the network transport.
  pub fn with_transport(mut self, transport: Arc<dyn ModuleTransport>) -> Self {
    self.transport = Some(transport);
    self
  }

  /// Removes the network transport; loads then succeed only from the cache
  /// tiers.
  pub fn without_transport(mut self) -> Self {
    self.transport = None;
    self
  }

  pub fn manifest(&self) -> &ModuleManifest {
    &self.manifest
  }

  /// Whether the module is present in the in-memory cache. Never probes
  /// storage or network.
  pub fn is_loaded(&self, module_id: &str) -> bool {
    self.loaded_module(module_id).is_some()
  }

  /// The cached instantiated module, if the memory tier holds it.
  pub fn loaded_module(&self, module_id: &str) -> Option<Arc<LoadedModule>> {
    self
      .memory
      .lock()
      .ok()
      .and_then(|cache| cache.get(module_id).cloned())
  }

  /// Resolves a module to a ready instance through the tier cascade.
  ///
  /// A concurrent call for the same id joins the outstanding work instead
  /// of fetching again; its callback still observes the shared progress
  /// events. Failure is fatal only to the callers of this settled
  /// operation; a later call restarts the cascade.
  pub fn load(
    &self,
    module_id: &str,
    on_progress: Option<ProgressCallback>,
  ) -> Result<Arc<LoadedModule>> {
    let entry = match self.manifest.entry(module_id) {
      Some(entry) => entry.clone(),
      None => {
        return Err(Error::UnknownModule {
          module_id: module_id.to_string(),
        })
      }
    };

    if let Some(module) = self.loaded_module(module_id) {
      debug!("module '{module_id}' served from memory");
      if let Some(callback) = &on_progress {
        for event in memory_hit_events(&entry) {
          callback(&event);
        }
      }
      return Ok(module);
    }

    let (flight, is_owner) = self.join_inflight(module_id);
    if let Some(callback) = on_progress {
      flight.subscribe(callback);
    }
    if !is_owner {
      return flight.wait();
    }

    let result = self.run_cascade(&entry, &flight);
    if result.is_err() {
      flight.emit_error(module_id);
    }
    let shared = match &result {
      Ok(module) => SharedLoadResult::Success(Arc::clone(module)),
      Err(err) => SharedLoadResult::Error(err.clone()),
    };
    self.finish_inflight(module_id, &flight, shared);
    result
  }

  /// Fires a load for every id in parallel and waits for all of them,
  /// swallowing every individual failure.
  pub fn preload(&self, module_ids: &[&str]) {
    let mut handles = Vec::with_capacity(module_ids.len());
    for module_id in module_ids {
      let loader = self.clone();
      let module_id = module_id.to_string();
      handles.push(thread::spawn(move || {
        if let Err(err) = loader.load(&module_id, None) {
          debug!("preload of module '{module_id}' failed: {err}");
        }
      }));
    }
    for handle in handles {
      let _ = handle.join();
    }
  }

  /// Drops the memory cache and best-effort clears the persistent
  /// namespace. In-flight loads are not cancelled; the next load of any id
  /// repeats the full cascade.
  pub fn clear_cache(&self) {
    if let Ok(mut cache) = self.memory.lock() {
      cache.clear();
    }
    if let Err(err) = self.storage.clear() {
      warn!("clearing persistent module cache failed: {err}");
    }
  }

  fn run_cascade(
    &self,
    entry: &ManifestEntry,
    flight: &Arc<LoadInFlight>,
  ) -> Result<Arc<LoadedModule>> {
    let module_id = entry.id.as_str();
    flight.emit(LoadProgress {
      module_id: module_id.to_string(),
      phase: LoadPhase::CacheCheck,
      bytes_loaded: 0,
      bytes_total: entry.size,
      percent: 0.0,
    });

    // A racing owner may have settled between the caller's memory probe and
    // joining the in-flight table.
    if let Some(module) = self.loaded_module(module_id) {
      flight.emit(ready_event(entry));
      return Ok(module);
    }

    let key = entry.cache_key();
    match self.storage.get(&key) {
      Ok(Some(bytes)) => {
        debug!("module '{module_id}' bytes served from persistent cache");
        return self.compile_and_cache(entry, bytes, flight, true);
      }
      Ok(None) => {}
      Err(err) => warn!("persistent cache read for module '{module_id}' failed: {err}"),
    }

    let transport = match &self.transport {
      Some(transport) => Arc::clone(transport),
      None => {
        return Err(Error::NetworkUnavailable {
          module_id: module_id.to_string(),
        })
      }
    };

    let url = resolve_module_url(&self.manifest.base_url, &entry.url);
    let response = transport.fetch(&url)?;
    if !(200..300).contains(&response.status) {
      return Err(Error::HttpStatus {
        status: response.status,
        url,
      });
    }
    let bytes = self.read_body(entry, &url, response.body, flight)?;

    if let Err(err) = self.storage.put(&key, &bytes) {
      warn!("persisting bytes for module '{module_id}' failed: {err}");
    }
    self.compile_and_cache(entry, bytes, flight, false)
  }

  /// Drains a response body, reporting download progress scaled into
  /// `[0, ceiling]`. The headroom up to 100 belongs to compilation.
  fn read_body(
    &self,
    entry: &ManifestEntry,
    url: &str,
    body: ResponseBody,
    flight: &LoadInFlight,
  ) -> Result<Vec<u8>> {
    let ceiling = self.config.download_percent_ceiling;
    match body {
      ResponseBody::Buffered(bytes) => {
        let total = bytes.len() as u64;
        flight.emit(LoadProgress {
          module_id: entry.id.clone(),
          phase: LoadPhase::Downloading,
          bytes_loaded: total,
          bytes_total: total,
          percent: ceiling,
        });
        Ok(bytes)
      }
      ResponseBody::Streamed(mut reader) => {
        let declared = entry.size;
        let mut bytes: Vec<u8> = Vec::with_capacity(declared as usize);
        let mut chunk = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        loop {
          match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
              bytes.extend_from_slice(&chunk[..n]);
              let loaded = bytes.len() as u64;
              // The declared size is a hint; trust observed bytes past it.
              let total = declared.max(loaded);
              let fraction = if total > 0 {
                loaded as f32 / total as f32
              } else {
                0.0
              };
              flight.emit(LoadProgress {
                module_id: entry.id.clone(),
                phase: LoadPhase::Downloading,
                bytes_loaded: loaded,
                bytes_total: total,
                percent: (fraction * ceiling).min(ceiling),
              });
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
              return Err(Error::FetchFailed {
                url: url.to_string(),
                reason: err.to_string(),
              })
            }
          }
        }
        Ok(bytes)
      }
    }
  }

  fn compile_and_cache(
    &self,
    entry: &ManifestEntry,
    bytes: Vec<u8>,
    flight: &Arc<LoadInFlight>,
    from_storage: bool,
  ) -> Result<Arc<LoadedModule>> {
    let total = bytes.len() as u64;
    flight.emit(LoadProgress {
      module_id: entry.id.clone(),
      phase: LoadPhase::Compiling,
      bytes_loaded: total,
      bytes_total: total,
      percent: self.config.download_percent_ceiling,
    });

    let compiled = match self.toolchain.compile(&bytes) {
      Ok(compiled) => compiled,
      Err(err) => {
        if from_storage {
          // A corrupt persisted copy would fail every future load; drop it
          // so the next attempt falls through to the network.
          if let Err(remove_err) = self.storage.remove(&entry.cache_key()) {
            warn!("evicting corrupt cached module '{}' failed: {remove_err}", entry.id);
          }
        }
        return Err(Error::Compile {
          module_id: entry.id.clone(),
          reason: err.to_string(),
        });
      }
    };

    let InstantiatedModule { instance, exports } =
      self
        .toolchain
        .instantiate(compiled)
        .map_err(|err| Error::Compile {
          module_id: entry.id.clone(),
          reason: err.to_string(),
        })?;

    let module = Arc::new(LoadedModule {
      id: entry.id.clone(),
      instance,
      exports,
    });
    if let Ok(mut cache) = self.memory.lock() {
      cache.insert(entry.id.clone(), Arc::clone(&module));
    }
    flight.emit(LoadProgress {
      module_id: entry.id.clone(),
      phase: LoadPhase::Ready,
      bytes_loaded: total,
      bytes_total: total,
      percent: 100.0,
    });
    Ok(module)
  }

  fn join_inflight(&self, module_id: &str) -> (Arc<LoadInFlight>, bool) {
    let mut map = self.in_flight.lock().unwrap();
    if let Some(existing) = map.get(module_id) {
      return (Arc::clone(existing), false);
    }

    let flight = Arc::new(LoadInFlight::new());
    map.insert(module_id.to_string(), Arc::clone(&flight));
    (flight, true)
  }

  fn finish_inflight(
    &self,
    module_id: &str,
    flight: &Arc<LoadInFlight>,
    result: SharedLoadResult,
  ) {
    // Drop the table entry before waking waiters so a load that starts
    // after settlement always restarts the cache cascade.
    if let Ok(mut map) = self.in_flight.lock() {
      map.remove(module_id);
    }
    flight.set(result);
  }
}

impl Clone for AcceleratorLoader {
  fn clone(&self) -> Self {
    Self {
      manifest: Arc::clone(&self.manifest),
      memory: Arc::clone(&self.memory),
      in_flight: Arc::clone(&self.in_flight),
      storage: Arc::clone(&self.storage),
      transport: self.transport.clone(),
      toolchain: Arc::clone(&self.toolchain),
      config: self.config.clone(),
    }
  }
}

fn detect_store(config: &LoaderConfig) -> Arc<dyn ModuleStore> {
  match &config.cache_dir {
    Some(dir) => match DiskStore::open(dir, &config.cache_name) {
      Ok(store) => Arc::new(store),
      Err(err) => {
        warn!("persistent module cache unavailable, continuing without it: {err}");
        Arc::new(NoopStore)
      }
    },
    None => Arc::new(NoopStore),
  }
}

/// Phase sequence reported for a memory hit: `cache-check` straight to
/// `ready`.
fn memory_hit_events(entry: &ManifestEntry) -> [LoadProgress; 2] {
  [
    LoadProgress {
      module_id: entry.id.clone(),
      phase: LoadPhase::CacheCheck,
      bytes_loaded: 0,
      bytes_total: entry.size,
      percent: 0.0,
    },
    ready_event(entry),
  ]
}

fn ready_event(entry: &ManifestEntry) -> LoadProgress {
  LoadProgress {
    module_id: entry.id.clone(),
    phase: LoadPhase::Ready,
    bytes_loaded: entry.size,
    bytes_total: entry.size,
    percent: 100.0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_builders() {
    let config = LoaderConfig::new()
      .with_cache_name("session")
      .with_cache_dir("/tmp/mods")
      .with_download_percent_ceiling(150.0);
    assert_eq!(config.cache_name, "session");
    assert_eq!(config.cache_dir.as_deref(), Some(std::path::Path::new("/tmp/mods")));
    assert_eq!(config.download_percent_ceiling, 100.0);
  }

  #[test]
  fn detect_store_without_cache_dir_is_noop() {
    let store = detect_store(&LoaderConfig::default());
    assert_eq!(store.get("chart@1.0.0").unwrap(), None);
  }
}
