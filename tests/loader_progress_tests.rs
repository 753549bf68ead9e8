use accelrender::accel::loader::AcceleratorLoader;
use accelrender::accel::manifest::{ManifestEntry, ModuleManifest};
use accelrender::accel::progress::{LoadPhase, LoadProgress};
use accelrender::accel::toolchain::{
  CompiledModule, InstantiatedModule, ModuleExports, ModuleInstance, ModuleToolchain,
};
use accelrender::accel::transport::{ModuleTransport, ResponseBody, TransportResponse};
use accelrender::{ProgressCallback, Result, ToolchainError};
use std::any::Any;
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct StaticExports;

impl ModuleExports for StaticExports {
  fn names(&self) -> Vec<String> {
    vec!["render".to_string()]
  }

  fn as_any(&self) -> &(dyn Any + Send + Sync) {
    self
  }
}

struct ByteToolchain;

impl ModuleToolchain for ByteToolchain {
  fn compile(&self, bytes: &[u8]) -> std::result::Result<CompiledModule, ToolchainError> {
    if !bytes.starts_with(b"\0asm") {
      return Err(ToolchainError("missing wasm magic header".to_string()));
    }
    Ok(CompiledModule::new(bytes.to_vec()))
  }

  fn instantiate(
    &self,
    module: CompiledModule,
  ) -> std::result::Result<InstantiatedModule, ToolchainError> {
    let bytes = module
      .downcast::<Vec<u8>>()
      .map_err(|_| ToolchainError("unexpected compiled artifact".to_string()))?;
    Ok(InstantiatedModule {
      instance: ModuleInstance::new(*bytes),
      exports: Arc::new(StaticExports),
    })
  }
}

/// Yields the payload in fixed-size chunks with a pause between reads, so
/// the loader observes a genuine byte stream.
struct ChunkReader {
  payload: Vec<u8>,
  offset: usize,
  chunk: usize,
}

impl Read for ChunkReader {
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    if self.offset >= self.payload.len() {
      return Ok(0);
    }
    let end = (self.offset + self.chunk).min(self.payload.len());
    let n = (end - self.offset).min(buf.len());
    buf[..n].copy_from_slice(&self.payload[self.offset..self.offset + n]);
    self.offset += n;
    Ok(n)
  }
}

struct StreamingTransport {
  payload: Vec<u8>,
  chunk: usize,
}

impl ModuleTransport for StreamingTransport {
  fn fetch(&self, _url: &str) -> Result<TransportResponse> {
    Ok(TransportResponse {
      status: 200,
      body: ResponseBody::Streamed(Box::new(ChunkReader {
        payload: self.payload.clone(),
        offset: 0,
        chunk: self.chunk,
      })),
    })
  }
}

/// Blocks inside fetch until released, so a second caller reliably joins
/// the in-flight load.
struct GatedTransport {
  entered: AtomicBool,
  release: AtomicBool,
  count: AtomicUsize,
  bytes: Vec<u8>,
}

impl GatedTransport {
  fn new(bytes: Vec<u8>) -> Self {
    Self {
      entered: AtomicBool::new(false),
      release: AtomicBool::new(false),
      count: AtomicUsize::new(0),
      bytes,
    }
  }
}

impl ModuleTransport for GatedTransport {
  fn fetch(&self, _url: &str) -> Result<TransportResponse> {
    self.count.fetch_add(1, Ordering::SeqCst);
    self.entered.store(true, Ordering::SeqCst);
    while !self.release.load(Ordering::SeqCst) {
      thread::sleep(Duration::from_millis(1));
    }
    Ok(TransportResponse {
      status: 200,
      body: ResponseBody::Buffered(self.bytes.clone()),
    })
  }
}

struct BrokenBytesTransport;

impl ModuleTransport for BrokenBytesTransport {
  fn fetch(&self, _url: &str) -> Result<TransportResponse> {
    Ok(TransportResponse {
      status: 200,
      body: ResponseBody::Buffered(b"garbage".to_vec()),
    })
  }
}

fn streamed_wasm_bytes(len: usize) -> Vec<u8> {
  let mut bytes = b"\0asm".to_vec();
  bytes.resize(len, 0xab);
  bytes
}

fn chart_manifest(declared_size: u64) -> ModuleManifest {
  ModuleManifest::new("https://cdn.example/").with_module(ManifestEntry {
    id: "chart".to_string(),
    url: "chart.wasm".to_string(),
    size: declared_size,
    capabilities: BTreeSet::new(),
    version: "1.0.0".to_string(),
  })
}

fn recording_callback() -> (Arc<Mutex<Vec<LoadProgress>>>, ProgressCallback) {
  let events: Arc<Mutex<Vec<LoadProgress>>> = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&events);
  let callback: ProgressCallback =
    Box::new(move |progress| sink.lock().unwrap().push(progress.clone()));
  (events, callback)
}

fn assert_percent_monotonic(events: &[LoadProgress]) {
  for pair in events.windows(2) {
    assert!(
      pair[1].percent >= pair[0].percent,
      "percent regressed: {} -> {} ({} -> {})",
      pair[0].percent,
      pair[1].percent,
      pair[0].phase,
      pair[1].phase,
    );
  }
}

#[test]
fn streamed_download_reports_incremental_capped_progress() {
  let payload = streamed_wasm_bytes(4096);
  let transport = Arc::new(StreamingTransport {
    payload: payload.clone(),
    chunk: 1024,
  });
  let loader = AcceleratorLoader::new(chart_manifest(4096), Arc::new(ByteToolchain))
    .with_transport(Arc::clone(&transport) as Arc<dyn ModuleTransport>);

  let (events, callback) = recording_callback();
  loader.load("chart", Some(callback)).expect("streamed load");

  let events = events.lock().unwrap();
  assert_percent_monotonic(&events);

  let downloads: Vec<&LoadProgress> = events
    .iter()
    .filter(|event| event.phase == LoadPhase::Downloading)
    .collect();
  assert!(downloads.len() >= 4, "one event per streamed chunk");
  for pair in downloads.windows(2) {
    assert!(pair[1].bytes_loaded > pair[0].bytes_loaded);
  }
  for event in &downloads {
    assert_eq!(event.bytes_total, 4096);
    assert!(
      event.percent < 100.0,
      "download progress must leave headroom for compilation"
    );
  }
  assert_eq!(downloads.last().unwrap().bytes_loaded, 4096);

  let last = events.last().unwrap();
  assert_eq!(last.phase, LoadPhase::Ready);
  assert_eq!(last.percent, 100.0);
}

#[test]
fn stream_longer_than_declared_size_grows_the_total() {
  let payload = streamed_wasm_bytes(3000);
  let transport = Arc::new(StreamingTransport {
    payload,
    chunk: 1000,
  });
  // The manifest understates the module size.
  let loader = AcceleratorLoader::new(chart_manifest(1000), Arc::new(ByteToolchain))
    .with_transport(Arc::clone(&transport) as Arc<dyn ModuleTransport>);

  let (events, callback) = recording_callback();
  loader.load("chart", Some(callback)).expect("streamed load");

  let events = events.lock().unwrap();
  assert_percent_monotonic(&events);
  let last_download = events
    .iter()
    .filter(|event| event.phase == LoadPhase::Downloading)
    .next_back()
    .unwrap();
  assert_eq!(last_download.bytes_loaded, 3000);
  assert_eq!(last_download.bytes_total, 3000);
}

#[test]
fn buffered_download_reports_one_capped_event() {
  let buffered = Arc::new(GatedTransport::new(streamed_wasm_bytes(64)));
  buffered.release.store(true, Ordering::SeqCst);
  let loader = AcceleratorLoader::new(chart_manifest(64), Arc::new(ByteToolchain))
    .with_transport(Arc::clone(&buffered) as Arc<dyn ModuleTransport>);

  let (events, callback) = recording_callback();
  loader.load("chart", Some(callback)).expect("buffered load");

  let events = events.lock().unwrap();
  let downloads: Vec<&LoadProgress> = events
    .iter()
    .filter(|event| event.phase == LoadPhase::Downloading)
    .collect();
  assert_eq!(downloads.len(), 1);
  assert_eq!(downloads[0].bytes_loaded, 64);
  assert!(downloads[0].percent < 100.0);
}

#[test]
fn follower_subscribes_to_shared_progress_events() {
  let transport = Arc::new(GatedTransport::new(streamed_wasm_bytes(64)));
  let loader = Arc::new(
    AcceleratorLoader::new(chart_manifest(64), Arc::new(ByteToolchain))
      .with_transport(Arc::clone(&transport) as Arc<dyn ModuleTransport>),
  );

  let (owner_events, owner_callback) = recording_callback();
  let owner = {
    let loader = Arc::clone(&loader);
    thread::spawn(move || loader.load("chart", Some(owner_callback)))
  };

  // Wait for the owner to be mid-download before the follower joins.
  while !transport.entered.load(Ordering::SeqCst) {
    thread::sleep(Duration::from_millis(1));
  }

  let (follower_events, follower_callback) = recording_callback();
  let follower = {
    let loader = Arc::clone(&loader);
    thread::spawn(move || loader.load("chart", Some(follower_callback)))
  };

  thread::sleep(Duration::from_millis(10));
  transport.release.store(true, Ordering::SeqCst);

  let owner_module = owner.join().expect("owner join").expect("owner load");
  let follower_module = follower.join().expect("follower join").expect("follower load");
  assert!(Arc::ptr_eq(&owner_module, &follower_module));
  assert_eq!(transport.count.load(Ordering::SeqCst), 1);

  let owner_events = owner_events.lock().unwrap();
  assert_eq!(owner_events.last().unwrap().phase, LoadPhase::Ready);

  // Whether the follower joined the in-flight load or hit the freshly
  // settled memory cache, it must have observed events ending in ready.
  let follower_events = follower_events.lock().unwrap();
  assert!(!follower_events.is_empty());
  assert_eq!(follower_events.last().unwrap().phase, LoadPhase::Ready);
  assert_percent_monotonic(&follower_events);
}

#[test]
fn memory_hit_reports_cache_check_then_ready() {
  let transport = Arc::new(GatedTransport::new(streamed_wasm_bytes(64)));
  transport.release.store(true, Ordering::SeqCst);
  let loader = AcceleratorLoader::new(chart_manifest(64), Arc::new(ByteToolchain))
    .with_transport(Arc::clone(&transport) as Arc<dyn ModuleTransport>);

  loader.load("chart", None).expect("cold load");

  let (events, callback) = recording_callback();
  loader.load("chart", Some(callback)).expect("memory hit");
  let events = events.lock().unwrap();
  let phases: Vec<LoadPhase> = events.iter().map(|event| event.phase).collect();
  assert_eq!(phases, vec![LoadPhase::CacheCheck, LoadPhase::Ready]);
  assert_eq!(events[0].percent, 0.0);
  assert_eq!(events[1].percent, 100.0);
}

#[test]
fn failed_load_ends_with_error_phase() {
  let loader = AcceleratorLoader::new(chart_manifest(64), Arc::new(ByteToolchain))
    .with_transport(Arc::new(BrokenBytesTransport) as Arc<dyn ModuleTransport>);

  let (events, callback) = recording_callback();
  loader.load("chart", Some(callback)).expect_err("compile failure");

  let events = events.lock().unwrap();
  assert_percent_monotonic(&events);
  let last = events.last().unwrap();
  assert_eq!(last.phase, LoadPhase::Error);
  assert!(last.percent < 100.0);
}
