//! Network transport for fetching accelerator module bytes
//!
//! This is a trait-based abstraction so the loader stays agnostic about how
//! module bytes travel: the default [`HttpTransport`] speaks HTTP(S) and
//! serves `file://` URLs or bare paths from the filesystem, while tests and
//! embedders can substitute their own (offline mirrors, mocks, rate
//! limiters). A transport that can stream returns a [`ResponseBody::Streamed`]
//! body and the loader reports incremental download progress from it.

use crate::error::{Error, Result};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default User-Agent sent by [`HttpTransport`].
pub const DEFAULT_USER_AGENT: &str = "accelrender/0.1";

/// Result of fetching a module location.
pub struct TransportResponse {
  /// Response status; the loader treats anything outside `200..300` as a
  /// transport error naming the status.
  pub status: u16,
  pub body: ResponseBody,
}

impl std::fmt::Debug for TransportResponse {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TransportResponse")
      .field("status", &self.status)
      .field("body", &self.body)
      .finish()
  }
}

/// Body of a transport response.
pub enum ResponseBody {
  /// The whole payload, already in memory.
  Buffered(Vec<u8>),
  /// A streamable sequence of chunks; drives incremental download progress.
  Streamed(Box<dyn Read + Send>),
}

impl std::fmt::Debug for ResponseBody {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseBody::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
      ResponseBody::Streamed(_) => f.debug_tuple("Streamed").finish(),
    }
  }
}

/// Trait for fetching module bytes from a resolved URL.
///
/// Implementations must be `Send + Sync` to allow sharing across threads.
pub trait ModuleTransport: Send + Sync {
  fn fetch(&self, url: &str) -> Result<TransportResponse>;
}

impl<T: ModuleTransport + ?Sized> ModuleTransport for Arc<T> {
  fn fetch(&self, url: &str) -> Result<TransportResponse> {
    (**self).fetch(url)
  }
}

/// Resolves a manifest entry's relative location against the manifest base.
///
/// The base is normalized to a directory (trailing slash) before joining, so
/// `"https://cdn.example"` and `"https://cdn.example/"` behave identically.
/// Non-URL bases (bare directory paths) fall back to string concatenation.
pub fn resolve_module_url(base_url: &str, reference: &str) -> String {
  let mut base = base_url.to_string();
  if !base.ends_with('/') {
    base.push('/');
  }
  match Url::parse(&base) {
    Ok(parsed) => parsed
      .join(reference)
      .map(|joined| joined.to_string())
      .unwrap_or_else(|_| format!("{base}{reference}")),
    Err(_) => format!("{base}{reference}"),
  }
}

/// Default transport: HTTP(S) via a blocking agent with a global timeout,
/// plus `file://` URLs and bare filesystem paths for local module mirrors.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  timeout: Duration,
  user_agent: String,
  max_size: usize,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the global request timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Sets the User-Agent header.
  pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
    self.user_agent = user_agent.into();
    self
  }

  /// Sets the maximum accepted response size in bytes.
  pub fn with_max_size(mut self, max_size: usize) -> Self {
    self.max_size = max_size;
    self
  }

  fn fetch_http(&self, url: &str) -> Result<TransportResponse> {
    let config = ureq::Agent::config_builder()
      .timeout_global(Some(self.timeout))
      .http_status_as_error(false)
      .build();
    let agent: ureq::Agent = config.into();

    let mut response = agent
      .get(url)
      .header("User-Agent", &self.user_agent)
      .call()
      .map_err(|err| Error::FetchFailed {
        url: url.to_string(),
        reason: err.to_string(),
      })?;

    let status = response.status().as_u16();
    let bytes = response
      .body_mut()
      .with_config()
      .limit(self.max_size as u64)
      .read_to_vec()
      .map_err(|err| Error::FetchFailed {
        url: url.to_string(),
        reason: err.to_string(),
      })?;

    Ok(TransportResponse {
      status,
      body: ResponseBody::Buffered(bytes),
    })
  }

  fn fetch_file(&self, url: &str) -> Result<TransportResponse> {
    let path = url.strip_prefix("file://").unwrap_or(url);
    let bytes = std::fs::read(path).map_err(|err| Error::FetchFailed {
      url: url.to_string(),
      reason: err.to_string(),
    })?;
    Ok(TransportResponse {
      status: 200,
      body: ResponseBody::Buffered(bytes),
    })
  }
}

impl Default for HttpTransport {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(30),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      max_size: 64 * 1024 * 1024,
    }
  }
}

impl ModuleTransport for HttpTransport {
  fn fetch(&self, url: &str) -> Result<TransportResponse> {
    if url.starts_with("http://") || url.starts_with("https://") {
      self.fetch_http(url)
    } else {
      self.fetch_file(url)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn resolve_appends_missing_slash() {
    assert_eq!(
      resolve_module_url("https://cdn.example", "chart.wasm"),
      "https://cdn.example/chart.wasm"
    );
    assert_eq!(
      resolve_module_url("https://cdn.example/", "chart.wasm"),
      "https://cdn.example/chart.wasm"
    );
  }

  #[test]
  fn resolve_keeps_base_directory_segments() {
    assert_eq!(
      resolve_module_url("https://cdn.example/modules", "chart.wasm"),
      "https://cdn.example/modules/chart.wasm"
    );
  }

  #[test]
  fn resolve_falls_back_to_concatenation_for_bare_paths() {
    assert_eq!(
      resolve_module_url("/srv/modules", "chart.wasm"),
      "/srv/modules/chart.wasm"
    );
  }

  #[test]
  fn file_fetch_reads_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chart.wasm");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"\0asm-payload").unwrap();

    let transport = HttpTransport::new();
    let response = transport.fetch(path.to_str().unwrap()).unwrap();
    assert_eq!(response.status, 200);
    match response.body {
      ResponseBody::Buffered(bytes) => assert_eq!(bytes, b"\0asm-payload"),
      ResponseBody::Streamed(_) => panic!("expected buffered body"),
    }
  }

  #[test]
  fn missing_file_is_a_fetch_failure() {
    let transport = HttpTransport::new();
    let err = transport.fetch("/nonexistent/chart.wasm").unwrap_err();
    assert!(matches!(err, Error::FetchFailed { .. }));
  }
}
