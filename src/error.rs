//! Error types for the capability and accelerator subsystems
//!
//! The capability registry never fails; the worst routing outcome is an
//! `unsupported` verdict. Every error in this module belongs to the
//! accelerator-module loader and is fatal only to the `load` call that
//! produced it:
//! - Configuration errors (unknown module id, invalid manifest)
//! - Transport errors (missing network capability, bad response status)
//! - Compilation errors (malformed or truncated module bytes)
//! - Storage errors (persistent-cache failures; swallowed by the loader,
//!   surfaced only by operations that target storage directly)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and proper
//! error trait implementations. Payloads are owned strings so the whole
//! taxonomy is `Clone`: a failed load fans its error out to every caller
//! that shared the de-duplicated in-flight operation.

use thiserror::Error;

/// Result type alias for accelrender operations
///
/// # Examples
///
/// ```
/// use accelrender::Result;
///
/// fn resolve_module() -> Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the accelerator-module loader
///
/// Variants group into the loader's four failure classes: configuration,
/// transport, compilation, and storage. Only storage failures are
/// recoverable; the loader logs them and proceeds to the next cache tier.
#[derive(Error, Debug, Clone)]
pub enum Error {
  /// A module id that does not appear in the manifest was requested.
  #[error("Configuration error: unknown module id '{module_id}'")]
  UnknownModule { module_id: String },

  /// The module manifest failed to parse or validate.
  #[error("Configuration error: invalid module manifest: {reason}")]
  InvalidManifest { reason: String },

  /// Both cache tiers missed and no network transport is available.
  #[error("Transport error: network capability unavailable while resolving module '{module_id}'")]
  NetworkUnavailable { module_id: String },

  /// The transport produced a response with a non-success status.
  #[error("Transport error: unexpected status {status} fetching '{url}'")]
  HttpStatus { status: u16, url: String },

  /// The transport failed before producing a response.
  #[error("Transport error: failed to fetch '{url}': {reason}")]
  FetchFailed { url: String, reason: String },

  /// Module bytes failed to compile or instantiate.
  ///
  /// Compile and instantiate failures share this variant and are
  /// distinguished only by the reason text.
  #[error("Compilation error: module '{module_id}': {reason}")]
  Compile { module_id: String, reason: String },

  /// Persistent storage failure.
  #[error("Storage error: {0}")]
  Storage(#[from] StorageError),
}

/// Error produced by a [`ModuleStore`](crate::accel::storage::ModuleStore)
/// implementation. The loader treats these as non-fatal and falls through to
/// the next cache tier.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct StorageError(pub String);

impl From<std::io::Error> for StorageError {
  fn from(err: std::io::Error) -> Self {
    Self(err.to_string())
  }
}

/// Error produced by a
/// [`ModuleToolchain`](crate::accel::toolchain::ModuleToolchain)
/// implementation. Carries only a message; the loader wraps it into
/// [`Error::Compile`] together with the module id.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct ToolchainError(pub String);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_unknown_module_message_names_id() {
    let error = Error::UnknownModule {
      module_id: "chart-render".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("chart-render"));
    assert!(display.contains("Configuration error"));
  }

  #[test]
  fn test_http_status_message_names_status() {
    let error = Error::HttpStatus {
      status: 404,
      url: "https://cdn.example/chart.wasm".to_string(),
    };
    assert!(format!("{}", error).contains("404"));
  }

  #[test]
  fn test_compile_message_names_module_and_reason() {
    let error = Error::Compile {
      module_id: "chart-render".to_string(),
      reason: "missing wasm magic header".to_string(),
    };
    let display = format!("{}", error);
    assert!(display.contains("chart-render"));
    assert!(display.contains("missing wasm magic header"));
  }

  #[test]
  fn test_storage_error_from_io() {
    let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
    let error: Error = StorageError::from(io_error).into();
    assert!(matches!(error, Error::Storage(_)));
    assert!(format!("{}", error).contains("read-only volume"));
  }

  #[test]
  fn test_errors_are_cloneable() {
    let error = Error::NetworkUnavailable {
      module_id: "chart-render".to_string(),
    };
    let cloned = error.clone();
    assert_eq!(format!("{}", error), format!("{}", cloned));
  }
}
