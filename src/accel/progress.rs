//! Load-progress events emitted while resolving an accelerator module
//!
//! One load walks `cache-check → {ready | downloading → compiling → ready} |
//! error`; `percent` is monotonically non-decreasing within a load, and
//! download progress is capped below 100 to reserve visible headroom for
//! compilation.

use serde::Serialize;
use std::fmt;

/// Phase of an in-flight module load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadPhase {
  CacheCheck,
  Downloading,
  Compiling,
  Ready,
  Error,
}

impl LoadPhase {
  /// Wire name of this phase, as surfaced to progress UIs.
  pub fn as_str(self) -> &'static str {
    match self {
      LoadPhase::CacheCheck => "cache-check",
      LoadPhase::Downloading => "downloading",
      LoadPhase::Compiling => "compiling",
      LoadPhase::Ready => "ready",
      LoadPhase::Error => "error",
    }
  }

  /// `ready` and `error` are terminal.
  pub fn is_terminal(self) -> bool {
    matches!(self, LoadPhase::Ready | LoadPhase::Error)
  }
}

impl fmt::Display for LoadPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One progress event for one module load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadProgress {
  pub module_id: String,
  pub phase: LoadPhase,
  pub bytes_loaded: u64,
  pub bytes_total: u64,
  /// In `[0, 100]`; never decreases within one load.
  pub percent: f32,
}

/// Callback invoked with every progress event of the load it was passed to.
///
/// Concurrent callers that share one de-duplicated load each keep their own
/// callback; all of them receive the shared events.
pub type ProgressCallback = Box<dyn Fn(&LoadProgress) + Send + Sync>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn phase_wire_names() {
    assert_eq!(LoadPhase::CacheCheck.as_str(), "cache-check");
    assert_eq!(LoadPhase::Downloading.to_string(), "downloading");
    assert_eq!(LoadPhase::Ready.as_str(), "ready");
  }

  #[test]
  fn terminal_phases() {
    assert!(LoadPhase::Ready.is_terminal());
    assert!(LoadPhase::Error.is_terminal());
    assert!(!LoadPhase::Downloading.is_terminal());
  }

  #[test]
  fn phase_serializes_to_wire_name() {
    let json = serde_json::to_string(&LoadPhase::CacheCheck).unwrap();
    assert_eq!(json, "\"cache-check\"");
  }
}
