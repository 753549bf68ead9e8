//! Capability negotiation and on-demand acceleration for document-rendering
//! pipelines.
//!
//! For every structural element extracted from a parsed document, the
//! [`registry`] decides whether it can be drawn immediately, needs an
//! accelerator module fetched and compiled first, or has no renderer at all.
//! The [`accel`] loader resolves those module ids through a memory →
//! persistent-storage → network cascade, so the rendering pipeline never
//! blocks on I/O it did not ask for.
//!
//! The two halves are deliberately uncoupled: a plan's deferred entries only
//! carry module id strings. Invoking the loader, registering the upgraded
//! renderer, and re-planning is the hosting pipeline's job.

pub mod accel;
pub mod error;
pub mod registry;

pub use error::{Error, Result, StorageError, ToolchainError};

pub use registry::{
  CapabilityRegistry, ContentElement, CoverageEntry, CoverageReport, DeferredEntry,
  ImmediateEntry, PlanStats, RenderPlan, RendererDescriptor, RendererKind, RouteStatus,
  RouteVerdict, UnsupportedEntry,
};

pub use accel::{
  AcceleratorLoader, DiskStore, HttpTransport, LoadPhase, LoadProgress, LoadedModule,
  LoaderConfig, ManifestEntry, ModuleExports, ModuleManifest, ModuleStore, ModuleToolchain,
  ModuleTransport, NoopStore, ProgressCallback,
};
