//! Capability registry: matching document elements to renderers
//!
//! The registry owns an append-only table of renderer descriptors and
//! answers, for any structural element, whether it can be drawn immediately,
//! needs an accelerator module loaded first, or has no renderer at all.
//!
//! Routing is a pure function of the registered table. After a deferred
//! module finishes loading, the hosting pipeline registers a new
//! higher-priority immediate descriptor and simply re-plans; there is no
//! diffing against a previous plan. The registry is an owned value; distinct
//! rendering sessions construct their own and never share capability tables.
//!
//! # Example
//!
//! ```
//! use accelrender::registry::{CapabilityRegistry, ContentElement, RendererDescriptor};
//!
//! struct Shape {
//!     kind: &'static str,
//! }
//!
//! impl ContentElement for Shape {
//!     fn kind(&self) -> &str {
//!         self.kind
//!     }
//! }
//!
//! let mut registry = CapabilityRegistry::new();
//! registry.register(RendererDescriptor::immediate("rect", |e: &Shape| e.kind == "rect"));
//!
//! let plan = registry.plan_render(&[Shape { kind: "rect" }, Shape { kind: "chart" }]);
//! assert_eq!(plan.stats.immediate, 1);
//! assert_eq!(plan.stats.unsupported, 1);
//! ```

use serde::Serialize;
use std::fmt;

/// Fallback module id recorded for a deferred entry whose winning descriptor
/// does not declare one.
const UNKNOWN_MODULE_ID: &str = "unknown";

/// A structural element extracted from a parsed document.
///
/// The registry itself inspects nothing beyond the discriminant kind (used
/// for unsupported-verdict diagnostics); descriptor predicates are free to
/// read whatever else the concrete element type exposes.
pub trait ContentElement {
  /// Discriminant kind of this element, e.g. `"rect"`, `"chart"`, `"table"`.
  fn kind(&self) -> &str;
}

/// Whether a renderer can draw right away or needs an accelerator module
/// fetched and compiled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
  Immediate,
  Deferred,
}

/// A renderer's capability declaration: predicate, priority, and metadata.
///
/// Registered once and immutable thereafter. Duplicate ids are permitted:
/// a capability upgrade registers a new, higher-priority descriptor rather
/// than replacing an existing one.
pub struct RendererDescriptor<E> {
  id: String,
  kind: RendererKind,
  predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
  priority: i32,
  module_id: Option<String>,
  estimated_bytes: Option<u64>,
}

impl<E> RendererDescriptor<E> {
  /// A renderer that can draw matching elements right away.
  pub fn immediate(
    id: impl Into<String>,
    predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
  ) -> Self {
    Self {
      id: id.into(),
      kind: RendererKind::Immediate,
      predicate: Box::new(predicate),
      priority: 0,
      module_id: None,
      estimated_bytes: None,
    }
  }

  /// A renderer that needs an accelerator module loaded before it can draw.
  ///
  /// Set the module to fetch with [`with_module_id`](Self::with_module_id);
  /// plans fall back to the literal `"unknown"` when it is omitted.
  pub fn deferred(
    id: impl Into<String>,
    predicate: impl Fn(&E) -> bool + Send + Sync + 'static,
  ) -> Self {
    Self {
      id: id.into(),
      kind: RendererKind::Deferred,
      predicate: Box::new(predicate),
      priority: 0,
      module_id: None,
      estimated_bytes: None,
    }
  }

  /// Sets the routing priority (default 0). Higher wins; exact ties keep
  /// the first-registered descriptor.
  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  /// Sets the accelerator module this renderer depends on.
  pub fn with_module_id(mut self, module_id: impl Into<String>) -> Self {
    self.module_id = Some(module_id.into());
    self
  }

  /// Sets the estimated download size of the backing module.
  pub fn with_estimated_bytes(mut self, estimated_bytes: u64) -> Self {
    self.estimated_bytes = Some(estimated_bytes);
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn kind(&self) -> RendererKind {
    self.kind
  }

  pub fn priority(&self) -> i32 {
    self.priority
  }

  pub fn module_id(&self) -> Option<&str> {
    self.module_id.as_deref()
  }

  pub fn estimated_bytes(&self) -> Option<u64> {
    self.estimated_bytes
  }

  /// Evaluates this descriptor's predicate against an element.
  pub fn can_render(&self, element: &E) -> bool {
    (self.predicate)(element)
  }
}

impl<E> fmt::Debug for RendererDescriptor<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RendererDescriptor")
      .field("id", &self.id)
      .field("kind", &self.kind)
      .field("priority", &self.priority)
      .field("module_id", &self.module_id)
      .field("estimated_bytes", &self.estimated_bytes)
      .finish_non_exhaustive()
  }
}

/// Readiness tier of a routing outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
  Immediate,
  Deferred,
  Unsupported,
}

/// The routing outcome for one element.
#[derive(Debug)]
pub struct RouteVerdict<'a, E> {
  /// The winning descriptor; `None` only when unsupported.
  pub renderer: Option<&'a RendererDescriptor<E>>,
  pub status: RouteStatus,
  /// Present only when unsupported; names the element's kind.
  pub reason: Option<String>,
}

/// A plan entry that can be drawn right away.
#[derive(Debug)]
pub struct ImmediateEntry<'a, E> {
  pub element: &'a E,
  pub renderer: &'a RendererDescriptor<E>,
}

/// A plan entry waiting on an accelerator module.
#[derive(Debug)]
pub struct DeferredEntry<'a, E> {
  pub element: &'a E,
  pub renderer: &'a RendererDescriptor<E>,
  pub module_id: String,
  pub estimated_bytes: u64,
}

/// A plan entry no registered renderer can draw.
#[derive(Debug)]
pub struct UnsupportedEntry<'a, E> {
  pub element: &'a E,
  pub reason: String,
}

/// Aggregate counts over one routing traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlanStats {
  pub total: usize,
  pub immediate: usize,
  pub deferred: usize,
  pub unsupported: usize,
}

/// Categorized routing outcome for a batch of elements.
///
/// Invariant: `stats.total` equals the input length and the sum of the three
/// bucket lengths, and each bucket holds exactly the elements whose verdict
/// matches it.
#[derive(Debug)]
pub struct RenderPlan<'a, E> {
  pub immediate: Vec<ImmediateEntry<'a, E>>,
  pub deferred: Vec<DeferredEntry<'a, E>>,
  pub unsupported: Vec<UnsupportedEntry<'a, E>>,
  pub stats: PlanStats,
}

impl<E> RenderPlan<'_, E> {
  /// Distinct module ids among deferred entries, in first-seen order.
  ///
  /// This is the list the hosting pipeline hands to the accelerator loader.
  pub fn deferred_module_ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for entry in &self.deferred {
      if !ids.contains(&entry.module_id.as_str()) {
        ids.push(entry.module_id.as_str());
      }
    }
    ids
  }

  /// Sum of the deferred entries' estimated download sizes.
  pub fn estimated_deferred_bytes(&self) -> u64 {
    self.deferred.iter().map(|entry| entry.estimated_bytes).sum()
  }
}

/// One coverage-report line: the same verdict as routing, shaped for
/// diagnostics.
#[derive(Debug)]
pub struct CoverageEntry<'a, E> {
  pub element: &'a E,
  pub status: RouteStatus,
  pub renderer_id: Option<&'a str>,
  pub reason: Option<String>,
}

/// Diagnostic view over one routing traversal.
#[derive(Debug)]
pub struct CoverageReport<'a, E> {
  pub entries: Vec<CoverageEntry<'a, E>>,
  pub summary: PlanStats,
}

/// Registry of renderer capability descriptors.
///
/// Operations are synchronous and never fail; callers enforce
/// single-writer/many-reader discipline on the table (register during
/// setup or between plans, route/plan from however many readers).
pub struct CapabilityRegistry<E> {
  descriptors: Vec<RendererDescriptor<E>>,
}

impl<E> CapabilityRegistry<E> {
  pub fn new() -> Self {
    Self {
      descriptors: Vec::new(),
    }
  }

  /// Appends a descriptor to the table.
  pub fn register(&mut self, descriptor: RendererDescriptor<E>) {
    self.descriptors.push(descriptor);
  }

  /// Number of registered descriptors.
  pub fn len(&self) -> usize {
    self.descriptors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descriptors.is_empty()
  }
}

impl<E: ContentElement> CapabilityRegistry<E> {
  /// The matching descriptor of strictly greatest priority, if any.
  ///
  /// The comparison is `>`, not `>=`, so the first-registered descriptor
  /// wins exact-priority ties.
  fn best_match(&self, element: &E) -> Option<&RendererDescriptor<E>> {
    let mut best: Option<&RendererDescriptor<E>> = None;
    for descriptor in &self.descriptors {
      if !descriptor.can_render(element) {
        continue;
      }
      match best {
        Some(current) if descriptor.priority > current.priority => best = Some(descriptor),
        None => best = Some(descriptor),
        _ => {}
      }
    }
    best
  }

  /// Routes one element to the best matching renderer.
  pub fn route<'a>(&'a self, element: &E) -> RouteVerdict<'a, E> {
    match self.best_match(element) {
      Some(renderer) => RouteVerdict {
        renderer: Some(renderer),
        status: match renderer.kind {
          RendererKind::Immediate => RouteStatus::Immediate,
          RendererKind::Deferred => RouteStatus::Deferred,
        },
        reason: None,
      },
      None => RouteVerdict {
        renderer: None,
        status: RouteStatus::Unsupported,
        reason: Some(unsupported_reason(element)),
      },
    }
  }

  /// Routes every element and buckets the outcomes into a render plan.
  ///
  /// Deferred entries fall back to module id `"unknown"` and estimated size
  /// `0` when the winning descriptor omits them.
  pub fn plan_render<'a>(&'a self, elements: &'a [E]) -> RenderPlan<'a, E> {
    let mut plan = RenderPlan {
      immediate: Vec::new(),
      deferred: Vec::new(),
      unsupported: Vec::new(),
      stats: PlanStats::default(),
    };

    for element in elements {
      plan.stats.total += 1;
      match self.best_match(element) {
        Some(renderer) if renderer.kind == RendererKind::Immediate => {
          plan.stats.immediate += 1;
          plan.immediate.push(ImmediateEntry { element, renderer });
        }
        Some(renderer) => {
          plan.stats.deferred += 1;
          plan.deferred.push(DeferredEntry {
            element,
            renderer,
            module_id: renderer
              .module_id()
              .unwrap_or(UNKNOWN_MODULE_ID)
              .to_string(),
            estimated_bytes: renderer.estimated_bytes().unwrap_or(0),
          });
        }
        None => {
          plan.stats.unsupported += 1;
          plan.unsupported.push(UnsupportedEntry {
            element,
            reason: unsupported_reason(element),
          });
        }
      }
    }

    plan
  }

  /// The same traversal as [`plan_render`](Self::plan_render), shaped for
  /// diagnostics.
  pub fn generate_coverage_report<'a>(&'a self, elements: &'a [E]) -> CoverageReport<'a, E> {
    let mut entries = Vec::with_capacity(elements.len());
    let mut summary = PlanStats::default();

    for element in elements {
      summary.total += 1;
      let verdict = self.route(element);
      match verdict.status {
        RouteStatus::Immediate => summary.immediate += 1,
        RouteStatus::Deferred => summary.deferred += 1,
        RouteStatus::Unsupported => summary.unsupported += 1,
      }
      entries.push(CoverageEntry {
        element,
        status: verdict.status,
        renderer_id: verdict.renderer.map(|renderer| renderer.id()),
        reason: verdict.reason,
      });
    }

    CoverageReport { entries, summary }
  }
}

impl<E> Default for CapabilityRegistry<E> {
  fn default() -> Self {
    Self::new()
  }
}

fn unsupported_reason<E: ContentElement>(element: &E) -> String {
  format!("no registered renderer can draw '{}' elements", element.kind())
}
