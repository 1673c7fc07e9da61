//! Module records and the per-module lifecycle state machine

use crate::error::{Error, Result};
use crate::value::{Exports, Object, Value};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use url::Url;

/// Index of a module record in the registry
pub type ModuleId = usize;

/// User-supplied callable that produces a module's exports. Receives the
/// dependency bindings in listed order; consumed on execution, so a factory
/// can run at most once by construction.
pub type Factory = Box<dyn FnOnce(&[Value]) -> Result<Value>>;

/// Continuation fired when a module reaches `Executed`
pub type SuccessFn = Rc<dyn Fn(&Value)>;

/// Continuation fired when a module reaches `Failed`
pub type FailureFn = Rc<dyn Fn(&Error)>;

/// Module lifecycle. States only ever advance in declaration order;
/// `Executed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ModuleState {
    /// Created by the registry, nothing fetched yet
    Initialized,
    /// A fetch has been issued for the module's script
    Loading,
    /// deps/factory recorded (or synthesized); awaiting its execution turn
    WaitingForTurn,
    /// The factory is on the stack right now
    Executing,
    /// The factory returned normally
    Executed,
    /// Fetch, factory, or a transitive dependency failed
    Failed,
}

impl ModuleState {
    /// Whether the state admits no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleState::Executed | ModuleState::Failed)
    }
}

/// One entry in a module's dependency list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// A real module, by registry id
    Module(ModuleId),
    /// The `require` pseudo-dependency
    Require,
    /// The `exports` pseudo-dependency
    Exports,
    /// The `meta` pseudo-dependency
    Meta,
}

/// A success/failure continuation pair awaiting a module's execution
pub struct Waiter {
    /// Fired with the module's binding when it reaches `Executed`
    pub on_success: Option<SuccessFn>,
    /// Fired with the root error when it reaches `Failed`
    pub on_failure: Option<FailureFn>,
}

/// One record per canonical URL (plus synthetic records for top-level and
/// dynamic-require roots). Owned by the registry; referred to by id.
pub struct Module {
    /// Registry index
    pub id: ModuleId,
    /// Absolute canonical URL; for synthetic records, the referrer URL
    pub url: Url,
    /// Lifecycle state
    pub state: ModuleState,
    /// Dependency list, empty until `define` fires for this URL
    pub deps: Vec<Dependency>,
    /// The user factory; `None` until `define` fires, consumed on execution
    pub factory: Option<Factory>,
    /// The exports container, allocated at creation and identity-stable
    pub exports: Exports,
    /// What dependents receive for this module. Starts as the exports
    /// container; a factory returning a primitive rebinds it for future
    /// lookups only.
    pub binding: Value,
    /// Continuations awaiting execution, drained in insertion order
    pub notify: Vec<Waiter>,
    /// Root failure value once `state == Failed`
    pub error: Option<Error>,
    /// Reverse dependency edges, for failure propagation
    pub dependents: Vec<ModuleId>,
    /// Synthetic record (top-level or dynamic-require root), never matched
    /// by a URL lookup
    pub synthetic: bool,
}

impl Module {
    /// Create a record in the `Initialized` state with a fresh empty
    /// exports container.
    pub fn new(id: ModuleId, url: Url) -> Self {
        let exports: Exports = Rc::new(RefCell::new(Object::new()));
        Self {
            id,
            url,
            state: ModuleState::Initialized,
            deps: Vec::new(),
            factory: None,
            exports: exports.clone(),
            binding: Value::Object(exports),
            notify: Vec::new(),
            error: None,
            dependents: Vec::new(),
            synthetic: false,
        }
    }

    /// Advance the lifecycle. States are monotonic: moving backwards or out
    /// of a terminal state is a bug in the engine.
    pub fn advance(&mut self, next: ModuleState) {
        debug_assert!(
            !self.state.is_terminal() && next > self.state,
            "illegal transition {:?} -> {:?} for {}",
            self.state,
            next,
            self.url,
        );
        self.state = next;
    }

    /// Record a reverse edge unless it is already known
    pub fn add_dependent(&mut self, dependent: ModuleId) {
        if !self.dependents.contains(&dependent) {
            self.dependents.push(dependent);
        }
    }

    /// Drain waiters, handing each its success continuation. Insertion order.
    pub fn drain_success(&mut self) -> Vec<SuccessFn> {
        std::mem::take(&mut self.notify)
            .into_iter()
            .filter_map(|w| w.on_success)
            .collect()
    }

    /// Drain waiters, handing each its failure continuation. Insertion order.
    pub fn drain_failure(&mut self) -> Vec<FailureFn> {
        std::mem::take(&mut self.notify)
            .into_iter()
            .filter_map(|w| w.on_failure)
            .collect()
    }
}
