//! The loader: public `define` surface, host event entry points, the
//! top-level scheduler, and dynamic `require`
//!
//! Control flow: the host evaluates a script whose side effect is a
//! [`Loader::define`] call. A call with no script currently loading creates
//! a top-level module bound to the document URL and enqueues it on the
//! top-level FIFO; a call made by a loaded script binds to the URL on top of
//! the currently-loading stack. As subgraphs finish loading, the loader
//! executes them as deterministic post-order batches: top-level roots in
//! source order, dynamic-require roots as soon as they are ready.
//!
//! The loader is single-threaded and cooperative. It never touches the
//! network: the host drains [`Loader::take_fetch_requests`] and answers each
//! URL exactly once with [`Loader::evaluate_script`] or
//! [`Loader::load_failed`].

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::graph::{self, Readiness};
use crate::module::{Factory, FailureFn, ModuleId, ModuleState, Waiter};
use crate::registry::Registry;
use crate::value::{NativeFn, Value};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;
use url::Url;

/// A dynamic `require` call recorded during factory execution and drained
/// at the loader's next bookkeeping step.
struct RequireCall {
    referrer: Url,
    specs: Vec<String>,
    on_resolved: Option<NativeFn>,
    on_failure: Option<FailureFn>,
}

type RequireInbox = Rc<RefCell<Vec<RequireCall>>>;
type UncaughtSink = Rc<RefCell<Vec<Error>>>;

/// Point-in-time view of one module record, for host debugging surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSnapshot {
    /// Canonical URL (referrer URL for synthetic roots)
    pub url: String,
    /// Lifecycle state
    pub state: ModuleState,
    /// Number of listed dependencies
    pub dep_count: usize,
    /// Whether this is a synthetic top-level or require root
    pub synthetic: bool,
}

/// Aggregate counters over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    /// Total records, synthetic roots included
    pub modules: usize,
    /// Records whose script is still being fetched
    pub loading: usize,
    /// Records whose factory ran to completion
    pub executed: usize,
    /// Records in the failed state
    pub failed: usize,
}

/// The module loader. One instance per document.
pub struct Loader {
    registry: Registry,
    fetcher: Fetcher,
    document_url: Url,
    top_level: VecDeque<ModuleId>,
    require_roots: Vec<ModuleId>,
    pending_requires: RequireInbox,
    uncaught: UncaughtSink,
}

impl Loader {
    /// Create a loader whose top-level modules resolve against
    /// `document_url` (the document's base URL as the host observes it at
    /// call time, honoring any `<base>` element).
    pub fn new(document_url: Url) -> Self {
        Self {
            registry: Registry::new(),
            fetcher: Fetcher::new(),
            document_url,
            top_level: VecDeque::new(),
            require_roots: Vec::new(),
            pending_requires: Rc::new(RefCell::new(Vec::new())),
            uncaught: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// The document base URL top-level modules resolve against
    pub fn document_url(&self) -> &Url {
        &self.document_url
    }

    /// The `define` entry point.
    ///
    /// Called while a script is loading, it records that script's deps and
    /// factory. Called with no script loading, it creates an anonymous
    /// top-level module bound to the document URL; top-level factories run
    /// in the source order of their `define` calls regardless of which
    /// subgraph finishes loading first.
    pub fn define<F>(&mut self, deps: &[&str], factory: F)
    where
        F: FnOnce(&[Value]) -> Result<Value> + 'static,
    {
        let specs = deps.iter().map(|s| s.to_string()).collect();
        self.define_boxed(specs, Box::new(factory));
    }

    fn define_boxed(&mut self, specs: Vec<String>, factory: Factory) {
        match self.fetcher.current() {
            Some(id) => {
                if self.registry.get(id).state != ModuleState::Loading {
                    let url = self.registry.get(id).url.as_str().to_string();
                    graph::fail(&mut self.registry, id, Error::duplicate_define(url));
                    return;
                }
                self.registry.get_mut(id).factory = Some(factory);
                graph::link(&mut self.registry, &mut self.fetcher, id, &specs);
                // execution resumes when the script's load event finishes
            }
            None => {
                let id = self.registry.insert_synthetic(self.document_url.clone());
                debug!(url = %self.document_url, position = self.top_level.len(), "top-level define");
                self.registry.get_mut(id).factory = Some(factory);
                self.top_level.push_back(id);
                graph::link(&mut self.registry, &mut self.fetcher, id, &specs);
                self.pump();
            }
        }
    }

    /// Dynamic require rooted at the document URL, with failures surfacing
    /// on the uncaught channel. Equivalent to the `require`
    /// pseudo-dependency for hosts driving the loader directly.
    pub fn require<F>(&mut self, deps: &[&str], on_resolved: F)
    where
        F: Fn(&[Value]) + 'static,
    {
        self.enqueue_require(self.document_url.clone(), deps, on_resolved, None);
        self.pump();
    }

    /// Dynamic require with an explicit failure continuation. `on_failure`
    /// fires exactly once with the first failure encountered; after that,
    /// `on_resolved` is never called.
    pub fn require_or_else<F, G>(&mut self, deps: &[&str], on_resolved: F, on_failure: G)
    where
        F: Fn(&[Value]) + 'static,
        G: Fn(&Error) + 'static,
    {
        let on_failure: FailureFn = Rc::new(on_failure);
        self.enqueue_require(self.document_url.clone(), deps, on_resolved, Some(on_failure));
        self.pump();
    }

    fn enqueue_require<F>(
        &mut self,
        referrer: Url,
        deps: &[&str],
        on_resolved: F,
        on_failure: Option<FailureFn>,
    ) where
        F: Fn(&[Value]) + 'static,
    {
        let on_resolved: NativeFn = Rc::new(move |args: &[Value]| {
            on_resolved(args);
            Ok(Value::Undefined)
        });
        self.pending_requires.borrow_mut().push(RequireCall {
            referrer,
            specs: deps.iter().map(|s| s.to_string()).collect(),
            on_resolved: Some(on_resolved),
            on_failure,
        });
    }

    // ==================== Host event surface ====================

    /// Hand the host the URLs whose scripts it must fetch and evaluate, in
    /// issue order. Each must be answered exactly once with
    /// [`Loader::evaluate_script`] or [`Loader::load_failed`].
    pub fn take_fetch_requests(&mut self) -> Vec<Url> {
        self.fetcher.take_requests()
    }

    /// Whether the loader is waiting on the host for any fetch
    pub fn has_fetch_requests(&self) -> bool {
        self.fetcher.has_requests()
    }

    /// The host evaluates the script it fetched for `url`. `body` is the
    /// script body; its side effect is zero or more `define` calls, which
    /// bind to `url` through the currently-loading stack. A script that
    /// finishes without calling `define` yields an empty exports mapping;
    /// a body error is a fetch failure (the script did not evaluate).
    pub fn evaluate_script<F>(&mut self, url: &Url, body: F)
    where
        F: FnOnce(&mut Loader) -> Result<()>,
    {
        let Some(id) = self.registry.lookup(url) else {
            debug!(%url, "load event for unknown URL, ignored");
            return;
        };
        if self.registry.get(id).state != ModuleState::Loading {
            debug!(%url, "duplicate load event, ignored");
            return;
        }

        self.fetcher.push_loading(id);
        let evaluated = body(self);
        self.fetcher.pop_loading();

        match evaluated {
            Ok(()) => {
                if self.registry.get(id).state == ModuleState::Loading {
                    // no define call: synthesize a trivial factory over the
                    // pre-allocated exports
                    self.registry.get_mut(id).factory =
                        Some(Box::new(|_args: &[Value]| Ok(Value::Undefined)));
                    graph::link(&mut self.registry, &mut self.fetcher, id, &[]);
                }
            }
            Err(_) => {
                let url = self.registry.get(id).url.as_str().to_string();
                graph::fail(&mut self.registry, id, Error::fetch_error(url));
            }
        }
        self.pump();
    }

    /// The host reports a network failure for `url`. The module fails with
    /// a `Failed to fetch` error that propagates to every transitive
    /// dependent; fetches already in flight for sibling modules are not
    /// cancelled.
    pub fn load_failed(&mut self, url: &Url) {
        if let Some(id) = self.registry.lookup(url) {
            graph::fail(&mut self.registry, id, Error::fetch_error(url.as_str()));
        }
        self.pump();
    }

    /// Drain errors that had no registered handler, in surfacing order.
    /// Stands in for the host window's uncaught-error channel.
    pub fn drain_uncaught(&mut self) -> Vec<Error> {
        self.uncaught.borrow_mut().drain(..).collect()
    }

    // ==================== Scheduling ====================

    /// Run the scheduler to a fixpoint: create require roots from recorded
    /// calls, execute any require root whose subgraph is ready, and advance
    /// the top-level FIFO as far as readiness allows.
    ///
    /// Never runs while a script body is mid-evaluation; the pending work is
    /// picked up when the script's load event finishes.
    fn pump(&mut self) {
        if self.fetcher.current().is_some() {
            return;
        }
        loop {
            let mut progressed = self.drain_require_calls();

            let roots = std::mem::take(&mut self.require_roots);
            let mut remaining = Vec::new();
            for root in roots {
                if self.registry.get(root).state.is_terminal() {
                    progressed = true;
                } else if graph::readiness(&self.registry, root) == Readiness::Ready {
                    self.execute_batch(root);
                    progressed = true;
                } else {
                    remaining.push(root);
                }
            }
            self.require_roots.extend(remaining);

            while let Some(&head) = self.top_level.front() {
                match self.registry.get(head).state {
                    ModuleState::Executed => {
                        self.top_level.pop_front();
                        progressed = true;
                    }
                    ModuleState::Failed => {
                        let error = graph::failure_of(&self.registry, head);
                        debug!(%error, "top-level module drained after failure");
                        self.uncaught.borrow_mut().push(error);
                        self.top_level.pop_front();
                        progressed = true;
                    }
                    _ => {
                        if graph::readiness(&self.registry, head) == Readiness::Ready {
                            self.execute_batch(head);
                            progressed = true;
                        } else {
                            break;
                        }
                    }
                }
            }

            if !progressed && self.pending_requires.borrow().is_empty() {
                break;
            }
        }
    }

    /// Turn recorded `require` calls into synthetic roots.
    fn drain_require_calls(&mut self) -> bool {
        let calls: Vec<RequireCall> = self.pending_requires.borrow_mut().drain(..).collect();
        let drained = !calls.is_empty();
        for call in calls {
            let id = self.registry.insert_synthetic(call.referrer);

            let on_resolved = call.on_resolved;
            self.registry.get_mut(id).factory = Some(Box::new(move |args: &[Value]| {
                if let Some(on_resolved) = on_resolved {
                    on_resolved(args)?;
                }
                Ok(Value::Undefined)
            }));

            let uncaught = self.uncaught.clone();
            let on_failure = call.on_failure;
            self.registry.get_mut(id).notify.push(Waiter {
                on_success: None,
                on_failure: Some(Rc::new(move |error: &Error| match &on_failure {
                    Some(on_failure) => on_failure(error),
                    None => uncaught.borrow_mut().push(error.clone()),
                })),
            });

            graph::link(&mut self.registry, &mut self.fetcher, id, &call.specs);
            if !self.registry.get(id).state.is_terminal() {
                self.require_roots.push(id);
            }
        }
        drained
    }

    fn execute_batch(&mut self, root: ModuleId) {
        let inbox = self.pending_requires.clone();
        let make_require = move |url: &Url| require_binding(url.clone(), inbox.clone());
        graph::execute_root(&mut self.registry, root, &make_require);
    }

    // ==================== Diagnostics ====================

    /// Snapshots of every module record, in creation order
    pub fn modules(&self) -> Vec<ModuleSnapshot> {
        self.registry
            .iter()
            .map(|m| ModuleSnapshot {
                url: m.url.as_str().to_string(),
                state: m.state,
                dep_count: m.deps.len(),
                synthetic: m.synthetic,
            })
            .collect()
    }

    /// Aggregate counters over the registry
    pub fn stats(&self) -> LoaderStats {
        let mut stats = LoaderStats {
            modules: self.registry.len(),
            ..LoaderStats::default()
        };
        for module in self.registry.iter() {
            match module.state {
                ModuleState::Loading => stats.loading += 1,
                ModuleState::Executed => stats.executed += 1,
                ModuleState::Failed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Clear the registry and all queues. Test-only: already-evaluated host
    /// scripts are not unloaded, so tests must use reloadable scripts or
    /// fresh URLs. This is the `define._reset()` hook of the AMD surface.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.fetcher.reset();
        self.top_level.clear();
        self.require_roots.clear();
        self.pending_requires.borrow_mut().clear();
        self.uncaught.borrow_mut().clear();
    }
}

/// The value bound to the `require` pseudo-dependency: a function taking
/// `(deps, on_resolved?, on_failure?)`. Calls are recorded and drained at
/// the loader's next bookkeeping step; specifiers resolve against the
/// requesting module's URL. The failure callback receives the error message
/// as a string value.
fn require_binding(referrer: Url, inbox: RequireInbox) -> Value {
    Value::function(move |args: &[Value]| {
        let specs = match args.first() {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(spec)) => vec![spec.clone()],
            _ => Vec::new(),
        };
        let on_resolved = args.get(1).and_then(|v| v.as_function()).cloned();
        let on_failure = args.get(2).and_then(|v| v.as_function()).cloned().map(|cb| {
            let cb: FailureFn = Rc::new(move |error: &Error| {
                let _ = cb(&[Value::string(error.to_string())]);
            });
            cb
        });
        inbox.borrow_mut().push(RequireCall {
            referrer: referrer.clone(),
            specs,
            on_resolved,
            on_failure,
        });
        Ok(Value::Undefined)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> Loader {
        Loader::new(Url::parse("http://example.com/index.html").unwrap())
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_top_level_with_no_deps_executes_immediately() {
        let ran = Rc::new(RefCell::new(false));
        let mut loader = loader();
        let flag = ran.clone();
        loader.define(&[], move |_| {
            *flag.borrow_mut() = true;
            Ok(Value::Undefined)
        });
        assert!(*ran.borrow());
        assert!(loader.drain_uncaught().is_empty());
    }

    #[test]
    fn test_define_outside_any_script_is_top_level() {
        // spec open question, decision (a): bind to the document base URL
        let mut loader = loader();
        loader.define(&[], |_| Ok(Value::Undefined));
        let snapshots = loader.modules();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].synthetic);
        assert_eq!(snapshots[0].url, "http://example.com/index.html");
        assert_eq!(snapshots[0].state, ModuleState::Executed);
    }

    #[test]
    fn test_no_define_script_yields_empty_exports() {
        let seen = Rc::new(RefCell::new(None));
        let mut loader = loader();
        let sink = seen.clone();
        loader.define(&["./plain.js"], move |args| {
            *sink.borrow_mut() = Some(args[0].clone());
            Ok(Value::Undefined)
        });

        let requests = loader.take_fetch_requests();
        assert_eq!(requests, vec![url("http://example.com/plain.js")]);
        loader.evaluate_script(&requests[0], |_| Ok(()));

        let exports = seen.borrow().clone().unwrap();
        let exports = exports.as_object().unwrap().clone();
        assert!(exports.borrow().is_empty());
    }

    #[test]
    fn test_duplicate_define_fails_the_module() {
        let mut loader = loader();
        loader.define(&["./twice.js"], |_| Ok(Value::Undefined));

        let requests = loader.take_fetch_requests();
        loader.evaluate_script(&requests[0], |loader| {
            loader.define(&[], |_| Ok(Value::Undefined));
            loader.define(&[], |_| Ok(Value::Undefined));
            Ok(())
        });

        let errors = loader.drain_uncaught();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("duplicate define"));
        assert_eq!(loader.stats().failed, 2); // the script and its dependent
    }

    #[test]
    fn test_script_body_error_is_a_fetch_failure() {
        let mut loader = loader();
        loader.define(&["./broken.js"], |_| Ok(Value::Undefined));

        let requests = loader.take_fetch_requests();
        loader.evaluate_script(&requests[0], |_| {
            Err(Error::factory_error("http://example.com/broken.js", "syntax"))
        });

        let errors = loader.drain_uncaught();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]
            .to_string()
            .contains("Failed to fetch http://example.com/broken.js"));
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let mut loader = loader();
        loader.define(&["./a.js"], |_| Ok(Value::Undefined));
        let stats = loader.stats();
        assert_eq!(stats.modules, 2);
        assert_eq!(stats.loading, 1);
        assert_eq!(stats.executed, 0);

        let requests = loader.take_fetch_requests();
        loader.evaluate_script(&requests[0], |loader| {
            loader.define(&[], |_| Ok(Value::Undefined));
            Ok(())
        });
        let stats = loader.stats();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.loading, 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut loader = loader();
        loader.define(&["./a.js"], |_| Ok(Value::Undefined));
        loader.reset();
        assert!(loader.modules().is_empty());
        assert!(!loader.has_fetch_requests());
        assert!(loader.drain_uncaught().is_empty());
    }
}
