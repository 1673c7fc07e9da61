//! Dependency graph engine
//!
//! Walks static dependencies as `define` calls arrive, issues fetches,
//! decides when a root's subgraph is fully loaded, and executes subgraphs as
//! deterministic post-order batches.
//!
//! Execution order is the post-order of the dependency graph with two
//! tie-breaks: children are visited in the order their parent listed them,
//! and a module shared by several parents runs the first time a batch
//! reaches it. Back-edges (edges to a module currently on the traversal
//! stack) are treated as satisfied, which is what lets cycle members observe
//! each other's partially-initialized exports containers.

use crate::error::Error;
use crate::fetch::Fetcher;
use crate::module::{Dependency, ModuleId, ModuleState};
use crate::registry::Registry;
use crate::resolve::{resolve_specifier, PseudoDep};
use crate::value::{Object, Value};
use rustc_hash::FxHashSet;
use std::rc::Rc;
use tracing::debug;
use url::Url;

/// Creates the `require` binding for a given requesting-module URL.
/// Supplied by the loader so the engine stays free of scheduler state.
pub(crate) type MakeRequire<'a> = &'a dyn Fn(&Url) -> Value;

/// Whether a root's transitive subgraph is fully loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Every reachable module has recorded deps/factory (or is terminal)
    Ready,
    /// Something reachable is still being fetched
    Pending,
}

/// Record a module's dependency list and start the subgraph loading.
///
/// Resolves each specifier against the module's own URL, interns the result,
/// records reverse edges for failure propagation, and issues fetches for
/// anything the registry has not seen before. A specifier that fails to
/// resolve, or a dependency that has already failed, fails this module.
pub(crate) fn link(registry: &mut Registry, fetcher: &mut Fetcher, id: ModuleId, specs: &[String]) {
    let referrer = registry.get(id).url.clone();

    let mut deps = Vec::with_capacity(specs.len());
    for spec in specs {
        if let Some(pseudo) = PseudoDep::from_specifier(spec) {
            deps.push(match pseudo {
                PseudoDep::Require => Dependency::Require,
                PseudoDep::Exports => Dependency::Exports,
                PseudoDep::Meta => Dependency::Meta,
            });
            continue;
        }
        match resolve_specifier(spec, &referrer) {
            Ok(url) => deps.push(Dependency::Module(registry.intern(&url))),
            Err(err) => {
                registry.get_mut(id).deps = deps;
                fail(registry, id, err);
                return;
            }
        }
    }

    for dep in &deps {
        if let Dependency::Module(d) = dep {
            if *d != id {
                registry.get_mut(*d).add_dependent(id);
            }
        }
    }

    let module = registry.get_mut(id);
    module.deps = deps.clone();
    module.advance(ModuleState::WaitingForTurn);
    debug!(url = %referrer, deps = deps.len(), "module linked");

    let mut inherited: Option<Error> = None;
    for dep in &deps {
        if let Dependency::Module(d) = dep {
            match registry.get(*d).state {
                ModuleState::Initialized => fetcher.request(registry, *d),
                ModuleState::Failed => {
                    if inherited.is_none() {
                        inherited = registry.get(*d).error.clone();
                    }
                }
                _ => {}
            }
        }
    }
    if let Some(err) = inherited {
        fail(registry, id, err);
    }
}

/// Check whether everything reachable from `root` has finished loading.
/// Terminal modules count as loaded; failures are surfaced by execution and
/// by eager propagation, not here.
pub(crate) fn readiness(registry: &Registry, root: ModuleId) -> Readiness {
    let mut visited = FxHashSet::default();
    if subgraph_loaded(registry, root, &mut visited) {
        Readiness::Ready
    } else {
        Readiness::Pending
    }
}

fn subgraph_loaded(registry: &Registry, id: ModuleId, visited: &mut FxHashSet<ModuleId>) -> bool {
    if !visited.insert(id) {
        return true;
    }
    match registry.get(id).state {
        ModuleState::Initialized | ModuleState::Loading => return false,
        ModuleState::WaitingForTurn
        | ModuleState::Executing
        | ModuleState::Executed
        | ModuleState::Failed => {}
    }
    registry.get(id).deps.iter().all(|dep| match dep {
        Dependency::Module(d) => subgraph_loaded(registry, *d, visited),
        _ => true,
    })
}

/// Execute the subgraph under `root` as one post-order batch, `root`'s own
/// factory last. Must only be called once `readiness` reports `Ready`.
pub(crate) fn execute_root(registry: &mut Registry, root: ModuleId, make_require: MakeRequire) {
    let mut on_stack = Vec::new();
    let _ = execute_node(registry, root, &mut on_stack, make_require);
}

fn execute_node(
    registry: &mut Registry,
    id: ModuleId,
    on_stack: &mut Vec<ModuleId>,
    make_require: MakeRequire,
) -> Result<(), Error> {
    match registry.get(id).state {
        ModuleState::Executed => return Ok(()),
        ModuleState::Failed => return Err(failure_of(registry, id)),
        _ => {}
    }
    if on_stack.contains(&id) {
        return Ok(());
    }

    on_stack.push(id);
    let deps = registry.get(id).deps.clone();
    let mut first_failure = None;
    for dep in &deps {
        if let Dependency::Module(d) = dep {
            if let Err(err) = execute_node(registry, *d, on_stack, make_require) {
                first_failure = Some(err);
                break;
            }
        }
    }
    on_stack.pop();

    if let Some(err) = first_failure {
        fail(registry, id, err.clone());
        return Err(err);
    }
    run_factory(registry, id, make_require)
}

fn run_factory(
    registry: &mut Registry,
    id: ModuleId,
    make_require: MakeRequire,
) -> Result<(), Error> {
    let args = binding_values(registry, id, make_require);

    let module = registry.get_mut(id);
    let url = module.url.clone();
    module.advance(ModuleState::Executing);
    let factory = module.factory.take();
    debug!(url = %url, "executing factory");

    let result = match factory {
        Some(factory) => factory(&args),
        None => Ok(Value::Undefined),
    };

    match result {
        Ok(value) => {
            apply_factory_return(registry, id, value);
            let module = registry.get_mut(id);
            module.advance(ModuleState::Executed);
            let binding = module.binding.clone();
            let waiters = module.drain_success();
            debug!(url = %url, "module executed");
            for waiter in waiters {
                waiter(&binding);
            }
            Ok(())
        }
        Err(err) => {
            fail(registry, id, err.clone());
            Err(err)
        }
    }
}

/// Build the argument list a factory receives: one binding per listed
/// dependency, in listed order.
fn binding_values(registry: &Registry, id: ModuleId, make_require: MakeRequire) -> Vec<Value> {
    let module = registry.get(id);
    module
        .deps
        .iter()
        .map(|dep| match dep {
            Dependency::Module(d) => registry.get(*d).binding.clone(),
            Dependency::Exports => Value::Object(module.exports.clone()),
            Dependency::Meta => meta_object(&module.url),
            Dependency::Require => make_require(&module.url),
        })
        .collect()
}

/// The `meta` pseudo-dependency: `{ url: <module URL> }`
fn meta_object(url: &Url) -> Value {
    let mut meta = Object::new();
    meta.set("url", Value::string(url.as_str()));
    Value::Object(Rc::new(std::cell::RefCell::new(meta)))
}

/// Apply a factory's return value. `Undefined` keeps the pre-allocated
/// container; a returned object has its properties spliced into that
/// container so cycle partners stay synchronized; any other value rebinds
/// future lookups only.
fn apply_factory_return(registry: &mut Registry, id: ModuleId, value: Value) {
    match value {
        Value::Undefined => {}
        Value::Object(returned) => {
            let exports = registry.get(id).exports.clone();
            if !Rc::ptr_eq(&returned, &exports) {
                let returned = returned.borrow();
                exports.borrow_mut().replace_with(&returned);
            }
        }
        other => registry.get_mut(id).binding = other,
    }
}

/// Mark a module failed and propagate along reverse edges. Every transitive
/// dependent carries the same root error; modules that already reached a
/// terminal state are left untouched. Failure continuations drain in
/// insertion order before propagation.
pub(crate) fn fail(registry: &mut Registry, id: ModuleId, error: Error) {
    if registry.get(id).state.is_terminal() {
        return;
    }
    let module = registry.get_mut(id);
    module.error = Some(error.clone());
    module.advance(ModuleState::Failed);
    debug!(url = %module.url, %error, "module failed");

    let waiters = registry.get_mut(id).drain_failure();
    for waiter in waiters {
        waiter(&error);
    }

    let dependents = registry.get(id).dependents.clone();
    for dependent in dependents {
        fail(registry, dependent, error.clone());
    }
}

/// The root error recorded on a failed module
pub(crate) fn failure_of(registry: &Registry, id: ModuleId) -> Error {
    let module = registry.get(id);
    module
        .error
        .clone()
        .unwrap_or_else(|| Error::fetch_error(module.url.as_str()))
}
