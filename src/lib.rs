//! Lodestone: an AMD-style module loader core
//!
//! Lodestone fetches, orders, and executes module scripts shipped as AMD
//! `define(...)` calls, preserving the execution-order, deduplication, and
//! cycle-handling semantics of native ES modules. It is the dependency
//! graph engine of a browser loader with the host factored out: the
//! embedder supplies a "fetch and evaluate a URL" capability by draining
//! fetch requests and delivering load/error events, and lodestone supplies
//! everything else.
//!
//! # Guarantees
//!
//! - **At-most-once execution**: a module's factory runs once, no matter
//!   how many dependents list it or under which specifier spelling.
//! - **Deterministic ordering**: factories run in the post-order of the
//!   dependency graph with source-listed children first; top-level
//!   `define` calls run in source order even when their subgraphs finish
//!   loading out of order.
//! - **Cycle tolerance**: cycle members observe each other's shared
//!   exports container, partially initialized for whichever member runs
//!   first, exactly as native ES modules behave.
//! - **Localized failure**: a failure takes down its forward cone with the
//!   same root error and nothing else; sibling top-level modules keep
//!   running.
//!
//! # Quick Start
//!
//! ```no_run
//! use lodestone::{Loader, Value};
//! use url::Url;
//!
//! let document = Url::parse("http://example.com/index.html").unwrap();
//! let mut loader = Loader::new(document);
//!
//! loader.define(&["./y.js"], |args| {
//!     let y = args[0].get("y");
//!     println!("y = {:?}", y);
//!     Ok(Value::Undefined)
//! });
//!
//! // Host pump: fetch each requested URL and evaluate its script.
//! for url in loader.take_fetch_requests() {
//!     loader.evaluate_script(&url, |loader| {
//!         loader.define(&["exports"], |args| {
//!             if let Some(exports) = args[0].as_object() {
//!                 exports.borrow_mut().set("y", Value::string("y"));
//!             }
//!             Ok(Value::Undefined)
//!         });
//!         Ok(())
//!     });
//! }
//! ```
//!
//! # Module Overview
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`loader`], [`registry`], [`module`], the graph engine |
//! | **Edges** | [`resolve`], [`fetch`] |
//! | **Support** | [`value`], [`Error`] |

pub mod fetch;
pub mod loader;
pub mod module;
pub mod registry;
pub mod resolve;
pub mod value;

mod error;
mod graph;

pub use error::{Error, ErrorKind, Result};
pub use loader::{Loader, LoaderStats, ModuleSnapshot};
pub use module::{ModuleId, ModuleState};
pub use resolve::{resolve_specifier, PseudoDep};
pub use value::{Exports, NativeFn, Object, Value};

/// Lodestone version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
