//! Shared test helpers for integration tests
//!
//! `MockHost` stands in for the browser's script-element machinery: a table
//! of scripts keyed by URL and a pump that fetches requested URLs and
//! delivers their load/error events. Delivery order is controllable so the
//! suites can prove execution order does not depend on it.

use lodestone::{Loader, Result, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use url::Url;

pub type ScriptFn = Rc<dyn Fn(&mut Loader) -> Result<()>>;

/// Order in which completed loads are delivered, relative to issue order,
/// within each round of outstanding requests.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Delivery {
    IssueOrder,
    ReverseOrder,
    Rotated(usize),
}

/// In-memory host. URLs with no registered script 404.
#[derive(Default)]
pub struct MockHost {
    scripts: HashMap<String, ScriptFn>,
}

#[allow(dead_code)]
impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw script body for a URL
    pub fn script<F>(&mut self, url: &str, body: F)
    where
        F: Fn(&mut Loader) -> Result<()> + 'static,
    {
        self.scripts.insert(url.to_string(), Rc::new(body));
    }

    /// Register a script that defines one module: `deps`, plus a factory
    /// that records `label` in `log` and exports `{ name: label }`.
    pub fn module(&mut self, url: &str, deps: &[&str], label: &str, log: &OrderLog) {
        let deps: Vec<String> = deps.iter().map(|s| s.to_string()).collect();
        let label = label.to_string();
        let log = log.clone();
        self.script(url, move |loader| {
            let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
            let label = label.clone();
            let log = log.clone();
            loader.define(&dep_refs, move |_args| {
                log.push(&label);
                let exports = Value::new_object();
                if let Some(obj) = exports.as_object() {
                    obj.borrow_mut().set("name", Value::string(&*label));
                }
                Ok(exports)
            });
            Ok(())
        });
    }

    /// Deliver load/error events until the loader stops requesting fetches
    pub fn pump(&mut self, loader: &mut Loader) {
        self.pump_with(loader, Delivery::IssueOrder);
    }

    /// Deliver events with a specific per-round ordering
    pub fn pump_with(&mut self, loader: &mut Loader, delivery: Delivery) {
        loop {
            let mut round = loader.take_fetch_requests();
            if round.is_empty() {
                break;
            }
            match delivery {
                Delivery::IssueOrder => {}
                Delivery::ReverseOrder => round.reverse(),
                Delivery::Rotated(by) => {
                    let len = round.len();
                    round.rotate_left(by % len);
                }
            }
            for url in round {
                self.deliver(loader, &url);
            }
        }
    }

    /// Deliver a single URL's load or error event
    pub fn deliver(&mut self, loader: &mut Loader, url: &Url) {
        match self.scripts.get(url.as_str()).cloned() {
            Some(body) => loader.evaluate_script(url, |loader| body(loader)),
            None => loader.load_failed(url),
        }
    }
}

/// Shared execution-order log factories append to
#[derive(Clone, Default)]
pub struct OrderLog(Rc<RefCell<Vec<String>>>);

#[allow(dead_code)]
impl OrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: &str) {
        self.0.borrow_mut().push(label.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn assert_order(&self, expected: &[&str]) {
        assert_eq!(self.entries(), expected, "execution order mismatch");
    }
}

/// A loader rooted at a document URL
#[allow(dead_code)]
pub fn loader_at(document: &str) -> Loader {
    Loader::new(Url::parse(document).expect("valid document URL"))
}
