//! Module registry
//!
//! Process-wide mapping from canonical URL to module record. Records live in
//! an id-indexed arena owned exclusively by the registry; every other
//! component refers to modules by [`ModuleId`].

use crate::module::{Module, ModuleId};
use rustc_hash::FxHashMap as HashMap;
use url::Url;

/// Owner of all module records for one loader instance.
#[derive(Default)]
pub struct Registry {
    modules: Vec<Module>,
    by_url: HashMap<String, ModuleId>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the module for a canonical URL, creating it on first sight.
    pub fn intern(&mut self, url: &Url) -> ModuleId {
        if let Some(&id) = self.by_url.get(url.as_str()) {
            return id;
        }
        let id = self.modules.len();
        self.modules.push(Module::new(id, url.clone()));
        self.by_url.insert(url.as_str().to_string(), id);
        id
    }

    /// Create a synthetic record (top-level or dynamic-require root) that a
    /// URL lookup will never return. `url` is the record's referrer base.
    pub fn insert_synthetic(&mut self, url: Url) -> ModuleId {
        let id = self.modules.len();
        let mut module = Module::new(id, url);
        module.synthetic = true;
        self.modules.push(module);
        id
    }

    /// Look up a canonical URL without creating a record
    pub fn lookup(&self, url: &Url) -> Option<ModuleId> {
        self.by_url.get(url.as_str()).copied()
    }

    /// Borrow a record
    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id]
    }

    /// Mutably borrow a record
    pub fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id]
    }

    /// Number of records, synthetic ones included
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry holds no records
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Iterate over all records
    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Drop every record. Test-only: already-evaluated host scripts are not
    /// unloaded, so callers must use reloadable scripts or fresh URLs.
    pub fn reset(&mut self) {
        self.modules.clear();
        self.by_url.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleState;
    use crate::value::Value;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_intern_creates_once() {
        let mut registry = Registry::new();
        let a = registry.intern(&url("http://example.com/a.js"));
        let again = registry.intern(&url("http://example.com/a.js"));
        assert_eq!(a, again);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(a).state, ModuleState::Initialized);
    }

    #[test]
    fn test_fragment_means_distinct_record() {
        let mut registry = Registry::new();
        let plain = registry.intern(&url("http://example.com/a.js"));
        let tagged = registry.intern(&url("http://example.com/a.js#part"));
        assert_ne!(plain, tagged);
    }

    #[test]
    fn test_exports_identity_survives_reintern() {
        let mut registry = Registry::new();
        let a = registry.intern(&url("http://example.com/a.js"));
        let first = Value::Object(registry.get(a).exports.clone());

        let again = registry.intern(&url("http://example.com/a.js"));
        let second = Value::Object(registry.get(again).exports.clone());
        assert!(Value::same_identity(&first, &second));
    }

    #[test]
    fn test_synthetic_records_escape_lookup() {
        let mut registry = Registry::new();
        let doc = url("http://example.com/index.html");
        let top = registry.insert_synthetic(doc.clone());
        assert!(registry.get(top).synthetic);
        assert_eq!(registry.lookup(&doc), None);

        // A later synthetic record with the same base is its own module.
        let other = registry.insert_synthetic(doc);
        assert_ne!(top, other);
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut registry = Registry::new();
        registry.intern(&url("http://example.com/a.js"));
        registry.insert_synthetic(url("http://example.com/index.html"));
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.lookup(&url("http://example.com/a.js")), None);
    }
}
