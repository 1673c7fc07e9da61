//! Specifier resolution
//!
//! Canonicalizes dependency specifiers against a referrer URL. The canonical
//! form is the registry key, so every syntactic variant of the same target
//! (`./y.js`, `y.js`, `../y/y.js`, `z/../y.js`) dedupes to one module.
//! Fragments are part of module identity; queries pass through verbatim.

use crate::error::{Error, Result};
use url::Url;

/// Specifiers the loader satisfies itself instead of fetching a URL.
/// Recognized literally, before URL resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoDep {
    /// Dynamic-require function bound to the requesting module
    Require,
    /// The requesting module's own exports container
    Exports,
    /// `{ url }` metadata for the requesting module
    Meta,
}

impl PseudoDep {
    /// Match a raw specifier against the pseudo-dependency literals
    pub fn from_specifier(specifier: &str) -> Option<PseudoDep> {
        match specifier {
            "require" => Some(PseudoDep::Require),
            "exports" => Some(PseudoDep::Exports),
            "meta" => Some(PseudoDep::Meta),
            _ => None,
        }
    }
}

/// Resolve a specifier as a relative reference against the referrer URL.
///
/// Uses the WHATWG URL algorithm, which collapses dot-segments and keeps
/// fragments and query strings intact. Absolute and protocol-relative
/// specifiers resolve the way the host's own resolver would treat them.
pub fn resolve_specifier(specifier: &str, referrer: &Url) -> Result<Url> {
    referrer
        .join(specifier)
        .map_err(|_| Error::resolve_error(specifier, referrer.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referrer() -> Url {
        Url::parse("http://example.com/app/main.js").unwrap()
    }

    #[test]
    fn test_syntactic_variants_share_one_key() {
        let base = referrer();
        let expected = "http://example.com/app/y.js";
        for spec in ["./y.js", "y.js", "../app/y.js", "z/../y.js"] {
            let resolved = resolve_specifier(spec, &base).unwrap();
            assert_eq!(resolved.as_str(), expected, "specifier {spec}");
        }
    }

    #[test]
    fn test_parent_and_rooted_references() {
        let base = referrer();
        assert_eq!(
            resolve_specifier("../x.js", &base).unwrap().as_str(),
            "http://example.com/x.js"
        );
        assert_eq!(
            resolve_specifier("/lib/x.js", &base).unwrap().as_str(),
            "http://example.com/lib/x.js"
        );
    }

    #[test]
    fn test_fragment_is_part_of_identity() {
        let base = referrer();
        let plain = resolve_specifier("./y.js", &base).unwrap();
        let tagged = resolve_specifier("./y.js#part", &base).unwrap();
        assert_ne!(plain.as_str(), tagged.as_str());
        assert_eq!(tagged.fragment(), Some("part"));
    }

    #[test]
    fn test_query_passes_through_verbatim() {
        let resolved = resolve_specifier("./y.js?v=1&b=%20x", &referrer()).unwrap();
        assert_eq!(resolved.query(), Some("v=1&b=%20x"));
    }

    #[test]
    fn test_absolute_and_protocol_relative() {
        let base = referrer();
        assert_eq!(
            resolve_specifier("https://cdn.example.org/lib.js", &base)
                .unwrap()
                .as_str(),
            "https://cdn.example.org/lib.js"
        );
        assert_eq!(
            resolve_specifier("//cdn.example.org/lib.js", &base)
                .unwrap()
                .as_str(),
            "http://cdn.example.org/lib.js"
        );
    }

    #[test]
    fn test_pseudo_dependencies_are_literal() {
        assert_eq!(PseudoDep::from_specifier("require"), Some(PseudoDep::Require));
        assert_eq!(PseudoDep::from_specifier("exports"), Some(PseudoDep::Exports));
        assert_eq!(PseudoDep::from_specifier("meta"), Some(PseudoDep::Meta));
        assert_eq!(PseudoDep::from_specifier("./require"), None);
        assert_eq!(PseudoDep::from_specifier("exports.js"), None);
    }
}
