//! Shared diagnostic cache.
//!
//! Each backend publishes diagnostics independently, but the client must
//! see one consolidated list per document. The cache keeps the latest list
//! per `(document, source)` pair so that a backend clearing its own
//! diagnostics cannot erase another backend's.

use std::collections::{BTreeMap, HashMap};

use lsp_types::{Diagnostic, Url};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct DiagnosticCache {
    entries: RwLock<HashMap<Url, BTreeMap<String, Vec<Diagnostic>>>>,
}

impl DiagnosticCache {
    /// Replace the diagnostics recorded for `(uri, source)`.
    ///
    /// Storing an empty list erases the source's previous diagnostics from
    /// later reads.
    pub async fn set(&self, uri: Url, source: String, diagnostics: Vec<Diagnostic>) {
        let mut entries = self.entries.write().await;
        entries.entry(uri).or_default().insert(source, diagnostics);
    }

    /// All diagnostics currently recorded for `uri`, concatenated across
    /// sources in source-name order. Callers are not promised a stable
    /// order between calls.
    pub async fn get(&self, uri: &Url) -> Vec<Diagnostic> {
        let entries = self.entries.read().await;
        let mut results = Vec::new();
        if let Some(sources) = entries.get(uri) {
            for diagnostics in sources.values() {
                results.extend(diagnostics.iter().cloned());
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostic(message: &str) -> Diagnostic {
        Diagnostic {
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn uri() -> Url {
        Url::parse("file:///main.rs").unwrap()
    }

    #[tokio::test]
    async fn get_concatenates_all_sources() {
        let cache = DiagnosticCache::default();
        cache
            .set(uri(), "clangd".to_string(), vec![diagnostic("m1")])
            .await;
        cache
            .set(uri(), "tsserver".to_string(), vec![diagnostic("m2")])
            .await;

        let all = cache.get(&uri()).await;
        let messages: Vec<_> = all.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn set_replaces_only_its_own_source() {
        let cache = DiagnosticCache::default();
        cache
            .set(uri(), "a".to_string(), vec![diagnostic("stale")])
            .await;
        cache
            .set(uri(), "b".to_string(), vec![diagnostic("kept")])
            .await;
        cache
            .set(uri(), "a".to_string(), vec![diagnostic("fresh")])
            .await;

        let messages: Vec<_> = cache
            .get(&uri())
            .await
            .into_iter()
            .map(|d| d.message)
            .collect();
        assert_eq!(messages, vec!["fresh", "kept"]);
    }

    #[tokio::test]
    async fn empty_list_erases_previous_diagnostics() {
        let cache = DiagnosticCache::default();
        cache
            .set(uri(), "a".to_string(), vec![diagnostic("old")])
            .await;
        cache.set(uri(), "a".to_string(), Vec::new()).await;

        assert!(cache.get(&uri()).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_uri_reads_empty() {
        let cache = DiagnosticCache::default();
        assert!(cache.get(&uri()).await.is_empty());
    }
}
