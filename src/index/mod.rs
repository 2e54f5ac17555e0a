//! Component index resolution
//!
//! The index document enumerates all renderable components/stories with
//! their source metadata. This module fetches it over HTTP, keeps its
//! document order (the order runs resolve in), filters to test-eligible
//! entries, and joins import paths against the engine's discovered
//! modules to produce module specs.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::common::{Error, Result};
use crate::engine::ModuleSpec;

/// Tag marking an index entry as executable by the test runner
const TEST_TAG: &str = "test";

/// One entry of the component index
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestIndexEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Display name; test-name filters anchor on this
    pub name: String,
    pub title: String,
    pub import_path: String,
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl TestIndexEntry {
    /// Whether this entry is eligible for execution
    pub fn is_test(&self) -> bool {
        self.tags.contains(TEST_TAG)
    }
}

/// Parsed index document
#[derive(Debug, Clone, Deserialize)]
pub struct TestIndex {
    pub v: u32,
    #[serde(deserialize_with = "entries_in_document_order")]
    pub entries: Vec<TestIndexEntry>,
}

/// Deserialize the id→entry mapping into a Vec preserving document order
///
/// The JSON map key is authoritative for the entry id.
fn entries_in_document_order<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<TestIndexEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<TestIndexEntry>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of story id to index entry")
        }

        fn visit_map<A: MapAccess<'de>>(
            self,
            mut map: A,
        ) -> std::result::Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((id, mut entry)) = map.next_entry::<String, TestIndexEntry>()? {
                entry.id = id;
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

impl TestIndex {
    /// Parse an index document from JSON text
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Test-eligible entries, in document order
    pub fn test_entries(&self) -> impl Iterator<Item = &TestIndexEntry> {
        self.entries.iter().filter(|e| e.is_test())
    }

    /// Select eligible entries matching `ids`, in index order
    ///
    /// Ids absent from the index are logged and dropped.
    pub fn select(&self, ids: &[String]) -> Vec<&TestIndexEntry> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let selected: Vec<_> = self
            .test_entries()
            .filter(|e| wanted.contains(e.id.as_str()))
            .collect();

        if selected.len() < wanted.len() {
            let found: HashSet<&str> = selected.iter().map(|e| e.id.as_str()).collect();
            for id in ids {
                if !found.contains(id.as_str()) {
                    tracing::warn!(id = %id, "Story id not present in test index");
                }
            }
        }

        selected
    }
}

/// Resolve selected entries to module specs
///
/// Entries are grouped by import path (first-occurrence order) and joined
/// against the engine's discovered specs by path suffix. Import paths
/// with no discovered module are logged and skipped - module discovery is
/// the engine's call, not ours.
pub fn module_specs_for(
    entries: &[&TestIndexEntry],
    discovered: &[ModuleSpec],
) -> Vec<ModuleSpec> {
    let mut seen = HashSet::new();
    let mut specs = Vec::new();

    for entry in entries {
        if !seen.insert(entry.import_path.as_str()) {
            continue;
        }
        match discovered
            .iter()
            .find(|spec| matches_import_path(&spec.module_id, &entry.import_path))
        {
            Some(spec) => specs.push(spec.clone()),
            None => {
                tracing::warn!(
                    import_path = %entry.import_path,
                    "No discovered module for import path"
                );
            }
        }
    }

    specs
}

/// Suffix match on whole path components
fn matches_import_path(module_id: &Path, import_path: &str) -> bool {
    let relative = import_path.trim_start_matches("./");
    let module = module_id.to_string_lossy();
    module == relative || module.ends_with(&format!("/{}", relative))
}

/// Fetches and parses index documents
pub struct IndexResolver {
    http: reqwest::Client,
}

impl IndexResolver {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Fetch and parse the index document at `index_url`
    ///
    /// Network and parse failures surface as `IndexFetch`; retry policy
    /// belongs to the caller.
    pub async fn resolve(&self, index_url: &str) -> Result<TestIndex> {
        tracing::debug!(url = %index_url, "Fetching test index");
        let response = self
            .http
            .get(index_url)
            .send()
            .await
            .map_err(|e| Error::index_fetch(index_url, e))?
            .error_for_status()
            .map_err(|e| Error::index_fetch(index_url, e))?;

        let index: TestIndex = response
            .json()
            .await
            .map_err(|e| Error::index_fetch(index_url, e))?;

        tracing::debug!(entries = index.entries.len(), "Test index resolved");
        Ok(index)
    }
}

impl Default for IndexResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_index() -> TestIndex {
        TestIndex::parse(
            r#"{
                "v": 5,
                "entries": {
                    "button--one": {
                        "type": "story",
                        "id": "button--one",
                        "name": "One",
                        "title": "Button",
                        "importPath": "./src/Button.stories.tsx",
                        "tags": ["test", "dev"]
                    },
                    "button--two": {
                        "type": "story",
                        "id": "button--two",
                        "name": "Two",
                        "title": "Button",
                        "importPath": "./src/Button.stories.tsx",
                        "tags": ["test"]
                    },
                    "card--docs": {
                        "type": "docs",
                        "id": "card--docs",
                        "name": "Docs",
                        "title": "Card",
                        "importPath": "./src/Card.mdx",
                        "tags": ["docs"]
                    },
                    "card--basic": {
                        "type": "story",
                        "id": "card--basic",
                        "name": "Basic",
                        "title": "Card",
                        "importPath": "./src/Card.stories.tsx",
                        "tags": ["test"]
                    }
                }
            }"#,
        )
        .unwrap()
    }

    fn discovered() -> Vec<ModuleSpec> {
        vec![
            ModuleSpec {
                project: "storybook".into(),
                module_id: PathBuf::from("/app/src/Button.stories.tsx"),
            },
            ModuleSpec {
                project: "storybook".into(),
                module_id: PathBuf::from("/app/src/Card.stories.tsx"),
            },
        ]
    }

    #[test]
    fn parse_preserves_document_order() {
        let index = sample_index();
        let ids: Vec<_> = index.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["button--one", "button--two", "card--docs", "card--basic"]
        );
    }

    #[test]
    fn only_test_tagged_entries_are_eligible() {
        let index = sample_index();
        let names: Vec<_> = index.test_entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["One", "Two", "Basic"]);
    }

    #[test]
    fn select_uses_index_order_not_request_order() {
        let index = sample_index();
        let selected = index.select(&["card--basic".into(), "button--one".into()]);
        let ids: Vec<_> = selected.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["button--one", "card--basic"]);
    }

    #[test]
    fn select_drops_unknown_and_untagged_ids() {
        let index = sample_index();
        let selected = index.select(&["card--docs".into(), "missing--id".into()]);
        assert!(selected.is_empty());
    }

    #[test]
    fn specs_group_by_import_path() {
        let index = sample_index();
        let selected = index.select(&[
            "button--one".into(),
            "button--two".into(),
            "card--basic".into(),
        ]);
        let specs = module_specs_for(&selected, &discovered());
        let paths: Vec<_> = specs.iter().map(|s| s.module_id.clone()).collect();
        // Both button stories share one module
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/app/src/Button.stories.tsx"),
                PathBuf::from("/app/src/Card.stories.tsx"),
            ]
        );
    }

    #[test]
    fn suffix_match_requires_component_boundary() {
        assert!(matches_import_path(
            Path::new("/app/src/Button.stories.tsx"),
            "./src/Button.stories.tsx"
        ));
        // "othersrc" must not match "src"
        assert!(!matches_import_path(
            Path::new("/app/othersrc/Button.stories.tsx"),
            "./src/Button.stories.tsx"
        ));
    }

    #[test]
    fn unmatched_import_paths_are_skipped() {
        let index = sample_index();
        let selected = index.select(&["card--basic".into()]);
        let specs = module_specs_for(&selected, &[]);
        assert!(specs.is_empty());
    }
}
