//! Key-value memory façade.
//!
//! Durable memory is an external collaborator; the core only speaks this
//! contract and never opens files or databases itself. The in-memory
//! implementation backs tests and dev mode.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Addressing scope for memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Project(String),
    Agent(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Project(path) => write!(f, "project:{path}"),
            Scope::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

impl Scope {
    /// Parse the `global` / `project:<path>` / `agent:<id>` notation.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "global" {
            return Some(Scope::Global);
        }
        if let Some(path) = s.strip_prefix("project:") {
            return Some(Scope::Project(path.to_string()));
        }
        if let Some(id) = s.strip_prefix("agent:") {
            return Some(Scope::Agent(id.to_string()));
        }
        None
    }
}

/// A scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    pub score: f64,
    pub source: String,
}

/// The consumed persistence contract.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, scope: &Scope) -> Result<Option<String>>;
    async fn put(&self, scope: &Scope, content: &str) -> Result<()>;
    async fn append(&self, scope: &Scope, entry: &str) -> Result<()>;
    async fn delete(&self, scope: &Scope) -> Result<()>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-local [`MemoryStore`] for tests and dev mode.
///
/// `search` scores by naive term overlap; good enough to exercise callers,
/// not a substitute for the real memory service.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<Scope, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, scope: &Scope) -> Result<Option<String>> {
        Ok(self.entries.read().get(scope).cloned())
    }

    async fn put(&self, scope: &Scope, content: &str) -> Result<()> {
        self.entries
            .write()
            .insert(scope.clone(), content.to_string());
        Ok(())
    }

    async fn append(&self, scope: &Scope, entry: &str) -> Result<()> {
        let mut entries = self.entries.write();
        match entries.get_mut(scope) {
            Some(existing) => {
                if !existing.is_empty() {
                    existing.push('\n');
                }
                existing.push_str(entry);
            }
            None => {
                entries.insert(scope.clone(), entry.to_string());
            }
        }
        Ok(())
    }

    async fn delete(&self, scope: &Scope) -> Result<()> {
        self.entries.write().remove(scope);
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter_map(|(scope, content)| {
                let lower = content.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(**t)).count();
                if matched == 0 {
                    return None;
                }
                Some(SearchHit {
                    content: content.clone(),
                    score: matched as f64 / terms.len() as f64,
                    source: scope.to_string(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = InMemoryStore::new();
        let scope = Scope::Agent("a1".into());
        store.put(&scope, "remember this").await.unwrap();
        assert_eq!(
            store.get(&scope).await.unwrap().as_deref(),
            Some("remember this")
        );
    }

    #[tokio::test]
    async fn append_joins_with_newline() {
        let store = InMemoryStore::new();
        let scope = Scope::Global;
        store.append(&scope, "first").await.unwrap();
        store.append(&scope, "second").await.unwrap();
        assert_eq!(
            store.get(&scope).await.unwrap().as_deref(),
            Some("first\nsecond")
        );
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = InMemoryStore::new();
        let scope = Scope::Project("/tmp/p".into());
        store.put(&scope, "x").await.unwrap();
        store.delete(&scope).await.unwrap();
        assert!(store.get(&scope).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_ranks_by_term_overlap() {
        let store = InMemoryStore::new();
        store
            .put(&Scope::Agent("a".into()), "rust async streams")
            .await
            .unwrap();
        store
            .put(&Scope::Agent("b".into()), "rust only")
            .await
            .unwrap();
        let hits = store.search("rust async", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].source, "agent:a");
    }

    #[test]
    fn scope_parse_roundtrip() {
        for s in ["global", "project:/x/y", "agent:a-7"] {
            assert_eq!(Scope::parse(s).unwrap().to_string(), s);
        }
        assert!(Scope::parse("bogus").is_none());
    }
}
