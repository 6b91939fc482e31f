//! Query federation across registered indexes.

use std::collections::BTreeMap;
use std::sync::Arc;

use quarry_core::{ArtifactKey, Console, IndexKind, IndexRecord, IndexedArtifact, PLUGIN_PACKAGING};
use quarry_index::{package_name, simple_name, Field, Glob, QueryExpr};

use crate::registry::IndexRegistry;

/// Class-name terms shorter than this (ignoring `*`) are matched against
/// coordinates instead, and results are grouped by coordinate.
pub const MIN_CLASS_NAME_TERM_LEN: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchType {
    ByCoordinate,
    ByClassName,
    ByChecksumPrefix,
    ByPackaging,
    ByPluginPrefix,
}

/// A search translated into a store query, plus how to shape its hits.
#[derive(Clone, Debug)]
pub struct SearchPlan {
    pub expr: QueryExpr,
    /// Set when hits are grouped per matching class.
    class_pattern: Option<String>,
}

impl SearchPlan {
    /// `None` for a blank term.
    pub fn new(search: SearchType, term: &str) -> Option<Self> {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }

        let plan = match search {
            SearchType::ByCoordinate => Self::coordinates(term),
            SearchType::ByClassName => {
                let significant = term.chars().filter(|c| *c != '*').count();
                if significant < MIN_CLASS_NAME_TERM_LEN {
                    Self::coordinates(term)
                } else {
                    let pattern = starred(term);
                    Self {
                        expr: QueryExpr::wildcard(Field::ClassNames, pattern.clone()),
                        class_pattern: Some(pattern),
                    }
                }
            }
            SearchType::ByChecksumPrefix => Self::plain(QueryExpr::prefix(
                Field::Sha1,
                term.to_ascii_lowercase(),
            )),
            SearchType::ByPackaging => Self::plain(QueryExpr::term(Field::Packaging, term)),
            SearchType::ByPluginPrefix => {
                let plugins = QueryExpr::term(Field::Packaging, PLUGIN_PACKAGING);
                if term == "*" {
                    Self::plain(plugins)
                } else {
                    let pattern = starred(term);
                    Self::plain(QueryExpr::And(vec![
                        QueryExpr::wildcard(Field::GroupId, pattern.clone()),
                        QueryExpr::wildcard(Field::ArtifactId, pattern),
                        plugins,
                    ]))
                }
            }
        };
        Some(plan)
    }

    fn coordinates(term: &str) -> Self {
        Self::plain(QueryExpr::Or(vec![
            QueryExpr::term_or_wildcard(Field::GroupId, term),
            QueryExpr::term_or_wildcard(Field::ArtifactId, term),
            QueryExpr::prefix(Field::Sha1, term.to_ascii_lowercase()),
        ]))
    }

    fn plain(expr: QueryExpr) -> Self {
        Self {
            expr,
            class_pattern: None,
        }
    }

    pub fn groups_by_class(&self) -> bool {
        self.class_pattern.is_some()
    }

    /// Folds `hits` into `results`, keyed by [`IndexedArtifact::grouping_key`].
    pub fn collect_into(
        &self,
        hits: Vec<IndexRecord>,
        results: &mut BTreeMap<String, IndexedArtifact>,
    ) {
        let glob = self.class_pattern.as_deref().map(Glob::new);
        for record in hits {
            match &glob {
                Some(glob) => {
                    for fqn in &record.class_names {
                        let simple = simple_name(fqn);
                        if !glob.matches(&simple.to_lowercase()) && !glob.matches(&fqn.to_lowercase()) {
                            continue;
                        }
                        let package = package_name(fqn);
                        let artifact = IndexedArtifact::new(
                            record.group_id.clone(),
                            record.artifact_id.clone(),
                            (!package.is_empty()).then(|| package.to_string()),
                            Some(simple.to_string()),
                            Some(record.packaging.clone()),
                        );
                        insert(results, artifact, record.clone());
                    }
                }
                None => {
                    let artifact = IndexedArtifact::new(
                        record.group_id.clone(),
                        record.artifact_id.clone(),
                        None,
                        None,
                        Some(record.packaging.clone()),
                    );
                    insert(results, artifact, record);
                }
            }
        }
    }
}

fn insert(results: &mut BTreeMap<String, IndexedArtifact>, artifact: IndexedArtifact, record: IndexRecord) {
    results
        .entry(artifact.grouping_key())
        .or_insert(artifact)
        .add_file(record);
}

fn starred(term: &str) -> String {
    if term.ends_with('*') {
        term.to_string()
    } else {
        format!("{term}*")
    }
}

/// Runs lookups and searches over the indexes of an [`IndexRegistry`].
#[derive(Clone)]
pub struct CompositeIndex {
    registry: Arc<IndexRegistry>,
    console: Arc<dyn Console>,
}

impl CompositeIndex {
    pub fn new(registry: Arc<IndexRegistry>, console: Arc<dyn Console>) -> Self {
        Self { registry, console }
    }

    /// Registered index names, workspace first, then local, then remote.
    pub fn default_priority(&self) -> Vec<String> {
        let mut infos = self.registry.all();
        infos.sort_by_key(|info| match info.kind() {
            IndexKind::Workspace => 0,
            IndexKind::Local => 1,
            IndexKind::Remote => 2,
        });
        infos.into_iter().map(|info| info.name().to_string()).collect()
    }

    /// The first record for `key` in `priority` order. Unknown names are
    /// skipped.
    pub fn find_artifact<S: AsRef<str>>(&self, key: &ArtifactKey, priority: &[S]) -> Option<IndexRecord> {
        priority.iter().find_map(|name| {
            let store = self.registry.store(name.as_ref())?;
            store.get(key).into_iter().next()
        })
    }

    /// The first record whose SHA-1 is `sha1`, in `priority` order.
    pub fn identify<S: AsRef<str>>(&self, sha1: &str, priority: &[S]) -> Option<IndexRecord> {
        let expr = QueryExpr::term(Field::Sha1, sha1.trim().to_ascii_lowercase());
        priority
            .iter()
            .find_map(|name| self.query_one(name.as_ref(), &expr).into_iter().next())
    }

    /// Union of `search` over every registered index.
    pub fn search(&self, search: SearchType, term: &str) -> BTreeMap<String, IndexedArtifact> {
        let names: Vec<String> = self
            .registry
            .all()
            .into_iter()
            .map(|info| info.name().to_string())
            .collect();
        self.search_in(names.as_slice(), search, term)
    }

    /// Union of `search` over the named indexes. An index whose query fails
    /// is logged and skipped.
    pub fn search_in<S: AsRef<str>>(
        &self,
        names: &[S],
        search: SearchType,
        term: &str,
    ) -> BTreeMap<String, IndexedArtifact> {
        let mut results = BTreeMap::new();
        let Some(plan) = SearchPlan::new(search, term) else {
            return results;
        };
        for name in names {
            let hits = self.query_one(name.as_ref(), &plan.expr);
            plan.collect_into(hits, &mut results);
        }
        results
    }

    fn query_one(&self, name: &str, expr: &QueryExpr) -> Vec<IndexRecord> {
        let Some(store) = self.registry.store(name) else {
            return Vec::new();
        };
        match store.query(expr) {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(
                    target = "quarry.manager",
                    index = name,
                    error = %err,
                    "query failed; skipping index"
                );
                self.console
                    .error(&format!("search in index {name} failed: {err}"));
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for CompositeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeIndex")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
