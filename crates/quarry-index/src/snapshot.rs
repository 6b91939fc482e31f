//! Immutable-by-convention in-memory inverted index.
//!
//! Readers clone an `Arc<Snapshot>` and evaluate queries against it without
//! holding any lock; writers mutate through `Arc::make_mut`, which copies the
//! snapshot when a reader still holds the previous version. That gives every
//! query a consistent view as of its start.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use quarry_core::{ArtifactKey, IndexRecord};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::query::{Field, Glob, QueryExpr};

pub(crate) type DocId = u64;

type Postings = BTreeSet<DocId>;

/// `(coordinate, packaging)` upsert identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RecordIdentity {
    key: ArtifactKey,
    packaging: String,
}

impl RecordIdentity {
    fn of(record: &IndexRecord) -> Self {
        Self {
            key: record.key(),
            packaging: record.packaging.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct FieldIndex {
    exact: BTreeMap<String, Postings>,
    /// Lower-cased terms, for wildcard matching.
    folded: BTreeMap<String, Postings>,
}

impl FieldIndex {
    fn insert(&mut self, term: &str, doc: DocId) {
        self.exact.entry(term.to_string()).or_default().insert(doc);
        self.folded
            .entry(term.to_lowercase())
            .or_default()
            .insert(doc);
    }

    fn remove(&mut self, term: &str, doc: DocId) {
        remove_posting(&mut self.exact, term, doc);
        remove_posting(&mut self.folded, &term.to_lowercase(), doc);
    }
}

fn remove_posting(map: &mut BTreeMap<String, Postings>, term: &str, doc: DocId) {
    if let Some(postings) = map.get_mut(term) {
        postings.remove(&doc);
        if postings.is_empty() {
            map.remove(term);
        }
    }
}

/// Persisted metadata describing where a store's contents came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Millis since the epoch when the store was first created.
    pub created_at: u64,
    /// Creation timestamp of the last archive or rebuild applied to the store.
    pub timestamp: Option<u64>,
    /// Chain id of the remote publication the store follows.
    pub chain_id: Option<String>,
    /// Last incremental chunk applied from that chain.
    pub last_incremental: Option<u32>,
}

#[derive(Clone, Debug)]
pub(crate) struct Snapshot {
    docs: BTreeMap<DocId, IndexRecord>,
    identities: HashMap<RecordIdentity, DocId>,
    /// Coordinate -> every packaging stored under it.
    by_key: HashMap<ArtifactKey, BTreeSet<DocId>>,
    fields: Vec<FieldIndex>,
    next_doc: DocId,
}

impl Snapshot {
    pub(crate) fn new() -> Self {
        Self {
            docs: BTreeMap::new(),
            identities: HashMap::new(),
            by_key: HashMap::new(),
            fields: vec![FieldIndex::default(); Field::ALL.len()],
            next_doc: 0,
        }
    }

    pub(crate) fn from_records(records: impl IntoIterator<Item = IndexRecord>) -> Self {
        let mut snapshot = Self::new();
        for record in records {
            snapshot.upsert(record);
        }
        snapshot
    }

    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &IndexRecord> {
        self.docs.values()
    }

    /// Inserts `record`, replacing any record with the same coordinate and
    /// packaging.
    pub(crate) fn upsert(&mut self, record: IndexRecord) {
        let identity = RecordIdentity::of(&record);
        if let Some(previous) = self.identities.get(&identity).copied() {
            self.unlink(previous);
        }

        let doc = self.next_doc;
        self.next_doc += 1;

        for field in Field::ALL {
            for term in field.terms(&record) {
                self.fields[field.slot()].insert(term, doc);
            }
        }
        self.by_key.entry(identity.key.clone()).or_default().insert(doc);
        self.identities.insert(identity, doc);
        self.docs.insert(doc, record);
    }

    /// Removes every packaging stored under `key`. Returns how many records
    /// were removed.
    pub(crate) fn remove_key(&mut self, key: &ArtifactKey) -> usize {
        let Some(docs) = self.by_key.get(key).cloned() else {
            return 0;
        };
        for doc in &docs {
            self.unlink(*doc);
        }
        docs.len()
    }

    fn unlink(&mut self, doc: DocId) {
        let Some(record) = self.docs.remove(&doc) else {
            return;
        };
        for field in Field::ALL {
            for term in field.terms(&record) {
                self.fields[field.slot()].remove(term, doc);
            }
        }
        let identity = RecordIdentity::of(&record);
        if let Some(docs) = self.by_key.get_mut(&identity.key) {
            docs.remove(&doc);
            if docs.is_empty() {
                self.by_key.remove(&identity.key);
            }
        }
        self.identities.remove(&identity);
    }

    pub(crate) fn get(&self, key: &ArtifactKey) -> Vec<&IndexRecord> {
        self.by_key
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|doc| self.docs.get(doc))
            .collect()
    }

    pub(crate) fn query(&self, expr: &QueryExpr) -> Result<Vec<IndexRecord>> {
        let docs = self.evaluate(expr)?;
        Ok(docs
            .iter()
            .filter_map(|doc| self.docs.get(doc))
            .cloned()
            .collect())
    }

    fn evaluate(&self, expr: &QueryExpr) -> Result<Postings> {
        match expr {
            QueryExpr::Term(field, value) => Ok(self.fields[field.slot()]
                .exact
                .get(value)
                .cloned()
                .unwrap_or_default()),
            QueryExpr::Prefix(field, value) => {
                if value.is_empty() {
                    return Err(IndexError::InvalidQuery {
                        reason: "empty prefix",
                    });
                }
                Ok(union_range(&self.fields[field.slot()].exact, value, |_| true))
            }
            QueryExpr::Wildcard(field, pattern) => {
                if pattern.is_empty() {
                    return Err(IndexError::InvalidQuery {
                        reason: "empty wildcard pattern",
                    });
                }
                let glob = Glob::new(pattern);
                Ok(union_range(
                    &self.fields[field.slot()].folded,
                    glob.literal_prefix(),
                    |term| glob.matches(term),
                ))
            }
            QueryExpr::And(children) => {
                let mut children = children.iter();
                let Some(first) = children.next() else {
                    return Err(IndexError::InvalidQuery {
                        reason: "empty conjunction",
                    });
                };
                let mut acc = self.evaluate(first)?;
                for child in children {
                    if acc.is_empty() {
                        break;
                    }
                    let next = self.evaluate(child)?;
                    acc.retain(|doc| next.contains(doc));
                }
                Ok(acc)
            }
            QueryExpr::Or(children) => {
                if children.is_empty() {
                    return Err(IndexError::InvalidQuery {
                        reason: "empty disjunction",
                    });
                }
                let mut acc = Postings::new();
                for child in children {
                    acc.extend(self.evaluate(child)?);
                }
                Ok(acc)
            }
        }
    }
}

/// Unions the postings of every term starting with `prefix` that satisfies
/// `accept`.
fn union_range(
    dictionary: &BTreeMap<String, Postings>,
    prefix: &str,
    accept: impl Fn(&str) -> bool,
) -> Postings {
    let mut out = Postings::new();
    let range = dictionary.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
    for (term, postings) in range {
        if !term.starts_with(prefix) {
            break;
        }
        if accept(term) {
            out.extend(postings.iter().copied());
        }
    }
    out
}
