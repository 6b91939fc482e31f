//! The query algebra evaluated by [`crate::IndexStore::query`].

use std::fmt;

use serde::{Deserialize, Serialize};

use quarry_core::IndexRecord;

/// Searchable fields of an [`IndexRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    GroupId,
    ArtifactId,
    Version,
    Packaging,
    Classifier,
    Sha1,
    PluginPrefix,
    /// Multi-valued: one entry per contained class, indexed under both its
    /// fully qualified name and its simple name.
    ClassNames,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::GroupId,
        Field::ArtifactId,
        Field::Version,
        Field::Packaging,
        Field::Classifier,
        Field::Sha1,
        Field::PluginPrefix,
        Field::ClassNames,
    ];

    pub(crate) fn slot(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::GroupId => "groupId",
            Field::ArtifactId => "artifactId",
            Field::Version => "version",
            Field::Packaging => "packaging",
            Field::Classifier => "classifier",
            Field::Sha1 => "sha1",
            Field::PluginPrefix => "pluginPrefix",
            Field::ClassNames => "classNames",
        }
    }

    /// Terms a record contributes to this field's dictionary.
    pub(crate) fn terms(self, record: &IndexRecord) -> Vec<&str> {
        match self {
            Field::GroupId => vec![record.group_id.as_str()],
            Field::ArtifactId => vec![record.artifact_id.as_str()],
            Field::Version => vec![record.version.as_str()],
            Field::Packaging => vec![record.packaging.as_str()],
            Field::Classifier => record.classifier.as_deref().into_iter().collect(),
            Field::Sha1 => record.sha1.as_deref().into_iter().collect(),
            Field::PluginPrefix => record.plugin_prefix.as_deref().into_iter().collect(),
            Field::ClassNames => {
                let mut out = Vec::with_capacity(record.class_names.len() * 2);
                for fqn in &record.class_names {
                    out.push(fqn.as_str());
                    let simple = simple_name(fqn);
                    if simple.len() != fqn.len() {
                        out.push(simple);
                    }
                }
                out
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `com.acme.Widget` -> `Widget`.
pub fn simple_name(fqn: &str) -> &str {
    fqn.rsplit_once('.').map_or(fqn, |(_, simple)| simple)
}

/// `com.acme.Widget` -> `com.acme` (empty for the default package).
pub fn package_name(fqn: &str) -> &str {
    fqn.rsplit_once('.').map_or("", |(package, _)| package)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryExpr {
    /// Exact, case-sensitive match.
    Term(Field, String),
    /// Case-sensitive prefix match.
    Prefix(Field, String),
    /// Case-insensitive glob; `*` matches any run of characters.
    Wildcard(Field, String),
    And(Vec<QueryExpr>),
    Or(Vec<QueryExpr>),
}

impl QueryExpr {
    pub fn term(field: Field, value: impl Into<String>) -> Self {
        QueryExpr::Term(field, value.into())
    }

    pub fn prefix(field: Field, value: impl Into<String>) -> Self {
        QueryExpr::Prefix(field, value.into())
    }

    pub fn wildcard(field: Field, pattern: impl Into<String>) -> Self {
        QueryExpr::Wildcard(field, pattern.into())
    }

    /// `Term`, unless `value` contains a `*`, in which case the equivalent
    /// wildcard is produced.
    pub fn term_or_wildcard(field: Field, value: &str) -> Self {
        if value.contains('*') {
            QueryExpr::Wildcard(field, value.to_string())
        } else {
            QueryExpr::Term(field, value.to_string())
        }
    }
}

/// Compiled form of a `*` glob, matched against lower-cased text.
#[derive(Clone, Debug)]
pub struct Glob {
    parts: Vec<String>,
    anchored_start: bool,
    anchored_end: bool,
}

impl Glob {
    pub fn new(pattern: &str) -> Self {
        let lowered = pattern.to_lowercase();
        let anchored_start = !lowered.starts_with('*');
        let anchored_end = !lowered.ends_with('*');
        let parts = lowered
            .split('*')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            parts,
            anchored_start,
            anchored_end,
        }
    }

    /// The literal text every match must start with (already lower-cased).
    pub(crate) fn literal_prefix(&self) -> &str {
        if self.anchored_start {
            self.parts.first().map_or("", String::as_str)
        } else {
            ""
        }
    }

    /// `text` must already be lower-cased.
    pub fn matches(&self, text: &str) -> bool {
        if self.parts.is_empty() {
            // Pattern made only of `*` (or empty): matches anything, or only
            // the empty string when there was no star at all.
            return !(self.anchored_start && self.anchored_end) || text.is_empty();
        }

        let mut rest = text;
        let last = self.parts.len() - 1;
        for (idx, part) in self.parts.iter().enumerate() {
            if idx == 0 && self.anchored_start {
                let Some(stripped) = rest.strip_prefix(part.as_str()) else {
                    return false;
                };
                rest = stripped;
                if idx == last && self.anchored_end {
                    return rest.is_empty();
                }
                continue;
            }

            if idx == last && self.anchored_end {
                return rest.ends_with(part.as_str());
            }

            match rest.find(part.as_str()) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
        true
    }
}
