use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Packaging value that marks an artifact as a build plugin.
pub const PLUGIN_PACKAGING: &str = "maven-plugin";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Mirrors the local artifact store on disk.
    Local,
    /// Local cache of an index published by a remote repository.
    Remote,
    /// Artifacts produced by projects open in the host workspace.
    Workspace,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Local => "local",
            IndexKind::Remote => "remote",
            IndexKind::Workspace => "workspace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(IndexKind::Local),
            "remote" => Some(IndexKind::Remote),
            "workspace" => Some(IndexKind::Workspace),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and configuration of one index context.
///
/// `name` and `kind` are fixed at construction; everything else may be
/// reconfigured by the owning registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    name: String,
    kind: IndexKind,
    pub repository_directory: Option<PathBuf>,
    pub repository_url: Option<String>,
    pub index_update_url: Option<String>,
    pub is_minimal: bool,
    /// Millis since the epoch of the last successful populate.
    pub last_update_time: Option<u64>,
    /// `true` until the index has been populated once.
    pub is_fresh: bool,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            name: name.into(),
            kind,
            repository_directory: None,
            repository_url: None,
            index_update_url: None,
            is_minimal: false,
            last_update_time: None,
            is_fresh: true,
        }
    }

    pub fn local(name: impl Into<String>, repository_directory: impl Into<PathBuf>) -> Self {
        let repository_directory = repository_directory.into();
        let mut info = Self::new(name, IndexKind::Local);
        info.repository_url = Some(format!("file://{}", repository_directory.display()));
        info.repository_directory = Some(repository_directory);
        info
    }

    pub fn remote(
        name: impl Into<String>,
        repository_url: impl Into<String>,
        index_update_url: Option<String>,
    ) -> Self {
        let mut info = Self::new(name, IndexKind::Remote);
        info.repository_url = Some(repository_url.into());
        info.index_update_url = index_update_url;
        info
    }

    pub fn workspace(name: impl Into<String>) -> Self {
        Self::new(name, IndexKind::Workspace)
    }

    #[must_use]
    pub fn minimal(mut self, is_minimal: bool) -> Self {
        self.is_minimal = is_minimal;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn repository_directory(&self) -> Option<&Path> {
        self.repository_directory.as_deref()
    }

    /// Where remote index files are published: the explicit update URL, or
    /// `<repository_url>/.index` by convention.
    pub fn effective_update_url(&self) -> Option<String> {
        if let Some(url) = &self.index_update_url {
            return Some(url.clone());
        }
        let base = self.repository_url.as_deref()?;
        Some(format!("{}/.index", base.trim_end_matches('/')))
    }

    /// Records a successful populate. Timestamps never move backwards here;
    /// [`IndexInfo::reset_update_time`] is the explicit escape hatch used on replace.
    pub fn mark_updated(&mut self, timestamp: u64) {
        self.last_update_time = Some(self.last_update_time.map_or(timestamp, |t| t.max(timestamp)));
        self.is_fresh = false;
    }

    pub fn reset_update_time(&mut self, timestamp: u64) {
        self.last_update_time = Some(timestamp);
        self.is_fresh = false;
    }
}

/// `(groupId, artifactId, version, classifier)` coordinate of one artifact file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub classifier: Option<String>,
}

impl ArtifactKey {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            classifier: None,
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        let classifier = classifier.into();
        self.classifier = (!classifier.is_empty()).then_some(classifier);
        self
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Availability {
    #[default]
    Unknown,
    Present,
    Absent,
}

/// One artifact file as stored in an index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub repository_id: String,
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub packaging: String,
    pub classifier: Option<String>,
    pub extension: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub last_modified: u64,
    /// Lower-case hex SHA-1 of the artifact file.
    pub sha1: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub sources: Availability,
    pub javadoc: Availability,
    pub plugin_prefix: Option<String>,
    pub plugin_goals: Vec<String>,
    /// Fully qualified binary names (`com.acme.Widget`) of contained classes.
    pub class_names: Vec<String>,
}

impl IndexRecord {
    pub fn new(repository_id: impl Into<String>, key: ArtifactKey, packaging: impl Into<String>) -> Self {
        let packaging = packaging.into();
        let extension = extension_for_packaging(&packaging).to_string();
        let file_name = match &key.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                key.artifact_id, key.version, classifier, extension
            ),
            None => format!("{}-{}.{}", key.artifact_id, key.version, extension),
        };
        Self {
            repository_id: repository_id.into(),
            group_id: key.group_id,
            artifact_id: key.artifact_id,
            version: key.version,
            packaging,
            classifier: key.classifier,
            extension,
            file_name,
            ..Self::default()
        }
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            group_id: self.group_id.clone(),
            artifact_id: self.artifact_id.clone(),
            version: self.version.clone(),
            classifier: self.classifier.clone(),
        }
    }

    pub fn matches_key(&self, key: &ArtifactKey) -> bool {
        self.group_id == key.group_id
            && self.artifact_id == key.artifact_id
            && self.version == key.version
            && self.classifier == key.classifier
    }

    pub fn is_plugin(&self) -> bool {
        self.packaging == PLUGIN_PACKAGING
    }
}

fn extension_for_packaging(packaging: &str) -> &str {
    match packaging {
        "" | "bundle" | "maven-plugin" | "ejb" | "eclipse-plugin" => "jar",
        other => other,
    }
}

/// Query-time aggregate of the files sharing one group/artifact (and, for
/// class-name searches, one class) identity. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedArtifact {
    pub group_id: String,
    pub artifact_id: String,
    pub package_name: Option<String>,
    pub class_name: Option<String>,
    pub packaging: Option<String>,
    pub files: Vec<IndexRecord>,
}

impl IndexedArtifact {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        package_name: Option<String>,
        class_name: Option<String>,
        packaging: Option<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            package_name,
            class_name,
            packaging,
            files: Vec::new(),
        }
    }

    /// Grouping key used by searches. Class-level aggregates are keyed by class
    /// and package first so the same class in two artifacts stays separate.
    pub fn grouping_key(&self) -> String {
        match &self.class_name {
            Some(class_name) => format!(
                "{} : {} : {} : {}",
                class_name,
                self.package_name.as_deref().unwrap_or(""),
                self.group_id,
                self.artifact_id
            ),
            None => format!("{} : {}", self.group_id, self.artifact_id),
        }
    }

    /// Adds a file unless an identical file (same repository and coordinate)
    /// is already owned. Returns whether the file was added.
    pub fn add_file(&mut self, record: IndexRecord) -> bool {
        let duplicate = self.files.iter().any(|existing| {
            existing.repository_id == record.repository_id
                && existing.matches_key(&record.key())
                && existing.packaging == record.packaging
        });
        if duplicate {
            return false;
        }
        self.files.push(record);
        true
    }
}

/// Unit of background maintenance work.
///
/// Commands name their target index; the executor resolves the name against
/// the registry when the command runs, so a command queued for an index that
/// has since been unregistered is a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UpdateCommand {
    Reindex { target: String },
    FetchDelta { target: String, force: bool },
    UnpackSnapshot { target: String, force: bool },
}

impl UpdateCommand {
    pub fn target(&self) -> &str {
        match self {
            UpdateCommand::Reindex { target }
            | UpdateCommand::FetchDelta { target, .. }
            | UpdateCommand::UnpackSnapshot { target, .. } => target,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UpdateCommand::Reindex { .. } => "reindex",
            UpdateCommand::FetchDelta { .. } => "fetch-delta",
            UpdateCommand::UnpackSnapshot { .. } => "unpack-snapshot",
        }
    }
}

impl fmt::Display for UpdateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateCommand::Reindex { target } => write!(f, "reindex {target}"),
            UpdateCommand::FetchDelta { target, force } => {
                write!(f, "fetch-delta {target}")?;
                if *force {
                    f.write_str(" (forced)")?;
                }
                Ok(())
            }
            UpdateCommand::UnpackSnapshot { target, force } => {
                write!(f, "unpack-snapshot {target}")?;
                if *force {
                    f.write_str(" (forced)")?;
                }
                Ok(())
            }
        }
    }
}
