//! Maven repository layout scanner.
//!
//! Artifacts live at `<root>/<group path>/<artifactId>/<version>/<file>` where
//! `<file>` is `<artifactId>-<version>[-<classifier>].<extension>`. One record
//! is produced per artifact file; POMs only produce a record for `pom`
//! packaging, and `sources`/`javadoc` attachments are folded into the main
//! record's availability flags.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};
use std::time::UNIX_EPOCH;

use sha1::{Digest, Sha1};
use walkdir::WalkDir;

use quarry_core::{
    ArtifactKey, Availability, CancellationExt, CancellationToken, Console, IndexRecord,
    ProgressSink, ThrottledProgress,
};

use crate::error::{IndexError, Result};

/// Everything a scan needs besides the root directory.
#[derive(Clone, Copy)]
pub struct ScanContext<'a> {
    /// Recorded as [`IndexRecord::repository_id`] on every produced record.
    pub repository_id: &'a str,
    /// Minimal indexes skip class names and plugin metadata.
    pub minimal: bool,
    pub progress: &'a dyn ProgressSink,
    pub console: &'a dyn Console,
    pub cancel: &'a CancellationToken,
}

const IGNORED_SUFFIXES: &[&str] = &[
    ".sha1",
    ".sha256",
    ".sha512",
    ".md5",
    ".asc",
    ".lastUpdated",
    ".part",
    ".lock",
    ".repositories",
];

const ATTACHMENT_CLASSIFIERS: &[&str] = &["sources", "javadoc"];

/// Walks `root` and hands one record per resolved artifact file to `sink`.
///
/// Failures reading a single artifact are reported to the console and skip
/// that file; only cancellation (checked before every entry) and errors
/// returned by `sink` abort the walk. Returns the number of records produced.
pub fn scan_repository<F>(root: &Path, ctx: &ScanContext<'_>, mut sink: F) -> Result<usize>
where
    F: FnMut(IndexRecord) -> Result<()>,
{
    let progress = ThrottledProgress::per_second(ctx.progress);
    let mut count = 0usize;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    for entry in walker {
        ctx.cancel.check()?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                ctx.console
                    .error(&format!("failed to walk {}: {err}", root.display()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        progress.report(&relative.to_string_lossy());

        match record_for_file(root, path, ctx.repository_id, ctx.minimal) {
            Ok(Some(record)) => {
                sink(record)?;
                count += 1;
            }
            Ok(None) => {}
            Err(err) => {
                ctx.console.error(&err.to_string());
                tracing::debug!(
                    target = "quarry.index",
                    path = %path.display(),
                    error = %err,
                    "skipping unreadable artifact"
                );
            }
        }
    }

    tracing::debug!(
        target = "quarry.index",
        root = %root.display(),
        records = count,
        "repository scan finished"
    );
    Ok(count)
}

/// Coordinates recovered from a file's position in the repository layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutPath {
    pub key: ArtifactKey,
    pub extension: String,
    pub file_name: String,
}

/// Parses `<group path>/<artifactId>/<version>/<file>` relative to `root`.
/// Returns `None` for files that are not artifacts (checksums, signatures,
/// metadata, timestamped snapshots, stray files).
pub fn parse_layout_path(root: &Path, path: &Path) -> Option<LayoutPath> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.len() < 4 {
        return None;
    }

    let file_name = parts[parts.len() - 1];
    let version = parts[parts.len() - 2];
    let artifact_id = parts[parts.len() - 3];
    let group_id = parts[..parts.len() - 3].join(".");

    if file_name.starts_with("maven-metadata")
        || IGNORED_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix))
    {
        return None;
    }

    let rest = file_name.strip_prefix(&format!("{artifact_id}-{version}"))?;
    let (classifier, extension) = if let Some(extension) = rest.strip_prefix('.') {
        (None, extension)
    } else {
        let rest = rest.strip_prefix('-')?;
        let (classifier, extension) = rest.split_once('.')?;
        (Some(classifier), extension)
    };
    if extension.is_empty() || classifier.is_some_and(str::is_empty) {
        return None;
    }

    let mut key = ArtifactKey::new(group_id, artifact_id, version);
    if let Some(classifier) = classifier {
        key = key.with_classifier(classifier);
    }
    Some(LayoutPath {
        key,
        extension: extension.to_string(),
        file_name: file_name.to_string(),
    })
}

/// Builds the record for one file of a repository laid out under `root`.
///
/// `Ok(None)` means the file is not indexed on its own (not an artifact, a
/// POM of a non-`pom` project, or a sources/javadoc attachment).
pub fn record_for_file(
    root: &Path,
    path: &Path,
    repository_id: &str,
    minimal: bool,
) -> Result<Option<IndexRecord>> {
    let Some(layout) = parse_layout_path(root, path) else {
        return Ok(None);
    };
    let classifier = layout.key.classifier.as_deref();
    if classifier.is_some_and(|c| ATTACHMENT_CLASSIFIERS.contains(&c)) {
        return Ok(None);
    }

    let version_dir = path
        .parent()
        .ok_or_else(|| IndexError::artifact(path, "missing parent directory"))?;
    let base_name = format!("{}-{}", layout.key.artifact_id, layout.key.version);
    let pom_path = version_dir.join(format!("{base_name}.pom"));

    let pom = if layout.extension == "pom" && classifier.is_none() {
        let pom = read_pom(path)?;
        if pom.packaging.as_deref().unwrap_or("jar") != "pom" {
            return Ok(None);
        }
        Some(pom)
    } else if classifier.is_none() && pom_path.is_file() {
        match read_pom(&pom_path) {
            Ok(pom) => Some(pom),
            Err(err) => {
                tracing::debug!(
                    target = "quarry.index",
                    path = %pom_path.display(),
                    error = %err,
                    "ignoring unreadable POM"
                );
                None
            }
        }
    } else {
        None
    };

    let packaging = match (&pom, classifier) {
        (Some(pom), None) => {
            let declared = pom.packaging.clone().unwrap_or_else(|| "jar".to_string());
            if extension_matches_packaging(&layout.extension, &declared) {
                declared
            } else {
                layout.extension.clone()
            }
        }
        _ => layout.extension.clone(),
    };

    let meta = std::fs::metadata(path).map_err(|err| IndexError::artifact(path, err))?;
    let mut record = IndexRecord::new(repository_id, layout.key.clone(), packaging);
    record.extension = layout.extension.clone();
    record.file_name = layout.file_name.clone();
    record.size_bytes = meta.len();
    record.last_modified = meta
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as u64);
    record.sha1 = Some(sha1_for_file(path)?);

    if let Some(pom) = pom {
        record.name = pom.name;
        record.description = pom.description;
    }

    if classifier.is_none() {
        record.sources = availability(&version_dir.join(format!("{base_name}-sources.jar")));
        record.javadoc = availability(&version_dir.join(format!("{base_name}-javadoc.jar")));
    }

    if !minimal && record.extension == "jar" {
        let contents = read_jar(path, record.is_plugin())?;
        record.class_names = contents.class_names;
        if let Some(plugin) = contents.plugin {
            record.plugin_prefix = plugin.goal_prefix;
            record.plugin_goals = plugin.goals;
        }
    }

    Ok(Some(record))
}

fn extension_matches_packaging(extension: &str, packaging: &str) -> bool {
    let expected = match packaging {
        "bundle" | "maven-plugin" | "ejb" | "eclipse-plugin" => "jar",
        other => other,
    };
    expected == extension
}

fn availability(path: &Path) -> Availability {
    if path.is_file() {
        Availability::Present
    } else {
        Availability::Absent
    }
}

/// Lower-case hex SHA-1 of `path`, taken from a `<file>.sha1` sidecar when one
/// with a well-formed digest exists.
pub fn sha1_for_file(path: &Path) -> Result<String> {
    let mut sidecar = path.as_os_str().to_os_string();
    sidecar.push(".sha1");
    if let Ok(text) = std::fs::read_to_string(&sidecar) {
        if let Some(digest) = text.split_whitespace().next() {
            if digest.len() == 40 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Ok(digest.to_ascii_lowercase());
            }
        }
    }

    let file = File::open(path).map_err(|err| IndexError::artifact(path, err))?;
    let mut hasher = Sha1::new();
    io::copy(&mut BufReader::new(file), &mut hasher)
        .map_err(|err| IndexError::artifact(path, err))?;
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Default)]
struct PomInfo {
    packaging: Option<String>,
    name: Option<String>,
    description: Option<String>,
}

fn read_pom(path: &Path) -> Result<PomInfo> {
    let contents = std::fs::read_to_string(path).map_err(|err| IndexError::artifact(path, err))?;
    let doc =
        roxmltree::Document::parse(&contents).map_err(|err| IndexError::artifact(path, err))?;
    let project = doc.root_element();
    Ok(PomInfo {
        packaging: child_text(&project, "packaging"),
        name: child_text(&project, "name"),
        description: child_text(&project, "description"),
    })
}

fn child_element<'a>(
    node: &'a roxmltree::Node<'a, 'a>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'a>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_text(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    child_element(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Default)]
struct JarContents {
    class_names: Vec<String>,
    plugin: Option<PluginDescriptor>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PluginDescriptor {
    goal_prefix: Option<String>,
    goals: Vec<String>,
}

const PLUGIN_DESCRIPTOR: &str = "META-INF/maven/plugin.xml";

fn read_jar(path: &Path, is_plugin: bool) -> Result<JarContents> {
    let file = File::open(path).map_err(|err| IndexError::artifact(path, err))?;
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|err| IndexError::artifact(path, err))?;

    let mut class_names: Vec<String> = archive
        .file_names()
        .filter_map(class_name_for_entry)
        .collect();
    class_names.sort();
    class_names.dedup();

    let plugin = if is_plugin {
        match archive.by_name(PLUGIN_DESCRIPTOR) {
            Ok(mut entry) => {
                let mut xml = String::new();
                entry
                    .read_to_string(&mut xml)
                    .map_err(|err| IndexError::artifact(path, err))?;
                Some(parse_plugin_descriptor(&xml).map_err(|err| IndexError::artifact(path, err))?)
            }
            Err(zip::result::ZipError::FileNotFound) => None,
            Err(err) => return Err(IndexError::artifact(path, err)),
        }
    } else {
        None
    };

    Ok(JarContents {
        class_names,
        plugin,
    })
}

/// `com/acme/Widget.class` -> `com.acme.Widget`. Nested, anonymous and
/// metadata classes are not indexed.
fn class_name_for_entry(entry: &str) -> Option<String> {
    let internal = entry.strip_suffix(".class")?;
    if internal.starts_with("META-INF/") || internal.contains('$') {
        return None;
    }
    if internal == "module-info" || internal == "package-info" || internal.ends_with("/package-info") {
        return None;
    }
    Some(internal.replace('/', "."))
}

fn parse_plugin_descriptor(xml: &str) -> std::result::Result<PluginDescriptor, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let plugin = doc.root_element();
    let goals = child_element(&plugin, "mojos")
        .map(|mojos| {
            mojos
                .children()
                .filter(|n| n.is_element() && n.has_tag_name("mojo"))
                .filter_map(|mojo| child_text(&mojo, "goal"))
                .collect()
        })
        .unwrap_or_default();
    Ok(PluginDescriptor {
        goal_prefix: child_text(&plugin, "goalPrefix"),
        goals,
    })
}
