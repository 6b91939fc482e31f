//! `indexes.properties`: the registry's record of index contexts across
//! restarts.
//!
//! ```text
//! index.central.kind=remote
//! index.central.repository-url=https\://repo.example.com/maven2
//! index.central.last-update=1700000000000
//! index.central.fresh=false
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use quarry_core::{IndexInfo, IndexKind};
use quarry_properties::Properties;

use crate::error::{ManagerError, Result};

pub const REGISTRY_FILE: &str = "indexes.properties";

const PREFIX: &str = "index.";
const KIND: &str = "kind";
const REPOSITORY_DIRECTORY: &str = "repository-directory";
const REPOSITORY_URL: &str = "repository-url";
const INDEX_UPDATE_URL: &str = "index-update-url";
const MINIMAL: &str = "minimal";
const LAST_UPDATE: &str = "last-update";
const FRESH: &str = "fresh";

fn key(name: &str, field: &str) -> String {
    format!("{PREFIX}{name}.{field}")
}

pub(crate) fn parse(text: &str) -> Vec<IndexInfo> {
    let props = Properties::parse(text);
    let suffix = format!(".{KIND}");

    let mut out = Vec::new();
    for (property, value) in props.with_prefix(PREFIX) {
        let Some(name) = property
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
        else {
            continue;
        };
        if name.is_empty() || name.contains('.') {
            continue;
        }
        let Some(kind) = IndexKind::parse(value) else {
            tracing::warn!(
                target = "quarry.manager",
                index = name,
                kind = value,
                "ignoring registry entry with unknown kind"
            );
            continue;
        };

        let mut info = IndexInfo::new(name, kind);
        info.repository_directory = props.get(&key(name, REPOSITORY_DIRECTORY)).map(PathBuf::from);
        info.repository_url = props.get(&key(name, REPOSITORY_URL)).map(str::to_string);
        info.index_update_url = props.get(&key(name, INDEX_UPDATE_URL)).map(str::to_string);
        info.is_minimal = props.get(&key(name, MINIMAL)) == Some("true");
        info.last_update_time = props
            .get(&key(name, LAST_UPDATE))
            .and_then(|value| value.trim().parse().ok());
        info.is_fresh = props.get(&key(name, FRESH)) != Some("false");
        out.push(info);
    }
    out
}

pub(crate) fn render<'a>(infos: impl IntoIterator<Item = &'a IndexInfo>) -> String {
    let mut props = Properties::new();
    for info in infos {
        let name = info.name();
        props.set(key(name, KIND), info.kind().as_str());
        if let Some(dir) = &info.repository_directory {
            props.set(key(name, REPOSITORY_DIRECTORY), dir.display().to_string());
        }
        if let Some(url) = &info.repository_url {
            props.set(key(name, REPOSITORY_URL), url.clone());
        }
        if let Some(url) = &info.index_update_url {
            props.set(key(name, INDEX_UPDATE_URL), url.clone());
        }
        props.set(key(name, MINIMAL), info.is_minimal.to_string());
        if let Some(time) = info.last_update_time {
            props.set(key(name, LAST_UPDATE), time.to_string());
        }
        props.set(key(name, FRESH), info.is_fresh.to_string());
    }
    props.render(Some("Quarry index registry"))
}

pub(crate) fn load(path: &Path) -> Result<Vec<IndexInfo>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse(&text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Rewrites the registry file through a temp file and rename.
pub(crate) fn save<'a>(path: &Path, infos: impl IntoIterator<Item = &'a IndexInfo>) -> Result<()> {
    let text = render(infos);
    let registry_err = |source| ManagerError::Registry {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| REGISTRY_FILE.to_string());
    let tmp = path.with_file_name(format!("{file_name}.tmp.{}", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    };
    if let Err(err) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(registry_err(err));
    }
    Ok(())
}
