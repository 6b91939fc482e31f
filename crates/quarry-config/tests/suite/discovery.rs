use std::path::PathBuf;

use pretty_assertions::assert_eq;
use quarry_config::{
    discover_config_path, load, with_config_env_lock, QuarryConfig, QUARRY_CONFIG_ENV_VAR,
    QUARRY_INDEX_DIR_ENV_VAR,
};

#[test]
fn explicit_config_path_and_index_dir_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quarry.toml");
    std::fs::write(&path, "index_dir = \"/from/file\"\n[update]\ndebounce_ms = 5\n").unwrap();

    // Discovery takes the env lock itself; only the mutations run under it here.
    with_config_env_lock(|| {
        std::env::set_var(QUARRY_CONFIG_ENV_VAR, &path);
        std::env::set_var(QUARRY_INDEX_DIR_ENV_VAR, "/from/env");
    });

    let discovered = discover_config_path();
    let loaded = load();

    with_config_env_lock(|| {
        std::env::remove_var(QUARRY_CONFIG_ENV_VAR);
        std::env::remove_var(QUARRY_INDEX_DIR_ENV_VAR);
    });

    assert_eq!(discovered.as_deref(), Some(path.as_path()));
    let (config, source) = loaded.unwrap();
    assert_eq!(source, Some(path));
    assert_eq!(config.update.debounce_ms, 5);
    assert_eq!(config.index_dir().unwrap(), PathBuf::from("/from/env"));
}

#[test]
fn missing_explicit_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = QuarryConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}
