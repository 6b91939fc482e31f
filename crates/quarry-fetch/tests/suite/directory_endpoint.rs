use std::io::Read;

use pretty_assertions::assert_eq;
use quarry_core::CancellationToken;
use quarry_fetch::{Endpoint, FetchError, ResourceFetcher};

#[test]
fn plain_paths_and_file_urls_read_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("quarry-index.properties"), "index.timestamp=7\n").unwrap();

    let cancel = CancellationToken::new();
    for url in [
        dir.path().display().to_string(),
        format!("file://{}", dir.path().display()),
    ] {
        let fetcher = ResourceFetcher::connect(&Endpoint::new(url)).unwrap();
        let text = fetcher
            .fetch_to_string("quarry-index.properties", &cancel)
            .unwrap();
        assert_eq!(text, "index.timestamp=7\n");
    }
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher =
        ResourceFetcher::connect(&Endpoint::new(dir.path().display().to_string())).unwrap();
    let err = fetcher
        .fetch("quarry-index.1.tar.zst", &CancellationToken::new())
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn disconnect_is_idempotent_and_blocks_further_fetches() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), "a").unwrap();

    let mut fetcher =
        ResourceFetcher::connect(&Endpoint::new(dir.path().display().to_string())).unwrap();
    let mut stream = fetcher.fetch("a", &CancellationToken::new()).unwrap();

    fetcher.disconnect();
    fetcher.disconnect();
    assert!(!fetcher.is_connected());
    assert!(matches!(
        fetcher.fetch("a", &CancellationToken::new()),
        Err(FetchError::Disconnected)
    ));

    // Streams opened before the disconnect stay readable.
    let mut text = String::new();
    stream.read_to_string(&mut text).unwrap();
    assert_eq!(text, "a");
}
