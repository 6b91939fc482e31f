//! The Resource Fetcher: streams bytes of a remote index publication.
//!
//! Two transports are supported behind one [`ResourceFetcher`]:
//! - HTTP(S) via `ureq`, with optional basic auth and an HTTP proxy
//! - local directories (`file://` URLs or plain paths), used for mirrors and
//!   tests
//!
//! Every fetch is a lazily-read [`FetchStream`] that checks a cancellation
//! token before each chunk.

mod error;
mod fetcher;
mod sanitize;
mod stream;

pub use error::{FetchError, Result};
pub use fetcher::{Credentials, Endpoint, ProxySettings, ResourceFetcher};
pub use sanitize::sanitize_url;
pub use stream::FetchStream;
