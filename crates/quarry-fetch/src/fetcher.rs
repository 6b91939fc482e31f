use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use quarry_core::{CancellationExt, CancellationToken};

use crate::error::{FetchError, Result};
use crate::sanitize::sanitize_url;
use crate::stream::FetchStream;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Hosts reached directly. Entries may start with `*.` to match a domain
    /// suffix.
    #[serde(default)]
    pub non_proxy_hosts: Vec<String>,
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("non_proxy_hosts", &self.non_proxy_hosts)
            .finish()
    }
}

impl ProxySettings {
    pub fn bypasses(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.non_proxy_hosts.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            match pattern.strip_prefix('*') {
                Some(suffix) => host.ends_with(suffix),
                None => host == pattern,
            }
        })
    }

    fn to_proxy_url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                format!("http://{user}:{password}@{}:{}", self.host, self.port)
            }
            (Some(user), None) => format!("http://{user}@{}:{}", self.host, self.port),
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// Where and how to reach a remote index publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// `http(s)://...`, `file://...` or a plain directory path.
    pub url: String,
    pub credentials: Option<Credentials>,
    pub proxy: Option<ProxySettings>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            proxy: None,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<ProxySettings>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// A connected transport.
trait Transport: Send + Sync {
    fn open(&self, resource: &str) -> Result<Box<dyn Read + Send>>;
    /// Sanitized URL of `resource`, for messages.
    fn describe(&self, resource: &str) -> String;
}

struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
    authorization: Option<String>,
}

impl HttpTransport {
    fn connect(endpoint: &Endpoint) -> Result<Self> {
        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(endpoint.connect_timeout)
            .timeout_read(endpoint.read_timeout);

        if let Some(proxy) = &endpoint.proxy {
            let host = host_of(&endpoint.url).unwrap_or_default();
            if !proxy.bypasses(host) {
                let configured =
                    ureq::Proxy::new(proxy.to_proxy_url()).map_err(|err| FetchError::Transport {
                        message: format!(
                            "invalid proxy {}:{}: {}",
                            proxy.host,
                            proxy.port,
                            sanitize_url(&err.to_string())
                        ),
                    })?;
                builder = builder.proxy(configured);
            }
        }

        let authorization = endpoint.credentials.as_ref().map(|credentials| {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", credentials.username, credentials.password));
            format!("Basic {token}")
        });

        Ok(Self {
            agent: builder.build(),
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            authorization,
        })
    }

    fn url_for(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }
}

impl Transport for HttpTransport {
    fn open(&self, resource: &str) -> Result<Box<dyn Read + Send>> {
        let url = self.url_for(resource);
        let mut request = self.agent.get(&url);
        if let Some(authorization) = &self.authorization {
            request = request.set("Authorization", authorization);
        }

        match request.call() {
            Ok(response) => Ok(Box::new(response.into_reader())),
            Err(ureq::Error::Status(404 | 410, _)) => Err(FetchError::NotFound {
                resource: sanitize_url(&url),
            }),
            Err(ureq::Error::Status(code, _)) => Err(FetchError::Transport {
                message: format!("server returned status {code} for {}", sanitize_url(&url)),
            }),
            Err(ureq::Error::Transport(transport)) => Err(FetchError::Transport {
                message: format!(
                    "transport error for {}: {}",
                    sanitize_url(&url),
                    sanitize_url(&transport.to_string())
                ),
            }),
        }
    }

    fn describe(&self, resource: &str) -> String {
        sanitize_url(&self.url_for(resource))
    }
}

struct FileTransport {
    root: PathBuf,
}

impl FileTransport {
    fn path_for(&self, resource: &str) -> Result<PathBuf> {
        let relative = Path::new(resource.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FetchError::Unsupported {
                url: resource.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

impl Transport for FileTransport {
    fn open(&self, resource: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(resource)?;
        match std::fs::File::open(&path) {
            Ok(file) => Ok(Box::new(std::io::BufReader::new(file))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound {
                resource: path.display().to_string(),
            }),
            Err(err) => Err(FetchError::Io(err)),
        }
    }

    fn describe(&self, resource: &str) -> String {
        self.root
            .join(resource.trim_start_matches('/'))
            .display()
            .to_string()
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    Some(host_port.split(':').next().unwrap_or(host_port))
}

/// Streams resources from one endpoint.
///
/// `connect` establishes reusable transport state (an HTTP agent with its
/// connection pool, or a base directory); `disconnect` drops it and is safe to
/// call repeatedly.
pub struct ResourceFetcher {
    transport: Option<Box<dyn Transport>>,
    endpoint: String,
}

impl fmt::Debug for ResourceFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFetcher")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.transport.is_some())
            .finish()
    }
}

impl ResourceFetcher {
    pub fn connect(endpoint: &Endpoint) -> Result<Self> {
        let url = endpoint.url.trim();
        let transport: Box<dyn Transport> = if url.starts_with("http://")
            || url.starts_with("https://")
        {
            Box::new(HttpTransport::connect(endpoint)?)
        } else if let Some(path) = url.strip_prefix("file://") {
            Box::new(FileTransport {
                root: PathBuf::from(path),
            })
        } else if !url.contains("://") && !url.is_empty() {
            Box::new(FileTransport {
                root: PathBuf::from(url),
            })
        } else {
            return Err(FetchError::Unsupported {
                url: sanitize_url(url),
            });
        };

        let endpoint = sanitize_url(url);
        tracing::debug!(target = "quarry.fetch", endpoint = %endpoint, "connected");
        Ok(Self {
            transport: Some(transport),
            endpoint,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Opens `resource` (relative to the endpoint) as a cancellable stream.
    pub fn fetch(&self, resource: &str, cancel: &CancellationToken) -> Result<FetchStream> {
        cancel.check()?;
        let transport = self.transport.as_ref().ok_or(FetchError::Disconnected)?;
        let description = transport.describe(resource);
        let reader = transport.open(resource)?;
        tracing::debug!(target = "quarry.fetch", resource = %description, "fetching");
        Ok(FetchStream::new(reader, cancel.clone(), description))
    }

    /// Fetches a small resource into memory.
    pub fn fetch_to_string(&self, resource: &str, cancel: &CancellationToken) -> Result<String> {
        let mut stream = self.fetch(resource, cancel)?;
        let mut text = String::new();
        stream
            .read_to_string(&mut text)
            .map_err(FetchError::from_read)?;
        Ok(text)
    }

    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(target = "quarry.fetch", endpoint = %self.endpoint, "disconnected");
        }
    }
}

impl Drop for ResourceFetcher {
    fn drop(&mut self) {
        self.disconnect();
    }
}
