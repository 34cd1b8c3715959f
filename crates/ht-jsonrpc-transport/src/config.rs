//! Transport configuration: raw options in, validated shared config out.

use std::path::PathBuf;

use crate::app::SharedApp;
use crate::error::ConfigError;

/// Route used when the caller does not pick one.
pub const DEFAULT_PATH: &str = "/ht-jsonrpc";

/// PEM certificate and private key for HTTPS.
///
/// The server presents them; the client trusts the certificate as an extra
/// root so self-signed deployments work out of the box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// Whether the owned listener (and the client) speak HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Ssl {
    #[default]
    Disabled,
    Enabled(TlsConfig),
}

impl Ssl {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        match self {
            Self::Enabled(tls) => Some(tls),
            Self::Disabled => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.is_enabled() { "https" } else { "http" }
    }
}

/// Unvalidated transport options, as handed to [`HttpTransport::new`].
///
/// [`HttpTransport::new`]: crate::HttpTransport::new
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Host to bind (server) or connect to (client)
    pub host: Option<String>,
    /// Port to bind or connect to; 0 asks the OS for a free port
    pub port: Option<u16>,
    /// Route path, defaults to [`DEFAULT_PATH`]
    pub path: Option<String>,
    /// TLS settings, defaults to plain HTTP
    pub ssl: Option<Ssl>,
    /// Externally owned router to mount on instead of owning a listener
    pub app: Option<SharedApp>,
    /// Install a permissive CORS layer on an owned router
    pub cors: Option<bool>,
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.ssl = Some(Ssl::Enabled(tls));
        self
    }

    pub fn ssl(mut self, ssl: Ssl) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn app(mut self, app: SharedApp) -> Self {
        self.app = Some(app);
        self
    }

    pub fn cors(mut self, cors: bool) -> Self {
        self.cors = Some(cors);
        self
    }
}

/// Finalized, immutable transport configuration.
///
/// Built once by the factory and shared behind an `Arc` by every server and
/// client it produces.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub ssl: Ssl,
    pub app: Option<SharedApp>,
    pub cors: bool,
}

impl TransportConfig {
    /// Validate options and fill in defaults.
    ///
    /// Either `app` or both `host` and `port` must be present. An empty host
    /// counts as missing.
    pub fn from_options(options: TransportOptions) -> Result<Self, ConfigError> {
        let host = options.host.filter(|h| !h.is_empty());
        let has_endpoint = host.is_some() && options.port.is_some();
        if options.app.is_none() && !has_endpoint {
            return Err(ConfigError::MissingEndpoint);
        }

        let path = normalize_path(options.path.as_deref().unwrap_or(DEFAULT_PATH))?;

        Ok(Self {
            host,
            port: options.port,
            path,
            ssl: options.ssl.unwrap_or_default(),
            app: options.app,
            cors: options.cors.unwrap_or(false),
        })
    }

    /// True when routes are mounted on a caller-owned router.
    pub fn is_shared_app(&self) -> bool {
        self.app.is_some()
    }

    /// Full URL the client posts to, if host and port are known.
    pub fn endpoint_url(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let port = self.port?;
        // Bare IPv6 literals need brackets inside a URL
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        Some(format!("{}://{host}:{port}{}", self.ssl.scheme(), self.path))
    }
}

fn normalize_path(path: &str) -> Result<String, ConfigError> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    // The router treats these as capture syntax
    let has_captures = path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
        || path.contains('{')
        || path.contains('}');
    if has_captures {
        return Err(ConfigError::InvalidPath(path));
    }

    Ok(path)
}
