//! Connection parameters handed to a [`crate::ClientFactory`].

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Characters that must be escaped inside the userinfo part of a URI.
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b':')
    .add(b'/')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'@')
    .add(b'%');

/// Authentication settings.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Authentication mechanism, e.g. `SCRAM-SHA-256`.
    pub mechanism: String,
    /// Database the user is defined in.
    pub source: Option<String>,
}

impl Credentials {
    /// Creates credentials for the given mechanism.
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            mechanism: mechanism.into(),
            source: None,
        }
    }

    /// Sets the authentication database.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("mechanism", &self.mechanism)
            .field("source", &self.source)
            .finish()
    }
}

/// Parameters used to build every client of an engine.
///
/// The same options are reused on each reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Maximum number of pooled connections per client.
    pub max_pool_size: u32,
    /// How long a thread may wait for a pooled connection.
    pub wait_queue_timeout: Duration,
    /// Socket connect timeout; `None` means no timeout.
    pub connect_timeout: Option<Duration>,
    /// Authentication, if any.
    pub credentials: Option<Credentials>,
    /// Additional driver options, passed through verbatim.
    pub extra: BTreeMap<String, String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 27017,
            max_pool_size: 1,
            wait_queue_timeout: Duration::from_millis(400),
            connect_timeout: Some(Duration::from_secs(15)),
            credentials: None,
            extra: BTreeMap::new(),
        }
    }
}

impl ConnectionOptions {
    /// Creates options for a server address with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the connection pool size.
    #[must_use]
    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size.max(1);
        self
    }

    /// Sets the pool wait timeout.
    #[must_use]
    pub fn with_wait_queue_timeout(mut self, timeout: Duration) -> Self {
        self.wait_queue_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Adds a driver option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Renders the options as a connection string.
    pub fn uri(&self) -> String {
        let mut uri = String::from("mongodb://");
        if let Some(credentials) = &self.credentials {
            uri.push_str(&utf8_percent_encode(&credentials.user, USERINFO).to_string());
            uri.push(':');
            uri.push_str(&utf8_percent_encode(&credentials.password, USERINFO).to_string());
            uri.push('@');
        }
        uri.push_str(&self.address());
        uri.push_str("/?");

        let mut params = vec![
            format!("maxPoolSize={}", self.max_pool_size),
            format!("waitQueueTimeoutMS={}", self.wait_queue_timeout.as_millis()),
        ];
        if let Some(timeout) = self.connect_timeout {
            params.push(format!("connectTimeoutMS={}", timeout.as_millis()));
        }
        if let Some(credentials) = &self.credentials {
            params.push(format!("authMechanism={}", credentials.mechanism));
            if let Some(source) = &credentials.source {
                params.push(format!("authSource={source}"));
            }
        }
        for (key, value) in &self.extra {
            params.push(format!("{key}={value}"));
        }
        uri.push_str(&params.join("&"));
        uri
    }
}
