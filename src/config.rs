/// Server configuration.
///
/// `ServerConfig` is the fully merged configuration a backend is built from.
/// `ConfigOverrides` carries partial settings from a JSON file or the command
/// line; layers are merged onto the defaults, later layers winning.
use crate::error::{KitError, Result};
use crate::server::app::SharedApp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_SERVER: &str = "threaded";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_THREADS: usize = 10;

/// Host and port to listen on. Serialized as `[host, port]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct BindAddr {
    pub host: String,
    pub port: u16,
}

impl BindAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        BindAddr {
            host: host.into(),
            port,
        }
    }
}

impl Default for BindAddr {
    fn default() -> Self {
        BindAddr::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl From<(String, u16)> for BindAddr {
    fn from((host, port): (String, u16)) -> Self {
        BindAddr { host, port }
    }
}

impl From<BindAddr> for (String, u16) {
    fn from(addr: BindAddr) -> Self {
        (addr.host, addr.port)
    }
}

impl fmt::Display for BindAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Which application a server hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    /// The application supplied in the configuration.
    #[default]
    Wsgi,
    /// The built-in environment echo app.
    Demo,
}

impl FromStr for AppType {
    type Err = KitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wsgi" => Ok(AppType::Wsgi),
            "demo" => Ok(AppType::Demo),
            _ => Err(KitError::ConfigError(format!("Unknown app type: {}", s))),
        }
    }
}

/// Merged server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub server: String,
    pub bind_addr: BindAddr,
    pub host_name: String,
    pub server_user: Option<String>,
    pub server_group: Option<String>,
    pub app_type: Option<AppType>,
    pub app: Option<SharedApp>,
    pub threads: usize,
    /// Keys the loader did not recognise. Kept, never read.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server: DEFAULT_SERVER.to_string(),
            bind_addr: BindAddr::default(),
            host_name: String::new(),
            server_user: None,
            server_group: None,
            app_type: Some(AppType::Wsgi),
            app: None,
            threads: DEFAULT_THREADS,
            extra: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("server", &self.server)
            .field("bind_addr", &self.bind_addr)
            .field("host_name", &self.host_name)
            .field("server_user", &self.server_user)
            .field("server_group", &self.server_group)
            .field("app_type", &self.app_type)
            .field("app", &self.app.as_ref().map(|_| "<application>"))
            .field("threads", &self.threads)
            .field("extra", &self.extra)
            .finish()
    }
}

impl ServerConfig {
    /// Defaults with `overrides` applied.
    pub fn from_overrides(overrides: ConfigOverrides) -> Self {
        let mut config = ServerConfig::default();
        config.apply(overrides);
        config
    }

    /// Apply every field set in `overrides`.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(server) = overrides.server {
            self.server = server;
        }
        if let Some(bind_addr) = overrides.bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(host_name) = overrides.host_name {
            self.host_name = host_name;
        }
        if overrides.server_user.is_some() {
            self.server_user = overrides.server_user;
        }
        if overrides.server_group.is_some() {
            self.server_group = overrides.server_group;
        }
        if overrides.app_type.is_some() {
            self.app_type = overrides.app_type;
        }
        if overrides.app.is_some() {
            self.app = overrides.app;
        }
        if let Some(threads) = overrides.threads {
            self.threads = threads;
        }
        self.extra.extend(overrides.extra);
    }

    pub fn app_type(&self) -> AppType {
        self.app_type.unwrap_or_default()
    }
}

/// Partial configuration. Unset fields leave the layer below untouched.
#[derive(Clone, Default, Deserialize)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub bind_addr: Option<BindAddr>,
    pub host_name: Option<String>,
    pub server_user: Option<String>,
    pub server_group: Option<String>,
    pub app_type: Option<AppType>,
    #[serde(skip)]
    pub app: Option<SharedApp>,
    pub threads: Option<usize>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl fmt::Debug for ConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverrides")
            .field("server", &self.server)
            .field("bind_addr", &self.bind_addr)
            .field("host_name", &self.host_name)
            .field("server_user", &self.server_user)
            .field("server_group", &self.server_group)
            .field("app_type", &self.app_type)
            .field("app", &self.app.as_ref().map(|_| "<application>"))
            .field("threads", &self.threads)
            .field("extra", &self.extra)
            .finish()
    }
}

impl ConfigOverrides {
    /// Parse overrides from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load overrides from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let overrides = Self::from_json(&contents)
            .map_err(|e| KitError::ConfigError(format!("{}: {}", path.display(), e)))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(overrides)
    }

    /// Stack `top` over `self`; fields set in `top` win.
    pub fn layer(mut self, top: ConfigOverrides) -> Self {
        self.server = top.server.or(self.server);
        self.bind_addr = top.bind_addr.or(self.bind_addr);
        self.host_name = top.host_name.or(self.host_name);
        self.server_user = top.server_user.or(self.server_user);
        self.server_group = top.server_group.or(self.server_group);
        self.app_type = top.app_type.or(self.app_type);
        self.app = top.app.or(self.app);
        self.threads = top.threads.or(self.threads);
        self.extra.extend(top.extra);
        self
    }

    pub fn with_app(mut self, app: SharedApp) -> Self {
        self.app = Some(app);
        self
    }
}
