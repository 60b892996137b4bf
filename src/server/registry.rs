/// Name-keyed registry of serving backends.
use crate::config::{AppType, ServerConfig};
use crate::error::{KitError, Result};
use crate::server::app::{self, SharedApp};
use crate::server::{backends, privilege, Server};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// Builds a backend from its configuration and the application to host.
pub type Constructor = fn(ServerConfig, SharedApp) -> Result<Box<dyn Server>>;

/// Registry entry describing one backend.
#[derive(Clone, Copy)]
pub struct Backend {
    pub name: &'static str,
    pub description: &'static str,
    pub construct: Constructor,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    backends: BTreeMap<&'static str, Backend>,
}

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::with_default_backends);

/// The process-wide registry holding every compiled-in backend.
pub fn global() -> &'static Registry {
    &GLOBAL
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the backends compiled into this build.
    pub fn with_default_backends() -> Self {
        let mut registry = Registry::new();
        for backend in backends::default_backends() {
            if let Err(e) = registry.register(backend) {
                log::error!("{}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, backend: Backend) -> Result<()> {
        if self.backends.contains_key(backend.name) {
            return Err(KitError::AlreadyExists(format!(
                "Backend {} is already registered",
                backend.name
            )));
        }
        log::debug!("Registered backend {}", backend.name);
        self.backends.insert(backend.name, backend);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&Backend> {
        self.backends
            .get(name)
            .ok_or_else(|| KitError::ServerNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&'static str> {
        self.backends.keys().copied().collect()
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.backends.values()
    }

    /// Resolve `config.server`, drop privileges if configured, and construct
    /// the backend.
    pub fn instantiate(&self, config: ServerConfig) -> Result<Box<dyn Server>> {
        let backend = self.resolve(&config.server)?;

        if let Some(user) = config.server_user.as_deref() {
            privilege::change_uid_gid(user, config.server_group.as_deref())?;
        }

        let app = hosted_app(&config);
        log::info!("Creating {} server for {}", backend.name, config.bind_addr);
        (backend.construct)(config, app)
    }
}

fn hosted_app(config: &ServerConfig) -> SharedApp {
    match (config.app_type(), &config.app) {
        (AppType::Wsgi, Some(app)) => app.clone(),
        (AppType::Wsgi, None) => {
            log::warn!("No application configured, serving the demo app");
            app::demo()
        }
        (AppType::Demo, _) => app::demo(),
    }
}
