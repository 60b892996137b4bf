/// Pluggable serving backends behind a uniform `run`/`stop` interface.
///
/// A [`Registry`] maps backend names to constructors. [`make_server`] merges
/// configuration onto the defaults and builds the requested backend from the
/// process-wide registry.
pub mod app;
pub mod backends;
pub mod http;
pub mod privilege;
pub mod registry;

use crate::config::{ConfigOverrides, ServerConfig};
use crate::error::Result;
use std::net::SocketAddr;

pub use app::{demo, demo_app, AppResponse, Application, Body, Environ, SharedApp, StartResponse};
pub use registry::{global, Backend, Constructor, Registry};

/// A configured server backend.
///
/// `run` blocks until the server shuts down. `stop` may be called from any
/// thread while `run` is blocking.
pub trait Server: Send + Sync {
    /// Registered backend name.
    fn name(&self) -> &str;

    fn config(&self) -> &ServerConfig;

    fn run(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Address actually bound, once `run` has bound its listener.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Build a server from `overrides` merged onto the defaults.
pub fn make_server(overrides: ConfigOverrides) -> Result<Box<dyn Server>> {
    let config = ServerConfig::from_overrides(overrides);
    global().instantiate(config)
}
