/// Placeholder backend for processes driven by an external supervisor.
///
/// The supervisor owns the listening socket and calls the application
/// itself, so `run` and `stop` do nothing.
use crate::config::ServerConfig;
use crate::error::Result;
use crate::server::app::SharedApp;
use crate::server::registry::Backend;
use crate::server::Server;
use std::net::SocketAddr;

pub const NAME: &str = "external";

pub const BACKEND: Backend = Backend {
    name: NAME,
    description: "No-op; the process is served by an external supervisor",
    construct,
};

fn construct(config: ServerConfig, app: SharedApp) -> Result<Box<dyn Server>> {
    Ok(Box::new(ExternalServer { config, app }))
}

pub struct ExternalServer {
    config: ServerConfig,
    app: SharedApp,
}

impl ExternalServer {
    /// The application the supervisor should call.
    pub fn app(&self) -> SharedApp {
        self.app.clone()
    }
}

impl Server for ExternalServer {
    fn name(&self) -> &str {
        NAME
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn run(&self) -> Result<()> {
        log::info!("{}: nothing to run, serving is handled externally", NAME);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::app::{demo, invoke, Environ};

    #[test]
    fn test_run_and_stop_are_noops() {
        let server = construct(ServerConfig::default(), demo()).unwrap();
        assert_eq!(server.name(), "external");
        assert!(server.run().is_ok());
        assert!(server.stop().is_ok());
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_exposes_app() {
        let server = ExternalServer {
            config: ServerConfig::default(),
            app: demo(),
        };
        let response = invoke(server.app().as_ref(), &Environ::new()).unwrap();
        assert_eq!(response.status, "200 OK");
    }
}
