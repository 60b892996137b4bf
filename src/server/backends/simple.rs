/// Single-threaded blocking server: one connection at a time.
use super::{bind, ServeState};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::server::app::SharedApp;
use crate::server::http::{self, ConnInfo};
use crate::server::registry::Backend;
use crate::server::Server;
use std::net::SocketAddr;

pub const NAME: &str = "simple_server";

pub const BACKEND: Backend = Backend {
    name: NAME,
    description: "Blocking single-threaded server",
    construct,
};

fn construct(config: ServerConfig, app: SharedApp) -> Result<Box<dyn Server>> {
    Ok(Box::new(SimpleServer::new(config, app)))
}

pub struct SimpleServer {
    config: ServerConfig,
    app: SharedApp,
    state: ServeState,
}

impl SimpleServer {
    pub fn new(config: ServerConfig, app: SharedApp) -> Self {
        SimpleServer {
            config,
            app,
            state: ServeState::default(),
        }
    }
}

impl Server for SimpleServer {
    fn name(&self) -> &str {
        NAME
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn run(&self) -> Result<()> {
        let listener = bind(&self.config.bind_addr)?;
        let local_addr = listener.local_addr()?;
        self.state.started(local_addr);
        log::info!("{} listening on {}", NAME, local_addr);

        while !self.state.is_stopping() {
            let (stream, remote_addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Accept failed: {}", e);
                    continue;
                }
            };
            if self.state.is_stopping() {
                break;
            }
            let info = ConnInfo {
                local_addr: Some(local_addr),
                remote_addr: Some(remote_addr),
                host_name: self.config.host_name.clone(),
                multithread: false,
            };
            if let Err(e) = http::serve_connection(stream, info, self.app.as_ref()) {
                log::warn!("Connection error: {}", e);
            }
        }

        log::info!("{} on {} stopped", NAME, local_addr);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        log::info!("Stopping {}", NAME);
        self.state.stop();
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.state.local_addr()
    }
}
