/// Blocking accept loop feeding a fixed pool of worker threads.
///
/// Accepted connections travel to the workers over a channel. Stopping
/// closes the channel and joins every worker before `run` returns.
use super::{bind, ServeState};
use crate::config::ServerConfig;
use crate::error::{KitError, Result};
use crate::server::app::SharedApp;
use crate::server::http::{self, ConnInfo};
use crate::server::registry::Backend;
use crate::server::Server;
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

pub const NAME: &str = "threaded";

pub const BACKEND: Backend = Backend {
    name: NAME,
    description: "Blocking server with a fixed worker pool (default)",
    construct,
};

fn construct(config: ServerConfig, app: SharedApp) -> Result<Box<dyn Server>> {
    Ok(Box::new(ThreadedServer::new(config, app)))
}

pub struct ThreadedServer {
    config: ServerConfig,
    app: SharedApp,
    state: ServeState,
}

type Job = (TcpStream, ConnInfo);

fn spawn_worker(id: usize, jobs: Arc<Mutex<Receiver<Job>>>, app: SharedApp) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("minikit-worker-{}", id))
        .spawn(move || loop {
            let job = {
                let receiver = match jobs.lock() {
                    Ok(receiver) => receiver,
                    Err(poisoned) => poisoned.into_inner(),
                };
                receiver.recv()
            };
            match job {
                Ok((stream, info)) => {
                    if let Err(e) = http::serve_connection(stream, info, app.as_ref()) {
                        log::warn!("Connection error: {}", e);
                    }
                }
                Err(_) => break,
            }
        })
        .map_err(KitError::from)
}

impl ThreadedServer {
    pub fn new(config: ServerConfig, app: SharedApp) -> Self {
        ThreadedServer {
            config,
            app,
            state: ServeState::default(),
        }
    }

    fn worker_count(&self) -> usize {
        self.config.threads.max(1)
    }
}

impl Server for ThreadedServer {
    fn name(&self) -> &str {
        NAME
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn run(&self) -> Result<()> {
        let listener = bind(&self.config.bind_addr)?;
        let local_addr = listener.local_addr()?;

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..self.worker_count())
            .map(|id| spawn_worker(id, receiver.clone(), self.app.clone()))
            .collect::<Result<Vec<_>>>()?;

        self.state.started(local_addr);
        log::info!("{} listening on {} with {} workers", NAME, local_addr, workers.len());

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
                multithread: true,
            };
            if sender.send((stream, info)).is_err() {
                log::error!("Worker pool is gone");
                break;
            }
        }

        drop(sender);
        for worker in workers {
            if worker.join().is_err() {
                log::error!("Worker thread panicked");
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
