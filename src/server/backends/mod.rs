/// Built-in serving backends.
#[cfg(feature = "actix")]
pub mod actix;
#[cfg(feature = "evloop")]
pub mod evloop;
pub mod external;
pub mod simple;
pub mod threaded;

use crate::config::BindAddr;
use crate::error::{KitError, Result};
use crate::server::registry::Backend;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Backends compiled into this build.
pub fn default_backends() -> Vec<Backend> {
    #[allow(unused_mut)]
    let mut backends = vec![threaded::BACKEND, simple::BACKEND, external::BACKEND];
    #[cfg(feature = "actix")]
    backends.push(actix::BACKEND);
    #[cfg(feature = "evloop")]
    backends.push(evloop::BACKEND);
    backends
}

pub(crate) fn resolve_addr(bind_addr: &BindAddr) -> Result<SocketAddr> {
    (bind_addr.host.as_str(), bind_addr.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| KitError::ConfigError(format!("Cannot resolve {}", bind_addr)))
}

pub(crate) fn bind(bind_addr: &BindAddr) -> Result<TcpListener> {
    let addr = resolve_addr(bind_addr)?;
    Ok(TcpListener::bind(addr)?)
}

/// Stop flag and bound address of a blocking accept loop.
#[derive(Debug, Default)]
pub(crate) struct ServeState {
    stopping: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ServeState {
    pub fn started(&self, addr: SocketAddr) {
        if let Ok(mut local_addr) = self.local_addr.lock() {
            *local_addr = Some(addr);
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Flag the loop to stop and unblock its `accept`.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(addr) = self.local_addr() {
            // A throwaway connection wakes the accept call.
            if let Err(e) = TcpStream::connect(wake_addr(addr)) {
                log::debug!("Wake-up connect to {} failed: {}", addr, e);
            }
        }
    }
}

/// Loopback equivalent of a wildcard listen address.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port()),
        _ => addr,
    }
}
