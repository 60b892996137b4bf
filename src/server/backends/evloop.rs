/// Single-threaded readiness-driven server built on `mio`.
///
/// One thread polls the listener and every connection. Each connection is
/// read until a full request is buffered, answered, and closed once the
/// response has been flushed. `stop` wakes the poll through a `Waker`.
use super::resolve_addr;
use crate::config::ServerConfig;
use crate::error::{KitError, Result};
use crate::server::app::{Application, SharedApp};
use crate::server::http::{self, ConnInfo, MAX_REQUEST_BYTES};
use crate::server::registry::Backend;
use crate::server::Server;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const NAME: &str = "evloop";

pub const BACKEND: Backend = Backend {
    name: NAME,
    description: "Single-threaded mio event loop",
    construct,
};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONN: usize = 2;

fn construct(config: ServerConfig, app: SharedApp) -> Result<Box<dyn Server>> {
    Ok(Box::new(EvloopServer::new(config, app)))
}

struct Connection {
    stream: TcpStream,
    remote_addr: SocketAddr,
    buffer: Vec<u8>,
    outgoing: Vec<u8>,
    offset: usize,
    responded: bool,
}

enum Progress {
    Open,
    Close,
}

impl Connection {
    fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Connection {
            stream,
            remote_addr,
            buffer: Vec::new(),
            outgoing: Vec::new(),
            offset: 0,
            responded: false,
        }
    }

    /// Drain the socket. Returns true on end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let mut temp = [0_u8; 4096];
        loop {
            match self.stream.read(&mut temp) {
                Ok(0) => return Ok(true),
                Ok(read) => self.buffer.extend_from_slice(&temp[..read]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Write as much pending output as the socket takes.
    fn flush_outgoing(&mut self) -> io::Result<Progress> {
        while self.offset < self.outgoing.len() {
            match self.stream.write(&self.outgoing[self.offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => self.offset += written,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Progress::Open),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(Progress::Close)
    }

    fn on_readable(&mut self, info: &ConnInfo, app: &dyn Application) -> io::Result<Progress> {
        let eof = self.fill()?;
        if self.responded {
            return Ok(Progress::Open);
        }

        let reply = match http::parse_request(&self.buffer) {
            Ok(Some(request)) => {
                let mut info = info.clone();
                info.remote_addr = Some(self.remote_addr);
                http::handle_request(&request, &info, app)
            }
            Ok(None) if self.buffer.len() > MAX_REQUEST_BYTES => http::bad_request_response(),
            Ok(None) if eof => return Ok(Progress::Close),
            Ok(None) => return Ok(Progress::Open),
            Err(e) => {
                log::debug!("Rejecting request from {}: {}", self.remote_addr, e);
                http::bad_request_response()
            }
        };

        self.outgoing = reply;
        self.offset = 0;
        self.responded = true;
        self.flush_outgoing()
    }
}

pub struct EvloopServer {
    config: ServerConfig,
    app: SharedApp,
    stopping: AtomicBool,
    waker: Mutex<Option<Arc<Waker>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

fn accept(poll: &Poll, listener: &mut TcpListener, connections: &mut Vec<Option<Connection>>) -> io::Result<()> {
    loop {
        match listener.accept() {
            Ok((mut stream, remote_addr)) => {
                let index = connections
                    .iter()
                    .position(Option::is_none)
                    .unwrap_or(connections.len());
                poll.registry()
                    .register(&mut stream, Token(index + FIRST_CONN), Interest::READABLE)?;
                let connection = Some(Connection::new(stream, remote_addr));
                if index == connections.len() {
                    connections.push(connection);
                } else {
                    connections[index] = connection;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

impl EvloopServer {
    pub fn new(config: ServerConfig, app: SharedApp) -> Self {
        EvloopServer {
            config,
            app,
            stopping: AtomicBool::new(false),
            waker: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    fn drive(
        &self,
        connection: &mut Connection,
        info: &ConnInfo,
        readable: bool,
        writable: bool,
    ) -> io::Result<Progress> {
        if readable && !connection.responded {
            return connection.on_readable(info, self.app.as_ref());
        }
        if readable {
            connection.fill()?;
        }
        if writable && connection.responded {
            return connection.flush_outgoing();
        }
        Ok(Progress::Open)
    }
}

impl Server for EvloopServer {
    fn name(&self) -> &str {
        NAME
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn run(&self) -> Result<()> {
        let addr = resolve_addr(&self.config.bind_addr)?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        if let Ok(mut slot) = self.waker.lock() {
            *slot = Some(waker);
        }
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(local_addr);
        }
        log::info!("{} listening on {}", NAME, local_addr);

        let info = ConnInfo {
            local_addr: Some(local_addr),
            remote_addr: None,
            host_name: self.config.host_name.clone(),
            multithread: false,
        };
        let mut events = Events::with_capacity(1024);
        let mut connections: Vec<Option<Connection>> = Vec::new();

        while !self.stopping.load(Ordering::SeqCst) {
            if let Err(err) = poll.poll(&mut events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(KitError::from(err));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => accept(&poll, &mut listener, &mut connections)?,
                    WAKER => {}
                    token => {
                        let index = token.0 - FIRST_CONN;
                        let Some(Some(connection)) = connections.get_mut(index) else {
                            continue;
                        };
                        let progress = self
                            .drive(connection, &info, event.is_readable(), event.is_writable())
                            .unwrap_or_else(|e| {
                                log::warn!("Connection error from {}: {}", connection.remote_addr, e);
                                Progress::Close
                            });
                        match progress {
                            Progress::Close => {
                                if let Some(mut closed) = connections[index].take() {
                                    let _ = poll.registry().deregister(&mut closed.stream);
                                }
                            }
                            Progress::Open if connection.responded => {
                                poll.registry().reregister(
                                    &mut connection.stream,
                                    token,
                                    Interest::READABLE | Interest::WRITABLE,
                                )?;
                            }
                            Progress::Open => {}
                        }
                    }
                }
            }
        }

        log::info!("{} on {} stopped", NAME, local_addr);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        log::info!("Stopping {}", NAME);
        self.stopping.store(true, Ordering::SeqCst);
        let waker = self.waker.lock().ok().and_then(|slot| slot.clone());
        if let Some(waker) = waker {
            waker.wake()?;
        }
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}
