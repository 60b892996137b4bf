/// actix-web backend.
///
/// Every request goes to a single default service that builds the
/// environment, runs the application on the blocking pool, and converts the
/// result into an actix response. `threads` sets the worker count.
use super::resolve_addr;
use crate::config::ServerConfig;
use crate::error::{KitError, Result};
use crate::server::app::{self, AppResponse, SharedApp};
use crate::server::http::{self, ConnInfo, Request, MAX_REQUEST_BYTES};
use crate::server::registry::Backend;
use crate::server::Server;
use actix_web::dev::ServerHandle;
use actix_web::http::{StatusCode, Version};
use actix_web::rt::System;
use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const NAME: &str = "actix";

pub const BACKEND: Backend = Backend {
    name: NAME,
    description: "actix-web multi-worker server",
    construct,
};

fn construct(config: ServerConfig, app: SharedApp) -> Result<Box<dyn Server>> {
    Ok(Box::new(ActixServer::new(config, app)))
}

/// Shared with every worker.
pub struct ActixState {
    pub app: SharedApp,
    pub host_name: String,
}

fn to_request(req: &HttpRequest, body: &web::Bytes) -> Request {
    let version = match req.version() {
        Version::HTTP_09 | Version::HTTP_10 => 0,
        _ => 1,
    };
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.path().to_string());
    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect();

    Request {
        method: req.method().as_str().to_string(),
        target,
        version,
        headers,
        body: body.to_vec(),
    }
}

fn to_http_response(response: AppResponse) -> HttpResponse {
    let status = response
        .status_code()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = HttpResponse::build(status);
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("transfer-encoding")
        {
            continue;
        }
        builder.append_header((name.as_str(), value.as_str()));
    }
    builder.body(response.body.concat())
}

/// Default service: hand the request to the hosted application.
pub async fn dispatch(req: HttpRequest, body: web::Bytes, state: web::Data<ActixState>) -> HttpResponse {
    let info = ConnInfo {
        local_addr: Some(req.app_config().local_addr()),
        remote_addr: req.peer_addr(),
        host_name: state.host_name.clone(),
        multithread: true,
    };
    let environ = http::build_environ(&to_request(&req, &body), &info);
    let app = state.app.clone();

    let response = match web::block(move || app::respond(app.as_ref(), &environ)).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("Blocking pool failed: {}", e);
            AppResponse::error("500 Internal Server Error")
        }
    };
    to_http_response(response)
}

pub struct ActixServer {
    config: ServerConfig,
    app: SharedApp,
    handle: Mutex<Option<ServerHandle>>,
    local_addr: Mutex<Option<SocketAddr>>,
    stop_requested: AtomicBool,
}

impl ActixServer {
    pub fn new(config: ServerConfig, app: SharedApp) -> Self {
        ActixServer {
            config,
            app,
            handle: Mutex::new(None),
            local_addr: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn state(&self) -> web::Data<ActixState> {
        web::Data::new(ActixState {
            app: self.app.clone(),
            host_name: self.config.host_name.clone(),
        })
    }

    async fn serve(&self, addr: SocketAddr) -> Result<()> {
        let state = self.state();
        let mut server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(web::PayloadConfig::new(MAX_REQUEST_BYTES))
                .wrap(middleware::Logger::default())
                .default_service(web::to(dispatch))
        })
        .workers(self.config.threads.max(1))
        .disable_signals();
        if !self.config.host_name.is_empty() {
            server = server.server_hostname(&self.config.host_name);
        }

        let server = server.bind(addr)?;
        let bound = server.addrs().first().copied();
        if let Ok(mut local_addr) = self.local_addr.lock() {
            *local_addr = bound;
        }

        let server = server.run();
        if let Ok(mut handle) = self.handle.lock() {
            *handle = Some(server.handle());
        }
        if self.stop_requested.load(Ordering::SeqCst) {
            // The stop command is sent on call; the returned future only
            // reports completion.
            let _ = server.handle().stop(true);
        }

        log::info!(
            "{} listening on {} with {} workers",
            NAME,
            bound.map(|addr| addr.to_string()).unwrap_or_default(),
            self.config.threads.max(1)
        );
        server.await?;
        Ok(())
    }
}

impl Server for ActixServer {
    fn name(&self) -> &str {
        NAME
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn run(&self) -> Result<()> {
        let addr = resolve_addr(&self.config.bind_addr)?;
        System::new().block_on(self.serve(addr))?;
        log::info!("{} on {} stopped", NAME, addr);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        log::info!("Stopping {}", NAME);
        self.stop_requested.store(true, Ordering::SeqCst);
        let handle = self
            .handle
            .lock()
            .map_err(|_| KitError::AppError("Server handle lock poisoned".to_string()))?
            .take();
        if let Some(handle) = handle {
            let _ = handle.stop(true);
        }
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }
}
