/// Application calling convention shared by every backend.
///
/// An application receives the request environment and a `StartResponse`
/// it must call exactly once with the status line and headers, and returns
/// the response body as a sequence of byte chunks.

use crate::error::{KitError, Result};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Response body: chunks are written in order.
pub type Body = Vec<Vec<u8>>;

/// Request environment: CGI-style variables plus the request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environ {
    vars: BTreeMap<String, String>,
    input: Vec<u8>,
}

impl Environ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Add a request header as an `HTTP_*` variable.
    ///
    /// `Content-Type` and `Content-Length` map to their CGI names. Repeated
    /// headers are joined with a comma.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        let key = if name.eq_ignore_ascii_case("content-type") {
            "CONTENT_TYPE".to_string()
        } else if name.eq_ignore_ascii_case("content-length") {
            "CONTENT_LENGTH".to_string()
        } else {
            format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"))
        };
        match self.vars.get_mut(&key) {
            Some(existing) => {
                existing.push(',');
                existing.push_str(value);
            }
            None => {
                self.vars.insert(key, value.to_string());
            }
        }
    }

    pub fn set_input(&mut self, input: Vec<u8>) {
        self.input = input;
    }

    /// Request body.
    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn method(&self) -> &str {
        self.get("REQUEST_METHOD").unwrap_or("GET")
    }

    pub fn path_info(&self) -> &str {
        self.get("PATH_INFO").unwrap_or("/")
    }
}

/// Records the status line and headers an application responds with.
#[derive(Debug, Default)]
pub struct StartResponse {
    status: Option<String>,
    headers: Vec<(String, String)>,
}

impl StartResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status line (e.g. `"200 OK"`) and response headers.
    ///
    /// A second call replaces the first.
    pub fn call(&mut self, status: impl Into<String>, headers: Vec<(String, String)>) {
        self.status = Some(status.into());
        self.headers = headers;
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// The request handler a server hosts.
pub trait Application: Send + Sync + 'static {
    fn call(&self, environ: &Environ, start_response: &mut StartResponse) -> Body;
}

impl<F> Application for F
where
    F: Fn(&Environ, &mut StartResponse) -> Body + Send + Sync + 'static,
{
    fn call(&self, environ: &Environ, start_response: &mut StartResponse) -> Body {
        self(environ, start_response)
    }
}

pub type SharedApp = Arc<dyn Application>;

/// A completed application response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppResponse {
    pub status: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl AppResponse {
    /// Numeric status code from the status line.
    pub fn status_code(&self) -> Result<u16> {
        self.status
            .split_whitespace()
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (100..1000).contains(code))
            .ok_or_else(|| KitError::AppError(format!("Invalid status line: {:?}", self.status)))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_len(&self) -> usize {
        self.body.iter().map(Vec::len).sum()
    }

    /// Plain-text error response used when the application cannot answer.
    pub fn error(status: &str) -> Self {
        let body = format!("{}\n", status).into_bytes();
        AppResponse {
            status: status.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
            body: vec![body],
        }
    }
}

/// Run `app` against `environ`.
///
/// Fails if the application panics or never calls `start_response`.
pub fn invoke(app: &dyn Application, environ: &Environ) -> Result<AppResponse> {
    let mut start_response = StartResponse::new();
    let body = panic::catch_unwind(AssertUnwindSafe(|| app.call(environ, &mut start_response)))
        .map_err(|_| KitError::AppError("Application panicked".to_string()))?;

    let status = start_response
        .status
        .ok_or_else(|| KitError::AppError("start_response was not called".to_string()))?;

    let response = AppResponse {
        status,
        headers: start_response.headers,
        body,
    };
    response.status_code()?;
    Ok(response)
}

/// Like [`invoke`], but turns failures into a `500` response.
pub fn respond(app: &dyn Application, environ: &Environ) -> AppResponse {
    match invoke(app, environ) {
        Ok(response) => response,
        Err(e) => {
            log::error!("{} {}: {}", environ.method(), environ.path_info(), e);
            AppResponse::error("500 Internal Server Error")
        }
    }
}

/// Echo application: greets and lists the request environment.
pub fn demo_app(environ: &Environ, start_response: &mut StartResponse) -> Body {
    start_response.call(
        "200 OK",
        vec![("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
    );

    let mut body = String::from("Hello world!\n\n");
    for (key, value) in environ.vars() {
        body.push_str(&format!("{} = {:?}\n", key, value));
    }
    vec![body.into_bytes()]
}

/// [`demo_app`] as a shareable application.
pub fn demo() -> SharedApp {
    Arc::new(demo_app)
}
