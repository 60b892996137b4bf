/// HTTP/1.x plumbing shared by the native backends.
///
/// Requests are parsed from a byte buffer with `httparse`, so the same code
/// serves blocking sockets and the readiness-driven event loop. Every
/// response closes the connection.
use crate::error::{KitError, Result};
use crate::server::app::{self, AppResponse, Application, Environ};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

const MAX_HEADERS: usize = 64;

/// Requests larger than this are refused.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// A fully received request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: u8,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Where a connection came from and how the serving backend runs.
#[derive(Debug, Clone, Default)]
pub struct ConnInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    /// Configured server name; empty means derive it from the request.
    pub host_name: String,
    pub multithread: bool,
}

fn bad_request(message: impl Into<String>) -> KitError {
    KitError::DecodeError(message.into())
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\r\n")
}

/// Decode a chunked body starting at the head of `buffer`.
///
/// `Ok(None)` means more bytes are needed.
fn decode_chunked(buffer: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    let mut cursor = 0;
    loop {
        let line_end = match find_crlf(&buffer[cursor..]) {
            Some(idx) => cursor + idx,
            None => return Ok(None),
        };
        let line = String::from_utf8_lossy(&buffer[cursor..line_end]);
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| bad_request(format!("Invalid chunk size: {:?}", size_str)))?;
        cursor = line_end + 2;

        if size == 0 {
            // Trailers run until an empty line.
            loop {
                let end = match find_crlf(&buffer[cursor..]) {
                    Some(idx) => cursor + idx,
                    None => return Ok(None),
                };
                let empty = end == cursor;
                cursor = end + 2;
                if empty {
                    return Ok(Some(body));
                }
            }
        }

        let end = cursor
            .checked_add(size)
            .and_then(|end| end.checked_add(2))
            .filter(|end| *end <= MAX_REQUEST_BYTES)
            .ok_or_else(|| bad_request("Chunk too large"))?;
        if buffer.len() < end {
            return Ok(None);
        }
        if &buffer[end - 2..end] != b"\r\n" {
            return Err(bad_request("Chunk missing terminator"));
        }
        body.extend_from_slice(&buffer[cursor..end - 2]);
        cursor = end;
    }
}

/// Try to parse one request from `buffer`.
///
/// `Ok(None)` means the request is incomplete. Errors are malformed
/// requests and should be answered with `400`.
pub fn parse_request(buffer: &[u8]) -> Result<Option<Request>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let header_len = match parsed
        .parse(buffer)
        .map_err(|e| bad_request(format!("Invalid request: {}", e)))?
    {
        httparse::Status::Complete(size) => size,
        httparse::Status::Partial => return Ok(None),
    };

    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_string(),
                String::from_utf8_lossy(header.value).to_string(),
            )
        })
        .collect();

    let mut request = Request {
        method: parsed.method.unwrap_or("GET").to_string(),
        target: parsed.path.unwrap_or("/").to_string(),
        version: parsed.version.unwrap_or(1),
        headers,
        body: Vec::new(),
    };

    let rest = &buffer[header_len..];
    let chunked = request
        .header("Transfer-Encoding")
        .map(|value| value.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);

    if chunked {
        match decode_chunked(rest)? {
            Some(body) => request.body = body,
            None => return Ok(None),
        }
    } else if let Some(length) = request.header("Content-Length") {
        let length = length
            .trim()
            .parse::<usize>()
            .map_err(|_| bad_request(format!("Invalid Content-Length: {:?}", length)))?;
        if length > MAX_REQUEST_BYTES {
            return Err(bad_request("Request body too large"));
        }
        if rest.len() < length {
            return Ok(None);
        }
        request.body = rest[..length].to_vec();
    }

    Ok(Some(request))
}

/// Build the application environment for `request`.
pub fn build_environ(request: &Request, info: &ConnInfo) -> Environ {
    let (path_info, query_string) = match request.target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (request.target.as_str(), ""),
    };

    let mut environ = Environ::new();
    environ.insert("REQUEST_METHOD", request.method.as_str());
    environ.insert("SCRIPT_NAME", "");
    environ.insert("PATH_INFO", path_info);
    environ.insert("QUERY_STRING", query_string);
    environ.insert("SERVER_PROTOCOL", format!("HTTP/1.{}", request.version));
    environ.insert("wsgi.version", "1.0");
    environ.insert("wsgi.url_scheme", "http");
    environ.insert("wsgi.multithread", info.multithread.to_string());
    environ.insert("wsgi.multiprocess", "false");
    environ.insert("wsgi.run_once", "false");

    let local_port = info.local_addr.map(|addr| addr.port().to_string());
    if !info.host_name.is_empty() {
        environ.insert("SERVER_NAME", info.host_name.as_str());
        environ.insert("SERVER_PORT", local_port.unwrap_or_else(|| "80".to_string()));
    } else if let Some(host) = request.header("Host") {
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() && !port.contains(']') => (name, port.to_string()),
            _ => (host, local_port.unwrap_or_else(|| "80".to_string())),
        };
        environ.insert("SERVER_NAME", name);
        environ.insert("SERVER_PORT", port);
    } else if let Some(addr) = info.local_addr {
        environ.insert("SERVER_NAME", addr.ip().to_string());
        environ.insert("SERVER_PORT", addr.port().to_string());
    }

    if let Some(addr) = info.remote_addr {
        environ.insert("REMOTE_ADDR", addr.ip().to_string());
        environ.insert("REMOTE_PORT", addr.port().to_string());
    }

    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("Transfer-Encoding") {
            continue;
        }
        environ.insert_header(name, value);
    }
    if request.header("Transfer-Encoding").is_some() {
        environ.insert("CONTENT_LENGTH", request.body.len().to_string());
    }

    environ.set_input(request.body.clone());
    environ
}

fn has_body(status: u16, method: &str) -> bool {
    !(status < 200 || status == 204 || status == 304 || method.eq_ignore_ascii_case("HEAD"))
}

/// Serialize `response` as an HTTP/1.1 message that closes the connection.
pub fn encode_response(response: &AppResponse, method: &str) -> Vec<u8> {
    let status = response.status_code().unwrap_or(500);
    let no_content = status < 200 || status == 204 || status == 304;

    let mut out = Vec::with_capacity(256 + response.body_len());
    out.extend_from_slice(format!("HTTP/1.1 {}\r\n", response.status).as_bytes());

    let mut content_length = false;
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("connection") || name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        if name.eq_ignore_ascii_case("content-length") {
            if no_content {
                continue;
            }
            content_length = true;
        }
        out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }

    if !content_length && !no_content {
        out.extend_from_slice(format!("Content-Length: {}\r\n", response.body_len()).as_bytes());
    }
    out.extend_from_slice(b"Connection: close\r\n\r\n");

    if has_body(status, method) {
        for chunk in &response.body {
            out.extend_from_slice(chunk);
        }
    }
    out
}

/// Run `app` for a parsed request and serialize its answer.
pub fn handle_request(request: &Request, info: &ConnInfo, app: &dyn Application) -> Vec<u8> {
    let environ = build_environ(request, info);
    let response = app::respond(app, &environ);
    log::info!(
        "{} \"{} {} HTTP/1.{}\" {}",
        info.remote_addr.map(|addr| addr.ip().to_string()).unwrap_or_else(|| "-".to_string()),
        request.method,
        request.target,
        request.version,
        response.status_code().unwrap_or(500)
    );
    encode_response(&response, &request.method)
}

/// Canned `400 Bad Request`.
pub fn bad_request_response() -> Vec<u8> {
    encode_response(&AppResponse::error("400 Bad Request"), "GET")
}

/// Append whatever `stream` has ready to `buffer`. Returns the byte count.
pub fn read_more<T: Read>(stream: &mut T, buffer: &mut Vec<u8>) -> io::Result<usize> {
    let mut temp = [0_u8; READ_CHUNK];
    loop {
        match stream.read(&mut temp) {
            Ok(read) => {
                buffer.extend_from_slice(&temp[..read]);
                return Ok(read);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Read one request from a blocking stream, answer it, and close.
pub fn serve_connection(mut stream: TcpStream, info: ConnInfo, app: &dyn Application) -> Result<()> {
    let mut buffer = Vec::new();
    let reply = loop {
        match parse_request(&buffer) {
            Ok(Some(request)) => break handle_request(&request, &info, app),
            Ok(None) if buffer.len() > MAX_REQUEST_BYTES => break bad_request_response(),
            Ok(None) => {}
            Err(e) => {
                log::debug!("Rejecting request: {}", e);
                break bad_request_response();
            }
        }
        if read_more(&mut stream, &mut buffer)? == 0 {
            if !buffer.is_empty() {
                log::debug!("Client closed mid-request after {} bytes", buffer.len());
            }
            return Ok(());
        }
    };

    stream.write_all(&reply)?;
    stream.flush()?;
    let _ = stream.shutdown(std::net::Shutdown::Both);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::app::{Body, StartResponse};

    fn info() -> ConnInfo {
        ConnInfo {
            local_addr: Some("127.0.0.1:8080".parse().unwrap()),
            remote_addr: Some("10.1.2.3:5555".parse().unwrap()),
            host_name: String::new(),
            multithread: true,
        }
    }

    #[test]
    fn test_parse_simple_get() {
        let raw = b"GET /a/b?x=1 HTTP/1.1\r\nHost: example.org:9000\r\nX-Thing: yes\r\n\r\n";
        let request = parse_request(raw).unwrap().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/a/b?x=1");
        assert_eq!(request.version, 1);
        assert_eq!(request.header("x-thing"), Some("yes"));
        assert!(request.body.is_empty());
    }

    #[test]
    fn test_parse_partial() {
        assert!(parse_request(b"").unwrap().is_none());
        assert!(parse_request(b"GET / HTTP/1.1\r\nHost: a").unwrap().is_none());
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello";
        assert!(parse_request(raw).unwrap().is_none());
    }

    #[test]
    fn test_parse_content_length_body() {
        let raw = b"POST /submit HTTP/1.0\r\nContent-Length: 5\r\nContent-Type: text/plain\r\n\r\nhello";
        let request = parse_request(raw).unwrap().unwrap();
        assert_eq!(request.version, 0);
        assert_eq!(request.body, b"hello");
    }

    #[test]
    fn test_parse_chunked_body() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n";
        let request = parse_request(raw).unwrap().unwrap();
        assert_eq!(request.body, b"hello world");

        let partial = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel";
        assert!(parse_request(partial).unwrap().is_none());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_request(b"NOT A REQUEST\r\n\r\n").is_err());
        assert!(parse_request(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n").is_err());
        assert!(parse_request(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n").is_err());
    }

    #[test]
    fn test_build_environ() {
        let raw = b"POST /path?q=v HTTP/1.1\r\nHost: example.org:9000\r\nContent-Type: text/plain\r\nContent-Length: 3\r\nAccept-Language: en\r\n\r\nabc";
        let request = parse_request(raw).unwrap().unwrap();
        let environ = build_environ(&request, &info());

        assert_eq!(environ.get("REQUEST_METHOD"), Some("POST"));
        assert_eq!(environ.get("PATH_INFO"), Some("/path"));
        assert_eq!(environ.get("QUERY_STRING"), Some("q=v"));
        assert_eq!(environ.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(environ.get("SERVER_NAME"), Some("example.org"));
        assert_eq!(environ.get("SERVER_PORT"), Some("9000"));
        assert_eq!(environ.get("REMOTE_ADDR"), Some("10.1.2.3"));
        assert_eq!(environ.get("REMOTE_PORT"), Some("5555"));
        assert_eq!(environ.get("CONTENT_TYPE"), Some("text/plain"));
        assert_eq!(environ.get("CONTENT_LENGTH"), Some("3"));
        assert_eq!(environ.get("HTTP_ACCEPT_LANGUAGE"), Some("en"));
        assert_eq!(environ.get("wsgi.multithread"), Some("true"));
        assert_eq!(environ.input(), b"abc");
    }

    #[test]
    fn test_build_environ_host_name_wins() {
        let request = parse_request(b"GET / HTTP/1.1\r\nHost: other:1\r\n\r\n").unwrap().unwrap();
        let mut info = info();
        info.host_name = "svc.local".to_string();

        let environ = build_environ(&request, &info);
        assert_eq!(environ.get("SERVER_NAME"), Some("svc.local"));
        assert_eq!(environ.get("SERVER_PORT"), Some("8080"));
    }

    #[test]
    fn test_build_environ_without_host() {
        let request = parse_request(b"GET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
        let environ = build_environ(&request, &info());
        assert_eq!(environ.get("SERVER_NAME"), Some("127.0.0.1"));
        assert_eq!(environ.get("SERVER_PORT"), Some("8080"));
    }

    #[test]
    fn test_encode_response_adds_length_and_close() {
        let response = AppResponse {
            status: "200 OK".to_string(),
            headers: vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("Connection".to_string(), "keep-alive".to_string()),
            ],
            body: vec![b"hello ".to_vec(), b"world".to_vec()],
        };
        let text = String::from_utf8(encode_response(&response, "GET")).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(!text.contains("keep-alive"));
        assert!(text.ends_with("\r\n\r\nhello world"));
    }

    #[test]
    fn test_encode_response_keeps_app_length() {
        let response = AppResponse {
            status: "200 OK".to_string(),
            headers: vec![("Content-Length".to_string(), "5".to_string())],
            body: vec![b"hello".to_vec()],
        };
        let text = String::from_utf8(encode_response(&response, "GET")).unwrap();
        assert_eq!(text.matches("Content-Length").count(), 1);
    }

    #[test]
    fn test_encode_response_without_body() {
        for status in ["204 No Content", "304 Not Modified"] {
            let response = AppResponse {
                status: status.to_string(),
                headers: vec![("Content-Length".to_string(), "4".to_string())],
                body: vec![b"oops".to_vec()],
            };
            let text = String::from_utf8(encode_response(&response, "GET")).unwrap();
            assert!(text.ends_with("Connection: close\r\n\r\n"), "{}", text);
            assert!(!text.contains("Content-Length"));
        }

        let response = AppResponse::error("404 Not Found");
        let text = String::from_utf8(encode_response(&response, "HEAD")).unwrap();
        assert!(text.contains("Content-Length: 14\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_handle_request_failing_app() {
        let app = |_: &Environ, _: &mut StartResponse| -> Body { vec![] };
        let request = parse_request(b"GET / HTTP/1.1\r\n\r\n").unwrap().unwrap();
        let reply = String::from_utf8(handle_request(&request, &info(), &app)).unwrap();
        assert!(reply.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    }

    #[test]
    fn test_bad_request_response() {
        let reply = String::from_utf8(bad_request_response()).unwrap();
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
