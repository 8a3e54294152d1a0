//! HTTP request/response contracts.

use crate::url::EndpointUrl;
use rd_core::TrackerError;
use rd_core::TrackerResult;

/// Outbound HTTP methods used against the tracker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> TrackerResult<Self> {
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(TrackerError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(TrackerError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: EndpointUrl,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn builder(method: HttpMethod, url: EndpointUrl) -> HttpRequestBuilder {
        HttpRequestBuilder {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn request_target(&self) -> String {
        self.url.path_and_query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Serialized HTTP/1.1 request head and body.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(256 + self.body.len());
        encoded.extend_from_slice(self.method.as_str().as_bytes());
        encoded.push(b' ');
        encoded.extend_from_slice(self.request_target().as_bytes());
        encoded.push(b' ');
        encoded.extend_from_slice(HttpVersion::Http11.as_str().as_bytes());
        encoded.extend_from_slice(b"\r\n");

        for header in &self.headers {
            encoded.extend_from_slice(header.name.as_bytes());
            encoded.extend_from_slice(b": ");
            encoded.extend_from_slice(header.value.as_bytes());
            encoded.extend_from_slice(b"\r\n");
        }
        encoded.extend_from_slice(b"\r\n");
        encoded.extend_from_slice(&self.body);
        encoded
    }
}

/// Builder for `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestBuilder {
    method: HttpMethod,
    url: EndpointUrl,
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl HttpRequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> TrackerResult<Self> {
        self.headers.push(Header::new(name, value)?);
        Ok(self)
    }

    /// Adds the header only when a value is present.
    pub fn optional_header(self, name: &str, value: Option<&str>) -> TrackerResult<Self> {
        match value {
            Some(value) => self.header(name, value),
            None => Ok(self),
        }
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(mut self) -> TrackerResult<HttpRequest> {
        if matches!(self.method, HttpMethod::Get) && !self.body.is_empty() {
            return Err(TrackerError::new(
                "net.http.body_disallowed",
                "GET requests must not include a body",
            ));
        }

        for name in ["host", "content-length", "connection"] {
            ensure_singleton_header(&self.headers, name)?;
        }

        if find_header(&self.headers, "host").is_none() {
            let host = self.url.authority();
            self.headers.push(Header::new("Host", &host)?);
        }

        // One request per connection; the response body ends at EOF at the latest.
        if find_header(&self.headers, "connection").is_none() {
            self.headers.push(Header::new("Connection", "close")?);
        }

        if matches!(self.method, HttpMethod::Post)
            && find_header(&self.headers, "content-length").is_none()
        {
            let len = self.body.len().to_string();
            self.headers.push(Header::new("Content-Length", &len)?);
        }

        Ok(HttpRequest {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
        })
    }
}

/// HTTP status code wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub const UNAUTHORIZED: Self = Self(401);
    pub const FORBIDDEN: Self = Self(403);

    pub fn new(code: u16) -> TrackerResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(TrackerError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_redirect(self) -> bool {
        matches!(self.0, 301 | 302 | 303 | 307 | 308)
    }

    /// 401 or 403: the page refused the request for lack of credentials.
    pub fn is_auth_failure(self) -> bool {
        self == Self::UNAUTHORIZED || self == Self::FORBIDDEN
    }
}

/// Incoming HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: HttpVersion,
    pub status: HttpStatusCode,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub(crate) fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

fn ensure_singleton_header(headers: &[Header], name: &str) -> TrackerResult<()> {
    let count = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case(name))
        .count();

    if count <= 1 {
        return Ok(());
    }

    Err(TrackerError::new(
        "net.http.duplicate_header",
        format!("header `{name}` must appear at most once"),
    ))
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::HttpMethod;
    use super::HttpRequest;
    use super::HttpStatusCode;
    use crate::url::EndpointUrl;

    fn endpoint(raw: &str) -> EndpointUrl {
        match EndpointUrl::parse(raw) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn host_and_connection_headers_are_added() {
        let request = HttpRequest::builder(HttpMethod::Get, endpoint("https://riddler.app/get-user-riddle-data")).build();
        let request = match request {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(request.header("Host"), Some("riddler.app"));
        assert_eq!(request.header("connection"), Some("close"));
        assert_eq!(request.request_target(), "/get-user-riddle-data");
    }

    #[test]
    fn get_request_cannot_have_body() {
        let request = HttpRequest::builder(HttpMethod::Get, endpoint("https://riddler.app/"))
            .body(vec![1, 2, 3])
            .build();
        assert!(request.is_err());
    }

    #[test]
    fn post_wire_format_carries_length_and_body() {
        let request = HttpRequest::builder(HttpMethod::Post, endpoint("http://localhost:5000/process"))
            .header("Content-Type", "text/uri-list")
            .and_then(|builder| builder.optional_header("Location", None))
            .and_then(|builder| builder.body(b"https://example.com/".to_vec()).build());
        let request = match request {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };

        let wire = String::from_utf8(request.to_wire()).unwrap_or_default();
        assert!(wire.starts_with("POST /process HTTP/1.1\r\n"));
        assert!(wire.contains("Host: localhost:5000\r\n"));
        assert!(wire.contains("Content-Length: 20\r\n"));
        assert!(!wire.contains("Location"));
        assert!(wire.ends_with("\r\n\r\nhttps://example.com/"));
    }

    #[test]
    fn header_injection_is_rejected() {
        let request = HttpRequest::builder(HttpMethod::Post, endpoint("https://riddler.app/process"))
            .header("Location", "https://a/\r\nX-Evil: 1");
        assert!(request.is_err());
        if let Err(error) = request {
            assert_eq!(error.code, "net.http.header_value_invalid");
        }
    }

    #[test]
    fn status_code_classification() {
        assert!(HttpStatusCode::new(200).is_ok());
        assert!(HttpStatusCode::new(99).is_err());
        assert!(HttpStatusCode::new(600).is_err());
        assert!(HttpStatusCode::UNAUTHORIZED.is_auth_failure());
        assert!(HttpStatusCode::FORBIDDEN.is_auth_failure());
        let found = HttpStatusCode::new(302).unwrap_or_else(|_| unreachable!());
        assert!(found.is_redirect());
        assert!(!found.is_auth_failure());
    }
}
