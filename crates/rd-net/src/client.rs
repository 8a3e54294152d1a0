//! Blocking HTTP/1.1 client: one request per connection.

use crate::http::Header;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::HttpStatusCode;
use crate::http::HttpVersion;
use crate::tls::TlsConnector;
use crate::transport::BoxedIoStream;
use crate::transport::connect_first_available;
use crate::transport::resolve;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;
use std::time::Duration;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a prepared request and returns the decoded response.
pub trait HttpExchange: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> TrackerResult<HttpResponse>;
}

/// HTTP/1.1 client over plain TCP or rustls.
#[derive(Debug, Clone)]
pub struct Http11Client {
    tls: TlsConnector,
    timeout: Duration,
}

impl Http11Client {
    pub fn new() -> TrackerResult<Self> {
        Ok(Self {
            tls: TlsConnector::new()?,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn open_stream(&self, request: &HttpRequest) -> TrackerResult<BoxedIoStream> {
        let host = request.url.host();
        let addresses = resolve(host, request.url.port())?;
        let stream = connect_first_available(&addresses, self.timeout)?;

        if request.url.is_secure() {
            self.tls.connect(stream, host)
        } else {
            Ok(Box::new(stream))
        }
    }
}

impl HttpExchange for Http11Client {
    fn execute(&self, request: &HttpRequest) -> TrackerResult<HttpResponse> {
        let mut stream = self.open_stream(request)?;
        write_request(&mut *stream, request)?;
        let response = read_response(&mut *stream)?;

        tracing::trace!(
            method = request.method.as_str(),
            url = request.url.as_str(),
            status = response.status.as_u16(),
            bytes = response.body.len(),
            "http exchange complete"
        );
        Ok(response)
    }
}

fn write_request(stream: &mut dyn Write, request: &HttpRequest) -> TrackerResult<()> {
    stream.write_all(&request.to_wire()).map_err(|error| {
        TrackerError::new(
            "net.http.write_failed",
            format!("failed to write HTTP request bytes: {error}"),
        )
    })?;
    stream.flush().map_err(|error| {
        TrackerError::new(
            "net.http.flush_failed",
            format!("failed to flush HTTP request bytes: {error}"),
        )
    })
}

fn read_response(stream: &mut dyn Read) -> TrackerResult<HttpResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }

        let read = stream.read(&mut chunk).map_err(|error| {
            TrackerError::new(
                "net.http.read_head_failed",
                format!("failed while reading HTTP response head: {error}"),
            )
        })?;

        if read == 0 {
            return Err(TrackerError::new(
                "net.http.unexpected_eof",
                "unexpected EOF before response head completed",
            ));
        }

        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(TrackerError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    };

    let mut body_bytes = buffer.split_off(header_end);
    let head_text = std::str::from_utf8(&buffer).map_err(|error| {
        TrackerError::new(
            "net.http.head_invalid_utf8",
            format!("HTTP response head is not valid UTF-8 text: {error}"),
        )
    })?;

    let mut lines = head_text.split("\r\n");
    let status_line = lines.next().ok_or_else(|| {
        TrackerError::new("net.http.status_line_missing", "missing HTTP status line")
    })?;
    let (version, status) = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            TrackerError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    if status_disallows_body(status.as_u16()) {
        return Ok(HttpResponse {
            version,
            status,
            headers,
            body: Vec::new(),
        });
    }

    let has_transfer_encoding = headers
        .iter()
        .any(|header| header.name.eq_ignore_ascii_case("transfer-encoding"));
    let has_chunked_transfer = header_contains(&headers, "transfer-encoding", "chunked");
    if has_transfer_encoding && !has_chunked_transfer {
        return Err(TrackerError::new(
            "net.http.transfer_encoding_unsupported",
            "only chunked transfer encoding is currently supported",
        ));
    }

    if has_chunked_transfer {
        body_bytes = read_chunked_body(stream, body_bytes)?;
    } else if let Some(len) = parse_content_length(&headers)? {
        if body_bytes.len() < len {
            let mut rest = vec![0_u8; len - body_bytes.len()];
            stream.read_exact(&mut rest).map_err(|error| {
                TrackerError::new(
                    "net.http.read_body_failed",
                    format!("failed to read HTTP body bytes: {error}"),
                )
            })?;
            body_bytes.extend_from_slice(&rest);
        } else {
            body_bytes.truncate(len);
        }
    } else {
        // Requests always ask for `Connection: close`, so EOF delimits the body.
        stream.read_to_end(&mut body_bytes).map_err(|error| {
            TrackerError::new(
                "net.http.read_body_failed",
                format!("failed while draining connection-close response body: {error}"),
            )
        })?;
    }

    let body = decode_content_encoding(&headers, body_bytes)?;
    Ok(HttpResponse {
        version,
        status,
        headers,
        body,
    })
}

struct PrefixedStreamReader<'a> {
    prefetched: Vec<u8>,
    offset: usize,
    stream: &'a mut dyn Read,
}

impl<'a> PrefixedStreamReader<'a> {
    fn new(stream: &'a mut dyn Read, prefetched: Vec<u8>) -> Self {
        Self {
            prefetched,
            offset: 0,
            stream,
        }
    }

    fn read_exact_into(&mut self, out: &mut [u8], detail: &str) -> TrackerResult<()> {
        let available = self.prefetched.len().saturating_sub(self.offset);
        let prefix_take = available.min(out.len());

        if prefix_take > 0 {
            out[..prefix_take]
                .copy_from_slice(&self.prefetched[self.offset..self.offset + prefix_take]);
            self.offset += prefix_take;
        }

        if prefix_take < out.len() {
            self.stream
                .read_exact(&mut out[prefix_take..])
                .map_err(|error| {
                    TrackerError::new("net.http.read_body_failed", format!("{detail}: {error}"))
                })?;
        }

        Ok(())
    }
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> TrackerResult<Vec<u8>> {
    let mut reader = PrefixedStreamReader::new(stream, prefetched);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            TrackerError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            // Trailers are irrelevant to the backend payloads; skip until the blank line.
            while !read_crlf_line(&mut reader)?.is_empty() {}
            break;
        }

        let start = decoded.len();
        decoded.resize(start + chunk_size, 0);
        reader.read_exact_into(
            &mut decoded[start..],
            "failed while reading chunked HTTP body bytes",
        )?;

        let mut terminator = [0_u8; 2];
        reader.read_exact_into(&mut terminator, "failed while reading chunk terminator")?;
        if terminator != *b"\r\n" {
            return Err(TrackerError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn read_crlf_line(reader: &mut PrefixedStreamReader<'_>) -> TrackerResult<String> {
    let mut line = Vec::new();

    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact_into(&mut byte, "failed while reading chunked transfer line")?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(TrackerError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }

        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return String::from_utf8(line).map_err(|error| {
                TrackerError::new(
                    "net.http.chunk_line_invalid_utf8",
                    format!("chunk metadata line is not valid UTF-8: {error}"),
                )
            });
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> TrackerResult<(HttpVersion, HttpStatusCode)> {
    let invalid = || {
        TrackerError::new(
            "net.http.status_line_invalid",
            format!("malformed status line `{line}`"),
        )
    };

    let mut parts = line.splitn(3, ' ');
    let version = match parts.next().ok_or_else(invalid)? {
        "HTTP/1.0" => HttpVersion::Http10,
        "HTTP/1.1" => HttpVersion::Http11,
        other => {
            return Err(TrackerError::new(
                "net.http.version_unsupported",
                format!("unsupported response version `{other}`"),
            ));
        }
    };

    let code = parts
        .next()
        .and_then(|text| text.parse::<u16>().ok())
        .ok_or_else(invalid)?;
    Ok((version, HttpStatusCode::new(code)?))
}

fn parse_content_length(headers: &[Header]) -> TrackerResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-length") {
            continue;
        }

        let parsed = header.value.trim().parse::<usize>().map_err(|error| {
            TrackerError::new(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{}`: {error}", header.value),
            )
        })?;

        match value {
            Some(existing) if existing != parsed => {
                return Err(TrackerError::new(
                    "net.http.content_length_conflict",
                    "conflicting Content-Length headers in response",
                ));
            }
            _ => value = Some(parsed),
        }
    }

    Ok(value)
}

fn status_disallows_body(status_code: u16) -> bool {
    (100..200).contains(&status_code) || status_code == 204 || status_code == 304
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn decode_content_encoding(headers: &[Header], body: Vec<u8>) -> TrackerResult<Vec<u8>> {
    let encodings: Vec<String> = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut decoded = body;
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(decoded)), "gzip")?,
            "deflate" => decode_deflate(decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(decoded), 4096), "brotli")?,
            _ => {
                return Err(TrackerError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }

    Ok(decoded)
}

fn decode_deflate(body: Vec<u8>) -> TrackerResult<Vec<u8>> {
    let mut zlib_decoded = Vec::new();
    if ZlibDecoder::new(Cursor::new(&body))
        .read_to_end(&mut zlib_decoded)
        .is_ok()
    {
        return Ok(zlib_decoded);
    }

    read_all(DeflateDecoder::new(Cursor::new(body)), "deflate")
}

fn read_all(mut decoder: impl Read, label: &str) -> TrackerResult<Vec<u8>> {
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        TrackerError::new(
            "net.http.decode_failed",
            format!("{label} decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}
