//! Networking contracts: visited-URL parsing, HTTP messages, and the backend client.

pub mod client;
pub mod http;
pub mod tls;
pub mod transport;
pub mod url;

pub use client::Http11Client;
pub use client::HttpExchange;
pub use http::Header;
pub use http::HttpMethod;
pub use http::HttpRequest;
pub use http::HttpRequestBuilder;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use http::HttpVersion;
pub use url::EndpointUrl;
pub use url::Scheme;
pub use url::VisitedUrl;
pub use url::split_path;
pub use url::strip_www_prefix;
