//! `RiddleBackend` over the tracker's HTTP API.

use crate::RiddleBackend;
use crate::process::ProcessOutcome;
use crate::process::VisitedResponse;
use crate::process::decode_process_response;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use rd_net::EndpointUrl;
use rd_net::Http11Client;
use rd_net::HttpExchange;
use rd_net::HttpMethod;
use rd_net::HttpRequest;
use rd_net::HttpRequestBuilder;
use rd_net::HttpResponse;
use rd_net::HttpStatusCode;
use rd_riddle::PagesData;
use rd_riddle::RiddleData;
use rd_riddle::data::parse_pages;
use rd_riddle::data::parse_riddle;
use rd_riddle::data::parse_riddles;
use std::collections::BTreeMap;

const ACCEPT_ENCODING: &str = "gzip, deflate, br";
const URI_LIST: &str = "text/uri-list";

pub struct HttpRiddleBackend<C = Http11Client> {
    client: C,
    base: EndpointUrl,
    session: Option<String>,
}

impl HttpRiddleBackend {
    pub fn new(base: EndpointUrl, session: Option<String>) -> TrackerResult<Self> {
        Ok(Self::with_client(Http11Client::new()?, base, session))
    }
}

impl<C: HttpExchange> HttpRiddleBackend<C> {
    pub fn with_client(client: C, base: EndpointUrl, session: Option<String>) -> Self {
        Self {
            client,
            base,
            session,
        }
    }

    pub fn base(&self) -> &EndpointUrl {
        &self.base
    }

    fn request(
        &self,
        method: HttpMethod,
        segments: &[&str],
    ) -> TrackerResult<HttpRequestBuilder> {
        let url = self.base.join_segments(segments)?;
        let cookie = self.session.as_ref().map(|value| format!("session={value}"));
        HttpRequest::builder(method, url)
            .header("Accept-Encoding", ACCEPT_ENCODING)?
            .optional_header("Cookie", cookie.as_deref())
    }

    fn get_json(&self, segments: &[&str]) -> TrackerResult<String> {
        let request = self.request(HttpMethod::Get, segments)?.build()?;
        let response = self.client.execute(&request)?;
        expect_success(&request, &response)?;
        Ok(response.body_text())
    }
}

impl<C: HttpExchange> RiddleBackend for HttpRiddleBackend<C> {
    fn process(&self, visited: &VisitedResponse) -> TrackerResult<ProcessOutcome> {
        let request = self
            .request(HttpMethod::Post, &["process"])?
            .header("Content-Type", URI_LIST)?
            .header("Statuscode", &visited.status_code.to_string())?
            .optional_header("Location", visited.location.as_deref())?
            .optional_header("Content-Location", visited.content_location.as_deref())?
            .body(visited.url.as_bytes().to_vec())
            .build()?;

        let response = self.client.execute(&request)?;
        let outcome = decode_process_response(response.status.as_u16(), &response.body_text())?;
        tracing::debug!(
            url = %visited.url,
            status = visited.status_code,
            backend_status = response.status.as_u16(),
            "processed visited url"
        );
        Ok(outcome)
    }

    fn fetch_all_riddles(&self) -> TrackerResult<BTreeMap<String, RiddleData>> {
        parse_riddles(&self.get_json(&["get-user-riddle-data"])?)
    }

    fn fetch_riddle(&self, alias: &str) -> TrackerResult<RiddleData> {
        parse_riddle(&self.get_json(&["get-user-riddle-data", alias])?)
    }

    fn fetch_pages(&self, alias: &str, level: Option<&str>) -> TrackerResult<PagesData> {
        let body = match level {
            Some(level) => self.get_json(&[alias, "levels", "get-pages", level])?,
            None => self.get_json(&[alias, "levels", "get-pages"])?,
        };
        parse_pages(&body)
    }
}

fn expect_success(request: &HttpRequest, response: &HttpResponse) -> TrackerResult<()> {
    let status = response.status;
    if status.is_success() {
        return Ok(());
    }

    if status == HttpStatusCode::UNAUTHORIZED {
        return Err(TrackerError::new(
            "backend.session.expired",
            format!("`{}` requires a logged-in session", request.url.as_str()),
        ));
    }

    Err(TrackerError::new(
        "backend.http.status",
        format!(
            "`{}` answered `{}`",
            request.url.as_str(),
            status.as_u16()
        ),
    ))
}
