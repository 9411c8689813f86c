use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{ByteStream, QueryTransport, TransportError};
use crate::config::Config;
use crate::protocol::QueryRequest;

const QUERY_PATH: &str = "viewer/query";
const CSRF_HEADER: &str = "x-csrf-token";
const TRACE_VERBOSITY_HEADER: &str = "x-trace-verbosity";

#[derive(Debug, Deserialize)]
struct AuthRequired {
    #[serde(default, alias = "authUrl")]
    auth_url: Option<String>,
}

/// Streams query responses over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    csrf_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            endpoint: query_endpoint(&config.server_url()?)?,
            csrf_token: config.csrf_token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn headers(&self, request: &QueryRequest) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("multipart/form-data"));
        if let Some(token) = &self.csrf_token {
            match HeaderValue::from_str(token) {
                Ok(value) => {
                    headers.insert(CSRF_HEADER, value);
                }
                Err(err) => warn!(
                    target: "beach_query::transport",
                    error = %err,
                    "csrf token is not a valid header value; omitting"
                ),
            }
        }
        if let Some(verbosity) = request.trace_verbosity() {
            headers.insert(TRACE_VERBOSITY_HEADER, HeaderValue::from(u16::from(verbosity)));
        }
        headers
    }
}

/// `{server}/viewer/query?schema=multipart&base64=false`, keeping any path prefix.
pub fn query_endpoint(server: &Url) -> Result<Url, url::ParseError> {
    let mut base = server.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut endpoint = base.join(QUERY_PATH)?;
    endpoint
        .query_pairs_mut()
        .clear()
        .append_pair("schema", "multipart")
        .append_pair("base64", "false");
    Ok(endpoint)
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn open(&self, request: &QueryRequest) -> Result<ByteStream, TransportError> {
        debug!(
            target: "beach_query::transport",
            endpoint = %self.endpoint,
            query_id = %request.query_id,
            action = %request.action,
            "opening query stream"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers(request))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            let location = serde_json::from_str::<AuthRequired>(&body)
                .ok()
                .and_then(|auth| auth.auth_url);
            debug!(
                target: "beach_query::transport",
                query_id = %request.query_id,
                location = ?location,
                "query requires authentication"
            );
            return Err(TransportError::AuthRedirect { location });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|item| item.map_err(TransportError::from)),
        ))
    }
}
