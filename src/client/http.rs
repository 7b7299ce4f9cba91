//! # HttpTransport: the API server over reqwest.
//!
//! Watches are read as newline-delimited JSON frames
//! (`{"type":"ADDED","object":{...}}`) from the chunked response body.

use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use async_trait::async_trait;

use super::{Client, ClientError, Connect, ConnectionConfig, ResourceRequest, Status, Transport, WatchEvent, WatchStream};
use crate::api::{Object, ObjectList};
use crate::error::ConfigurationError;

/// [`Transport`] speaking HTTP(S) to one API server.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    server: String,
}

impl HttpTransport {
    /// Builds the HTTP client from validated settings.
    pub fn new(config: &ConnectionConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let invalid = |reason: String| ConfigurationError::InvalidConnection { reason };

        let mut builder = reqwest::Client::builder();
        if let Some(ca) = &config.ca_pem {
            for cert in reqwest::Certificate::from_pem_bundle(ca).map_err(|e| invalid(format!("ca: {e}")))? {
                builder = builder.add_root_certificate(cert);
            }
        }
        if let (Some(cert), Some(key)) = (&config.client_cert_pem, &config.client_key_pem) {
            let mut pem = cert.clone();
            pem.push(b'\n');
            pem.extend_from_slice(key);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| invalid(format!("client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(token) = &config.token {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| invalid(format!("token: {e}")))?;
            value.set_sensitive(true);
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let http = builder.build().map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            http,
            server: config.server.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, req: &ResourceRequest) -> String {
        format!("{}{}", self.server, req.path())
    }

    fn selector_query(req: &ResourceRequest) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if !req.params.label_selector.is_empty() {
            query.push(("labelSelector", req.params.label_selector.to_string()));
        }
        query
    }
}

/// Turns a non-success response into a [`ClientError::Api`].
async fn check(resp: Response) -> Result<Response, ClientError> {
    let code = resp.status();
    if code.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let mut status: Status = serde_json::from_str(&body).unwrap_or_default();
    if status.code == 0 {
        status.code = code.as_u16();
    }
    if status.reason.is_empty() {
        status.reason = code.canonical_reason().unwrap_or("Unknown").to_owned();
    }
    if status.message.is_empty() {
        status.message = body;
    }
    Err(ClientError::Api(status))
}

fn http_err(e: reqwest::Error) -> ClientError {
    ClientError::Http(e.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn list(&self, req: &ResourceRequest) -> Result<ObjectList, ClientError> {
        let resp = self
            .http
            .get(self.url(req))
            .query(&Self::selector_query(req))
            .send()
            .await
            .map_err(http_err)?;
        check(resp)
            .await?
            .json::<ObjectList>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn watch(&self, req: &ResourceRequest, resource_version: &str) -> Result<WatchStream, ClientError> {
        let mut query = Self::selector_query(req);
        query.push(("watch", "true".into()));
        query.push(("allowWatchBookmarks", "true".into()));
        if !resource_version.is_empty() {
            query.push(("resourceVersion", resource_version.to_owned()));
        }
        if let Some(timeout) = req.params.timeout_seconds {
            query.push(("timeoutSeconds", timeout.to_string()));
        }
        let resp = self
            .http
            .get(self.url(req))
            .query(&query)
            .send()
            .await
            .map_err(http_err)?;
        let body = check(resp).await?.bytes_stream().map_ok(|b| b.to_vec()).boxed();
        Ok(frames(body))
    }

    async fn get(&self, req: &ResourceRequest, name: &str) -> Result<Option<Object>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/{name}", self.url(req)))
            .send()
            .await
            .map_err(http_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check(resp)
            .await?
            .json::<Object>()
            .await
            .map(Some)
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

struct Frames {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: Vec<u8>,
    done: bool,
}

/// Splits a chunked body into decoded watch events.
fn frames(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> WatchStream {
    let state = Frames {
        body,
        buf: Vec::new(),
        done: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some((decode_frame(&line), st));
            }
            if st.done {
                if st.buf.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                let line = std::mem::take(&mut st.buf);
                return Some((decode_frame(&line), st));
            }
            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(http_err(e)), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    object: Value,
}

fn decode_frame(line: &[u8]) -> Result<WatchEvent, ClientError> {
    let decode = |e: serde_json::Error| ClientError::Decode(e.to_string());
    let raw: RawEvent = serde_json::from_slice(line).map_err(decode)?;
    let object = || serde_json::from_value::<Object>(raw.object.clone()).map_err(decode);
    match raw.kind.as_str() {
        "ADDED" => Ok(WatchEvent::Added(object()?)),
        "MODIFIED" => Ok(WatchEvent::Modified(object()?)),
        "DELETED" => Ok(WatchEvent::Deleted(object()?)),
        "BOOKMARK" => Ok(WatchEvent::Bookmark {
            resource_version: object()?.resource_version().unwrap_or_default().to_owned(),
        }),
        "ERROR" => Ok(WatchEvent::Error(
            serde_json::from_value::<Status>(raw.object).map_err(decode)?,
        )),
        other => Err(ClientError::Decode(format!("unknown watch event type {other:?}"))),
    }
}

/// [`Connect`] producing [`HttpTransport`] clients.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpConnector;

impl Connect for HttpConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Client, ConfigurationError> {
        HttpTransport::new(config).map(Client::new)
    }
}
