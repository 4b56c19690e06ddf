// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! JSON-over-HTTP transport for the index data plane.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::client::config::ClientConfig;
use crate::error::{ClientError, ClientResult, RpcCode};
use crate::transport::wire::*;
use crate::transport::Transport;

const API_KEY_HEADER: &str = "Api-Key";
const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| ClientError::Config("an index host is required for HTTP".to_string()))?;
        if !host.starts_with("http://") && !host.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "Invalid URL format for index host '{}': must start with http:// or https://",
                host
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: host.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        rpc: &'static str,
        builder: RequestBuilder,
    ) -> ClientResult<T> {
        let request_id = Uuid::new_v4().to_string();
        let mut builder = builder.header(REQUEST_ID_HEADER, &request_id);
        if let Some(api_key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, api_key);
        }

        debug!(rpc, request_id = %request_id, "Sending request");
        let response = builder.send().await.map_err(|e| {
            warn!(rpc, request_id = %request_id, error = %e, "Request failed");
            map_reqwest_error(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = status_error(status.as_u16(), &body);
            warn!(rpc, request_id = %request_id, status = status.as_u16(), error = %err, "Request rejected");
            return Err(err);
        }

        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };
        serde_json::from_slice(body).map_err(|e| {
            error!(rpc, request_id = %request_id, error = %e, "Undecodable response");
            ClientError::Protocol(format!("Failed to parse {} response: {}", rpc, e))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upsert(&self, request: UpsertRequest) -> ClientResult<UpsertResponse> {
        let builder = self.client.post(self.url("/vectors/upsert")).json(&request);
        self.send("upsert", builder).await
    }

    async fn query(&self, request: QueryRequest) -> ClientResult<QueryResponse> {
        let builder = self.client.post(self.url("/query")).json(&request);
        self.send("query", builder).await
    }

    async fn fetch(&self, request: FetchRequest) -> ClientResult<FetchResponse> {
        let mut params: Vec<(&str, &str)> = request.ids.iter().map(|id| ("ids", id.as_str())).collect();
        if !request.namespace.is_empty() {
            params.push(("namespace", request.namespace.as_str()));
        }
        let builder = self.client.get(self.url("/vectors/fetch")).query(&params);
        self.send("fetch", builder).await
    }

    async fn update(&self, request: UpdateRequest) -> ClientResult<()> {
        let builder = self.client.post(self.url("/vectors/update")).json(&request);
        let _: Ack = self.send("update", builder).await?;
        Ok(())
    }

    async fn delete(&self, request: DeleteRequest) -> ClientResult<()> {
        let builder = self.client.post(self.url("/vectors/delete")).json(&request);
        let _: Ack = self.send("delete", builder).await?;
        Ok(())
    }

    async fn describe_index_stats(
        &self,
        request: DescribeIndexStatsRequest,
    ) -> ClientResult<DescribeIndexStatsResponse> {
        let builder = self
            .client
            .post(self.url("/describe_index_stats"))
            .json(&request);
        self.send("describe_index_stats", builder).await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::transport(RpcCode::DeadlineExceeded, err.to_string())
    } else if err.is_connect() {
        ClientError::transport(RpcCode::Unavailable, err.to_string())
    } else if err.is_builder() {
        ClientError::Config(err.to_string())
    } else if err.is_decode() {
        ClientError::Protocol(err.to_string())
    } else {
        ClientError::transport(RpcCode::Unknown, err.to_string())
    }
}

/// Maps a non-success response to a client error.
///
/// 502, 503 and 504 describe the connection and become transport errors;
/// everything else is a service rejection.
pub(crate) fn status_error(status: u16, body: &str) -> ClientError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();

    let mut code = RpcCode::from_http(status);
    if code == RpcCode::Unknown {
        if let Some(numeric) = parsed.as_ref().and_then(ErrorBody::numeric_code) {
            code = RpcCode::from_grpc(numeric);
        }
    }

    let message = parsed
        .as_ref()
        .and_then(ErrorBody::message)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let text = body.trim();
            if text.is_empty() {
                format!("HTTP status {}", status)
            } else {
                text.to_string()
            }
        });

    if code.is_connection_level() {
        ClientError::transport(code, message)
    } else {
        ClientError::service(code, message)
    }
}
