//! Store adapter for a PostgREST-compatible endpoint (`/rest/v1/{table}`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{Filter, Query, Row, Store, StoreError, filter::encode_order};

/// Error body PostgREST returns on 4xx responses.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

pub struct PostgrestStore {
    client: Client,
    base: Url,
    service_key: String,
    permits: Arc<Semaphore>,
}

impl PostgrestStore {
    /// `pool_size` bounds both idle connections and requests in flight.
    pub fn new(
        store_url: &str,
        service_key: &str,
        pool_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base = Url::parse(&format!("{}/rest/v1/", store_url.trim_end_matches('/')))
            .map_err(|e| StoreError::Unavailable(format!("invalid store url: {}", e)))?;

        let client = Client::builder()
            .pool_max_idle_per_host(pool_size)
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base,
            service_key: service_key.to_string(),
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        })
    }

    fn url(&self, path: &str, pairs: &[(String, String)]) -> Result<Url, StoreError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| StoreError::Unavailable(format!("invalid path '{}': {}", path, e)))?;
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Row, StoreError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|_| StoreError::Unavailable("connection pool closed".to_string()))?,
        };

        let send = async {
            let response = request
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok::<_, StoreError>((status, body))
        };

        // Dropping `send` aborts the pending HTTP exchange.
        let (status, body) = tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            result = send => result?,
        };

        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        if body.is_empty() {
            return Ok(Row::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

fn error_from_response(status: StatusCode, body: &[u8]) -> StoreError {
    let text = String::from_utf8_lossy(body).to_string();
    if status.is_server_error() {
        return StoreError::Unavailable(format!("{}: {}", status, text));
    }
    let parsed: ApiErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let mut message = parsed.message.unwrap_or(text);
    if let Some(details) = parsed.details {
        message = format!("{} ({})", message, details);
    }
    StoreError::Api {
        status: status.as_u16(),
        code: parsed.code,
        message,
    }
}

fn into_rows(value: Row) -> Vec<Row> {
    match value {
        Row::Array(rows) => rows,
        Row::Null => Vec::new(),
        other => vec![other],
    }
}

fn prefer(return_representation: bool) -> &'static str {
    if return_representation {
        "return=representation"
    } else {
        "return=minimal"
    }
}

#[async_trait]
impl Store for PostgrestStore {
    async fn select(
        &self,
        table: &str,
        query: &Query,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        let mut pairs = vec![(
            "select".to_string(),
            query.select.clone().unwrap_or_else(|| "*".to_string()),
        )];
        pairs.extend(query.filter.to_query_pairs());
        if let Some(order) = encode_order(&query.order) {
            pairs.push(("order".to_string(), order));
        }
        if let Some(limit) = query.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = query.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }

        let url = self.url(table, &pairs)?;
        let body = self.execute(self.request(Method::GET, url), cancel).await?;
        Ok(into_rows(body))
    }

    async fn count(
        &self,
        table: &str,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u64,
        }

        let mut pairs = vec![("select".to_string(), "count".to_string())];
        pairs.extend(filter.to_query_pairs());
        let url = self.url(table, &pairs)?;
        let body = self.execute(self.request(Method::GET, url), cancel).await?;

        let counts: Vec<CountRow> = serde_json::from_value(Row::Array(into_rows(body)))?;
        Ok(counts.first().map(|c| c.count).unwrap_or(0))
    }

    async fn insert(
        &self,
        table: &str,
        row: Row,
        return_representation: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        let url = self.url(table, &[])?;
        let request = self
            .request(Method::POST, url)
            .header("Prefer", prefer(return_representation))
            .json(&row);
        Ok(into_rows(self.execute(request, cancel).await?))
    }

    async fn patch(
        &self,
        table: &str,
        filter: &Filter,
        updates: Row,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        let url = self.url(table, &filter.to_query_pairs())?;
        let request = self
            .request(Method::PATCH, url)
            .header("Prefer", prefer(true))
            .json(&updates);
        Ok(into_rows(self.execute(request, cancel).await?))
    }

    async fn delete(
        &self,
        table: &str,
        filter: &Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>, StoreError> {
        let url = self.url(table, &filter.to_query_pairs())?;
        let request = self
            .request(Method::DELETE, url)
            .header("Prefer", prefer(true));
        Ok(into_rows(self.execute(request, cancel).await?))
    }

    async fn rpc(
        &self,
        name: &str,
        args: Row,
        cancel: &CancellationToken,
    ) -> Result<Row, StoreError> {
        let url = self.url(&format!("rpc/{}", name), &[])?;
        let request = self.request(Method::POST, url).json(&args);
        self.execute(request, cancel).await
    }
}
