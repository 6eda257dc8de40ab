//! HTTP client for the remote ITSM REST API
//!
//! Wraps reqwest with basic auth, an explicit request timeout and a rate
//! limiter so concurrent load tasks cannot hammer the remote instance. The
//! client implements [`ListSource`], which is the only surface the
//! pagination loop knows about.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::domain::record::{flatten_record, Record};
use crate::infrastructure::fetcher::{FetchError, ListSource};

/// Connection settings for the remote API.
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Hard request timeout. The remote occasionally stalls on large
    /// offset windows; without this a worker can hang forever.
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    /// Key of the JSON envelope holding the record array.
    pub result_key: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: 30,
            max_requests_per_second: 5,
            result_key: "result".to_string(),
        }
    }
}

/// Rate-limited JSON client for list and single-record endpoints.
pub struct ApiClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: ApiClientConfig,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// GET a JSON document, surfacing non-2xx responses as [`FetchError::Http`].
    async fn get_json(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Fetches a single record by id (`GET <base>/<resource>/<id>`).
    ///
    /// Returns `None` when the remote answers 404 or with an empty result,
    /// already flattened otherwise. Used for per-id enrichment of records
    /// whose list payload is incomplete.
    pub async fn fetch_one(
        &self,
        resource: &str,
        id: &str,
    ) -> Result<Option<Record>, FetchError> {
        let path = format!("{resource}/{id}");
        let body = match self.get_json(&path, &[]).await {
            Ok(body) => body,
            Err(FetchError::Http { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        match body.get(&self.config.result_key) {
            Some(Value::Object(obj)) if !obj.is_empty() => {
                Ok(Some(flatten_record(obj.clone())))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ListSource for ApiClient {
    async fn fetch_page(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Vec<Record>, FetchError> {
        let body = self.get_json(path, params).await?;

        let items = match body.get(&self.config.result_key) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(FetchError::Decode(format!(
                    "expected '{}' to be an array, got {}",
                    self.config.result_key,
                    type_name(other)
                )))
            }
        };

        items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj),
                other => Err(FetchError::Decode(format!(
                    "expected record object, got {}",
                    type_name(&other)
                ))),
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    /// Serves `router` on an ephemeral port and returns its base url.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> ApiClient {
        ApiClient::new(ApiClientConfig {
            base_url,
            username: "api".to_string(),
            password: "secret".to_string(),
            ..ApiClientConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetch_one_flattens_the_result_envelope() {
        let router = Router::new().route(
            "/incident/{id}",
            get(|Path(id): Path<String>| async move {
                Json(json!({"result": {
                    "sys_id": id,
                    "assignment_group": {"value": "g1", "display_value": "Ops"},
                }}))
            }),
        );
        let client = client(serve(router).await);

        let record = client.fetch_one("incident", "i1").await.unwrap().unwrap();
        assert_eq!(record["sys_id"], json!("i1"));
        assert_eq!(record["assignment_group"], json!("g1"));
        assert_eq!(record["dv_assignment_group"], json!("Ops"));
    }

    #[tokio::test]
    async fn fetch_one_not_found_is_none() {
        // No routes: every path answers 404.
        let client = client(serve(Router::new()).await);
        assert!(client.fetch_one("incident", "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_one_empty_result_is_none() {
        let router = Router::new().route(
            "/incident/{id}",
            get(|| async { Json(json!({"result": {}})) }),
        );
        let client = client(serve(router).await);
        assert!(client.fetch_one("incident", "i1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_page_reads_the_result_array() {
        let router = Router::new().route(
            "/incident",
            get(|| async {
                Json(json!({"result": [
                    {"sys_id": "a"},
                    {"sys_id": "b"},
                ]}))
            }),
        );
        let client = client(serve(router).await);

        let page = client.fetch_page("incident", &[]).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1]["sys_id"], json!("b"));
    }

    #[tokio::test]
    async fn non_success_status_carries_the_body() {
        let router = Router::new().route(
            "/incident",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream broke") }),
        );
        let client = client(serve(router).await);

        let err = client.fetch_page("incident", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Http { status: 502, ref body } if body.contains("upstream broke")
        ));
    }

    #[tokio::test]
    async fn wrong_envelope_shape_is_a_decode_error() {
        let router = Router::new().route(
            "/incident",
            get(|| async { Json(json!({"result": "not an array"})) }),
        );
        let client = client(serve(router).await);

        let err = client.fetch_page("incident", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
