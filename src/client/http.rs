//! Client interface to the API server
//!
//! [`ResourceClient`] is the seam controllers program against. [`Api`] is
//! the reqwest implementation for one resource kind; `LocalClient` serves
//! the same calls in-process.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ClientError;
use super::stream::StreamWatcher;
use crate::resources::{ApiStatus, Resource, ResourceList};
use crate::server::Created;

/// Connection establishment limit; watch bodies stay open indefinitely
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default limit for unary requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CRUD and watch calls on one resource collection
#[async_trait]
pub trait ResourceClient<K: Resource>: Send + Sync {
    async fn post(&self, obj: &K) -> Result<Created, ClientError>;

    /// Replace; `obj` must carry the version it was read at
    async fn put(&self, uid: &str, obj: &K) -> Result<i64, ClientError>;

    async fn get(&self, uid: &str) -> Result<K, ClientError>;

    async fn get_status(&self, uid: &str) -> Result<K::Status, ClientError>;

    async fn put_status(&self, uid: &str, obj: &K) -> Result<i64, ClientError>;

    async fn get_all(&self) -> Result<ResourceList<K>, ClientError>;

    async fn delete(&self, uid: &str) -> Result<i64, ClientError>;

    /// Watch one object, resuming after `from` when given
    async fn watch(&self, uid: &str, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError>;

    async fn watch_all(&self, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError>;
}

/// Shared HTTP connection to an API server
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Typed handle for one resource kind
    pub fn api<K: Resource>(&self) -> Api<K> {
        Api {
            http: self.clone(),
            _kind: PhantomData,
        }
    }

    /// Liveness probe against `/health`
    pub async fn health(&self) -> Result<(), ClientError> {
        let url = format!("{}/health", self.base_url);
        check(self.unary(self.client.get(&url)).send().await?).await?;
        Ok(())
    }

    fn unary(&self, request: RequestBuilder) -> RequestBuilder {
        request.timeout(self.request_timeout)
    }
}

/// HTTP client for one resource kind
pub struct Api<K> {
    http: HttpClient,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> Api<K> {
    fn collection_url(&self) -> String {
        format!("{}{}", self.http.base_url, K::collection_path())
    }

    fn object_url(&self, uid: &str) -> String {
        format!("{}/{}", self.collection_url(), uid)
    }

    fn watch_url(&self, uid: Option<&str>) -> String {
        match uid {
            Some(uid) => format!("{}/watch{}/{}", self.http.base_url, K::collection_path(), uid),
            None => format!("{}/watch{}", self.http.base_url, K::collection_path()),
        }
    }

    async fn send_unary<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = check(self.http.unary(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_write(&self, request: RequestBuilder) -> Result<i64, ClientError> {
        let status: ApiStatus = self.send_unary(request).await?;
        status
            .version()
            .ok_or_else(|| ClientError::Decode("response carries no resourceVersion".to_string()))
    }

    async fn open_watch(&self, url: String, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError> {
        let mut request = self.http.client.get(&url);
        if let Some(rev) = from {
            request = request.query(&[("resourceVersion", rev.to_string())]);
        }
        let response = check(request.send().await?).await?;
        debug!("Watch established on {} (from {:?})", url, from);
        Ok(StreamWatcher::new(response.bytes_stream()))
    }
}

#[async_trait]
impl<K: Resource> ResourceClient<K> for Api<K> {
    async fn post(&self, obj: &K) -> Result<Created, ClientError> {
        let status: ApiStatus = self
            .send_unary(self.http.client.post(self.collection_url()).json(obj))
            .await?;
        match (status.uid.clone(), status.version()) {
            (Some(uid), Some(version)) => Ok(Created { uid, version }),
            _ => Err(ClientError::Decode(
                "create response carries no uid or resourceVersion".to_string(),
            )),
        }
    }

    async fn put(&self, uid: &str, obj: &K) -> Result<i64, ClientError> {
        self.send_write(self.http.client.put(self.object_url(uid)).json(obj))
            .await
    }

    async fn get(&self, uid: &str) -> Result<K, ClientError> {
        self.send_unary(self.http.client.get(self.object_url(uid)))
            .await
    }

    async fn get_status(&self, uid: &str) -> Result<K::Status, ClientError> {
        let url = format!("{}/status", self.object_url(uid));
        self.send_unary(self.http.client.get(url)).await
    }

    async fn put_status(&self, uid: &str, obj: &K) -> Result<i64, ClientError> {
        let url = format!("{}/status", self.object_url(uid));
        self.send_write(self.http.client.put(url).json(obj)).await
    }

    async fn get_all(&self) -> Result<ResourceList<K>, ClientError> {
        self.send_unary(self.http.client.get(self.collection_url()))
            .await
    }

    async fn delete(&self, uid: &str) -> Result<i64, ClientError> {
        self.send_write(self.http.client.delete(self.object_url(uid)))
            .await
    }

    async fn watch(&self, uid: &str, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError> {
        self.open_watch(self.watch_url(Some(uid)), from).await
    }

    async fn watch_all(&self, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError> {
        self.open_watch(self.watch_url(None), from).await
    }
}

/// Map non-success responses onto [`ClientError`]
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = match serde_json::from_str::<ApiStatus>(&text) {
        Ok(body) => body.message().to_string(),
        Err(_) => text,
    };
    Err(ClientError::from_status(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Node, Pod};

    #[test]
    fn test_urls() {
        let http = HttpClient::new("http://localhost:8181/").unwrap();
        assert_eq!(http.base_url(), "http://localhost:8181");

        let pods = http.api::<Pod>();
        assert_eq!(pods.collection_url(), "http://localhost:8181/api/v1/pods");
        assert_eq!(pods.object_url("u1"), "http://localhost:8181/api/v1/pods/u1");
        assert_eq!(
            pods.watch_url(Some("u1")),
            "http://localhost:8181/watch/api/v1/pods/u1"
        );
        assert_eq!(
            http.api::<Node>().watch_url(None),
            "http://localhost:8181/watch/api/v1/nodes"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let http = HttpClient::with_timeout("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = http.api::<Pod>().get("u1").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
