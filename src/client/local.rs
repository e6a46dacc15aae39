//! In-process client
//!
//! Serves [`ResourceClient`] calls straight from the API server state, with
//! the same error mapping and the same framed watch bodies as the HTTP path.
//! Used to run controllers inside the server process.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::error::ClientError;
use super::http::ResourceClient;
use super::stream::StreamWatcher;
use crate::resources::{Resource, ResourceList};
use crate::server::{watch_body, ApiState, Created, WatchScope};

pub struct LocalClient<K> {
    state: ApiState,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for LocalClient<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> LocalClient<K> {
    pub fn new(state: ApiState) -> Self {
        Self {
            state,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: Resource> ResourceClient<K> for LocalClient<K> {
    async fn post(&self, obj: &K) -> Result<Created, ClientError> {
        Ok(self.state.endpoint::<K>().create(obj.clone()).await?)
    }

    async fn put(&self, uid: &str, obj: &K) -> Result<i64, ClientError> {
        Ok(self.state.endpoint::<K>().replace(uid, obj.clone()).await?)
    }

    async fn get(&self, uid: &str) -> Result<K, ClientError> {
        Ok(self.state.endpoint::<K>().get(uid).await?)
    }

    async fn get_status(&self, uid: &str) -> Result<K::Status, ClientError> {
        Ok(self
            .state
            .endpoint::<K>()
            .get_status(uid)
            .await?
            .unwrap_or_default())
    }

    async fn put_status(&self, uid: &str, obj: &K) -> Result<i64, ClientError> {
        Ok(self
            .state
            .endpoint::<K>()
            .put_status(uid, obj.clone())
            .await?)
    }

    async fn get_all(&self) -> Result<ResourceList<K>, ClientError> {
        let (items, revision) = self.state.endpoint::<K>().list().await?;
        Ok(ResourceList::new(
            format!("{}List", K::KIND),
            revision,
            items,
        ))
    }

    async fn delete(&self, uid: &str) -> Result<i64, ClientError> {
        Ok(self.state.endpoint::<K>().delete(uid).await?)
    }

    async fn watch(&self, uid: &str, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError> {
        let subscription = self.state.endpoint::<K>().watch_one(uid, from).await?;
        let body = watch_body(subscription, WatchScope::One, self.state.shutdown.clone());
        Ok(StreamWatcher::new(body.into_data_stream()))
    }

    async fn watch_all(&self, from: Option<i64>) -> Result<StreamWatcher<K>, ClientError> {
        let subscription = self.state.endpoint::<K>().watch_collection(from).await?;
        let body = watch_body(
            subscription,
            WatchScope::Collection,
            self.state.shutdown.clone(),
        );
        Ok(StreamWatcher::new(body.into_data_stream()))
    }
}
