//! API server routes
//!
//! Every resource kind is served under the same route shape:
//! - `POST/GET /api/v1/{plural}`: create, list
//! - `GET/PUT/DELETE /api/v1/{plural}/{uid}`: read, replace, delete
//! - `GET/PUT /api/v1/{plural}/{uid}/status`: status sub-resource
//! - `GET /watch/api/v1/{plural}[/{uid}]`: framed watch stream

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use super::state::ApiState;
use super::stream::{watch_body, WatchScope, WATCH_CONTENT_TYPE};
use crate::resources::{ApiStatus, Node, Pod, ReplicaSet, Resource, ResourceList};

/// Create the API server router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .merge(resource_routes::<Pod>())
        .merge(resource_routes::<Node>())
        .merge(resource_routes::<ReplicaSet>())
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn resource_routes<K: Resource>() -> Router<ApiState> {
    let collection = K::collection_path();
    Router::new()
        .route(&collection, get(list::<K>).post(create::<K>))
        .route(
            &format!("{collection}/{{uid}}"),
            get(get_one::<K>).put(replace::<K>).delete(delete_one::<K>),
        )
        .route(
            &format!("{collection}/{{uid}}/status"),
            get(get_status::<K>).put(put_status::<K>),
        )
        .route(&format!("/watch{collection}"), get(watch_collection::<K>))
        .route(&format!("/watch{collection}/{{uid}}"), get(watch_one::<K>))
}

/// Query parameters accepted by watch routes
#[derive(Debug, Default, Deserialize)]
pub struct WatchQuery {
    /// Resume after this revision. Absent or empty starts from now.
    #[serde(rename = "resourceVersion", default)]
    pub resource_version: Option<String>,
}

impl WatchQuery {
    fn after(&self) -> Result<Option<i64>, ApiError> {
        match self.resource_version.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::BadRequest(format!("invalid resourceVersion '{}'", raw))),
        }
    }
}

fn json_body<K>(body: Result<Json<K>, JsonRejection>) -> Result<K, ApiError> {
    body.map(|Json(obj)| obj)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

async fn create<K: Resource>(
    State(state): State<ApiState>,
    body: Result<Json<K>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.endpoint::<K>().create(json_body(body)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(
            ApiStatus::ok()
                .with_uid(created.uid)
                .with_version(created.version),
        ),
    ))
}

async fn list<K: Resource>(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let (items, revision) = state.endpoint::<K>().list().await?;
    Ok(Json(ResourceList::new(
        format!("{}List", K::KIND),
        revision,
        items,
    )))
}

async fn get_one<K: Resource>(
    State(state): State<ApiState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.endpoint::<K>().get(&uid).await?))
}

async fn replace<K: Resource>(
    State(state): State<ApiState>,
    Path(uid): Path<String>,
    body: Result<Json<K>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state.endpoint::<K>().replace(&uid, json_body(body)?).await?;
    Ok(Json(ApiStatus::ok().with_uid(uid).with_version(version)))
}

async fn delete_one<K: Resource>(
    State(state): State<ApiState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state.endpoint::<K>().delete(&uid).await?;
    Ok(Json(ApiStatus::ok().with_uid(uid).with_version(version)))
}

async fn get_status<K: Resource>(
    State(state): State<ApiState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.endpoint::<K>().get_status(&uid).await?;
    Ok(Json(status.unwrap_or_default()))
}

async fn put_status<K: Resource>(
    State(state): State<ApiState>,
    Path(uid): Path<String>,
    body: Result<Json<K>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .endpoint::<K>()
        .put_status(&uid, json_body(body)?)
        .await?;
    Ok(Json(ApiStatus::ok().with_uid(uid).with_version(version)))
}

async fn watch_one<K: Resource>(
    State(state): State<ApiState>,
    Path(uid): Path<String>,
    Query(query): Query<WatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.endpoint::<K>().watch_one(&uid, query.after()?).await?;
    Ok((
        [(header::CONTENT_TYPE, WATCH_CONTENT_TYPE)],
        watch_body(subscription, WatchScope::One, state.shutdown.clone()),
    ))
}

async fn watch_collection<K: Resource>(
    State(state): State<ApiState>,
    Query(query): Query<WatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .endpoint::<K>()
        .watch_collection(query.after()?)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, WATCH_CONTENT_TYPE)],
        watch_body(subscription, WatchScope::Collection, state.shutdown.clone()),
    ))
}
