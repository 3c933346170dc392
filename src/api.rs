use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::FailoverController;
use crate::error::ControllerError;
use crate::models::{ConfigPatch, Configuration, NewServer, Server, ServerPatch, ServerStatus};

type Controller = Arc<FailoverController>;

pub struct ApiError(ControllerError);

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ControllerError::NotFound(_) => StatusCode::NOT_FOUND,
            ControllerError::LastServer => StatusCode::CONFLICT,
            ControllerError::Validation(_) => StatusCode::BAD_REQUEST,
            ControllerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct CurrentServer {
    pub server: Server,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub server: Server,
    pub status: ServerStatus,
}

async fn get_servers(State(c): State<Controller>) -> Json<Vec<Server>> {
    Json(c.get_servers().await)
}

async fn get_current_server(State(c): State<Controller>) -> Response {
    match c.get_current_server().await {
        Some(server) => {
            let url = server.admin_url();
            Json(CurrentServer { server, url }).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "No current server" }))).into_response(),
    }
}

async fn add_server(
    State(c): State<Controller>,
    Json(input): Json<NewServer>,
) -> Result<(StatusCode, Json<Server>), ApiError> {
    let server = c.add_server(input).await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn update_server(
    State(c): State<Controller>,
    Path(id): Path<u64>,
    Json(patch): Json<ServerPatch>,
) -> ApiResult<Server> {
    Ok(Json(c.update_server(id, patch).await?))
}

async fn delete_server(State(c): State<Controller>, Path(id): Path<u64>) -> Json<bool> {
    match c.delete_server(id).await {
        Ok(_) => Json(true),
        Err(e) => {
            warn!(server_id = id, error = %e, "Delete rejected");
            Json(false)
        }
    }
}

async fn set_active_server(State(c): State<Controller>, Path(id): Path<u64>) -> ApiResult<Server> {
    Ok(Json(c.switch_to(id).await?))
}

async fn check_server_status(State(c): State<Controller>, Path(id): Path<u64>) -> ApiResult<StatusReport> {
    let (server, status) = c.check_server_status(id).await?;
    Ok(Json(StatusReport { server, status }))
}

async fn check_all_servers(State(c): State<Controller>) -> Json<Vec<Server>> {
    Json(c.check_all_servers().await)
}

async fn get_config(State(c): State<Controller>) -> Json<Configuration> {
    Json(c.get_config().await)
}

async fn update_config(State(c): State<Controller>, Json(patch): Json<ConfigPatch>) -> ApiResult<Configuration> {
    Ok(Json(c.update_config(patch).await?))
}

/// Server-sent stream of [`crate::models::CoreEvent`]s, one SSE event per
/// notification, named after the event.
async fn events(State(c): State<Controller>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = c.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    let sse = Event::default().event(event.name()).data(data);
                    return Some((Ok::<_, Infallible>(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event listener lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn create_router(controller: Controller) -> Router {
    Router::new()
        .route("/api/servers", get(get_servers).post(add_server))
        .route("/api/servers/current", get(get_current_server))
        .route("/api/servers/check", post(check_all_servers))
        .route("/api/servers/{id}", put(update_server).delete(delete_server))
        .route("/api/servers/{id}/activate", post(set_active_server))
        .route("/api/servers/{id}/check", post(check_server_status))
        .route("/api/config", get(get_config).patch(update_config))
        .route("/api/events", get(events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(controller)
}

pub async fn start_server(port: u16, controller: Controller) -> anyhow::Result<()> {
    let app = create_router(controller);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Command API: http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
