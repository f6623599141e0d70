//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.client_origin.as_deref());

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        // browser clients connect to the bare origin
        .route("/", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS for the listed origins (comma-separated), or any origin when unset
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let allow_origin = match client_origin {
        Some(origins) => AllowOrigin::list(
            origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok()),
        ),
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    live_clients: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.active_rooms(),
        live_clients: state.rooms.live_clients(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn health_reports_rooms_and_clients() {
        let state = AppState::new(Config::default());
        let Json(health) = tokio_test::block_on(health_handler(State(state.clone())));
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_rooms, 0);
        assert_eq!(health.live_clients, 0);

        let _room = state.rooms.attach("lobby").unwrap();
        let Json(health) = tokio_test::block_on(health_handler(State(state.clone())));
        assert_eq!(health.active_rooms, 1);
        assert_eq!(health.live_clients, 1);
        tokio_test::block_on(state.rooms.shutdown());
    }

    #[test]
    fn router_builds_with_listed_origins() {
        let config = Config {
            client_origin: Some("http://localhost:3000, https://tanks.example".to_string()),
            ..Config::default()
        };
        let _router = build_router(AppState::new(config));
    }
}
