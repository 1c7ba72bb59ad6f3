// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

mod auth;
mod cache;
mod config;
mod connections;
mod dispatch;
mod presence;
mod repo;
mod rooms;
mod session;
mod ws;

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::HeaderValue, routing::get};
use ludo_common::wire::close_code;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::auth::{JwksTokenValidator, TokenValidator};
use crate::cache::{CacheStore, RedisCache};
use crate::config::Settings;
use crate::connections::ConnectionManager;
use crate::dispatch::Dispatcher;
use crate::presence::PresenceTracker;
use crate::repo::PostgrestRoomRepository;
use crate::rooms::RoomService;
use crate::session::GameSessions;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub manager: Arc<ConnectionManager>,
    pub rooms: Arc<RoomService>,
    pub sessions: Arc<GameSessions>,
    pub presence: Arc<PresenceTracker>,
    pub dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "session_service=debug,tower_http=info".to_string()),
        )
        .init();

    let settings = Arc::new(Settings::from_env()?);
    info!(
        server_id = %settings.server_id,
        debug = settings.debug,
        "session-service starting"
    );

    let cache: Arc<dyn CacheStore> = Arc::new(RedisCache::connect(&settings.redis_url).await?);
    let repo = Arc::new(PostgrestRoomRepository::new(
        settings.rest_url(),
        settings.supabase_anon_key.clone(),
    ));
    let validator: Arc<dyn TokenValidator> = Arc::new(JwksTokenValidator::new(
        settings.jwks_url(),
        settings.jwt_issuer(),
    ));

    let manager = Arc::new(ConnectionManager::new(settings.server_id.clone()));
    let rooms = Arc::new(RoomService::new(
        repo,
        cache.clone(),
        manager.clone(),
        settings.ruleset_config.clone(),
    ));
    let sessions = Arc::new(GameSessions::new());
    let presence = Arc::new(PresenceTracker::new(cache));
    let dispatcher = Arc::new(Dispatcher::new(
        manager.clone(),
        rooms.clone(),
        sessions.clone(),
        validator,
        presence.clone(),
    ));

    let state = AppState {
        settings: settings.clone(),
        manager: manager.clone(),
        rooms,
        sessions,
        presence,
        dispatcher,
    };

    let sweeper_state = state.clone();
    tokio::spawn(async move {
        ws::run_stale_sweeper(sweeper_state).await;
    });

    let app = build_router(state);

    info!(bind_addr = %settings.bind_addr, "session-service listening");
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Every socket gets a 1001 before the process exits; the socket
    // tasks release presence counters as they unwind.
    manager
        .close_all(close_code::GOING_AWAY, "server shutting down")
        .await;
    info!("session-service stopped");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = build_cors(&state.settings.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/ws", get(ws::ws_route))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if parsed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "service": "session-service",
        "server_id": state.settings.server_id,
        "connections": state.manager.connection_count().await,
        "active_games": state.sessions.active_games().await,
    }))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to install shutdown signal handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testsupport::StaticTokenValidator;
    use crate::cache::testsupport::MemoryCache;
    use crate::repo::testsupport::MemoryRoomRepository;

    fn test_state() -> AppState {
        let settings = Arc::new(Settings::from_env().unwrap());
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let manager = Arc::new(ConnectionManager::new("srv-test".to_string()));
        let rooms = Arc::new(RoomService::new(
            Arc::new(MemoryRoomRepository::new()),
            cache.clone(),
            manager.clone(),
            settings.ruleset_config.clone(),
        ));
        let sessions = Arc::new(GameSessions::new());
        let presence = Arc::new(PresenceTracker::new(cache));
        let dispatcher = Arc::new(Dispatcher::new(
            manager.clone(),
            rooms.clone(),
            sessions.clone(),
            Arc::new(StaticTokenValidator::new()),
            presence.clone(),
        ));
        AppState {
            settings,
            manager,
            rooms,
            sessions,
            presence,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn health_reports_service_name_and_counts() {
        let payload = health(State(test_state())).await.0;
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["service"], "session-service");
        assert_eq!(payload["connections"], 0);
        assert_eq!(payload["active_games"], 0);
    }

    #[test]
    fn cors_layer_falls_back_to_permissive_for_wildcards() {
        // Both paths must produce a layer without panicking.
        let _ = build_cors(&["*".to_string()]);
        let _ = build_cors(&[
            "http://localhost:3000".to_string(),
            "https://game.example.com".to_string(),
        ]);
        let _ = build_cors(&[]);
    }
}
