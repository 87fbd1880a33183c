use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parlor_hub::connection::{self, AttachIdentity};
use parlor_hub::hub::Hub;
use parlor_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    hub: Hub,
    db: Arc<parlor_db::Database>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLOR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLOR_DB_PATH").unwrap_or_else(|_| "parlor.db".into());
    let host = std::env::var("PARLOR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLOR_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Message store + hub
    let db = Arc::new(parlor_db::Database::open(&PathBuf::from(&db_path))?);
    let hub = Hub::new(db.clone());

    let state = ServerState {
        hub,
        db,
        jwt_secret,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parlor hub listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// WebSocket upgrade. Token verification happens here, before the hub ever
/// sees the connection — the hub trusts whatever identity it is handed.
/// A missing token attaches anonymously (no presence entry); a bad token is
/// rejected outright.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let identity = match query.token.as_deref() {
        Some(token) => {
            let token_data = decode::<Claims>(
                token,
                &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

            let claims = token_data.claims;

            // Keep the user directory current for fetch-resolved joins.
            let db = state.db.clone();
            let (user_id, username) = (claims.sub, claims.username.clone());
            let upserted = tokio::task::spawn_blocking(move || {
                db.upsert_user(&user_id.to_string(), &username)
            })
            .await;
            match upserted {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("user directory upsert failed for {}: {}", claims.sub, e),
                Err(e) => warn!("user directory upsert task failed: {}", e),
            }

            Some(AttachIdentity {
                user_id: claims.sub,
                username: claims.username,
            })
        }
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, state.hub, identity)))
}
