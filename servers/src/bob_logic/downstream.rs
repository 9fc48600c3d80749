use crate::bob_logic::config::Settings;
use crate::bob_logic::model::{BeaconsInfo, ServerMessage};
use crate::bob_logic::state::AppState;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use lib_beacon::retrieve::ID_TOKEN_HEADER;
use lib_beacon::{Credentials, DispatchState, GenericQuery};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/query", get(query_handler))
        .route("/ws", get(ws_handler))
        .route("/beacons", get(beacons_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

pub async fn run(settings: Settings, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let app = router(app_state);
    let addr = settings.bind_addr()?;

    if let Some((cert_path, key_path)) = settings.tls_paths() {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS configuration")?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        log::info!("Downstream server listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        log::info!("Downstream server listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
            })
            .await?;
    }
    Ok(())
}

/// Tokens supplied by the auth layer in front of the server, forwarded as-is.
fn credentials(headers: &HeaderMap) -> Option<Credentials> {
    let access = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())?;
    let id = headers
        .get(ID_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Some(Credentials::new(access, id))
}

async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let query = GenericQuery::from_pairs(params);
    let creds = credentials(&headers);
    let outcome = state.dispatcher.dispatch_batch(&query, creds.as_ref(), state.timeout).await;
    log::info!(
        "Batch query answered with {}/{} result(s) ({})",
        outcome.results.len(),
        state.registry().count(),
        outcome.state
    );
    Json(outcome.results)
}

async fn beacons_handler(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.registry();
    Json(BeaconsInfo {
        count: registry.count(),
        timeout_secs: state.timeout.as_secs(),
        names: registry.names(),
    })
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler(ws: WebSocketUpgrade, headers: HeaderMap, State(state): State<AppState>) -> impl IntoResponse {
    let creds = credentials(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, creds))
}

/// Waits for the opening query. `None` when the client leaves first.
async fn read_query(socket: &mut WebSocket, client_id: usize) -> Option<GenericQuery> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<GenericQuery>(&text) {
                Ok(query) => return Some(query),
                Err(e) => {
                    log::warn!("Client {} sent an undecodable query: {}", client_id, e);
                    if let Ok(json_str) = serde_json::to_string(&ServerMessage::error(format!("invalid query: {}", e))) {
                        let _ = socket.send(Message::Text(json_str.into())).await;
                    }
                    return None;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, creds: Option<Credentials>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    log::info!("Client {} connected", client_id);

    let Some(query) = read_query(&mut socket, client_id).await else {
        let _ = socket.send(Message::Close(None)).await;
        log::info!("Client {} disconnected", client_id);
        return;
    };

    let (tx, mut rx) = mpsc::channel(state.registry().count().max(1));
    let cancel = CancellationToken::new();
    let dispatcher = Arc::clone(&state.dispatcher);
    let token = cancel.clone();
    let dispatch = tokio::spawn(async move { dispatcher.dispatch_stream(&query, creds.as_ref(), tx, token).await });

    let deadline = tokio::time::sleep(state.timeout);
    tokio::pin!(deadline);
    let mut sent = 0usize;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                log::info!("Client {}: deadline reached after {} result(s)", client_id, sent);
                break;
            }
            next = rx.recv() => match next {
                Some(result) => match serde_json::to_string(&result) {
                    Ok(json_str) => {
                        if socket.send(Message::Text(json_str.into())).await.is_err() {
                            break; // client disconnected
                        }
                        sent += 1;
                    }
                    Err(e) => log::error!("Failed to encode result for {}: {}", result.name(), e),
                },
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    cancel.cancel();
    drop(rx);
    match dispatch.await {
        Ok(DispatchState::Complete) => log::debug!("Client {}: all beacons answered", client_id),
        Ok(DispatchState::Incomplete) => log::warn!("Client {}: some beacons produced no result", client_id),
        Ok(other) => log::debug!("Client {}: dispatch ended {}", client_id, other),
        Err(e) => log::error!("Client {}: dispatch task failed: {}", client_id, e),
    }

    let _ = socket.send(Message::Close(None)).await;
    log::info!("Client {} disconnected after {} result(s)", client_id, sent);
}
