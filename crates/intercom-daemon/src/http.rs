/// Local HTTP control API.
///
/// Handlers never touch player state directly: reads come from the shared
/// `DaemonSnapshot`, writes are forwarded to the DaemonCore as commands.
/// `GET /api/events` streams the notification channel as server-sent events.
use crate::core::{Command, DaemonEvent, DaemonSnapshot, SharedState, TrackEdit};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use intercom_core::arbiter::MediaSource;
use intercom_core::events::Notifier;
use intercom_core::playback::PlaybackMode;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct HttpState {
    pub shared: SharedState,
    pub event_tx: mpsc::Sender<DaemonEvent>,
    pub notifier: Notifier,
}

#[derive(Deserialize)]
struct RequestsQuery {
    search: Option<String>,
}

#[derive(Deserialize)]
struct RemoveTrackBody {
    path: PathBuf,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/events", get(events))
        .route("/api/local/play", post(local_play))
        .route("/api/local/pause", post(local_pause))
        .route("/api/local/stop", post(local_stop))
        .route("/api/local/toggle", post(local_toggle))
        .route("/api/local/next", post(local_next))
        .route("/api/local/prev", post(local_prev))
        .route("/api/local/index/:idx", post(local_index))
        .route("/api/local/mode/:mode", post(local_mode))
        .route("/api/local/seek/:ms", post(local_seek))
        .route("/api/volume/:source/:value", post(set_volume))
        .route("/api/mute/:source/:muted", post(set_muted))
        .route("/api/radio/play", post(radio_play))
        .route("/api/radio/stop", post(radio_stop))
        .route("/api/radio/toggle", post(radio_toggle))
        .route("/api/radio/request/:id", post(radio_request))
        .route("/api/radio/requests", get(radio_requests))
        .route("/api/library/refresh", post(library_refresh))
        .route("/api/library/order", post(library_order))
        .route("/api/library/track", post(library_edit).delete(library_remove))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(DaemonEvent::Command(cmd)).await.is_err() {
        error!("Failed to forward command, daemon core is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<DaemonSnapshot> {
    Json(state.shared.read().await.clone())
}

async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.notifier.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(n) => return Some((Event::default().json_data(&n), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("SSE client lagged, skipped {} notifications", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── local player ──────────────────────────────────────────────────────────────

async fn local_play(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Play).await
}

async fn local_pause(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Pause).await
}

async fn local_stop(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Stop).await
}

async fn local_toggle(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::TogglePlayPause).await
}

async fn local_next(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Next).await
}

async fn local_prev(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::Previous).await
}

async fn local_index(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    forward(&state, Command::PlayIndex(idx)).await
}

async fn local_mode(
    State(state): State<HttpState>,
    Path(mode): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mode = mode
        .parse::<PlaybackMode>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    Ok(forward(&state, Command::SetMode(mode)).await)
}

async fn local_seek(State(state): State<HttpState>, Path(ms): Path<u64>) -> StatusCode {
    forward(&state, Command::Seek(ms)).await
}

// ── volume / mute ─────────────────────────────────────────────────────────────

fn parse_source(label: &str) -> Result<MediaSource, (StatusCode, String)> {
    MediaSource::from_label(label).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("unknown source: {} (expected local or radio)", label),
        )
    })
}

async fn set_volume(
    State(state): State<HttpState>,
    Path((source, volume)): Path<(String, i32)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let source = parse_source(&source)?;
    Ok(forward(&state, Command::SetVolume { source, volume }).await)
}

async fn set_muted(
    State(state): State<HttpState>,
    Path((source, muted)): Path<(String, bool)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let source = parse_source(&source)?;
    Ok(forward(&state, Command::SetMuted { source, muted }).await)
}

// ── radio ─────────────────────────────────────────────────────────────────────

async fn radio_play(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::RadioPlay).await
}

async fn radio_stop(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::RadioStop).await
}

async fn radio_toggle(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::RadioToggle).await
}

async fn radio_request(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    forward(&state, Command::RequestSong(id)).await
}

/// Results arrive later as a `requestable_songs_updated` notification.
async fn radio_requests(
    State(state): State<HttpState>,
    Query(query): Query<RequestsQuery>,
) -> StatusCode {
    let search = query.search.filter(|s| !s.trim().is_empty());
    match forward(&state, Command::SearchRequestable(search)).await {
        StatusCode::OK => StatusCode::ACCEPTED,
        other => other,
    }
}

// ── library ───────────────────────────────────────────────────────────────────

async fn library_refresh(State(state): State<HttpState>) -> StatusCode {
    forward(&state, Command::RefreshLibrary).await
}

async fn library_order(
    State(state): State<HttpState>,
    Json(order): Json<Vec<PathBuf>>,
) -> StatusCode {
    forward(&state, Command::ReorderLibrary(order)).await
}

async fn library_edit(State(state): State<HttpState>, Json(edit): Json<TrackEdit>) -> StatusCode {
    forward(&state, Command::EditTrack(edit)).await
}

async fn library_remove(
    State(state): State<HttpState>,
    Json(body): Json<RemoveTrackBody>,
) -> StatusCode {
    forward(&state, Command::RemoveTrack(body.path)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use intercom_core::events;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn test_state() -> (HttpState, mpsc::Receiver<DaemonEvent>) {
        let (event_tx, event_rx) = mpsc::channel(8);
        let (notifier, _rx) = events::channel();
        let state = HttpState {
            shared: Arc::new(RwLock::new(DaemonSnapshot::default())),
            event_tx,
            notifier,
        };
        (state, event_rx)
    }

    fn post_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn next_command(rx: &mut mpsc::Receiver<DaemonEvent>) -> Command {
        match rx.try_recv() {
            Ok(DaemonEvent::Command(cmd)) => cmd,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_state_is_served_as_json() {
        let (state, _rx) = test_state();
        state.shared.write().await.scanning = true;

        let resp = router(state)
            .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["scanning"], true);
        assert!(json["library"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_routes_forward_commands() {
        let (state, mut rx) = test_state();
        let app = router(state);

        let resp = app.clone().oneshot(post_req("/api/local/next")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(next_command(&mut rx), Command::Next);

        let resp = app.oneshot(post_req("/api/local/index/3")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(next_command(&mut rx), Command::PlayIndex(3));
    }

    #[tokio::test]
    async fn test_volume_needs_a_known_source() {
        let (state, mut rx) = test_state();
        let app = router(state);

        let resp = app.clone().oneshot(post_req("/api/volume/tv/40")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());

        let resp = app.oneshot(post_req("/api/volume/radio/40")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            next_command(&mut rx),
            Command::SetVolume {
                source: MediaSource::RadioStream,
                volume: 40
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_mode_is_rejected() {
        let (state, mut rx) = test_state();
        let app = router(state);

        let resp = app.clone().oneshot(post_req("/api/local/mode/random")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());

        let resp = app.oneshot(post_req("/api/local/mode/repeat-all")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(next_command(&mut rx), Command::SetMode(PlaybackMode::RepeatAll));
    }

    #[tokio::test]
    async fn test_requestable_search_is_accepted() {
        let (state, mut rx) = test_state();
        let resp = router(state)
            .oneshot(
                Request::get("/api/radio/requests?search=daft%20punk")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(
            next_command(&mut rx),
            Command::SearchRequestable(Some("daft punk".to_string()))
        );
    }

    #[tokio::test]
    async fn test_library_order_takes_a_json_list() {
        let (state, mut rx) = test_state();
        let req = Request::builder()
            .method("POST")
            .uri("/api/library/order")
            .header("content-type", "application/json")
            .body(Body::from(r#"["/music/b.mp3","/music/a.mp3"]"#))
            .unwrap();

        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            next_command(&mut rx),
            Command::ReorderLibrary(vec![
                PathBuf::from("/music/b.mp3"),
                PathBuf::from("/music/a.mp3")
            ])
        );
    }

    #[tokio::test]
    async fn test_track_edit_forwards_only_given_fields() {
        let (state, mut rx) = test_state();
        let req = Request::builder()
            .method("POST")
            .uri("/api/library/track")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path":"/music/a.mp3","title":"Intro"}"#))
            .unwrap();

        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            next_command(&mut rx),
            Command::EditTrack(TrackEdit {
                path: PathBuf::from("/music/a.mp3"),
                title: Some("Intro".to_string()),
                artist: None,
                album: None,
            })
        );
    }

    #[tokio::test]
    async fn test_track_removal_reads_the_path_from_the_body() {
        let (state, mut rx) = test_state();
        let req = Request::builder()
            .method("DELETE")
            .uri("/api/library/track")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path":"/music/a.mp3"}"#))
            .unwrap();

        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            next_command(&mut rx),
            Command::RemoveTrack(PathBuf::from("/music/a.mp3"))
        );
    }
}
