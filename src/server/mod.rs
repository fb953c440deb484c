
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ChatClient, CompletionBackend};
use crate::config::Config;
use crate::orchestrator::{ConversationState, Orchestrator};
use crate::retriever::{CandidateSource, Retriever};
use crate::{GuideError, Result};

/// Rendered instead of an error: the widget always receives HTML it can
/// display.
pub const APOLOGY_FRAGMENT: &str =
    "<p>Sorry — I'm having a little trouble right now. Ask me again in a moment \
     and I'll find the right product for you.</p>";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

/// Which cross-origin callers may talk to the chat endpoint.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_any: bool,
    origins: Vec<String>,
}

impl CorsPolicy {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        let origins = config.server.allowed_origins.clone();
        Self {
            allow_any: origins.iter().any(|o| o == "*"),
            origins,
        }
    }

    fn allow_origin(&self, request_origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        if self.allow_any {
            return Some(HeaderValue::from_static("*"));
        }
        let origin = request_origin?;
        let matches = origin
            .to_str()
            .is_ok_and(|o| self.origins.iter().any(|allowed| allowed == o));
        matches.then(|| origin.clone())
    }
}

/// Per-session conversation memory with a one-turn-at-a-time lock and TTL
/// eviction.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
    ttl: Duration,
}

struct SessionEntry {
    state: Mutex<ConversationState>,
    last_seen: std::sync::Mutex<Instant>,
}

impl SessionStore {
    #[inline]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch or create the session entry, refreshing its TTL clock.
    async fn entry(&self, session_id: &str) -> Arc<SessionEntry> {
        let mut sessions = self.sessions.lock().await;
        let entry = Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!("Creating session {}", session_id);
            Arc::new(SessionEntry {
                state: Mutex::new(ConversationState::new()),
                last_seen: std::sync::Mutex::new(Instant::now()),
            })
        }));
        drop(sessions);

        if let Ok(mut last_seen) = entry.last_seen.lock() {
            *last_seen = Instant::now();
        }
        entry
    }

    /// Drop sessions idle past the TTL.
    #[inline]
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, entry| {
            entry
                .last_seen
                .lock()
                .map(|last_seen| last_seen.elapsed() < ttl)
                .unwrap_or(false)
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<SessionStore>,
    cors: Arc<CorsPolicy>,
}

impl AppState {
    #[inline]
    pub fn new(orchestrator: Arc<Orchestrator>, sessions: Arc<SessionStore>, cors: CorsPolicy) -> Self {
        Self {
            orchestrator,
            sessions,
            cors: Arc::new(cors),
        }
    }
}

/// Build the application router: one chat endpoint plus a health probe.
#[inline]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(state.clone(), cors_middleware))
        .with_state(state)
}

/// Wire up the production collaborators and serve until shutdown.
#[inline]
pub async fn serve(config: &Config) -> Result<()> {
    let retriever = Retriever::new(config).await?;
    let chat = ChatClient::new(config)?;
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(retriever) as Arc<dyn CandidateSource>,
        Arc::new(chat) as Arc<dyn CompletionBackend>,
        config,
    ));

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(config.session.ttl_secs)));
    spawn_session_sweeper(
        Arc::clone(&sessions),
        Duration::from_secs(config.session.sweep_interval_secs),
    );

    let state = AppState::new(orchestrator, sessions, CorsPolicy::from_config(config));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GuideError::Config(format!("failed to bind {addr}: {e}")))?;

    info!("Chat API listening on http://{}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| GuideError::Service(format!("server shutdown: {e}")))?;

    Ok(())
}

/// Periodically evict idle sessions.
#[inline]
pub fn spawn_session_sweeper(sessions: Arc<SessionStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sessions.sweep().await;
        }
    });
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                message: "message must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let entry = state.sessions.entry(&session_id).await;

    // One in-flight turn per session: a second concurrent message for the
    // same session queues here rather than interleaving.
    let mut conversation = entry.state.lock().await;

    match state
        .orchestrator
        .take_turn(&mut conversation, &request.message)
        .await
    {
        Ok(outcome) => Json(ChatResponse {
            reply: outcome.reply_html,
            session_id,
        })
        .into_response(),
        Err(GuideError::Request(message)) => {
            (StatusCode::BAD_REQUEST, Json(ErrorBody { message })).into_response()
        }
        Err(err) => {
            // Operators see the failure; the widget still gets HTML.
            warn!("Turn failed for session {}: {}", session_id, err);
            Json(ChatResponse {
                reply: APOLOGY_FRAGMENT.to_string(),
                session_id,
            })
            .into_response()
        }
    }
}

async fn cors_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    if let Some(allow) = state.cors.allow_origin(origin.as_ref()) {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("content-type"),
        );
    }

    response
}
