use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    serve, Json, Router,
};
use futures::stream::{self, Stream};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ChatError, ErrorKind};
use crate::gateway::CompletionGateway;
use crate::message::Message;
use crate::session::{Session, SessionState};

/// Where to listen and what to serve.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: IpAddr,
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    pub session_ttl: Duration,
}

struct Slot {
    session: Arc<Mutex<Session>>,
    last_seen: Instant,
}

/// One `Session` per page load, dropped after sitting idle for `ttl`.
pub struct SessionStore {
    slots: Mutex<HashMap<Uuid, Slot>>,
    gateway: Arc<dyn CompletionGateway>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn CompletionGateway>, ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            gateway,
            ttl,
        }
    }

    fn evict_idle(&self, slots: &mut HashMap<Uuid, Slot>, now: Instant) {
        let before = slots.len();
        slots.retain(|_, slot| now.duration_since(slot.last_seen) < self.ttl);
        if slots.len() < before {
            info!(evicted = before - slots.len(), "Evicted idle sessions");
        }
    }

    pub async fn create(&self) -> Uuid {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        self.evict_idle(&mut slots, now);

        let id = Uuid::new_v4();
        slots.insert(
            id,
            Slot {
                session: Arc::new(Mutex::new(Session::new(self.gateway.clone()))),
                last_seen: now,
            },
        );
        info!(%id, active = slots.len(), "Session created");
        id
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Mutex<Session>>> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        self.evict_idle(&mut slots, now);
        let slot = slots.get_mut(&id)?;
        slot.last_seen = now;
        Some(slot.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(templates_dir: PathBuf, sessions: Arc<SessionStore>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir)),
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

// Minijinja Environment setup
fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    // Templates are re-read when files under the directory change
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(templates_dir.clone()));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

/// Failure of an API call, rendered as `{kind, message}`.
#[derive(Debug)]
pub enum ApiError {
    SessionNotFound(Uuid),
    /// The request body was not the JSON the endpoint expects.
    Body(JsonRejection),
    Chat(ChatError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection)
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError::Chat(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

fn error_body(err: &ChatError) -> ErrorBody {
    ErrorBody {
        kind: err.kind().as_str(),
        message: err.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    kind: "not_found",
                    message: format!("unknown session {id}"),
                },
            ),
            ApiError::Body(rejection) => (
                rejection.status(),
                ErrorBody {
                    kind: "bad_request",
                    message: rejection.body_text(),
                },
            ),
            ApiError::Chat(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Phase | ErrorKind::Reset => StatusCode::CONFLICT,
                    ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, error_body(&err))
            }
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub situation: String,
}

#[derive(Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize)]
struct TurnResponse<'a> {
    message: &'a Message,
    state: &'a SessionState,
}

#[derive(Serialize)]
struct FragmentPayload<'a> {
    text: &'a str,
}

async fn session_for(state: &AppState, id: Uuid) -> Result<Arc<Mutex<Session>>, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or(ApiError::SessionNotFound(id))
}

async fn index_handler(
    State(state): State<AppState>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let session_id = state.sessions.create().await;
    // Acquire env, get template, and render within the same block
    state
        .templates
        .acquire_env()
        .and_then(|env| {
            env.get_template("index.html").and_then(|tmpl| {
                tmpl.render(minijinja::context! {
                    title => "제목학원 : 나를 브랜딩 하기",
                    subtitle => "당신만의 개성을 찾아 독특한 별명을 만들어보세요",
                    session_id => session_id.to_string(),
                })
            })
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn state_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionState>, ApiError> {
    let session = session_for(&state, id).await?;
    let session = session.lock().await;
    Ok(Json(session.state().clone()))
}

async fn profile_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    form: Result<Json<ProfileForm>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(form) = form?;
    let session = session_for(&state, id).await?;
    let mut session = session.lock().await;
    let message = session.submit_profile(&form.interests, &form.situation).await?;
    Ok(Json(TurnResponse {
        message: &message,
        state: session.state(),
    })
    .into_response())
}

async fn reset_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionState>, ApiError> {
    let session = session_for(&state, id).await?;
    let mut session = session.lock().await;
    session.reset();
    Ok(Json(session.state().clone()))
}

fn sse_event(name: &str, payload: impl Serialize) -> Result<Event, Infallible> {
    Ok(Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())))
}

// Streams `fragment` events, then exactly one `done` or `error` event. The
// session stays locked until the reply is committed or abandoned.
async fn message_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    form: Result<Json<ChatForm>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(form) = form?;
    let session = session_for(&state, id).await?;
    let session = session.lock_owned().await;
    let turn = session.send_message(&form.text).await?;

    let events = stream::unfold(Some((session, turn)), |pending| async move {
        let (mut session, mut turn) = pending?;
        match turn.next_fragment().await {
            Some(Ok(text)) => Some((
                sse_event("fragment", FragmentPayload { text: &text }),
                Some((session, turn)),
            )),
            Some(Err(err)) => {
                warn!(
                    %err,
                    discarded_chars = turn.reply_so_far().chars().count(),
                    "Reply failed, nothing committed"
                );
                Some((sse_event("error", error_body(&err)), None))
            }
            None => {
                let event = match session.commit_turn(turn).await {
                    Ok(message) => sse_event(
                        "done",
                        TurnResponse {
                            message: &message,
                            state: session.state(),
                        },
                    ),
                    Err(err) => sse_event("error", error_body(&err)),
                };
                Some((event, None))
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    // Serve static files from the `static` directory
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(
        |_req: Request| async { Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response()) },
    ));

    Router::new()
        .route("/", get(index_handler))
        .route("/api/sessions/:id", get(state_handler))
        .route("/api/sessions/:id/profile", post(profile_handler))
        .route("/api/sessions/:id/messages", post(message_handler))
        .route("/api/sessions/:id/reset", post(reset_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    info!("Ctrl-C received, initiating shutdown...");
}

pub async fn start_web_server(
    options: ServerOptions,
    gateway: Arc<dyn CompletionGateway>,
) -> Result<()> {
    let sessions = Arc::new(SessionStore::new(gateway, options.session_ttl));
    let state = AppState::new(options.templates_dir.clone(), sessions);
    let app = router(state, options.static_dir.clone());

    let addr = SocketAddr::new(options.host, options.port);
    // Bind using tokio::net::TcpListener
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;
    info!("Web server listening on http://{}", addr);

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server failed")?;

    info!("Shutdown complete.");
    Ok(())
}
