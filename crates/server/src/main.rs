use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures::{stream, SinkExt, StreamExt};
use server_api::{
    quota, roster,
    sequencer::{self, Advance},
    summary, ApiContext,
};
use shared::{
    domain::{CurrentRound, FacultyId, RoundNumber},
    error::{ApiError, ErrorCode, ErrorResponse},
    protocol::{
        AdvanceResponse, ApiResponse, ClientRequest, CreateFacultyRequest, CreateRoundResponse,
        DeleteGraduatesResponse, FacultySummary, GraduatePage, GraduatePayload, ImportRequest,
        ImportResponse, ListFacultiesRequest, ListGraduatesRequest, MoveQuotaRequest,
        NextGraduatesQuery, Overview, QuotaGroup, ResetResponse, RoundStatus, RoundSummary,
        SaveQuotaRequest, ServerEvent, SetReceivedRequest,
    },
};
use storage::Storage;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, ReceiverStream};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod app_state;
mod auth;
mod config;
mod fanout;

use app_state::AppState;
use auth::{OperatorSession, SessionVerifier};
use config::{load_settings, prepare_database_url};
use fanout::{Notifier, Publication, RevisionGate};

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
const MAX_UPCOMING: usize = 200;

type HttpError = (StatusCode, Json<ErrorResponse>);
type HttpResult<T> = Result<Json<ApiResponse<T>>, HttpError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let sessions = settings.auth_secret.as_deref().map(SessionVerifier::new);
    if sessions.is_none() {
        warn!("no auth_secret configured, mutating routes accept any caller");
    }
    let state = AppState {
        api: ApiContext::new(storage),
        notifier: Notifier::new(settings.event_buffer, settings.upcoming_limit),
        sessions,
        request_timeout: settings.request_timeout(),
        upcoming_limit: settings.upcoming_limit,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "ceremony server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/faculty", post(http_list_faculties))
        .route("/faculty/add", post(http_create_faculty))
        .route("/faculty/:faculty_id", delete(http_remove_faculty))
        .route(
            "/graduates",
            post(http_list_graduates).delete(http_delete_graduates),
        )
        .route("/import/grad", post(http_import))
        .route("/quota-groups", get(http_quota_groups))
        .route("/quota-groups/save", post(http_save_quota))
        .route("/quota-groups/move", post(http_move_quota))
        .route("/quota-groups/rounds", post(http_create_round))
        .route("/quota-groups/rounds/:round", delete(http_remove_round))
        .route("/round-call-summary", get(http_round_call_summary))
        .route("/graduate-overview", get(http_overview))
        .route("/next-graduates", get(http_next_graduates))
        .route("/first-not-received", get(http_first_not_received))
        .route("/set-received", post(http_set_received))
        .route("/rounds/:round", get(http_round_status))
        .route("/rounds/:round/advance", post(http_advance))
        .route("/rounds/:round/reset", post(http_reset_round))
        .route("/reset-cards", get(http_reset_cards))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn success<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

fn reject(error: ApiError) -> HttpError {
    let status = match error.code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Storage => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::from(error)))
}

/// Runs a write under the request deadline. Each write is a single
/// transaction or conditional update, so abandoning it leaves no partial state.
/// A timed-out write may still have landed, so displays are refreshed anyway.
async fn bounded<T>(
    state: &AppState,
    operation: &'static str,
    work: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match tokio::time::timeout(state.request_timeout, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = state.request_timeout.as_millis() as u64, "request timed out");
            announce(state, None).await;
            Err(ApiError::new(
                ErrorCode::Timeout,
                format!("{operation} timed out; re-fetch the summary to see whether it applied"),
            ))
        }
    }
}

async fn announce(state: &AppState, called: Option<GraduatePayload>) {
    if let Err(error) = state.notifier.publish(&state.api, called).await {
        warn!(code = ?error.code, message = %error.message, "failed to publish ceremony state");
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state.api.storage.health_check().await.map_err(|e| {
        reject(ApiError::new(ErrorCode::Storage, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_list_faculties(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListFacultiesRequest>,
) -> HttpResult<Vec<FacultySummary>> {
    let faculties = roster::list_faculties(&state.api, &req.kind)
        .await
        .map_err(reject)?;
    Ok(success(faculties))
}

async fn http_create_faculty(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Json(req): Json<CreateFacultyRequest>,
) -> HttpResult<FacultySummary> {
    let faculty = roster::create_faculty(&state.api, req)
        .await
        .map_err(reject)?;
    info!(operator = %session.subject, faculty_id = %faculty.id, "faculty added");
    announce(&state, None).await;
    Ok(success(faculty))
}

async fn http_remove_faculty(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Path(faculty_id): Path<i64>,
) -> HttpResult<()> {
    roster::remove_faculty(&state.api, FacultyId(faculty_id))
        .await
        .map_err(reject)?;
    info!(operator = %session.subject, faculty_id, "faculty removed");
    announce(&state, None).await;
    Ok(success(()))
}

async fn http_list_graduates(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListGraduatesRequest>,
) -> HttpResult<GraduatePage> {
    let page = roster::list_graduates(&state.api, req)
        .await
        .map_err(reject)?;
    Ok(success(page))
}

async fn http_delete_graduates(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
) -> HttpResult<DeleteGraduatesResponse> {
    let deleted = roster::delete_all_graduates(&state.api)
        .await
        .map_err(reject)?;
    info!(operator = %session.subject, deleted, "roster deleted");
    announce(&state, None).await;
    Ok(success(DeleteGraduatesResponse { deleted }))
}

async fn http_import(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Json(req): Json<ImportRequest>,
) -> HttpResult<ImportResponse> {
    let imported = bounded(&state, "import", roster::import(&state.api, req))
        .await
        .map_err(reject)?;
    info!(operator = %session.subject, imported, "roster imported");
    announce(&state, None).await;
    Ok(success(ImportResponse { imported }))
}

async fn http_quota_groups(State(state): State<Arc<AppState>>) -> HttpResult<Vec<QuotaGroup>> {
    let groups = quota::list_groups(&state.api).await.map_err(reject)?;
    Ok(success(groups))
}

async fn http_save_quota(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Json(req): Json<SaveQuotaRequest>,
) -> HttpResult<Vec<QuotaGroup>> {
    let groups = bounded(&state, "save", quota::save(&state.api, req))
        .await
        .map_err(reject)?;
    info!(operator = %session.subject, "quota saved");
    announce(&state, None).await;
    Ok(success(groups))
}

async fn http_move_quota(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Json(req): Json<MoveQuotaRequest>,
) -> HttpResult<Vec<QuotaGroup>> {
    let groups = quota::move_quantity(&state.api, req)
        .await
        .map_err(reject)?;
    debug!(operator = %session.subject, "quota moved");
    announce(&state, None).await;
    Ok(success(groups))
}

async fn http_create_round(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
) -> HttpResult<CreateRoundResponse> {
    let round = quota::create_round(&state.api).await.map_err(reject)?;
    debug!(operator = %session.subject, %round, "round created");
    announce(&state, None).await;
    Ok(success(CreateRoundResponse { round }))
}

async fn http_remove_round(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Path(round): Path<i64>,
) -> HttpResult<()> {
    quota::remove_round(&state.api, RoundNumber(round))
        .await
        .map_err(reject)?;
    debug!(operator = %session.subject, round, "round removed");
    announce(&state, None).await;
    Ok(success(()))
}

async fn http_round_call_summary(
    State(state): State<Arc<AppState>>,
) -> HttpResult<Option<RoundSummary>> {
    let summary = summary::current_summary(&state.api)
        .await
        .map_err(reject)?;
    Ok(success(summary))
}

async fn http_overview(State(state): State<Arc<AppState>>) -> HttpResult<Option<Overview>> {
    let overview = summary::overview(&state.api).await.map_err(reject)?;
    Ok(success(overview))
}

async fn http_next_graduates(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NextGraduatesQuery>,
) -> HttpResult<Vec<GraduatePayload>> {
    let limit = q.limit.unwrap_or(state.upcoming_limit);
    if limit == 0 || limit > MAX_UPCOMING {
        return Err(reject(ApiError::validation(format!(
            "limit must be between 1 and {MAX_UPCOMING}"
        ))));
    }
    let upcoming = summary::collect_upcoming(&state.api, limit)
        .await
        .map_err(reject)?;
    Ok(success(upcoming))
}

async fn http_first_not_received(
    State(state): State<Arc<AppState>>,
) -> HttpResult<Option<GraduatePayload>> {
    let next = match sequencer::current_round(&state.api)
        .await
        .map_err(reject)?
    {
        CurrentRound::Active(round) => sequencer::peek_next(&state.api, round)
            .await
            .map_err(reject)?,
        CurrentRound::AllRoundsComplete => None,
    };
    Ok(success(next))
}

async fn http_set_received(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Json(req): Json<SetReceivedRequest>,
) -> HttpResult<GraduatePayload> {
    let graduate = bounded(
        &state,
        "set-received",
        sequencer::advance_graduate(&state.api, req.id),
    )
    .await
    .map_err(reject)?;
    info!(operator = %session.subject, graduate_id = %graduate.id, "graduate received");
    announce(&state, Some(graduate.clone())).await;
    Ok(success(graduate))
}

async fn http_round_status(
    State(state): State<Arc<AppState>>,
    Path(round): Path<i64>,
) -> HttpResult<RoundStatus> {
    let round = RoundNumber(round);
    let state_of_round = sequencer::round_state(&state.api, round)
        .await
        .map_err(reject)?;
    let summary = summary::round_summary(&state.api, round)
        .await
        .map_err(reject)?;
    Ok(success(RoundStatus {
        state: state_of_round,
        summary,
    }))
}

async fn http_advance(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Path(round): Path<i64>,
) -> HttpResult<AdvanceResponse> {
    let outcome = bounded(
        &state,
        "advance",
        sequencer::advance(&state.api, RoundNumber(round)),
    )
    .await
    .map_err(reject)?;
    if let Advance::Called(graduate) = &outcome {
        info!(operator = %session.subject, round, graduate_id = %graduate.id, "round advanced");
        announce(&state, Some(graduate.clone())).await;
    }
    Ok(success(outcome.into()))
}

async fn http_reset_round(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
    Path(round): Path<i64>,
) -> HttpResult<ResetResponse> {
    let reset = sequencer::reset_round(&state.api, RoundNumber(round))
        .await
        .map_err(reject)?;
    info!(operator = %session.subject, round, reset, "round reset");
    announce(&state, None).await;
    Ok(success(ResetResponse { reset }))
}

async fn http_reset_cards(
    State(state): State<Arc<AppState>>,
    session: OperatorSession,
) -> HttpResult<ResetResponse> {
    let reset = sequencer::reset_all(&state.api).await.map_err(reject)?;
    info!(operator = %session.subject, reset, "all rounds reset");
    announce(&state, None).await;
    Ok(success(ResetResponse { reset }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

enum Inbound {
    Resync,
    Invalid(String),
}

enum Outbound {
    Published(Arc<Publication>),
    Lagged(u64),
    Requested(Inbound),
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    debug!(%connection_id, "display connected");

    let (mut sender, mut receiver) = socket.split();
    let publications =
        BroadcastStream::new(state.notifier.subscribe()).map(|item| match item {
            Ok(publication) => Outbound::Published(publication),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Outbound::Lagged(skipped),
        });
    let (requests_tx, requests_rx) = mpsc::channel::<Inbound>(8);
    let requests = ReceiverStream::new(requests_rx).map(Outbound::Requested);

    // Every connection starts from a full snapshot.
    let _ = requests_tx.try_send(Inbound::Resync);

    let writer_state = state.clone();
    let send_task = tokio::spawn(async move {
        let mut outbound = stream::select(publications, requests);
        let mut gate = RevisionGate::default();

        while let Some(item) = outbound.next().await {
            let events = match item {
                Outbound::Published(publication) => {
                    if !gate.admit(publication.revision) {
                        debug!(%connection_id, revision = publication.revision, "dropping stale publication");
                        continue;
                    }
                    publication.events()
                }
                Outbound::Lagged(skipped) => {
                    debug!(%connection_id, skipped, "display lagged, resyncing");
                    resync_events(&writer_state, &mut gate).await
                }
                Outbound::Requested(Inbound::Resync) => {
                    resync_events(&writer_state, &mut gate).await
                }
                Outbound::Requested(Inbound::Invalid(reason)) => vec![ServerEvent::error(reason)],
            };

            for event in events {
                let text = match serde_json::to_string(&event) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        let request = match message {
            Message::Text(text) => match serde_json::from_str::<ClientRequest>(&text) {
                Ok(ClientRequest::RequestSummary) => Inbound::Resync,
                Err(e) => Inbound::Invalid(format!("unrecognised request: {e}")),
            },
            Message::Close(_) => break,
            _ => continue,
        };
        if requests_tx.send(request).await.is_err() {
            break;
        }
    }

    send_task.abort();
    debug!(%connection_id, "display disconnected");
}

async fn resync_events(state: &AppState, gate: &mut RevisionGate) -> Vec<ServerEvent> {
    match state.notifier.current(&state.api).await {
        Ok(publication) if gate.admit(publication.revision) => publication.events(),
        Ok(_) => Vec::new(),
        Err(error) => {
            warn!(code = ?error.code, message = %error.message, "resync failed");
            vec![ServerEvent::error(error.message)]
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
