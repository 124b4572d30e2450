use super::*;
use axum::{
    extract::Path,
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use shared::error::ApiError;
use tokio::net::TcpListener;

type Rejection = (axum::http::StatusCode, Json<ErrorResponse>);

fn rejection(status: axum::http::StatusCode, code: ErrorCode, message: &str) -> Rejection {
    (
        status,
        Json(ErrorResponse::from(ApiError::new(code, message))),
    )
}

async fn advance(
    headers: HeaderMap,
    Path(round): Path<i64>,
) -> Result<Json<ApiResponse<AdvanceResponse>>, Rejection> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if bearer != Some("Bearer stage-token") {
        return Err(rejection(
            axum::http::StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized,
            "missing bearer session token",
        ));
    }
    Ok(Json(ApiResponse::success(AdvanceResponse::Exhausted {
        round: RoundNumber(round),
    })))
}

async fn duplicate_faculty(Json(_): Json<CreateFacultyRequest>) -> Rejection {
    rejection(
        axum::http::StatusCode::CONFLICT,
        ErrorCode::Conflict,
        "faculty 10 already exists",
    )
}

async fn no_summary() -> Json<ApiResponse<Option<RoundSummary>>> {
    Json(ApiResponse::success(None))
}

async fn storage_down() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::SERVICE_UNAVAILABLE, "database is locked")
}

async fn spawn_operator_server() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/rounds/:round/advance", post(advance))
        .route("/faculty/add", post(duplicate_faculty))
        .route("/round-call-summary", get(no_summary))
        .route("/quota-groups", get(storage_down));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn bearer_token_is_attached_to_mutating_calls() {
    let server_url = spawn_operator_server().await;

    let anonymous = CeremonyClient::new(&server_url).expect("client");
    let err = anonymous.advance(RoundNumber(2)).await.expect_err("no token");
    assert_eq!(err.code(), Some(ErrorCode::Unauthorized));

    let operator = anonymous.with_token("stage-token");
    let outcome = operator.advance(RoundNumber(2)).await.expect("advance");
    assert_eq!(
        outcome,
        AdvanceResponse::Exhausted {
            round: RoundNumber(2)
        }
    );
}

#[tokio::test]
async fn error_bodies_map_back_to_api_exceptions() {
    let server_url = spawn_operator_server().await;
    let client = CeremonyClient::new(&server_url).expect("client");

    let err = client
        .create_faculty(FacultyId(10), "Engineering")
        .await
        .expect_err("duplicate");
    match err {
        ClientError::Api(exception) => {
            assert_eq!(exception.code, ErrorCode::Conflict);
            assert_eq!(exception.message, "faculty 10 already exists");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_failures_fall_back_to_status_codes() {
    let server_url = spawn_operator_server().await;
    let client = CeremonyClient::new(&server_url).expect("client");

    let err = client.quota_groups().await.expect_err("storage down");
    assert_eq!(err.code(), Some(ErrorCode::Storage));
    assert!(err.code().is_some_and(ErrorCode::is_transient));
}

#[tokio::test]
async fn null_summary_decodes_as_none() {
    let server_url = spawn_operator_server().await;
    let client = CeremonyClient::new(&server_url).expect("client");
    assert!(client.round_call_summary().await.expect("summary").is_none());
}

#[test]
fn non_http_server_urls_are_rejected() {
    assert!(matches!(
        CeremonyClient::new("ftp://example.org"),
        Err(ClientError::Scheme(_))
    ));
    assert!(matches!(
        CeremonyClient::new("not a url"),
        Err(ClientError::Url(_))
    ));
}
