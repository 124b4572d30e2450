use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{FacultyId, GraduateId, RoundNumber},
    error::{ApiException, ErrorCode, ErrorResponse},
    protocol::{
        AdvanceResponse, ApiResponse, CreateFacultyRequest, CreateRoundResponse,
        DeleteGraduatesResponse, FacultySummary, GraduatePage, GraduatePayload, ImportRequest,
        ImportResponse, ImportRow, ListFacultiesRequest, ListGraduatesRequest, MoveQuotaRequest,
        Overview, QuotaGroup, ResetResponse, RoundStatus, RoundSummary, SaveQuotaRequest,
        SetReceivedRequest,
    },
};
use tracing::debug;
use url::Url;

pub mod display;
pub mod error;

pub use display::{BackoffPolicy, DisplayEvent, DisplayState, DisplaySubscriber};
pub use error::{ClientError, ClientResult};

/// HTTP client for the operator console. Every call maps the server's
/// `{status:"error",code,message}` body back into an [`ApiException`].
#[derive(Clone)]
pub struct CeremonyClient {
    http: Client,
    server_url: Url,
    token: Option<String>,
}

impl CeremonyClient {
    pub fn new(server_url: &str) -> ClientResult<Self> {
        let server_url = Url::parse(server_url)?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ClientError::Scheme(server_url.scheme().to_string()));
        }
        Ok(Self {
            http: Client::new(),
            server_url,
            token: None,
        })
    }

    /// Attaches an operator session token to every mutating call.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.server_url.join(path)?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let request = self.http.get(self.endpoint(path)?);
        self.send(request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        let request = self.authorized(self.http.post(self.endpoint(path)?).json(body));
        self.send(request).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let request = self.authorized(self.http.post(self.endpoint(path)?));
        self.send(request).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let request = self.authorized(self.http.delete(self.endpoint(path)?));
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            let envelope: ApiResponse<T> = serde_json::from_slice(&body)?;
            return Ok(envelope.data);
        }

        debug!(%status, "request rejected");
        let exception = match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(response) => ApiException::from(response.error),
            Err(_) => ApiException::new(
                code_for_status(status),
                format!("server answered {status}"),
            ),
        };
        Err(exception.into())
    }

    pub async fn health(&self) -> ClientResult<()> {
        self.http
            .get(self.endpoint("/healthz")?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn list_faculties(&self) -> ClientResult<Vec<FacultySummary>> {
        let request = ListFacultiesRequest {
            kind: "faculty".to_string(),
        };
        let http = self.http.post(self.endpoint("/faculty")?).json(&request);
        self.send(http).await
    }

    pub async fn create_faculty(&self, id: FacultyId, name: &str) -> ClientResult<FacultySummary> {
        self.post(
            "/faculty/add",
            &CreateFacultyRequest {
                id,
                name: name.to_string(),
            },
        )
        .await
    }

    pub async fn remove_faculty(&self, id: FacultyId) -> ClientResult<()> {
        self.delete(&format!("/faculty/{id}")).await
    }

    pub async fn list_graduates(
        &self,
        faculty_id: FacultyId,
        page: u32,
        page_size: u32,
    ) -> ClientResult<GraduatePage> {
        let request = ListGraduatesRequest {
            faculty_id,
            page,
            page_size,
        };
        let http = self.http.post(self.endpoint("/graduates")?).json(&request);
        self.send(http).await
    }

    pub async fn import(&self, rows: Vec<ImportRow>) -> ClientResult<u64> {
        let response: ImportResponse = self.post("/import/grad", &ImportRequest { rows }).await?;
        Ok(response.imported)
    }

    pub async fn delete_graduates(&self) -> ClientResult<u64> {
        let response: DeleteGraduatesResponse = self.delete("/graduates").await?;
        Ok(response.deleted)
    }

    pub async fn quota_groups(&self) -> ClientResult<Vec<QuotaGroup>> {
        self.get("/quota-groups").await
    }

    pub async fn save_quota(&self, request: &SaveQuotaRequest) -> ClientResult<Vec<QuotaGroup>> {
        self.post("/quota-groups/save", request).await
    }

    pub async fn move_quota(&self, request: &MoveQuotaRequest) -> ClientResult<Vec<QuotaGroup>> {
        self.post("/quota-groups/move", request).await
    }

    pub async fn create_round(&self) -> ClientResult<RoundNumber> {
        let response: CreateRoundResponse = self.post_empty("/quota-groups/rounds").await?;
        Ok(response.round)
    }

    pub async fn remove_round(&self, round: RoundNumber) -> ClientResult<()> {
        self.delete(&format!("/quota-groups/rounds/{round}")).await
    }

    pub async fn round_call_summary(&self) -> ClientResult<Option<RoundSummary>> {
        self.get("/round-call-summary").await
    }

    pub async fn overview(&self) -> ClientResult<Option<Overview>> {
        self.get("/graduate-overview").await
    }

    pub async fn next_graduates(&self, limit: usize) -> ClientResult<Vec<GraduatePayload>> {
        self.get(&format!("/next-graduates?limit={limit}")).await
    }

    pub async fn first_not_received(&self) -> ClientResult<Option<GraduatePayload>> {
        self.get("/first-not-received").await
    }

    pub async fn set_received(&self, id: GraduateId) -> ClientResult<GraduatePayload> {
        self.post("/set-received", &SetReceivedRequest { id }).await
    }

    pub async fn round_status(&self, round: RoundNumber) -> ClientResult<RoundStatus> {
        self.get(&format!("/rounds/{round}")).await
    }

    pub async fn advance(&self, round: RoundNumber) -> ClientResult<AdvanceResponse> {
        self.post_empty(&format!("/rounds/{round}/advance")).await
    }

    pub async fn reset_round(&self, round: RoundNumber) -> ClientResult<u64> {
        let response: ResetResponse = self.post_empty(&format!("/rounds/{round}/reset")).await?;
        Ok(response.reset)
    }

    pub async fn reset_cards(&self) -> ClientResult<u64> {
        let request = self.authorized(self.http.get(self.endpoint("/reset-cards")?));
        let response: ResetResponse = self.send(request).await?;
        Ok(response.reset)
    }
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST => ErrorCode::Validation,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCode::Unauthorized,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => ErrorCode::Timeout,
        StatusCode::SERVICE_UNAVAILABLE => ErrorCode::Storage,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
