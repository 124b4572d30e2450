use std::time::Duration;

use server_api::ApiContext;

use crate::{auth::SessionVerifier, fanout::Notifier};

pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) notifier: Notifier,
    /// `None` leaves mutating routes open.
    pub(crate) sessions: Option<SessionVerifier>,
    pub(crate) request_timeout: Duration,
    pub(crate) upcoming_limit: usize,
}
