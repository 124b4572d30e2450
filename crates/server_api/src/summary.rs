use std::collections::VecDeque;

use futures::{stream, Stream, TryStreamExt};
use shared::{
    domain::{CurrentRound, RoundNumber},
    error::ApiError,
    protocol::{CeremonySnapshot, CeremonyTotals, GraduatePayload, Overview, RoundSummary},
};
use storage::{PendingCursor, Storage, StoredGraduate};

use crate::{graduate_payload, sequencer, storage_error, ApiContext};

const UPCOMING_PAGE_SIZE: usize = 32;

pub async fn round_summary(ctx: &ApiContext, round: RoundNumber) -> Result<RoundSummary, ApiError> {
    let progress = ctx
        .storage
        .round_progress(round)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found(format!("round {round} not found")))?;
    let total_all_rounds = ctx.storage.total_quota().await.map_err(storage_error)?;

    Ok(RoundSummary {
        current_round: round,
        total_in_round: progress.quota_total,
        already_called: progress.called,
        remaining: (progress.quota_total - progress.called).max(0),
        latest_called_sequence: progress.latest_called_sequence,
        total_all_rounds,
    })
}

/// `None` once every round is complete.
pub async fn current_summary(ctx: &ApiContext) -> Result<Option<RoundSummary>, ApiError> {
    match sequencer::current_round(ctx).await? {
        CurrentRound::Active(round) => round_summary(ctx, round).await.map(Some),
        CurrentRound::AllRoundsComplete => Ok(None),
    }
}

pub async fn overview(ctx: &ApiContext) -> Result<Option<Overview>, ApiError> {
    let CurrentRound::Active(round) = sequencer::current_round(ctx).await? else {
        return Ok(None);
    };
    let summary = round_summary(ctx, round).await?;

    let latest = ctx
        .storage
        .latest_called_in_round(round)
        .await
        .map_err(storage_error)?;
    let serving = match latest {
        Some(graduate) => Some(graduate),
        None => ctx
            .storage
            .next_pending(round)
            .await
            .map_err(storage_error)?,
    };

    let mut overview = Overview {
        round_number: round,
        total_capacity: summary.total_in_round,
        remaining_count: summary.remaining,
        current_faculty_id: None,
        current_faculty_name: None,
        current_faculty_quota: 0,
        current_faculty_remaining: 0,
    };
    if let Some(graduate) = serving {
        let (quota, called) = ctx
            .storage
            .faculty_round_progress(round, graduate.faculty_id)
            .await
            .map_err(storage_error)?;
        overview.current_faculty_id = Some(graduate.faculty_id);
        overview.current_faculty_name = Some(graduate.faculty_name);
        overview.current_faculty_quota = quota;
        overview.current_faculty_remaining = (quota - called).max(0);
    }
    Ok(Some(overview))
}

pub async fn ceremony_totals(ctx: &ApiContext) -> Result<CeremonyTotals, ApiError> {
    let (total, called) = ctx.storage.ceremony_totals().await.map_err(storage_error)?;
    Ok(CeremonyTotals {
        total_graduates: total,
        received: called,
        not_received: total - called,
    })
}

struct UpcomingState {
    storage: Storage,
    cursor: PendingCursor,
    remaining: usize,
    buffered: VecDeque<StoredGraduate>,
    drained: bool,
}

/// The next `limit` pending entrants in call order. Pages are fetched lazily
/// as the stream is polled; every call starts again from the front.
pub fn next_upcoming(
    ctx: &ApiContext,
    limit: usize,
) -> impl Stream<Item = Result<GraduatePayload, ApiError>> + Send + 'static {
    let state = UpcomingState {
        storage: ctx.storage.clone(),
        cursor: PendingCursor::start(),
        remaining: limit,
        buffered: VecDeque::new(),
        drained: false,
    };

    stream::try_unfold(state, next_upcoming_item)
}

async fn next_upcoming_item(
    mut state: UpcomingState,
) -> Result<Option<(GraduatePayload, UpcomingState)>, ApiError> {
    if state.remaining == 0 {
        return Ok(None);
    }
    if state.buffered.is_empty() && !state.drained {
        let page_size = state.remaining.min(UPCOMING_PAGE_SIZE);
        let page = state
            .storage
            .pending_after(state.cursor, page_size as u32)
            .await
            .map_err(storage_error)?;
        state.drained = page.len() < page_size;
        if let Some(last) = page.last() {
            state.cursor = PendingCursor::from(last);
        }
        state.buffered.extend(page);
    }

    match state.buffered.pop_front() {
        Some(graduate) => {
            state.remaining -= 1;
            Ok(Some((graduate_payload(graduate), state)))
        }
        None => Ok(None),
    }
}

pub async fn collect_upcoming(
    ctx: &ApiContext,
    limit: usize,
) -> Result<Vec<GraduatePayload>, ApiError> {
    next_upcoming(ctx, limit).try_collect().await
}

/// Full display state: who is up, who follows, and the counters.
pub async fn snapshot(ctx: &ApiContext, upcoming: usize) -> Result<CeremonySnapshot, ApiError> {
    let mut queue = collect_upcoming(ctx, upcoming + 1).await?.into_iter();
    let first_graduate = queue.next();
    let round_summary = current_summary(ctx).await?;
    let graduate_summary = ceremony_totals(ctx).await?;

    Ok(CeremonySnapshot {
        first_graduate,
        next_graduates: queue.collect(),
        all_rounds_complete: round_summary.is_none(),
        round_summary,
        graduate_summary,
    })
}

#[cfg(test)]
#[path = "tests/summary_tests.rs"]
mod tests;
