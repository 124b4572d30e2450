use chrono::Utc;
use shared::{
    domain::{CurrentRound, GraduateId, RoundNumber, RoundState},
    error::ApiError,
    protocol::{AdvanceResponse, GraduatePayload},
};
use storage::RoundProgress;
use tracing::{info, warn};

use crate::{graduate_payload, storage_error, ApiContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Called(GraduatePayload),
    Exhausted(RoundNumber),
}

impl From<Advance> for AdvanceResponse {
    fn from(value: Advance) -> Self {
        match value {
            Advance::Called(graduate) => AdvanceResponse::Called { graduate },
            Advance::Exhausted(round) => AdvanceResponse::Exhausted { round },
        }
    }
}

async fn progress(ctx: &ApiContext, round: RoundNumber) -> Result<RoundProgress, ApiError> {
    ctx.storage
        .round_progress(round)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found(format!("round {round} not found")))
}

/// The entrant `advance` would call next, without calling it.
pub async fn peek_next(
    ctx: &ApiContext,
    round: RoundNumber,
) -> Result<Option<GraduatePayload>, ApiError> {
    progress(ctx, round).await?;
    let next = ctx
        .storage
        .next_pending(round)
        .await
        .map_err(storage_error)?;
    Ok(next.map(graduate_payload))
}

/// Calls the next pending entrant of `round`. At most one entrant changes
/// per call and concurrent calls on one round never pick the same entrant.
/// The pick and the flip are one storage statement, so a partition rewrite
/// landing in between cannot hand this round an entrant of another.
pub async fn advance(ctx: &ApiContext, round: RoundNumber) -> Result<Advance, ApiError> {
    let _round = ctx.rounds.acquire(round).await;

    let progress = progress(ctx, round).await?;
    if progress.entrants == 0 {
        return Err(ApiError::not_found(format!("round {round} has no entrants")));
    }

    let called = ctx
        .storage
        .call_next(round, Utc::now())
        .await
        .map_err(storage_error)?;
    match called {
        Some(graduate) => {
            info!(
                %round,
                graduate_id = %graduate.graduate_id,
                sequence = graduate.sequence,
                "called graduate"
            );
            Ok(Advance::Called(graduate_payload(graduate)))
        }
        None => {
            info!(%round, "round exhausted");
            Ok(Advance::Exhausted(round))
        }
    }
}

/// Calls one specific entrant, which must be the one `peek_next` returns for
/// its round.
pub async fn advance_graduate(
    ctx: &ApiContext,
    graduate_id: GraduateId,
) -> Result<GraduatePayload, ApiError> {
    let graduate = ctx
        .storage
        .graduate(graduate_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::not_found(format!("graduate {graduate_id} not found")))?;
    let Some(round) = graduate.round_number else {
        return Err(ApiError::validation(format!(
            "graduate {graduate_id} is not assigned to a round"
        )));
    };
    if graduate.called {
        return Err(ApiError::conflict(format!(
            "graduate {graduate_id} was already called"
        )));
    }

    let _round = ctx.rounds.acquire(round).await;
    let next = ctx
        .storage
        .next_pending(round)
        .await
        .map_err(storage_error)?;
    match next {
        Some(next) if next.graduate_id == graduate_id => {}
        Some(next) => {
            return Err(ApiError::conflict(format!(
                "graduate {graduate_id} is not next in round {round}; next is {}",
                next.graduate_id
            )));
        }
        None => {
            return Err(ApiError::conflict(format!(
                "graduate {graduate_id} was already called"
            )));
        }
    }

    let called_at = Utc::now();
    if !ctx
        .storage
        .call_if_next(graduate_id, round, called_at)
        .await
        .map_err(storage_error)?
    {
        warn!(%round, %graduate_id, "call cursor moved before the flip");
        return Err(ApiError::conflict(format!(
            "graduate {graduate_id} is no longer next in round {round}"
        )));
    }

    info!(%round, %graduate_id, sequence = graduate.sequence, "called graduate by id");
    let mut called = graduate;
    called.called = true;
    called.called_at = Some(called_at);
    Ok(graduate_payload(called))
}

/// Smallest round that still has someone waiting.
pub async fn current_round(ctx: &ApiContext) -> Result<CurrentRound, ApiError> {
    let rounds = ctx
        .storage
        .all_round_progress()
        .await
        .map_err(storage_error)?;
    Ok(rounds
        .iter()
        .find(|p| RoundState::from_counts(p.entrants, p.called) != RoundState::Exhausted)
        .map_or(CurrentRound::AllRoundsComplete, |p| {
            CurrentRound::Active(p.round)
        }))
}

pub async fn round_state(ctx: &ApiContext, round: RoundNumber) -> Result<RoundState, ApiError> {
    let progress = progress(ctx, round).await?;
    Ok(RoundState::from_counts(progress.entrants, progress.called))
}

pub async fn reset_round(ctx: &ApiContext, round: RoundNumber) -> Result<u64, ApiError> {
    let _round = ctx.rounds.acquire(round).await;
    progress(ctx, round).await?;
    let reset = ctx
        .storage
        .reset_round(round)
        .await
        .map_err(storage_error)?;
    info!(%round, reset, "reset round");
    Ok(reset)
}

/// Clears every called flag while holding every round's writer lock.
pub async fn reset_all(ctx: &ApiContext) -> Result<u64, ApiError> {
    let rounds = ctx
        .storage
        .load_quota_partition()
        .await
        .map_err(storage_error)?
        .rounds;
    let _rounds = ctx.rounds.acquire_all(rounds).await;
    let reset = ctx.storage.reset_all().await.map_err(storage_error)?;
    info!(reset, "reset every round");
    Ok(reset)
}

#[cfg(test)]
#[path = "tests/sequencer_tests.rs"]
mod tests;
