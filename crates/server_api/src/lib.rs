use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::RoundNumber,
    error::{ApiError, ErrorCode},
    protocol::GraduatePayload,
};
use storage::{Storage, StoredGraduate};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub mod quota;
pub mod roster;
pub mod sequencer;
pub mod summary;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    partition_lock: Arc<Mutex<()>>,
    rounds: RoundLocks,
}

impl ApiContext {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            partition_lock: Arc::new(Mutex::new(())),
            rounds: RoundLocks::default(),
        }
    }

    /// Serializes every write to the quota partition and to round membership.
    pub async fn lock_partition(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.partition_lock.lock().await
    }
}

/// One writer lock per round. Rounds advance independently of each other.
#[derive(Clone, Default)]
pub struct RoundLocks {
    inner: Arc<Mutex<HashMap<RoundNumber, Arc<Mutex<()>>>>>,
}

impl RoundLocks {
    pub async fn acquire(&self, round: RoundNumber) -> OwnedMutexGuard<()> {
        let lock = {
            let mut registry = self.inner.lock().await;
            registry.entry(round).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Takes every listed round lock in ascending order.
    pub async fn acquire_all(
        &self,
        rounds: impl IntoIterator<Item = RoundNumber>,
    ) -> Vec<OwnedMutexGuard<()>> {
        let mut rounds: Vec<_> = rounds.into_iter().collect();
        rounds.sort();
        rounds.dedup();

        let mut guards = Vec::with_capacity(rounds.len());
        for round in rounds {
            guards.push(self.acquire(round).await);
        }
        guards
    }
}

pub(crate) fn storage_error(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %format!("{err:#}"), "roster store failure");
    ApiError::new(ErrorCode::Storage, format!("{err:#}"))
}

pub(crate) fn graduate_payload(graduate: StoredGraduate) -> GraduatePayload {
    GraduatePayload {
        id: graduate.graduate_id,
        prefix: graduate.prefix,
        first_name: graduate.first_name,
        last_name: graduate.last_name,
        faculty_id: graduate.faculty_id,
        faculty_name: graduate.faculty_name,
        degree_level: graduate.degree_level,
        degree_name: graduate.degree_name,
        major: graduate.major,
        sequence: graduate.sequence,
        faculty_sequence: graduate.faculty_sequence,
        round_number: graduate.round_number,
        called: graduate.called,
        called_at: graduate.called_at,
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod support;
