use std::collections::BTreeMap;

use shared::{
    domain::{Bucket, FacultyId, RoundNumber},
    error::ApiError,
    protocol::{
        FacultyQuota, MoveQuotaRequest, QuotaGroup, QuotaItem, RoundQuotaInput, SaveQuotaRequest,
        UNASSIGNED_TITLE,
    },
};
use storage::{StoredFaculty, StoredPartition, StoredRoundQuota};
use tracing::info;

use crate::{storage_error, ApiContext};

#[derive(Debug, Clone, PartialEq, Eq)]
struct FacultyShare {
    name: String,
    population: i64,
}

/// Every faculty's population split across rounds. The unassigned bucket is
/// never stored: it is whatever the rounds leave over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPartition {
    faculties: BTreeMap<FacultyId, FacultyShare>,
    rounds: BTreeMap<RoundNumber, BTreeMap<FacultyId, i64>>,
}

impl QuotaPartition {
    pub fn new(faculties: Vec<StoredFaculty>, stored: StoredPartition) -> Self {
        let faculties = faculties
            .into_iter()
            .map(|f| {
                (
                    f.faculty_id,
                    FacultyShare {
                        name: f.name,
                        population: f.population,
                    },
                )
            })
            .collect();

        let mut rounds: BTreeMap<RoundNumber, BTreeMap<FacultyId, i64>> = stored
            .rounds
            .into_iter()
            .map(|round| (round, BTreeMap::new()))
            .collect();
        for quota in stored.quotas.into_iter().filter(|q| q.quota > 0) {
            rounds
                .entry(quota.round)
                .or_default()
                .insert(quota.faculty_id, quota.quota);
        }

        Self { faculties, rounds }
    }

    pub fn rounds(&self) -> impl Iterator<Item = RoundNumber> + '_ {
        self.rounds.keys().copied()
    }

    pub fn population(&self, faculty_id: FacultyId) -> Option<i64> {
        self.faculties.get(&faculty_id).map(|f| f.population)
    }

    /// Sum of a faculty's quota over every round.
    pub fn committed(&self, faculty_id: FacultyId) -> i64 {
        self.rounds
            .values()
            .filter_map(|quotas| quotas.get(&faculty_id))
            .sum()
    }

    pub fn assigned(&self, faculty_id: FacultyId, bucket: Bucket) -> i64 {
        match bucket {
            Bucket::Round(round) => self
                .rounds
                .get(&round)
                .and_then(|quotas| quotas.get(&faculty_id))
                .copied()
                .unwrap_or(0),
            Bucket::Unassigned => {
                let population = self.population(faculty_id).unwrap_or(0);
                (population - self.committed(faculty_id)).max(0)
            }
        }
    }

    /// Rounds ascending, then the unassigned bucket. Round groups list only
    /// faculties holding quota there; the unassigned group lists faculties
    /// with a remainder plus empty faculties so they stay visible.
    pub fn groups(&self) -> Vec<QuotaGroup> {
        let mut groups: Vec<QuotaGroup> = self
            .rounds
            .iter()
            .map(|(round, quotas)| QuotaGroup {
                round: Some(*round),
                title: round.title(),
                items: quotas
                    .iter()
                    .filter_map(|(faculty_id, quota)| self.item(*faculty_id, *quota))
                    .collect(),
            })
            .collect();

        let unassigned = self
            .faculties
            .iter()
            .filter_map(|(faculty_id, share)| {
                let remainder = self.assigned(*faculty_id, Bucket::Unassigned);
                if remainder > 0 || share.population == 0 {
                    self.item(*faculty_id, remainder)
                } else {
                    None
                }
            })
            .collect();
        groups.push(QuotaGroup {
            round: None,
            title: UNASSIGNED_TITLE.to_string(),
            items: unassigned,
        });
        groups
    }

    fn item(&self, faculty_id: FacultyId, value: i64) -> Option<QuotaItem> {
        let share = self.faculties.get(&faculty_id)?;
        Some(QuotaItem {
            id: faculty_id,
            name: share.name.clone(),
            value: u32::try_from(value).unwrap_or(0),
            student_count: u32::try_from(share.population).unwrap_or(u32::MAX),
        })
    }

    /// Moves `amount` of one faculty's quota between buckets. Either both
    /// sides change or neither does.
    pub fn move_quantity(
        &mut self,
        faculty_id: FacultyId,
        from: Bucket,
        to: Bucket,
        amount: i64,
    ) -> Result<(), ApiError> {
        let population = self
            .population(faculty_id)
            .ok_or_else(|| ApiError::not_found(format!("faculty {faculty_id} not found")))?;
        for bucket in [from, to] {
            if let Bucket::Round(round) = bucket {
                if !self.rounds.contains_key(&round) {
                    return Err(ApiError::not_found(format!("round {round} not found")));
                }
            }
        }
        if from == to {
            return Err(ApiError::validation("source and destination are the same bucket"));
        }
        if amount <= 0 {
            return Err(ApiError::validation("amount must be positive"));
        }

        let available = self.assigned(faculty_id, from);
        if amount > available {
            return Err(ApiError::validation(format!(
                "cannot move {amount} from {from}: only {available} assigned to faculty {faculty_id}"
            )));
        }
        let destination_total = self.assigned(faculty_id, to) + amount;
        if destination_total > population {
            return Err(ApiError::validation(format!(
                "{to} would hold {destination_total} of faculty {faculty_id}, population is {population}"
            )));
        }

        if let Bucket::Round(round) = from {
            self.set_quota(round, faculty_id, available - amount);
        }
        if let Bucket::Round(round) = to {
            self.set_quota(round, faculty_id, destination_total);
        }
        Ok(())
    }

    fn set_quota(&mut self, round: RoundNumber, faculty_id: FacultyId, quota: i64) {
        let quotas = self.rounds.entry(round).or_default();
        if quota > 0 {
            quotas.insert(faculty_id, quota);
        } else {
            quotas.remove(&faculty_id);
        }
    }

    pub fn create_round(&mut self) -> RoundNumber {
        let next = RoundNumber(self.rounds.keys().last().map_or(0, |r| r.0) + 1);
        self.rounds.insert(next, BTreeMap::new());
        next
    }

    /// Drops the round; its quota falls back into the unassigned remainder.
    pub fn remove_round(&mut self, round: RoundNumber) -> Result<i64, ApiError> {
        let quotas = self
            .rounds
            .remove(&round)
            .ok_or_else(|| ApiError::not_found(format!("round {round} not found")))?;
        Ok(quotas.values().sum())
    }

    /// Replaces the whole partition after validating it as one batch.
    pub fn replace(
        &mut self,
        rounds: Vec<RoundQuotaInput>,
        unassigned: Option<Vec<FacultyQuota>>,
    ) -> Result<(), ApiError> {
        let mut next: BTreeMap<RoundNumber, BTreeMap<FacultyId, i64>> = BTreeMap::new();
        let mut totals: BTreeMap<FacultyId, i64> = BTreeMap::new();

        for input in rounds {
            if input.round.0 < 1 {
                return Err(ApiError::validation(format!(
                    "round numbers start at 1, got {}",
                    input.round
                )));
            }
            if next.contains_key(&input.round) {
                return Err(ApiError::validation(format!(
                    "round {} appears more than once",
                    input.round
                )));
            }

            let mut quotas = BTreeMap::new();
            for entry in input.faculties {
                self.check_entry(&entry)?;
                if quotas.insert(entry.faculty_id, entry.quota).is_some() {
                    return Err(ApiError::validation(format!(
                        "faculty {} appears twice in round {}",
                        entry.faculty_id, input.round
                    )));
                }
                *totals.entry(entry.faculty_id).or_default() += entry.quota;
            }
            quotas.retain(|_, quota| *quota > 0);
            next.insert(input.round, quotas);
        }

        for (faculty_id, total) in &totals {
            let population = self.population(*faculty_id).unwrap_or(0);
            if *total > population {
                return Err(ApiError::validation(format!(
                    "faculty {faculty_id} is assigned {total} across rounds, population is {population}"
                )));
            }
        }

        if let Some(unassigned) = unassigned {
            let mut remainders: BTreeMap<FacultyId, i64> = BTreeMap::new();
            for entry in unassigned {
                self.check_entry(&entry)?;
                if remainders.insert(entry.faculty_id, entry.quota).is_some() {
                    return Err(ApiError::validation(format!(
                        "faculty {} appears twice in the unassigned bucket",
                        entry.faculty_id
                    )));
                }
            }
            for (faculty_id, share) in &self.faculties {
                let total = totals.get(faculty_id).copied().unwrap_or(0)
                    + remainders.get(faculty_id).copied().unwrap_or(0);
                if total != share.population {
                    return Err(ApiError::validation(format!(
                        "faculty {faculty_id} accounts for {total} graduates, population is {}",
                        share.population
                    )));
                }
            }
        }

        self.rounds = next;
        Ok(())
    }

    fn check_entry(&self, entry: &FacultyQuota) -> Result<(), ApiError> {
        if !self.faculties.contains_key(&entry.faculty_id) {
            return Err(ApiError::validation(format!(
                "unknown faculty {}",
                entry.faculty_id
            )));
        }
        if entry.quota < 0 {
            return Err(ApiError::validation(format!(
                "quota for faculty {} is negative",
                entry.faculty_id
            )));
        }
        Ok(())
    }

    pub fn to_stored(&self) -> StoredPartition {
        StoredPartition {
            rounds: self.rounds.keys().copied().collect(),
            quotas: self
                .rounds
                .iter()
                .flat_map(|(round, quotas)| {
                    quotas.iter().map(|(faculty_id, quota)| StoredRoundQuota {
                        round: *round,
                        faculty_id: *faculty_id,
                        quota: *quota,
                    })
                })
                .collect(),
        }
    }
}

pub async fn load_partition(ctx: &ApiContext) -> Result<QuotaPartition, ApiError> {
    let faculties = ctx.storage.list_faculties().await.map_err(storage_error)?;
    let stored = ctx
        .storage
        .load_quota_partition()
        .await
        .map_err(storage_error)?;
    Ok(QuotaPartition::new(faculties, stored))
}

/// Callers hold the partition lock. Every round whose membership may shift
/// is locked as well, so no cursor moves while entrants change rounds.
async fn persist(ctx: &ApiContext, partition: &QuotaPartition) -> Result<(), ApiError> {
    let stored = partition.to_stored();
    let previous = ctx
        .storage
        .load_quota_partition()
        .await
        .map_err(storage_error)?
        .rounds;
    let _rounds = ctx
        .rounds
        .acquire_all(previous.into_iter().chain(stored.rounds.iter().copied()))
        .await;
    ctx.storage
        .replace_quota_partition(&stored)
        .await
        .map_err(storage_error)
}

pub async fn list_groups(ctx: &ApiContext) -> Result<Vec<QuotaGroup>, ApiError> {
    Ok(load_partition(ctx).await?.groups())
}

pub async fn move_quantity(
    ctx: &ApiContext,
    request: MoveQuotaRequest,
) -> Result<Vec<QuotaGroup>, ApiError> {
    let _partition = ctx.lock_partition().await;
    let mut partition = load_partition(ctx).await?;
    let from = Bucket::from(request.from);
    let to = Bucket::from(request.to);
    partition.move_quantity(request.faculty_id, from, to, request.amount)?;
    persist(ctx, &partition).await?;
    info!(
        faculty_id = %request.faculty_id,
        %from,
        %to,
        amount = request.amount,
        "moved quota"
    );
    Ok(partition.groups())
}

pub async fn create_round(ctx: &ApiContext) -> Result<RoundNumber, ApiError> {
    let _partition = ctx.lock_partition().await;
    let mut partition = load_partition(ctx).await?;
    let round = partition.create_round();
    persist(ctx, &partition).await?;
    info!(%round, "created round");
    Ok(round)
}

pub async fn remove_round(ctx: &ApiContext, round: RoundNumber) -> Result<(), ApiError> {
    let _partition = ctx.lock_partition().await;
    let mut partition = load_partition(ctx).await?;
    let released = partition.remove_round(round)?;
    persist(ctx, &partition).await?;
    info!(%round, released, "removed round");
    Ok(())
}

/// Writes the submitted partition as the authoritative one. A rejected or
/// failed save leaves the stored partition untouched.
pub async fn save(ctx: &ApiContext, request: SaveQuotaRequest) -> Result<Vec<QuotaGroup>, ApiError> {
    let _partition = ctx.lock_partition().await;
    let mut partition = load_partition(ctx).await?;
    let (rounds, unassigned) = request.into_parts();
    partition.replace(rounds, unassigned)?;
    persist(ctx, &partition).await?;

    info!(
        rounds = partition.rounds().count(),
        committed = partition.to_stored().quotas.iter().map(|q| q.quota).sum::<i64>(),
        "saved quota partition"
    );
    Ok(partition.groups())
}

#[cfg(test)]
#[path = "tests/quota_tests.rs"]
mod tests;
