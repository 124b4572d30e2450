use shared::domain::{FacultyId, RoundNumber};
use storage::{NewGraduate, Storage, StoredPartition, StoredRoundQuota};

use crate::ApiContext;

pub(crate) async fn context() -> ApiContext {
    ApiContext::new(Storage::new("sqlite::memory:").await.expect("db"))
}

/// Creates a faculty holding `population` graduates named `<name>-<n>`.
pub(crate) async fn faculty(ctx: &ApiContext, id: i64, name: &str, population: usize) {
    assert!(ctx
        .storage
        .create_faculty(FacultyId(id), name)
        .await
        .expect("faculty"));
    let rows: Vec<NewGraduate> = (1..=population)
        .map(|n| NewGraduate {
            first_name: format!("{name}-{n}"),
            faculty_id: FacultyId(id),
            ..NewGraduate::default()
        })
        .collect();
    ctx.storage.import_graduates(&rows).await.expect("import");
}

/// Imports graduates with explicit program sequence: `(first_name, faculty, sequence)`.
pub(crate) async fn graduates(ctx: &ApiContext, rows: &[(&str, i64, i64)]) {
    let rows: Vec<NewGraduate> = rows
        .iter()
        .map(|(first_name, faculty_id, sequence)| NewGraduate {
            first_name: first_name.to_string(),
            faculty_id: FacultyId(*faculty_id),
            sequence: Some(*sequence),
            ..NewGraduate::default()
        })
        .collect();
    ctx.storage.import_graduates(&rows).await.expect("import");
}

/// Writes a partition from `(round, faculty, quota)` triples.
pub(crate) async fn partition(ctx: &ApiContext, rounds: &[i64], quotas: &[(i64, i64, i64)]) {
    ctx.storage
        .replace_quota_partition(&StoredPartition {
            rounds: rounds.iter().copied().map(RoundNumber).collect(),
            quotas: quotas
                .iter()
                .map(|(round, faculty_id, quota)| StoredRoundQuota {
                    round: RoundNumber(*round),
                    faculty_id: FacultyId(*faculty_id),
                    quota: *quota,
                })
                .collect(),
        })
        .await
        .expect("partition");
}
