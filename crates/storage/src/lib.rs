use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{FacultyId, GraduateId, RoundNumber};

const GRADUATE_SELECT: &str = "SELECT g.id, g.prefix, g.first_name, g.last_name, g.faculty_id,
        f.name AS faculty_name, g.degree_level, g.degree_name, g.major, g.sequence,
        g.faculty_sequence, g.round_number, g.called, g.called_at, g.call_order
     FROM graduates g
     INNER JOIN faculties f ON f.id = g.faculty_id";

const ROUND_PROGRESS_SELECT: &str = "SELECT r.round_number,
        COALESCE((SELECT SUM(q.quota) FROM round_quotas q WHERE q.round_number = r.round_number), 0) AS quota_total,
        (SELECT COUNT(*) FROM graduates g WHERE g.round_number = r.round_number) AS entrants,
        (SELECT COUNT(*) FROM graduates g WHERE g.round_number = r.round_number AND g.called = 1) AS called,
        (SELECT MAX(g.sequence) FROM graduates g WHERE g.round_number = r.round_number AND g.called = 1) AS latest_called_sequence
     FROM rounds r";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFaculty {
    pub faculty_id: FacultyId,
    pub name: String,
    pub population: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredGraduate {
    pub graduate_id: GraduateId,
    pub prefix: String,
    pub first_name: String,
    pub last_name: String,
    pub faculty_id: FacultyId,
    pub faculty_name: String,
    pub degree_level: String,
    pub degree_name: String,
    pub major: String,
    pub sequence: i64,
    pub faculty_sequence: i64,
    pub round_number: Option<RoundNumber>,
    pub called: bool,
    pub called_at: Option<DateTime<Utc>>,
    pub call_order: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGraduate {
    pub prefix: String,
    pub first_name: String,
    pub last_name: String,
    pub faculty_id: FacultyId,
    pub degree_level: String,
    pub degree_name: String,
    pub major: String,
    pub sequence: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(u64),
    UnknownFaculty(FacultyId),
    DuplicateSequence(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacultyRemoval {
    Removed,
    NotFound,
    Populated(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRoundQuota {
    pub round: RoundNumber,
    pub faculty_id: FacultyId,
    pub quota: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredPartition {
    pub rounds: Vec<RoundNumber>,
    pub quotas: Vec<StoredRoundQuota>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundProgress {
    pub round: RoundNumber,
    pub quota_total: i64,
    pub entrants: i64,
    pub called: i64,
    pub latest_called_sequence: Option<i64>,
}

impl RoundProgress {
    pub fn pending(&self) -> i64 {
        (self.entrants - self.called).max(0)
    }
}

/// Keyset position in call order: `(round_number, sequence, faculty_sequence)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCursor {
    pub round: RoundNumber,
    pub sequence: i64,
    pub faculty_sequence: i64,
}

impl PendingCursor {
    pub fn start() -> Self {
        Self {
            round: RoundNumber(0),
            sequence: i64::MIN,
            faculty_sequence: i64::MIN,
        }
    }
}

impl From<&StoredGraduate> for PendingCursor {
    fn from(graduate: &StoredGraduate) -> Self {
        Self {
            round: graduate.round_number.unwrap_or(RoundNumber(0)),
            sequence: graduate.sequence,
            faculty_sequence: graduate.faculty_sequence,
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let in_memory = is_in_memory(database_url);
        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives exactly as long as its one connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run roster migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_faculty(&self, faculty_id: FacultyId, name: &str) -> Result<bool> {
        let result =
            sqlx::query("INSERT INTO faculties (id, name) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
                .bind(faculty_id.0)
                .bind(name)
                .execute(&self.pool)
                .await
                .context("failed to insert faculty")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_faculties(&self) -> Result<Vec<StoredFaculty>> {
        let rows = sqlx::query(
            "SELECT f.id, f.name, COUNT(g.id) AS population
             FROM faculties f
             LEFT JOIN graduates g ON g.faculty_id = f.id
             GROUP BY f.id, f.name
             ORDER BY f.id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list faculties")?;
        rows.iter().map(faculty_from_row).collect()
    }

    pub async fn faculty(&self, faculty_id: FacultyId) -> Result<Option<StoredFaculty>> {
        let row = sqlx::query(
            "SELECT f.id, f.name, COUNT(g.id) AS population
             FROM faculties f
             LEFT JOIN graduates g ON g.faculty_id = f.id
             WHERE f.id = ?
             GROUP BY f.id, f.name",
        )
        .bind(faculty_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load faculty")?;
        row.as_ref().map(faculty_from_row).transpose()
    }

    pub async fn remove_faculty(&self, faculty_id: FacultyId) -> Result<FacultyRemoval> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM faculties WHERE id = ?")
            .bind(faculty_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(FacultyRemoval::NotFound);
        }

        let population: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM graduates WHERE faculty_id = ?")
                .bind(faculty_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if population > 0 {
            return Ok(FacultyRemoval::Populated(population));
        }

        sqlx::query("DELETE FROM round_quotas WHERE faculty_id = ?")
            .bind(faculty_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM faculties WHERE id = ?")
            .bind(faculty_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.context("failed to commit faculty removal")?;
        Ok(FacultyRemoval::Removed)
    }

    /// Appends roster rows in one transaction. Nothing is written unless every
    /// row references a known faculty and every program sequence is unique.
    pub async fn import_graduates(&self, rows: &[NewGraduate]) -> Result<ImportOutcome> {
        let mut tx = self.pool.begin().await?;

        let known: HashSet<i64> = sqlx::query_scalar::<_, i64>("SELECT id FROM faculties")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
        if let Some(row) = rows.iter().find(|row| !known.contains(&row.faculty_id.0)) {
            return Ok(ImportOutcome::UnknownFaculty(row.faculty_id));
        }

        let mut taken: HashSet<i64> = sqlx::query_scalar::<_, i64>("SELECT sequence FROM graduates")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();
        for sequence in rows.iter().filter_map(|row| row.sequence) {
            if !taken.insert(sequence) {
                return Ok(ImportOutcome::DuplicateSequence(sequence));
            }
        }

        let mut next_sequence = taken.iter().copied().max().unwrap_or(0);
        let mut resolved: Vec<(i64, &NewGraduate)> = rows
            .iter()
            .map(|row| {
                let sequence = row.sequence.unwrap_or_else(|| {
                    next_sequence += 1;
                    next_sequence
                });
                (sequence, row)
            })
            .collect();
        resolved.sort_by_key(|(sequence, _)| *sequence);

        let mut faculty_cursor: HashMap<i64, i64> = HashMap::new();
        for (sequence, row) in &resolved {
            let faculty_sequence = match faculty_cursor.get(&row.faculty_id.0) {
                Some(current) => current + 1,
                None => {
                    let current: i64 = sqlx::query_scalar(
                        "SELECT COALESCE(MAX(faculty_sequence), 0) FROM graduates WHERE faculty_id = ?",
                    )
                    .bind(row.faculty_id.0)
                    .fetch_one(&mut *tx)
                    .await?;
                    current + 1
                }
            };
            faculty_cursor.insert(row.faculty_id.0, faculty_sequence);

            sqlx::query(
                "INSERT INTO graduates (prefix, first_name, last_name, faculty_id, degree_level, degree_name, major, sequence, faculty_sequence)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(row.prefix.as_str())
            .bind(row.first_name.as_str())
            .bind(row.last_name.as_str())
            .bind(row.faculty_id.0)
            .bind(row.degree_level.as_str())
            .bind(row.degree_name.as_str())
            .bind(row.major.as_str())
            .bind(*sequence)
            .bind(faculty_sequence)
            .execute(&mut *tx)
            .await
            .context("failed to insert graduate")?;
        }

        tx.commit().await.context("failed to commit roster import")?;
        Ok(ImportOutcome::Imported(resolved.len() as u64))
    }

    pub async fn list_graduates_by_faculty(
        &self,
        faculty_id: FacultyId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<StoredGraduate>, i64)> {
        let sql = format!(
            "{GRADUATE_SELECT} WHERE g.faculty_id = ? ORDER BY g.faculty_sequence ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(faculty_id.0)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("failed to list graduates")?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM graduates WHERE faculty_id = ?")
            .bind(faculty_id.0)
            .fetch_one(&self.pool)
            .await?;
        let graduates = rows.iter().map(graduate_from_row).collect::<Result<_>>()?;
        Ok((graduates, total))
    }

    pub async fn graduate(&self, graduate_id: GraduateId) -> Result<Option<StoredGraduate>> {
        let sql = format!("{GRADUATE_SELECT} WHERE g.id = ?");
        let row = sqlx::query(&sql)
            .bind(graduate_id.0)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load graduate")?;
        row.as_ref().map(graduate_from_row).transpose()
    }

    /// Removes the whole roster together with the quota partition it fed.
    pub async fn delete_all_graduates(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM round_quotas")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rounds").execute(&mut *tx).await?;
        let deleted = sqlx::query("DELETE FROM graduates")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await.context("failed to commit roster deletion")?;
        Ok(deleted)
    }

    pub async fn load_quota_partition(&self) -> Result<StoredPartition> {
        let rounds = sqlx::query_scalar::<_, i64>(
            "SELECT round_number FROM rounds ORDER BY round_number ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list rounds")?
        .into_iter()
        .map(RoundNumber)
        .collect();

        let quotas = sqlx::query(
            "SELECT round_number, faculty_id, quota FROM round_quotas
             ORDER BY round_number ASC, faculty_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list round quotas")?
        .into_iter()
        .map(|r| StoredRoundQuota {
            round: RoundNumber(r.get::<i64, _>(0)),
            faculty_id: FacultyId(r.get::<i64, _>(1)),
            quota: r.get::<i64, _>(2),
        })
        .collect();

        Ok(StoredPartition { rounds, quotas })
    }

    /// Rewrites the quota partition and re-derives every graduate's round in
    /// one transaction. `called` flags are left as they are.
    pub async fn replace_quota_partition(&self, partition: &StoredPartition) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM round_quotas")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rounds").execute(&mut *tx).await?;

        for round in &partition.rounds {
            sqlx::query("INSERT INTO rounds (round_number) VALUES (?)")
                .bind(round.0)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to insert round {round}"))?;
        }

        for quota in partition.quotas.iter().filter(|q| q.quota > 0) {
            sqlx::query("INSERT INTO round_quotas (round_number, faculty_id, quota) VALUES (?, ?, ?)")
                .bind(quota.round.0)
                .bind(quota.faculty_id.0)
                .bind(quota.quota)
                .execute(&mut *tx)
                .await
                .with_context(|| {
                    format!(
                        "failed to insert quota for faculty {} in round {}",
                        quota.faculty_id, quota.round
                    )
                })?;
        }

        assign_rounds(&mut tx, &partition.quotas).await?;

        tx.commit().await.context("failed to commit quota partition")?;
        Ok(())
    }

    pub async fn next_pending(&self, round: RoundNumber) -> Result<Option<StoredGraduate>> {
        let sql = format!(
            "{GRADUATE_SELECT}
             WHERE g.round_number = ? AND g.called = 0
             ORDER BY g.sequence ASC, g.faculty_sequence ASC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(round.0)
            .fetch_optional(&self.pool)
            .await
            .context("failed to select next pending graduate")?;
        row.as_ref().map(graduate_from_row).transpose()
    }

    /// Picks and calls the next pending graduate of `round` in one
    /// statement, so the pick and the flip see the same round membership.
    pub async fn call_next(
        &self,
        round: RoundNumber,
        at: DateTime<Utc>,
    ) -> Result<Option<StoredGraduate>> {
        let mut tx = self.pool.begin().await?;
        let called: Option<i64> = sqlx::query_scalar(
            "UPDATE graduates
             SET called = 1,
                 called_at = ?1,
                 call_order = (SELECT COALESCE(MAX(call_order), 0) + 1 FROM graduates)
             WHERE called = 0 AND id = (
                 SELECT id FROM graduates
                 WHERE round_number = ?2 AND called = 0
                 ORDER BY sequence ASC, faculty_sequence ASC
                 LIMIT 1
             )
             RETURNING id",
        )
        .bind(at)
        .bind(round.0)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to call next graduate")?;

        let graduate = match called {
            Some(id) => {
                let sql = format!("{GRADUATE_SELECT} WHERE g.id = ?");
                let row = sqlx::query(&sql)
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await
                    .context("failed to load called graduate")?;
                Some(graduate_from_row(&row)?)
            }
            None => None,
        };
        tx.commit().await.context("failed to commit call")?;
        Ok(graduate)
    }

    /// Calls `graduate_id` only while it is still the next pending graduate
    /// of `round`. Returns `false` when anything moved in between.
    pub async fn call_if_next(
        &self,
        graduate_id: GraduateId,
        round: RoundNumber,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE graduates
             SET called = 1,
                 called_at = ?1,
                 call_order = (SELECT COALESCE(MAX(call_order), 0) + 1 FROM graduates)
             WHERE id = ?2 AND called = 0 AND round_number = ?3 AND id = (
                 SELECT id FROM graduates
                 WHERE round_number = ?3 AND called = 0
                 ORDER BY sequence ASC, faculty_sequence ASC
                 LIMIT 1
             )",
        )
        .bind(at)
        .bind(graduate_id.0)
        .bind(round.0)
        .execute(&self.pool)
        .await
        .context("failed to call graduate")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn reset_round(&self, round: RoundNumber) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE graduates SET called = 0, called_at = NULL, call_order = NULL
             WHERE round_number = ? AND called = 1",
        )
        .bind(round.0)
        .execute(&self.pool)
        .await
        .context("failed to reset round")?;
        Ok(result.rows_affected())
    }

    pub async fn reset_all(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE graduates SET called = 0, called_at = NULL, call_order = NULL WHERE called = 1",
        )
        .execute(&self.pool)
        .await
        .context("failed to reset all rounds")?;
        Ok(result.rows_affected())
    }

    pub async fn round_progress(&self, round: RoundNumber) -> Result<Option<RoundProgress>> {
        let sql = format!("{ROUND_PROGRESS_SELECT} WHERE r.round_number = ?");
        let row = sqlx::query(&sql)
            .bind(round.0)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load round progress")?;
        row.as_ref().map(progress_from_row).transpose()
    }

    pub async fn all_round_progress(&self) -> Result<Vec<RoundProgress>> {
        let sql = format!("{ROUND_PROGRESS_SELECT} ORDER BY r.round_number ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("failed to load round progress")?;
        rows.iter().map(progress_from_row).collect()
    }

    pub async fn total_quota(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(quota), 0) FROM round_quotas")
            .fetch_one(&self.pool)
            .await
            .context("failed to sum quotas")?;
        Ok(total)
    }

    pub async fn latest_called_in_round(
        &self,
        round: RoundNumber,
    ) -> Result<Option<StoredGraduate>> {
        let sql = format!(
            "{GRADUATE_SELECT}
             WHERE g.round_number = ? AND g.called = 1
             ORDER BY g.call_order DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(round.0)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load latest called graduate")?;
        row.as_ref().map(graduate_from_row).transpose()
    }

    /// `(quota, called)` for one faculty inside one round.
    pub async fn faculty_round_progress(
        &self,
        round: RoundNumber,
        faculty_id: FacultyId,
    ) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT
                COALESCE((SELECT quota FROM round_quotas WHERE round_number = ?1 AND faculty_id = ?2), 0),
                (SELECT COUNT(*) FROM graduates WHERE round_number = ?1 AND faculty_id = ?2 AND called = 1)",
        )
        .bind(round.0)
        .bind(faculty_id.0)
        .fetch_one(&self.pool)
        .await
        .context("failed to load faculty progress")?;
        Ok((row.try_get(0)?, row.try_get(1)?))
    }

    /// Pending graduates strictly after `after` in call order, across rounds.
    pub async fn pending_after(
        &self,
        after: PendingCursor,
        limit: u32,
    ) -> Result<Vec<StoredGraduate>> {
        let sql = format!(
            "{GRADUATE_SELECT}
             WHERE g.round_number IS NOT NULL AND g.called = 0
               AND (g.round_number, g.sequence, g.faculty_sequence) > (?, ?, ?)
             ORDER BY g.round_number ASC, g.sequence ASC, g.faculty_sequence ASC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(after.round.0)
            .bind(after.sequence)
            .bind(after.faculty_sequence)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("failed to page pending graduates")?;
        rows.iter().map(graduate_from_row).collect()
    }

    /// `(total, called)` over the whole roster.
    pub async fn ceremony_totals(&self) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN called = 1 THEN 1 ELSE 0 END), 0) FROM graduates",
        )
        .fetch_one(&self.pool)
        .await
        .context("failed to count graduates")?;
        Ok((row.try_get(0)?, row.try_get(1)?))
    }
}

/// Fills rounds positionally: per faculty, graduates ordered by
/// `faculty_sequence` take round slots in ascending round order.
async fn assign_rounds(
    tx: &mut Transaction<'_, Sqlite>,
    quotas: &[StoredRoundQuota],
) -> Result<()> {
    sqlx::query("UPDATE graduates SET round_number = NULL")
        .execute(&mut **tx)
        .await?;

    let mut by_faculty: BTreeMap<FacultyId, Vec<(RoundNumber, i64)>> = BTreeMap::new();
    for quota in quotas.iter().filter(|q| q.quota > 0) {
        by_faculty
            .entry(quota.faculty_id)
            .or_default()
            .push((quota.round, quota.quota));
    }

    for (faculty_id, mut slots) in by_faculty {
        slots.sort_by_key(|(round, _)| *round);
        let mut offset = 0_i64;
        for (round, quota) in slots {
            sqlx::query(
                "UPDATE graduates SET round_number = ?1
                 WHERE id IN (
                     SELECT id FROM graduates
                     WHERE faculty_id = ?2
                     ORDER BY faculty_sequence ASC
                     LIMIT ?3 OFFSET ?4
                 )",
            )
            .bind(round.0)
            .bind(faculty_id.0)
            .bind(quota)
            .bind(offset)
            .execute(&mut **tx)
            .await
            .with_context(|| {
                format!("failed to assign faculty {faculty_id} graduates to round {round}")
            })?;
            offset += quota;
        }
    }

    Ok(())
}

fn faculty_from_row(row: &SqliteRow) -> Result<StoredFaculty> {
    Ok(StoredFaculty {
        faculty_id: FacultyId(row.try_get("id")?),
        name: row.try_get("name")?,
        population: row.try_get("population")?,
    })
}

fn graduate_from_row(row: &SqliteRow) -> Result<StoredGraduate> {
    Ok(StoredGraduate {
        graduate_id: GraduateId(row.try_get("id")?),
        prefix: row.try_get("prefix")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        faculty_id: FacultyId(row.try_get("faculty_id")?),
        faculty_name: row.try_get("faculty_name")?,
        degree_level: row.try_get("degree_level")?,
        degree_name: row.try_get("degree_name")?,
        major: row.try_get("major")?,
        sequence: row.try_get("sequence")?,
        faculty_sequence: row.try_get("faculty_sequence")?,
        round_number: row
            .try_get::<Option<i64>, _>("round_number")?
            .map(RoundNumber),
        called: row.try_get("called")?,
        called_at: row.try_get("called_at")?,
        call_order: row.try_get("call_order")?,
    })
}

fn progress_from_row(row: &SqliteRow) -> Result<RoundProgress> {
    Ok(RoundProgress {
        round: RoundNumber(row.try_get("round_number")?),
        quota_total: row.try_get("quota_total")?,
        entrants: row.try_get("entrants")?,
        called: row.try_get("called")?,
        latest_called_sequence: row.try_get("latest_called_sequence")?,
    })
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
