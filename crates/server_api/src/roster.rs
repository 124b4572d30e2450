use shared::{
    domain::FacultyId,
    error::ApiError,
    protocol::{
        CreateFacultyRequest, FacultySummary, GraduatePage, ImportRequest, ListGraduatesRequest,
    },
};
use storage::{FacultyRemoval, ImportOutcome, NewGraduate};
use tracing::info;

use crate::{graduate_payload, storage_error, ApiContext};

const FACULTY_LISTING: &str = "faculty";
const MAX_PAGE_SIZE: u32 = 100;

pub async fn list_faculties(ctx: &ApiContext, kind: &str) -> Result<Vec<FacultySummary>, ApiError> {
    if kind != FACULTY_LISTING {
        return Err(ApiError::validation(format!("unknown listing type '{kind}'")));
    }
    let faculties = ctx.storage.list_faculties().await.map_err(storage_error)?;
    Ok(faculties
        .into_iter()
        .map(|f| FacultySummary {
            id: f.faculty_id,
            name: f.name,
            student_count: f.population,
        })
        .collect())
}

pub async fn create_faculty(
    ctx: &ApiContext,
    request: CreateFacultyRequest,
) -> Result<FacultySummary, ApiError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("faculty name must not be empty"));
    }
    if request.id.0 <= 0 {
        return Err(ApiError::validation("faculty id must be positive"));
    }

    let created = ctx
        .storage
        .create_faculty(request.id, name)
        .await
        .map_err(storage_error)?;
    if !created {
        return Err(ApiError::conflict(format!(
            "faculty {} already exists",
            request.id
        )));
    }
    info!(faculty_id = %request.id, name, "created faculty");
    Ok(FacultySummary {
        id: request.id,
        name: name.to_string(),
        student_count: 0,
    })
}

/// Faculties with graduates on the roster are never removed.
pub async fn remove_faculty(ctx: &ApiContext, faculty_id: FacultyId) -> Result<(), ApiError> {
    let _partition = ctx.lock_partition().await;
    match ctx
        .storage
        .remove_faculty(faculty_id)
        .await
        .map_err(storage_error)?
    {
        FacultyRemoval::Removed => {
            info!(%faculty_id, "removed faculty");
            Ok(())
        }
        FacultyRemoval::NotFound => Err(ApiError::not_found(format!(
            "faculty {faculty_id} not found"
        ))),
        FacultyRemoval::Populated(population) => Err(ApiError::conflict(format!(
            "faculty {faculty_id} still has {population} graduates"
        ))),
    }
}

pub async fn list_graduates(
    ctx: &ApiContext,
    request: ListGraduatesRequest,
) -> Result<GraduatePage, ApiError> {
    if request.page == 0 {
        return Err(ApiError::validation("page starts at 1"));
    }
    if request.page_size == 0 || request.page_size > MAX_PAGE_SIZE {
        return Err(ApiError::validation(format!(
            "pageSize must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let offset = (request.page - 1).saturating_mul(request.page_size);
    let (graduates, total) = ctx
        .storage
        .list_graduates_by_faculty(request.faculty_id, request.page_size, offset)
        .await
        .map_err(storage_error)?;
    Ok(GraduatePage {
        data: graduates.into_iter().map(graduate_payload).collect(),
        total,
    })
}

/// Appends a batch of roster rows. New graduates land in the unassigned
/// bucket until quota is given to them.
pub async fn import(ctx: &ApiContext, request: ImportRequest) -> Result<u64, ApiError> {
    if let Some(position) = request
        .rows
        .iter()
        .position(|row| row.first_name.trim().is_empty())
    {
        return Err(ApiError::validation(format!(
            "row {} has no first_name",
            position + 1
        )));
    }

    let rows: Vec<NewGraduate> = request
        .rows
        .into_iter()
        .map(|row| NewGraduate {
            prefix: row.prefix,
            first_name: row.first_name,
            last_name: row.last_name,
            faculty_id: row.faculty_id,
            degree_level: row.degree_level,
            degree_name: row.degree_name,
            major: row.major,
            sequence: row.sequence,
        })
        .collect();

    let _partition = ctx.lock_partition().await;
    match ctx
        .storage
        .import_graduates(&rows)
        .await
        .map_err(storage_error)?
    {
        ImportOutcome::Imported(imported) => {
            info!(imported, "imported roster rows");
            Ok(imported)
        }
        ImportOutcome::UnknownFaculty(faculty_id) => Err(ApiError::validation(format!(
            "row references unknown faculty {faculty_id}"
        ))),
        ImportOutcome::DuplicateSequence(sequence) => Err(ApiError::validation(format!(
            "program sequence {sequence} is already taken"
        ))),
    }
}

/// Wipes the roster together with the quota partition built on it.
pub async fn delete_all_graduates(ctx: &ApiContext) -> Result<u64, ApiError> {
    let _partition = ctx.lock_partition().await;
    let deleted = ctx
        .storage
        .delete_all_graduates()
        .await
        .map_err(storage_error)?;
    info!(deleted, "deleted roster");
    Ok(deleted)
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
