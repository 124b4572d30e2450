use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use server_api::{quota, roster, sequencer, summary, ApiContext};
use shared::{
    domain::FacultyId,
    error::ApiException,
    protocol::{CreateFacultyRequest, ImportRequest, ImportRow},
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/ceremony.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateFaculty {
        id: i64,
        name: String,
    },
    /// Loads roster rows from a JSON file: either `{"rows":[..]}` or a bare array.
    Import {
        path: PathBuf,
    },
    Groups,
    Summary,
    ResetCards,
}

fn parse_rows(raw: &str) -> Result<Vec<ImportRow>> {
    if let Ok(request) = serde_json::from_str::<ImportRequest>(raw) {
        return Ok(request.rows);
    }
    serde_json::from_str::<Vec<ImportRow>>(raw).context("expected {\"rows\":[..]} or an array of rows")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let ctx = ApiContext::new(storage);

    match cli.command {
        Command::CreateFaculty { id, name } => {
            let faculty = roster::create_faculty(
                &ctx,
                CreateFacultyRequest {
                    id: FacultyId(id),
                    name,
                },
            )
            .await
            .map_err(ApiException::from)?;
            println!("created faculty_id={} name={}", faculty.id, faculty.name);
        }
        Command::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let rows = parse_rows(&raw)?;
            let imported = roster::import(&ctx, ImportRequest { rows })
                .await
                .map_err(ApiException::from)?;
            println!("imported {imported} graduates");
        }
        Command::Groups => {
            let groups = quota::list_groups(&ctx).await.map_err(ApiException::from)?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        Command::Summary => {
            let round = summary::current_summary(&ctx)
                .await
                .map_err(ApiException::from)?;
            let totals = summary::ceremony_totals(&ctx)
                .await
                .map_err(ApiException::from)?;
            match round {
                Some(round) => println!("{}", serde_json::to_string_pretty(&round)?),
                None => println!("all rounds complete"),
            }
            println!(
                "received {}/{} ({} waiting)",
                totals.received, totals.total_graduates, totals.not_received
            );
        }
        Command::ResetCards => {
            let reset = sequencer::reset_all(&ctx)
                .await
                .map_err(ApiException::from)?;
            println!("reset {reset} graduates");
        }
    }

    Ok(())
}
