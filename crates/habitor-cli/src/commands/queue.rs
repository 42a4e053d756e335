use habitor_core::db::LocalStore;
use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, App};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub operation: String,
    pub habit_id: i64,
    pub name: String,
    pub created_at: i64,
    pub created_at_iso: String,
}

pub fn run_queue_list(app: &App, as_json: bool) -> Result<(), CliError> {
    let items = app
        .store
        .list_queue()?
        .into_iter()
        .map(|entry| QueueItem {
            id: entry.id,
            operation: entry.operation.to_string(),
            habit_id: entry.local_id.get(),
            name: entry.snapshot.name,
            created_at: entry.created_at,
            created_at_iso: format_sync_timestamp(entry.created_at),
        })
        .collect::<Vec<_>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No pending operations.");
    } else {
        for item in &items {
            println!(
                "{}  {:<6}  habit={}  {}",
                item.created_at_iso, item.operation, item.habit_id, item.name
            );
        }
    }
    Ok(())
}

pub fn run_queue_clear(app: &App, confirmed: bool) -> Result<(), CliError> {
    let pending = app.coordinator.pending_count()?;
    if pending == 0 {
        println!("No pending operations.");
        return Ok(());
    }
    if !confirmed {
        return Err(CliError::ConfirmationRequired(pending));
    }

    let removed = app.coordinator.clear_queue()?;
    println!("Discarded {removed} pending operations");
    Ok(())
}
