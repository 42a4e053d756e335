use crate::commands::common::{normalize_name, App};
use crate::error::CliError;

pub fn run_edit(
    app: &App,
    id: &str,
    name: Option<&str>,
    note: Option<&str>,
) -> Result<(), CliError> {
    if name.is_none() && note.is_none() {
        return Err(CliError::NothingToEdit);
    }

    let mut record = app.find_record(id)?;
    if let Some(name) = name {
        record.name = normalize_name(name).ok_or(CliError::EmptyName)?;
    }
    if let Some(note) = note {
        record.details.note = note.trim().to_string();
    }

    app.repo.update(&record)?;
    println!("{}", record.local_id);
    Ok(())
}
