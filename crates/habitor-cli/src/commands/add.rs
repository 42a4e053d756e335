use habitor_core::models::HabitDetails;
use habitor_core::Record;

use crate::commands::common::{resolve_habit_name, App};
use crate::error::CliError;

pub fn run_add(app: &App, name_parts: &[String], note: Option<&str>) -> Result<(), CliError> {
    let name = resolve_habit_name(name_parts)?;
    let details = HabitDetails {
        note: note.map(str::trim).unwrap_or_default().to_string(),
        ..HabitDetails::default()
    };

    let local_id = app.repo.insert(Record::new(name).with_details(details))?;
    println!("{local_id}");
    Ok(())
}
