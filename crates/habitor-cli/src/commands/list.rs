use crate::commands::common::{format_record_lines, record_to_list_item, App, RecordListItem};
use crate::error::CliError;

pub fn run_list(app: &App, trash: bool, as_json: bool) -> Result<(), CliError> {
    let records = if trash {
        app.repo.list_trash()?
    } else {
        app.repo.list_active()?
    };

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("{}", if trash { "Trash is empty." } else { "No habits yet." });
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
