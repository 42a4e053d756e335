use crate::commands::common::App;
use crate::error::CliError;

pub fn run_delete(app: &App, id: &str) -> Result<(), CliError> {
    let record = app.find_record(id)?;
    app.repo.delete(record.local_id)?;
    println!("{}", record.local_id);
    Ok(())
}

pub fn run_restore(app: &App, id: &str) -> Result<(), CliError> {
    let record = app.find_record(id)?;
    app.repo.restore(record.local_id)?;
    println!("{}", record.local_id);
    Ok(())
}

pub fn run_purge(app: &App, id: &str) -> Result<(), CliError> {
    let record = app.find_record(id)?;
    app.repo.purge(record.local_id)?;
    println!("{}", record.local_id);
    Ok(())
}
