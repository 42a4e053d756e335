use std::io::{self, BufRead, IsTerminal, Write};

use habitor_core::sync::{complete_sign_in, MergeCheck, MergeReport, MergeStrategy};

use crate::cli::StrategyArg;
use crate::commands::common::App;
use crate::error::CliError;

pub async fn run_sign_in(
    app: &App,
    account: &str,
    strategy: Option<StrategyArg>,
) -> Result<(), CliError> {
    if !app.config.sync_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    let outcome = complete_sign_in(
        &app.identity,
        &app.resolver,
        &app.coordinator,
        account,
        |check| choose_strategy(check, strategy),
    )
    .await?;
    app.store.set_stored_account(app.identity.account().as_deref())?;

    println!("Signed in as {}", account.trim());
    match &outcome.merge {
        Some(report) => print_merge_report(report),
        None if outcome.check.needed => println!("Merge cancelled; local habits stay unsynced."),
        None => {}
    }
    println!("{}", outcome.sync.message);
    Ok(())
}

pub fn run_sign_out(app: &App) -> Result<(), CliError> {
    let Some(account) = app.identity.account() else {
        println!("Not signed in.");
        return Ok(());
    };

    app.identity.sign_out();
    app.store.set_stored_account(None)?;
    println!("Signed out of {account}; habits stay on this device.");
    Ok(())
}

/// Pick the strategy from the flag, or ask when attached to a terminal
pub fn choose_strategy(check: &MergeCheck, flag: Option<StrategyArg>) -> Option<MergeStrategy> {
    if let Some(flag) = flag {
        return Some(flag.into());
    }
    if !io::stdin().is_terminal() {
        eprintln!(
            "{} local habits were never uploaded and the account holds {}; pass --strategy to merge.",
            check.local_unsynced, check.remote_count
        );
        return None;
    }

    println!(
        "This device has {} habits that were never uploaded; the account has {}.",
        check.local_unsynced, check.remote_count
    );
    print!("Choose keep-local, keep-cloud, merge-both, or cancel [merge-both]: ");
    io::stdout().flush().ok()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).ok()?;
    parse_strategy_answer(&answer)
}

pub fn parse_strategy_answer(answer: &str) -> Option<MergeStrategy> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Some(MergeStrategy::MergeBoth);
    }
    answer.parse().ok()
}

fn print_merge_report(report: &MergeReport) {
    println!("{}", report.message);
    for failure in &report.failures {
        eprintln!("  {failure}");
    }
}
