use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{output, CliError, EXIT_RECONCILIATION_FAILED};
use crate::core::services::{BatchReport, ReconciliationReport, ReconciliationService, RecurringProcessor};
use crate::utils::build_info;
use crate::LedgerEngine;

pub type CommandHandler = fn(Option<&LedgerEngine>, &[String]) -> Result<i32, CliError>;

#[derive(Clone)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub usage: &'static str,
    pub needs_engine: bool,
    pub handler: CommandHandler,
}

impl CommandDefinition {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        usage: &'static str,
        needs_engine: bool,
        handler: CommandHandler,
    ) -> Self {
        Self {
            name,
            description,
            usage,
            needs_engine,
            handler,
        }
    }
}

pub struct CommandRegistry {
    commands: Vec<CommandDefinition>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: vec![
                CommandDefinition::new(
                    "run-recurring",
                    "Materialize every due recurring template",
                    "run-recurring [--at <RFC3339>]",
                    true,
                    cmd_run_recurring,
                ),
                CommandDefinition::new(
                    "reconcile",
                    "Replay account history against stored balances",
                    "reconcile <account-id> | --all",
                    true,
                    cmd_reconcile,
                ),
                CommandDefinition::new(
                    "accounts",
                    "List accounts with their balances",
                    "accounts",
                    true,
                    cmd_accounts,
                ),
                CommandDefinition::new(
                    "version",
                    "Show build information",
                    "version",
                    false,
                    cmd_version,
                ),
                CommandDefinition::new("help", "Show this help", "help", false, cmd_help),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|definition| definition.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.iter().map(|definition| definition.name)
    }

    pub fn print_usage(&self) {
        println!("Usage: fintrack_cli [--data-dir <path>] <command> [args]");
        output::section("Commands");
        for definition in &self.commands {
            println!("  {:<40} {}", definition.usage, definition.description);
        }
    }
}

fn require_engine(engine: Option<&LedgerEngine>) -> Result<&LedgerEngine, CliError> {
    engine.ok_or_else(|| CliError::Command("ledger is not open".into()))
}

fn cmd_run_recurring(engine: Option<&LedgerEngine>, args: &[String]) -> Result<i32, CliError> {
    let engine = require_engine(engine)?;
    let report = match args {
        [] => engine.run_recurring()?,
        [flag, value] if flag == "--at" => {
            let now = parse_instant(value)?;
            RecurringProcessor::run(engine.session(), now)?
        }
        _ => return Err(CliError::Input("usage: run-recurring [--at <RFC3339>]".into())),
    };
    print_batch(&report);
    Ok(0)
}

fn cmd_reconcile(engine: Option<&LedgerEngine>, args: &[String]) -> Result<i32, CliError> {
    let engine = require_engine(engine)?;
    let reports = match args {
        [flag] if flag == "--all" => ReconciliationService::replay_all(engine.session())?,
        [id] => vec![ReconciliationService::replay(engine.session(), parse_id(id)?)?],
        _ => return Err(CliError::Input("usage: reconcile <account-id> | --all".into())),
    };
    reports.iter().for_each(print_reconciliation);
    if reports.iter().all(|report| report.valid) {
        output::success(format!("{} account(s) reconciled", reports.len()));
        Ok(0)
    } else {
        Ok(EXIT_RECONCILIATION_FAILED)
    }
}

fn cmd_accounts(engine: Option<&LedgerEngine>, _args: &[String]) -> Result<i32, CliError> {
    let engine = require_engine(engine)?;
    let mut accounts = engine.session().store.accounts()?;
    accounts.sort_by(|a, b| a.name.cmp(&b.name));
    output::section("Accounts");
    if accounts.is_empty() {
        output::info("No accounts recorded.");
    }
    for account in accounts {
        let status = if account.active { "" } else { " (inactive)" };
        println!(
            "  {}  {:<24} {:>14} {}{}",
            account.id,
            account.name,
            account.balance().to_string(),
            account.currency,
            status
        );
    }
    Ok(0)
}

fn cmd_version(_engine: Option<&LedgerEngine>, _args: &[String]) -> Result<i32, CliError> {
    let meta = build_info::current();
    println!("{}", meta.summary());
    println!("rustc: {}", meta.rustc);
    Ok(0)
}

fn cmd_help(_engine: Option<&LedgerEngine>, _args: &[String]) -> Result<i32, CliError> {
    CommandRegistry::new().print_usage();
    Ok(0)
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| CliError::Input(format!("`{value}` is not an RFC 3339 timestamp: {err}")))
}

fn parse_id(value: &str) -> Result<Uuid, CliError> {
    Uuid::parse_str(value).map_err(|_| CliError::Input(format!("`{value}` is not an account id")))
}

fn print_batch(report: &BatchReport) {
    output::section("Recurring run");
    output::info(format!(
        "processed {}, skipped {}, failed {}",
        report.processed_count, report.skipped_count, report.failed_count
    ));
    for id in &report.retired {
        output::info(format!("template {id} retired"));
    }
    for failure in &report.errors {
        output::warning(format!("template {}: {}", failure.template_id, failure.error));
    }
    for id in &report.suspended {
        output::warning(format!("template {id} suspended after repeated failures"));
    }
    if report.is_clean() {
        output::success("recurring run complete");
    }
}

fn print_reconciliation(report: &ReconciliationReport) {
    let summary = format!(
        "account {}: {} entries, computed {}, stored {}",
        report.account_id, report.entries_checked, report.computed_balance, report.stored_balance
    );
    if report.valid {
        output::info(summary);
        return;
    }
    output::warning(summary);
    for discrepancy in &report.discrepancies {
        let target = discrepancy
            .entry_id
            .map_or_else(|| "final balance".to_string(), |id| format!("entry {id}"));
        output::warning(format!(
            "  {target}: expected {}, found {} ({})",
            discrepancy.expected, discrepancy.actual, discrepancy.reason
        ));
    }
}
