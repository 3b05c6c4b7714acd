//! `blocksync replay`: run a scenario file and show what the controller did.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use blocksync_sync::scenario::{self, EventKind, ScenarioEvent, ScenarioReport};

/// Arguments for `blocksync replay`.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Scenario file (.yaml, .yml or .json).
    pub scenario: PathBuf,

    /// Emit the full report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReplayArgs {
    pub fn run(self) -> Result<()> {
        let loaded = scenario::load(&self.scenario)
            .with_context(|| format!("failed to load scenario '{}'", self.scenario.display()))?;
        let report = scenario::run(&loaded)
            .with_context(|| format!("scenario '{}' failed", self.scenario.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize replay report")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "step")]
    step: String,
    #[tabled(rename = "event")]
    event: String,
    #[tabled(rename = "blocks")]
    blocks: String,
}

fn print_table(report: &ScenarioReport) {
    let name = report.name.as_deref().unwrap_or("unnamed scenario");
    println!(
        "blocksync v{} | {} | {} events | {} resets | {} echoes | {} pending",
        env!("CARGO_PKG_VERSION"),
        name.bold(),
        report.events.len(),
        report.stats.resets,
        report.stats.echoes,
        report.pending,
    );

    if report.events.is_empty() {
        println!("No events recorded.");
    } else {
        let rows: Vec<EventRow> = report.events.iter().map(event_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let ids: Vec<String> = report.final_children.iter().map(|b| b.id.to_string()).collect();
    println!(
        "Final children ({}): {} | revision {}",
        ids.len(),
        if ids.is_empty() { "-".to_string() } else { ids.join(", ") },
        report.revision,
    );
}

fn event_row(event: &ScenarioEvent) -> EventRow {
    EventRow {
        step: event.step.map_or_else(|| "bind".to_string(), |i| (i + 1).to_string()),
        event: format!("{} {}", indicator(event.kind), label(event.kind)),
        blocks: event
            .blocks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Input => "INPUT",
        EventKind::Change => "CHANGE",
        EventKind::Echo => "ECHO",
        EventKind::Reset => "RESET",
        EventKind::Unchanged => "UNCHANGED",
        EventKind::Uncontrolled => "UNCONTROLLED",
        EventKind::TornDown => "TORN DOWN",
    }
}

fn indicator(kind: EventKind) -> String {
    match kind {
        EventKind::Input => "■".yellow().bold().to_string(),
        EventKind::Change => "■".green().bold().to_string(),
        EventKind::Echo => "■".bright_black().bold().to_string(),
        EventKind::Reset => "■".cyan().bold().to_string(),
        EventKind::Unchanged | EventKind::Uncontrolled => "■".bright_black().to_string(),
        EventKind::TornDown => "■".magenta().bold().to_string(),
    }
}
