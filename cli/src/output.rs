//! cli/src/output.rs
//! Output utilities for the CLI: phase progress, report tables and styled
//! status lines.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::pipeline::{Gate, Phase, PhaseObserver, PipelineReport, SCHEDULE};
use kiln_core::PassConfig;

/// ====================================================================
/// Progress

/// Drives a progress bar from pipeline phase notifications.
/// Draws nothing when stderr is not a terminal.
pub struct PhaseProgress {
    bar: ProgressBar,
}

impl PhaseProgress {
    pub fn new(total: usize, module: &str) -> Self {
        let bar = ProgressBar::new(total as u64);
        let template = ProgressStyle::with_template("{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(template);
        bar.set_prefix(module.to_string());
        PhaseProgress { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PhaseObserver for PhaseProgress {
    fn phase_started(&mut self, phase: Phase) {
        self.bar.set_message(phase.name());
    }

    fn phase_finished(&mut self, _phase: Phase, _changed: bool) {
        self.bar.inc(1);
    }
}

/// ====================================================================
/// Tables

pub fn report_table(report: &PipelineReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Phase", "Changed", "Time (us)"]);
    for (i, record) in report.phases.iter().enumerate() {
        let changed = if record.skipped {
            Cell::new("skipped").fg(Color::DarkGrey)
        } else if record.changed {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no")
        };
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(record.phase.name()),
            changed,
            Cell::new(record.micros),
        ]);
    }
    table
}

pub fn plan_table(config: &PassConfig) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Phase", "Group"]);
    let mut index = 0;
    for (phase, gate) in SCHEDULE.iter().filter(|(_, gate)| gate.admits(config)) {
        index += 1;
        let group = if phase.is_mandatory_lowering() {
            "mandatory lowering"
        } else if phase.is_verification() {
            "verification"
        } else if *gate == Gate::Optimizing {
            "optimization"
        } else {
            "always"
        };
        table.add_row(vec![Cell::new(index), Cell::new(phase.name()), Cell::new(group)]);
    }
    table
}

/// ====================================================================
/// Status lines

pub fn summary_line(report: &PipelineReport) -> String {
    format!(
        "{} {}: {} -> {} instruction(s), {} function(s), {} phase(s) changed the module",
        style("optimized").green().bold(),
        report.module,
        report.instructions_before,
        report.instructions_after,
        report.functions_after,
        report.changed_phases()
    )
}

pub fn error_line(report: &str) -> String {
    format!("{} {}", style("error:").red().bold(), report)
}

pub fn ok_line(what: &str) -> String {
    format!("{} {}", style("ok").green().bold(), what)
}
