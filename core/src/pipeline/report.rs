use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Phase;
use super::config::PassConfig;

/// Outcome of one executed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub changed: bool,
    /// Conditional phases whose condition did not hold at run time.
    pub skipped: bool,
    pub micros: u64,
}

/// Summary of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub module: String,
    pub config: PassConfig,
    pub phases: Vec<PhaseRecord>,
    pub functions_before: usize,
    pub functions_after: usize,
    pub instructions_before: usize,
    pub instructions_after: usize,
}

impl PipelineReport {
    pub fn new(module: &str, config: &PassConfig) -> Self {
        PipelineReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            module: module.to_string(),
            config: config.clone(),
            phases: Vec::new(),
            functions_before: 0,
            functions_after: 0,
            instructions_before: 0,
            instructions_after: 0,
        }
    }

    pub fn record(&mut self, phase: Phase, changed: bool, skipped: bool, micros: u64) {
        self.phases.push(PhaseRecord { phase, changed, skipped, micros });
    }

    /// Phases that ran, in order.
    pub fn executed(&self) -> impl Iterator<Item = Phase> + '_ {
        self.phases.iter().filter(|p| !p.skipped).map(|p| p.phase)
    }

    pub fn changed_phases(&self) -> usize {
        self.phases.iter().filter(|p| p.changed).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
