//! file: core/src/pipeline/mod.rs
//! description: orders optimization and lowering phases over one module.
//!
//! The sequence is fixed and lives in [`SCHEDULE`] as plain data: each entry
//! pairs a phase with the configuration condition under which it runs.
//! [`plan`] filters the schedule for a configuration and [`Pipeline::run`]
//! executes the result, stopping at the first failure.

pub mod collab;
pub mod config;
pub mod err;
pub mod report;

pub use collab::{Builtin, Collaborators, PhaseObserver};
pub use config::{PanicStrategy, PassConfig};
pub use err::{ConfigError, OptimizationError, VerifyStage};
pub use report::{PhaseRecord, PipelineReport};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::ir::{Attribute, Module};
use crate::opt::PassBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    TrapPanics,
    VerifyInput,
    FunctionPasses,
    ModuleBundle,
    OptimizeMaps,
    OptimizeStringToBytes,
    OptimizeAllocs,
    LowerInterfaces,
    LowerFuncValues,
    LowerNilChecks,
    LowerTasks,
    VerifyLowered,
    TagOptSize,
    FinalizeLinkage,
    ModulePasses,
    GcGlobalsBitmap,
    GcStackSlots,
    /// Runs only when one of the GC phases changed the module.
    VerifyGc,
}

impl Phase {
    /// Lowerings that run at every optimization level.
    pub fn is_mandatory_lowering(&self) -> bool {
        matches!(self, Phase::LowerInterfaces | Phase::LowerFuncValues | Phase::LowerTasks)
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, Phase::VerifyInput | Phase::VerifyLowered | Phase::VerifyGc)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::TrapPanics => "trap-panics",
            Phase::VerifyInput => "verify-input",
            Phase::FunctionPasses => "function-passes",
            Phase::ModuleBundle => "module-bundle",
            Phase::OptimizeMaps => "optimize-maps",
            Phase::OptimizeStringToBytes => "optimize-string-to-bytes",
            Phase::OptimizeAllocs => "optimize-allocs",
            Phase::LowerInterfaces => "lower-interfaces",
            Phase::LowerFuncValues => "lower-func-values",
            Phase::LowerNilChecks => "lower-nil-checks",
            Phase::LowerTasks => "lower-tasks",
            Phase::VerifyLowered => "verify-lowered",
            Phase::TagOptSize => "tag-optsize",
            Phase::FinalizeLinkage => "finalize-linkage",
            Phase::ModulePasses => "module-passes",
            Phase::GcGlobalsBitmap => "gc-globals-bitmap",
            Phase::GcStackSlots => "gc-stack-slots",
            Phase::VerifyGc => "verify-gc",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration condition attached to a scheduled phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Always,
    TrapStrategy,
    VerifyRequested,
    Optimizing,
    SizeLevel2,
}

impl Gate {
    pub fn admits(&self, config: &PassConfig) -> bool {
        match self {
            Gate::Always => true,
            Gate::TrapStrategy => config.panic_strategy == PanicStrategy::Trap,
            Gate::VerifyRequested => config.verify_ir,
            Gate::Optimizing => config.opt_level > 0,
            Gate::SizeLevel2 => config.size_level >= 2,
        }
    }
}

pub const SCHEDULE: &[(Phase, Gate)] = &[
    (Phase::TrapPanics, Gate::TrapStrategy),
    (Phase::VerifyInput, Gate::VerifyRequested),
    (Phase::FunctionPasses, Gate::Always),
    (Phase::ModuleBundle, Gate::Optimizing),
    (Phase::OptimizeMaps, Gate::Optimizing),
    (Phase::OptimizeStringToBytes, Gate::Optimizing),
    (Phase::OptimizeAllocs, Gate::Optimizing),
    (Phase::LowerInterfaces, Gate::Always),
    (Phase::LowerFuncValues, Gate::Always),
    (Phase::ModuleBundle, Gate::Optimizing),
    (Phase::OptimizeAllocs, Gate::Optimizing),
    (Phase::OptimizeStringToBytes, Gate::Optimizing),
    (Phase::LowerNilChecks, Gate::Optimizing),
    (Phase::LowerTasks, Gate::Always),
    (Phase::VerifyLowered, Gate::Always),
    (Phase::TagOptSize, Gate::SizeLevel2),
    (Phase::FinalizeLinkage, Gate::Always),
    // Second run: resolves the frame sizes task lowering left behind.
    (Phase::FunctionPasses, Gate::Always),
    (Phase::ModulePasses, Gate::Always),
    (Phase::GcGlobalsBitmap, Gate::Always),
    (Phase::GcStackSlots, Gate::Always),
    (Phase::VerifyGc, Gate::Always),
];

/// The ordered phases a run with `config` executes.
pub fn plan(config: &PassConfig) -> Vec<Phase> {
    SCHEDULE.iter().filter(|(_, gate)| gate.admits(config)).map(|(phase, _)| *phase).collect()
}

static BUILTIN: Builtin = Builtin;

pub struct Pipeline<'a> {
    config: PassConfig,
    collab: &'a dyn Collaborators,
    observer: Option<&'a mut dyn PhaseObserver>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: PassConfig) -> Self {
        Pipeline { config, collab: &BUILTIN, observer: None }
    }

    pub fn with_collaborators(mut self, collab: &'a dyn Collaborators) -> Self {
        self.collab = collab;
        self
    }

    pub fn with_observer(mut self, observer: &'a mut dyn PhaseObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    pub fn plan(&self) -> Vec<Phase> {
        plan(&self.config)
    }

    /// Run every planned phase over `module`. On failure the module must be
    /// discarded; nothing is rolled back.
    pub fn run(&mut self, module: &mut Module) -> Result<PipelineReport, OptimizationError> {
        let batch = PassBatch::configure(self.config.opt_level, self.config.size_level, self.config.inliner_threshold);
        let mut report = PipelineReport::new(&module.name, &self.config);
        report.functions_before = module.functions.len();
        report.instructions_before = module.count_insts(|_| true);
        info!(
            "optimizing module {} (O{}, size {}, inliner {})",
            module.name,
            self.config.opt_level,
            self.config.size_level,
            batch.inline_threshold().map_or("off".to_string(), |t| t.to_string())
        );

        let mut gc_changed = false;
        for phase in self.plan() {
            if phase == Phase::VerifyGc && !gc_changed {
                debug!("skipping {}: GC phases left the module unchanged", phase);
                report.record(phase, false, true, 0);
                continue;
            }
            if let Some(observer) = self.observer.as_mut() {
                observer.phase_started(phase);
            }
            let started = Instant::now();
            let changed = self.run_phase(phase, &batch, module)?;
            if matches!(phase, Phase::GcGlobalsBitmap | Phase::GcStackSlots) {
                gc_changed |= changed;
            }
            let micros = started.elapsed().as_micros() as u64;
            debug!("{} finished in {}us (changed: {})", phase, micros, changed);
            report.record(phase, changed, false, micros);
            if let Some(observer) = self.observer.as_mut() {
                observer.phase_finished(phase, changed);
            }
        }

        report.functions_after = module.functions.len();
        report.instructions_after = module.count_insts(|_| true);
        info!(
            "module {} optimized: {} -> {} instruction(s)",
            module.name, report.instructions_before, report.instructions_after
        );
        Ok(report)
    }

    fn run_phase(&self, phase: Phase, batch: &PassBatch, module: &mut Module) -> Result<bool, OptimizationError> {
        let c = self.collab;
        let changed = match phase {
            Phase::TrapPanics => c.replace_panics_with_trap(module).map_err(OptimizationError::Precondition)? > 0,
            Phase::VerifyInput => {
                self.gate(module, VerifyStage::Input)?;
                false
            }
            Phase::FunctionPasses => c.run_function_passes(batch, module),
            Phase::ModuleBundle => c.run_module_bundle(module),
            Phase::OptimizeMaps => c.optimize_maps(module) > 0,
            Phase::OptimizeStringToBytes => c.optimize_string_to_bytes(module) > 0,
            Phase::OptimizeAllocs => c.optimize_allocs(module) > 0,
            Phase::LowerInterfaces => c.lower_interfaces(module) > 0,
            Phase::LowerFuncValues => c.lower_func_values(module) > 0,
            Phase::LowerNilChecks => c.lower_nil_checks(module) > 0,
            Phase::LowerTasks => c.lower_tasks(module).map_err(OptimizationError::Lowering)? > 0,
            Phase::VerifyLowered => {
                self.gate(module, VerifyStage::Optimizations)?;
                false
            }
            Phase::TagOptSize => tag_optsize(module),
            Phase::FinalizeLinkage => c.finalize_linkage(module) > 0,
            Phase::ModulePasses => c.run_module_passes(batch, module),
            Phase::GcGlobalsBitmap => c.add_globals_bitmap(module),
            Phase::GcStackSlots => c.make_gc_stack_slots(module),
            Phase::VerifyGc => {
                self.gate(module, VerifyStage::Gc)?;
                false
            }
        };
        Ok(changed)
    }

    fn gate(&self, module: &Module, stage: VerifyStage) -> Result<(), OptimizationError> {
        self.collab.verify(module).map_err(|source| OptimizationError::Verification { stage, source })
    }
}

fn tag_optsize(module: &mut Module) -> bool {
    let mut changed = false;
    for func in module.functions.iter_mut() {
        changed |= func.attrs.insert(Attribute::OptSize);
    }
    changed
}

/// Run the full pipeline with the built-in passes.
pub fn optimize(module: &mut Module, config: &PassConfig) -> Result<PipelineReport, OptimizationError> {
    Pipeline::new(config.clone()).run(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unoptimized_plan_keeps_only_mandatory_work() {
        let plan = plan(&PassConfig::new());
        assert_eq!(
            plan,
            vec![
                Phase::FunctionPasses,
                Phase::LowerInterfaces,
                Phase::LowerFuncValues,
                Phase::LowerTasks,
                Phase::VerifyLowered,
                Phase::FinalizeLinkage,
                Phase::FunctionPasses,
                Phase::ModulePasses,
                Phase::GcGlobalsBitmap,
                Phase::GcStackSlots,
                Phase::VerifyGc,
            ]
        );
    }

    #[test]
    fn optional_phases_follow_the_configuration() {
        let config = PassConfig::new()
            .with_opt_level(1)
            .with_size_level(2)
            .with_panic_strategy(PanicStrategy::Trap)
            .with_verify_ir(true);
        let plan = plan(&config);
        assert_eq!(&plan[..3], &[Phase::TrapPanics, Phase::VerifyInput, Phase::FunctionPasses]);
        assert_eq!(plan.iter().filter(|p| **p == Phase::ModuleBundle).count(), 2);
        let nil = plan.iter().position(|p| *p == Phase::LowerNilChecks).unwrap();
        let tasks = plan.iter().position(|p| *p == Phase::LowerTasks).unwrap();
        assert_eq!(tasks, nil + 1);
        assert!(plan.contains(&Phase::TagOptSize));
        assert_eq!(plan.iter().filter(|p| p.is_mandatory_lowering()).count(), 3);
    }
}
