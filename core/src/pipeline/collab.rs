//! The passes the orchestrator delegates to.
//!
//! Every method defaults to the implementation shipped with this crate.
//! Override a method to substitute a different pass or to observe calls.

use crate::ir::{Module, VerificationError, verify_module};
use crate::opt::{self, PassBatch};
use crate::transform::{self, LoweringError, PreconditionViolation};

use super::Phase;

pub trait Collaborators {
    fn verify(&self, module: &Module) -> Result<(), VerificationError> {
        verify_module(module)
    }

    fn replace_panics_with_trap(&self, module: &mut Module) -> Result<usize, PreconditionViolation> {
        transform::replace_panics_with_trap(module)
    }

    fn run_function_passes(&self, batch: &PassBatch, module: &mut Module) -> bool {
        batch.run_function_passes(module)
    }

    fn run_module_passes(&self, batch: &PassBatch, module: &mut Module) -> bool {
        batch.run_module_passes(module)
    }

    fn run_module_bundle(&self, module: &mut Module) -> bool {
        opt::run_module_bundle(module)
    }

    fn optimize_maps(&self, module: &mut Module) -> usize {
        transform::optimize_maps(module)
    }

    fn optimize_string_to_bytes(&self, module: &mut Module) -> usize {
        transform::optimize_string_to_bytes(module)
    }

    fn optimize_allocs(&self, module: &mut Module) -> usize {
        transform::optimize_allocs(module)
    }

    fn lower_interfaces(&self, module: &mut Module) -> usize {
        transform::lower_interfaces(module)
    }

    fn lower_func_values(&self, module: &mut Module) -> usize {
        transform::lower_func_values(module)
    }

    fn lower_nil_checks(&self, module: &mut Module) -> usize {
        transform::lower_nil_checks(module)
    }

    fn lower_tasks(&self, module: &mut Module) -> Result<usize, LoweringError> {
        transform::lower_tasks(module)
    }

    fn finalize_linkage(&self, module: &mut Module) -> usize {
        transform::finalize_linkage(module)
    }

    fn add_globals_bitmap(&self, module: &mut Module) -> bool {
        transform::add_globals_bitmap(module)
    }

    fn make_gc_stack_slots(&self, module: &mut Module) -> bool {
        transform::make_gc_stack_slots(module)
    }
}

/// The passes of this crate, unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtin;

impl Collaborators for Builtin {}

/// Receives progress notifications while the pipeline runs.
pub trait PhaseObserver {
    fn phase_started(&mut self, phase: Phase);
    fn phase_finished(&mut self, phase: Phase, changed: bool);
}
