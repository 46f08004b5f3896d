//! Generic, target-independent optimization passes.
//!
//! `PassBatch` holds the configuration shared by the function batch and the
//! module batch. The module bundle (global optimization, constant
//! propagation, aggressive DCE, attribute inference) takes no configuration.

pub mod const_fold;
pub mod constprop;
pub mod dce;
pub mod func_attrs;
pub mod globalopt;
pub mod inline;
pub mod intrinsics;
pub mod simplify_cfg;

use log::debug;

use crate::ir::{FuncId, Module};

/// Largest inlining threshold used when optimizing aggressively for size.
pub const SIZE_LEVEL_2_INLINE_CAP: u32 = 25;
/// Largest inlining threshold used when optimizing for size.
pub const SIZE_LEVEL_1_INLINE_CAP: u32 = 75;

/// Passes registered with the batch independently of the opt level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// Resolves the task frame-size intrinsic once tasks have been lowered.
    TaskIntrinsics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassBatch {
    pub opt_level: u8,
    pub size_level: u8,
    /// Inlining threshold; `None` means the inliner is not registered.
    pub inliner: Option<u32>,
    pub extensions: Vec<Extension>,
}

impl PassBatch {
    /// Build the batch. A zero threshold leaves the inliner unregistered.
    pub fn configure(opt_level: u8, size_level: u8, inliner_threshold: u32) -> Self {
        PassBatch {
            opt_level,
            size_level,
            inliner: if inliner_threshold != 0 { Some(inliner_threshold) } else { None },
            extensions: vec![Extension::TaskIntrinsics],
        }
    }

    /// Threshold the inliner actually runs with, if it runs at all.
    pub fn inline_threshold(&self) -> Option<u32> {
        if self.opt_level == 0 {
            return None;
        }
        let threshold = self.inliner?;
        Some(match self.size_level {
            0 => threshold,
            1 => threshold.min(SIZE_LEVEL_1_INLINE_CAP),
            _ => threshold.min(SIZE_LEVEL_2_INLINE_CAP),
        })
    }

    pub fn inlining_enabled(&self) -> bool {
        self.inline_threshold().is_some()
    }

    /// Run the per-function batch over every defined function.
    pub fn run_function_passes(&self, module: &mut Module) -> bool {
        let mut changed = false;
        if self.extensions.contains(&Extension::TaskIntrinsics) {
            changed |= intrinsics::lower_frame_size(module);
        }
        if self.opt_level == 0 {
            return changed;
        }
        let ids: Vec<FuncId> = module.func_ids().collect();
        for id in ids {
            if module.function(id).is_declaration() {
                continue;
            }
            // Iterate to a local fixpoint; each pass only shrinks the body.
            loop {
                let mut round = false;
                round |= const_fold::run(module, id);
                round |= simplify_cfg::run(module, id);
                round |= dce::run(module, id);
                if !round {
                    break;
                }
                changed = true;
            }
        }
        debug!("function passes (O{}) changed module: {}", self.opt_level, changed);
        changed
    }

    /// Run the module-level batch: inliner, function batch, dead function removal.
    pub fn run_module_passes(&self, module: &mut Module) -> bool {
        let mut changed = false;
        if let Some(threshold) = self.inline_threshold() {
            changed |= inline::run(module, threshold);
        }
        changed |= self.run_function_passes(module);
        if self.opt_level > 0 {
            changed |= globalopt::remove_dead_functions(module);
        }
        changed
    }
}

/// Global optimization, constant propagation, aggressive DCE and
/// function-attribute inference, in that order.
pub fn run_module_bundle(module: &mut Module) -> bool {
    let mut changed = false;
    changed |= globalopt::run(module);
    changed |= constprop::run(module);
    changed |= dce::run_aggressive(module);
    changed |= func_attrs::run(module);
    debug!("module bundle changed module: {}", changed);
    changed
}
