pub mod error;
pub mod ir;
pub mod location;
pub mod opt;
pub mod pipeline;
pub mod source;
pub mod transform;

pub use error::{KilnErrorExt, Level};
pub use ir::{Module, parse_module, verify_module};
pub use location::{IrLocation, Location};
pub use pipeline::{OptimizationError, PassConfig, Pipeline, PipelineReport, optimize, plan};
pub use source::Source;

pub fn generate_error_report<E: KilnErrorExt + ?Sized>(error: &E) -> String {
    let level = error.level();
    let location = match (error.location(), error.ir_location()) {
        (Some(loc), _) => loc.to_string(),
        (None, Some(ir)) => ir.to_string(),
        (None, None) => "unknown location".to_string(),
    };
    let message = error.message();

    format!("KILN | {} | {} | {}", level, location, message)
}
