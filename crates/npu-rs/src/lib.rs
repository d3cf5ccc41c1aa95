pub mod capabilities;
pub mod command_stream;
mod env;
pub mod error;
pub mod graph;
pub mod pass;
pub mod profiling;
pub mod sram;
pub mod utils;
pub mod weights;

pub use capabilities::HardwareCapabilities;
pub use error::CompileError;
pub use graph::{Graph, NodeId};
pub use pass::{CompileOptions, McePlePass, PassPlanner, PlanOutcome};
pub use sram::SramAllocator;
