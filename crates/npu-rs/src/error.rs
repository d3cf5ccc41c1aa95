//! Errors surfaced at the emission boundary.
//!
//! Planning failure is not an error (the planner reports it through
//! [`PlanOutcome::NoPass`]); these variants cover graph states a correctly
//! configured driver should never present.
//!
//! [`PlanOutcome::NoPass`]: crate::pass::PlanOutcome::NoPass

use thiserror::Error;

use crate::graph::NodeId;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("pass {0} does not contain the nodes it was committed with")]
    MalformedPass(usize),
    #[error("pass {0} has no committed output location")]
    MissingOutputLocation(usize),
    #[error("pass input must live in DRAM or SRAM before emission")]
    UnplacedInput,
    #[error("node {0:?} has no DRAM buffer registered")]
    MissingBufferId(NodeId),
    #[error("upscale factor {0} is not supported by the upsample unit")]
    UnsupportedUpscaleFactor(u32),
}
