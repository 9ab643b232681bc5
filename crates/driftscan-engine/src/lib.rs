//! The drift analysis engine: a staged concurrent pipeline that lists
//! desired and actual resources, matches them, compares matched pairs with
//! bounded parallelism and hands the aggregate to a reporter.

mod engine;
mod registry;

pub use engine::{Engine, KindRun, RunConfig};
pub use registry::ComponentRegistry;
