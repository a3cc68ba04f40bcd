pub mod category;
pub mod command;
pub mod model;

// Re-export main types for convenience
pub use category::RestrictionCategory;
pub use command::{CommandTable, ProbeMatcher, ProbeTemplate, ToolPaths};
pub use model::{AggregateStatus, ApplicationIdentity, PolicyState};
