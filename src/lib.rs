pub mod cli;
pub mod directory;
pub mod error;
pub mod exec;
pub mod policy;
pub mod presentation;
pub mod reconciler;
pub mod rules;
pub mod session;
