pub mod mutator;
pub mod prober;

pub use mutator::RuleMutator;
pub use prober::RuleProber;
