//! Target resolution: ordered identification strategies evaluated against
//! the live UI tree.

pub mod resolver;
pub mod strategy;

pub use resolver::{Candidate, SkippedStrategies, TargetResolver, TargetSpec};
pub use strategy::{IdentificationStrategy, StrategyError, TextMatcher};
