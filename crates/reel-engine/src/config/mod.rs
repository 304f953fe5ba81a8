pub mod loader;
pub mod schema;
pub mod targets;

pub use loader::{ConfigError, ConfigLoader};
pub use schema::{
    BudgetKey, FocusPoint, InteractionConfig, MonitorConfig, OnTimeout, PhaseBudget,
    PhasePolicies, Timeouts, WorkflowConfig,
};
pub use targets::TargetTables;
