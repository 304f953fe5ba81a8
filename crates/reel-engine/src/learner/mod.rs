pub mod hints;
pub mod storage;

pub use hints::LearningHints;
pub use storage::{FileLearningStore, LearningStore, MemoryLearningStore, StoreError};
