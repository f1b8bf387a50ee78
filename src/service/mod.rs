pub mod classifier;
pub mod column_mapper;
pub mod decision;
pub mod diff_engine;
pub mod executor;
pub mod grouper;
pub mod matching;
pub mod merge;
pub mod normalizer;
pub mod pipeline;

pub use classifier::{ColumnClassifier, HttpClassifier};
pub use executor::{BatchExecutor, BatchRequest, BatchSpec};
pub use merge::MergeService;
pub use pipeline::{ImportPipeline, ImportPreview};
