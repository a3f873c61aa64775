mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from imgorient for tests
pub use imgorient::{
    BatchItem, BinaryData, BinaryProperty, DetectError, DetectionResult, FailureMode, NodeError,
    OrientationPipeline, OutputRecord, WorkerLog, WorkerOptions,
};
