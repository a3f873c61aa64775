pub mod config;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;

pub use config::{AppConfig, EngineConfig, NodeConfig};
pub use detection::{DetectorFactory, DetectorWorker, TesseractOsd, WorkerLog, WorkerOptions};
pub use error::{DetectError, NodeError};
pub use models::{
    BatchItem, BinaryAttachments, BinaryContent, BinaryData, DetectionResult, OutputRecord,
    PairedItem,
};
pub use pipeline::{BinaryProperty, FailureMode, OrientationPipeline, PipelineContext};
