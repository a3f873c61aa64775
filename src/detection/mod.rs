//! Orientation and script detection (OSD) engines.
//!
//! The pipeline only talks to the engine through [`DetectorFactory`] and
//! [`DetectorWorker`]; [`tesseract::TesseractOsd`] is the stock backend.

pub mod osd;
pub mod tesseract;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::DetectError;
use crate::models::DetectionResult;

pub use tesseract::TesseractOsd;

/// Engine mode selecting the legacy (OSD-capable) Tesseract engine
pub const OEM_TESSERACT_ONLY: u8 = 0;

/// Language pack that carries the orientation/script model
pub const OSD_LANGUAGE: &str = "osd";

/// A progress or status record emitted by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerLog {
    pub status: String,
    pub progress: Option<f32>,
}

impl WorkerLog {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Callback receiving engine log records
pub type WorkerLogger = Arc<dyn Fn(&WorkerLog) + Send + Sync>;

/// Creation-time options for a detector worker
#[derive(Clone)]
pub struct WorkerOptions {
    /// Language pack to load; OSD requires [`OSD_LANGUAGE`]
    pub language: String,
    /// OCR engine mode; OSD requires [`OEM_TESSERACT_ONLY`]
    pub engine_mode: u8,
    /// Use the legacy engine core
    pub legacy_core: bool,
    /// Use language data that includes the legacy models
    pub legacy_lang: bool,
    pub logger: Option<WorkerLogger>,
}

impl WorkerOptions {
    /// Options for an orientation/script detection worker
    pub fn osd() -> Self {
        Self {
            language: OSD_LANGUAGE.to_string(),
            engine_mode: OEM_TESSERACT_ONLY,
            legacy_core: true,
            legacy_lang: true,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: WorkerLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Forward a record to the logger, if one is installed
    pub fn log(&self, record: WorkerLog) {
        if let Some(logger) = &self.logger {
            logger(&record);
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::osd()
    }
}

impl fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("language", &self.language)
            .field("engine_mode", &self.engine_mode)
            .field("legacy_core", &self.legacy_core)
            .field("legacy_lang", &self.legacy_lang)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Builds detector workers, one per batch
#[async_trait]
pub trait DetectorFactory: Send + Sync {
    /// Start a worker; failure here aborts the whole batch
    async fn create(&self, options: WorkerOptions) -> Result<Box<dyn DetectorWorker>, DetectError>;
}

#[async_trait]
impl<T: DetectorFactory + ?Sized> DetectorFactory for Arc<T> {
    async fn create(&self, options: WorkerOptions) -> Result<Box<dyn DetectorWorker>, DetectError> {
        (**self).create(options).await
    }
}

/// A stateful handle to an OSD engine.
///
/// Not safe for concurrent use: `detect` takes `&mut self`, so calls against
/// one worker never overlap.
#[async_trait]
pub trait DetectorWorker: Send {
    /// Detect orientation and script of one encoded image
    async fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectError>;

    /// Shut the worker down and free its resources
    async fn terminate(self: Box<Self>) -> Result<(), DetectError>;

    /// Best-effort synchronous cleanup, used when `terminate` can no longer be awaited
    fn abort(&mut self) {}
}
