use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::detection::{DetectorFactory, DetectorWorker, WorkerLog, WorkerOptions};
use crate::error::{DetectError, NodeError};
use crate::models::{BatchItem, DetectionResult, OutputRecord};

/// Binary property read when none is configured
pub const DEFAULT_BINARY_PROPERTY: &str = "data";

/// What to do when a single item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Stop at the first failing item and propagate its error
    #[default]
    Halt,
    /// Record the failure on that item's output and keep going
    ContinuePerItem,
}

impl FailureMode {
    pub fn from_continue_on_fail(continue_on_fail: bool) -> Self {
        if continue_on_fail {
            FailureMode::ContinuePerItem
        } else {
            FailureMode::Halt
        }
    }
}

/// Per-item resolver for the binary property name
pub type PropertyResolver =
    Arc<dyn Fn(usize, &BatchItem) -> Result<String, NodeError> + Send + Sync>;

/// Name of the binary property holding each item's image
#[derive(Clone)]
pub enum BinaryProperty {
    /// Same name for every item
    Fixed(String),
    /// Name computed separately for each item
    PerItem(PropertyResolver),
}

impl BinaryProperty {
    pub fn per_item<F>(resolver: F) -> Self
    where
        F: Fn(usize, &BatchItem) -> Result<String, NodeError> + Send + Sync + 'static,
    {
        BinaryProperty::PerItem(Arc::new(resolver))
    }

    /// Resolve the name for one item; an empty name falls back to the default
    pub fn resolve(&self, item_index: usize, item: &BatchItem) -> Result<String, NodeError> {
        let name = match self {
            BinaryProperty::Fixed(name) => name.clone(),
            BinaryProperty::PerItem(resolver) => resolver(item_index, item)?,
        };
        if name.trim().is_empty() {
            Ok(DEFAULT_BINARY_PROPERTY.to_string())
        } else {
            Ok(name)
        }
    }
}

impl Default for BinaryProperty {
    fn default() -> Self {
        BinaryProperty::Fixed(DEFAULT_BINARY_PROPERTY.to_string())
    }
}

impl fmt::Debug for BinaryProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryProperty::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            BinaryProperty::PerItem(_) => f.write_str("PerItem(..)"),
        }
    }
}

/// Settings shared by every item of a run
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub binary_property: BinaryProperty,
    pub failure_mode: FailureMode,
    /// Upper bound on a single `detect` call
    pub detect_timeout: Option<Duration>,
    pub worker_options: WorkerOptions,
}

/// Batch orientation detection over one detector worker.
///
/// Items are processed strictly in order against a single worker, which is
/// created lazily and released exactly once on every exit path.
pub struct OrientationPipeline<F> {
    factory: F,
    context: PipelineContext,
}

impl<F: DetectorFactory> OrientationPipeline<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            context: PipelineContext::default(),
        }
    }

    pub fn with_binary_property(mut self, name: impl Into<String>) -> Self {
        self.context.binary_property = BinaryProperty::Fixed(name.into());
        self
    }

    pub fn with_binary_property_resolver(mut self, property: BinaryProperty) -> Self {
        self.context.binary_property = property;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.context.failure_mode = mode;
        self
    }

    pub fn with_detect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.context.detect_timeout = timeout;
        self
    }

    /// Base options for the worker.
    ///
    /// Engine records always go to `tracing`; a logger set here also receives them.
    pub fn with_worker_options(mut self, options: WorkerOptions) -> Self {
        self.context.worker_options = options;
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Run detection over a batch.
    ///
    /// Returns one record per item in tolerant mode. In halt mode the first
    /// failing item's error is returned, annotated with its index, and the
    /// records gathered so far are dropped.
    pub async fn run(&self, items: &[BatchItem]) -> Result<Vec<OutputRecord>, NodeError> {
        if items.is_empty() {
            debug!("Empty batch, skipping detector start-up");
            return Ok(Vec::new());
        }

        let mut options = self.context.worker_options.clone();
        let caller_logger = options.logger.take();
        options = options.with_logger(Arc::new(move |record: &WorkerLog| {
            log_engine_record(record);
            if let Some(logger) = &caller_logger {
                logger(record);
            }
        }));
        let worker = self.factory.create(options).await?;
        let mut guard = WorkerGuard::new(worker);
        debug!("Detector worker started for {} items", items.len());

        let outcome = self.process_items(items, &mut guard).await;
        let released = guard.release().await;

        match (outcome, released) {
            (Ok(records), Ok(())) => {
                let failed = records.iter().filter(|r| r.error().is_some()).count();
                info!(
                    "Orientation detection finished: {} items, {} failed",
                    records.len(),
                    failed
                );
                Ok(records)
            }
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), released) => {
                if let Err(release_err) = released {
                    warn!("Failed to release detector worker: {}", release_err);
                }
                Err(err)
            }
        }
    }

    async fn process_items(
        &self,
        items: &[BatchItem],
        guard: &mut WorkerGuard,
    ) -> Result<Vec<OutputRecord>, NodeError> {
        let mut records = Vec::with_capacity(items.len());

        for (item_index, item) in items.iter().enumerate() {
            match self.process_item(item_index, item, guard).await {
                Ok(record) => records.push(record),
                Err(err)
                    if self.context.failure_mode == FailureMode::ContinuePerItem
                        && is_recoverable(&err) =>
                {
                    warn!(item_index, "Item failed, continuing: {}", err);
                    records.push(OutputRecord::failure(
                        item_index,
                        err.to_string(),
                        item.binary.clone(),
                    ));
                }
                Err(err) => return Err(err.at_item(item_index)),
            }
        }

        Ok(records)
    }

    async fn process_item(
        &self,
        item_index: usize,
        item: &BatchItem,
        guard: &mut WorkerGuard,
    ) -> Result<OutputRecord, NodeError> {
        let property = self.context.binary_property.resolve(item_index, item)?;
        let binary = item
            .binary(&property)
            .ok_or_else(|| DetectError::MissingAttachment {
                property: property.clone(),
            })?;
        let buffer = binary.buffer().await.map_err(DetectError::from)?;

        let result = self.detect(guard, &buffer).await?;
        result.validate()?;

        debug!(
            item_index,
            property = %property,
            text_detected = result.text_detected(),
            "Detected orientation"
        );
        Ok(OutputRecord::success(item_index, result, item.binary.clone()))
    }

    async fn detect(
        &self,
        guard: &mut WorkerGuard,
        image: &[u8],
    ) -> Result<DetectionResult, DetectError> {
        match self.context.detect_timeout {
            Some(limit) => tokio::time::timeout(limit, guard.detect(image))
                .await
                .map_err(|_| DetectError::Engine(format!("detection timed out after {limit:?}")))?,
            None => guard.detect(image).await,
        }
    }
}

fn is_recoverable(err: &NodeError) -> bool {
    err.detect_error().is_none_or(DetectError::is_recoverable)
}

fn log_engine_record(record: &WorkerLog) {
    debug!(
        target: "imgorient::engine",
        status = %record.status,
        progress = ?record.progress,
        "Tesseract OSD"
    );
}

/// Owns the detector worker for one run.
///
/// `release` terminates it; if the guard is dropped first (panic or a
/// cancelled run) the worker is aborted instead.
struct WorkerGuard {
    worker: Option<Box<dyn DetectorWorker>>,
}

impl WorkerGuard {
    fn new(worker: Box<dyn DetectorWorker>) -> Self {
        Self {
            worker: Some(worker),
        }
    }

    async fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectError> {
        match self.worker.as_mut() {
            Some(worker) => worker.detect(image).await,
            None => Err(DetectError::Engine(
                "detector worker already released".to_string(),
            )),
        }
    }

    async fn release(mut self) -> Result<(), DetectError> {
        match self.worker.take() {
            Some(worker) => worker.terminate().await,
            None => Ok(()),
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            warn!("Detector worker dropped without release, aborting");
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mode_from_flag() {
        assert_eq!(FailureMode::from_continue_on_fail(true), FailureMode::ContinuePerItem);
        assert_eq!(FailureMode::from_continue_on_fail(false), FailureMode::Halt);
        assert_eq!(FailureMode::default(), FailureMode::Halt);
    }

    #[test]
    fn test_binary_property_resolution() {
        let item = BatchItem::new().with_json("field", "scan");

        let fixed = BinaryProperty::Fixed("image".to_string());
        assert_eq!(fixed.resolve(0, &item).unwrap(), "image");

        let blank = BinaryProperty::Fixed("  ".to_string());
        assert_eq!(blank.resolve(0, &item).unwrap(), "data");

        let per_item = BinaryProperty::per_item(|index, item| {
            let base = item.json.get("field").and_then(|v| v.as_str()).unwrap_or("data");
            Ok(format!("{base}{index}"))
        });
        assert_eq!(per_item.resolve(2, &item).unwrap(), "scan2");
    }

    #[test]
    fn test_resolver_error_is_propagated() {
        let failing =
            BinaryProperty::per_item(|_, _| Err(anyhow::anyhow!("bad expression").into()));
        let err = failing.resolve(0, &BatchItem::new()).unwrap_err();
        assert_eq!(err.to_string(), "bad expression");
    }
}
