use async_trait::async_trait;
use image::{ImageBuffer, Rgb};
use imgorient::{
    BatchItem, BinaryData, DetectError, DetectionResult, DetectorFactory, DetectorWorker,
    WorkerLog, WorkerOptions,
};
use serde_json::{Value, json};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Encodes a 10x10 white PNG.
pub fn png_bytes() -> Vec<u8> {
    let img = ImageBuffer::from_fn(10, 10, |_, _| Rgb([255u8, 255u8, 255u8]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("Failed to encode test image");
    bytes
}

/// An item carrying `bytes` under the `data` binary property
pub fn image_item(bytes: &[u8]) -> BatchItem {
    BatchItem::new().with_binary("data", BinaryData::inline(bytes.to_vec(), "image/png"))
}

/// Builds a detection result from a JSON object literal
pub fn detection(value: Value) -> DetectionResult {
    match value {
        Value::Object(fields) => DetectionResult::new(fields),
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Result of a page rotated by 90 degrees, Latin script
pub fn upright() -> DetectionResult {
    detection(json!({
        "orientation_degrees": 90,
        "orientation_confidence": 7.5,
        "script": "Latin",
        "script_confidence": 2.1,
    }))
}

/// Observable lifecycle counters of the fake detector
#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub detected: AtomicUsize,
    pub terminated: AtomicUsize,
    pub aborted: AtomicUsize,
    /// Detect calls currently running
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn detected(&self) -> usize {
        self.detected.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub type Responder = Arc<dyn Fn(&[u8]) -> Result<DetectionResult, DetectError> + Send + Sync>;

/// Scripted detector: answers each image through `responder`
pub struct FakeFactory {
    pub counters: Arc<Counters>,
    responder: Responder,
    fail_init: bool,
    fail_terminate: bool,
    delay: Option<Duration>,
    options_seen: Mutex<Option<WorkerOptions>>,
}

impl FakeFactory {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Result<DetectionResult, DetectError> + Send + Sync + 'static,
    {
        Self {
            counters: Arc::new(Counters::default()),
            responder: Arc::new(responder),
            fail_init: false,
            fail_terminate: false,
            delay: None,
            options_seen: Mutex::new(None),
        }
    }

    /// Reports [`upright`] for every image, except images whose bytes are
    /// `b"fail"`, which the engine rejects
    pub fn upright() -> Self {
        Self::new(|image| {
            if image == b"fail" {
                Err(DetectError::Engine("engine rejected image".to_string()))
            } else {
                Ok(upright())
            }
        })
    }

    /// Detector whose worker never starts
    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::upright()
        }
    }

    /// Worker whose `terminate` reports an error after being counted
    pub fn with_failing_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    /// Every detect call sleeps for `delay` first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Options passed to the most recent `create`
    pub fn options_seen(&self) -> Option<WorkerOptions> {
        self.options_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DetectorFactory for FakeFactory {
    async fn create(&self, options: WorkerOptions) -> Result<Box<dyn DetectorWorker>, DetectError> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        *self.options_seen.lock().unwrap() = Some(options.clone());

        if self.fail_init {
            return Err(DetectError::WorkerInit("engine unavailable".to_string()));
        }
        options.log(WorkerLog::status("initialized fake engine").with_progress(1.0));

        Ok(Box::new(FakeWorker {
            counters: self.counters.clone(),
            responder: self.responder.clone(),
            fail_terminate: self.fail_terminate,
            delay: self.delay,
        }))
    }
}

struct FakeWorker {
    counters: Arc<Counters>,
    responder: Responder,
    fail_terminate: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl DetectorWorker for FakeWorker {
    async fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectError> {
        let running = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.counters.detected.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.responder)(image);

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn terminate(self: Box<Self>) -> Result<(), DetectError> {
        self.counters.terminated.fetch_add(1, Ordering::SeqCst);
        if self.fail_terminate {
            return Err(DetectError::Engine("engine did not shut down".to_string()));
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.counters.aborted.fetch_add(1, Ordering::SeqCst);
    }
}
