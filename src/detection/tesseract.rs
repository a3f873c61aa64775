use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempdir::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

use super::osd::{is_too_few_characters, parse_report};
use super::{DetectorFactory, DetectorWorker, OEM_TESSERACT_ONLY, WorkerLog, WorkerOptions};
use crate::config::EngineConfig;
use crate::error::DetectError;
use crate::models::DetectionResult;

/// Page segmentation mode that runs orientation and script detection only
const PSM_OSD_ONLY: &str = "0";

/// Detector factory backed by the `tesseract` command-line engine
#[derive(Debug, Clone)]
pub struct TesseractOsd {
    binary: PathBuf,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractOsd {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            tessdata_dir: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            tessdata_dir: config.tessdata_dir.clone(),
        }
    }

    pub fn with_tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata_dir = Some(dir.into());
        self
    }

    /// Run `<binary> --version` and return the first banner line
    async fn engine_version(&self) -> Result<String, DetectError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DetectError::WorkerInit(format!("could not run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(DetectError::WorkerInit(format!(
                "{} --version exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // Older releases print the banner on stderr
        let banner = [&output.stdout, &output.stderr]
            .into_iter()
            .map(|stream| String::from_utf8_lossy(stream).into_owned())
            .find_map(|text| text.lines().next().map(|line| line.trim().to_string()))
            .unwrap_or_default();
        Ok(banner)
    }

    fn check_language_data(&self, options: &WorkerOptions) -> Result<(), DetectError> {
        let Some(dir) = &self.tessdata_dir else {
            return Ok(());
        };
        let traineddata = dir.join(format!("{}.traineddata", options.language));
        if options.legacy_lang && !traineddata.is_file() {
            return Err(DetectError::WorkerInit(format!(
                "language data {} not found",
                traineddata.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DetectorFactory for TesseractOsd {
    async fn create(&self, options: WorkerOptions) -> Result<Box<dyn DetectorWorker>, DetectError> {
        if !options.legacy_core {
            return Err(DetectError::WorkerInit(
                "orientation detection requires the legacy engine core".to_string(),
            ));
        }

        if options.engine_mode != OEM_TESSERACT_ONLY {
            warn!(
                "Engine mode {} cannot run OSD, using the legacy engine (--oem {})",
                options.engine_mode, OEM_TESSERACT_ONLY
            );
        }

        options.log(WorkerLog::status("initializing tesseract").with_progress(0.0));
        let banner = self.engine_version().await?;
        options.log(WorkerLog::status(format!("loaded {banner}")));

        self.check_language_data(&options)?;

        let scratch = TempDir::new("imgorient")
            .map_err(|e| DetectError::WorkerInit(format!("could not create scratch dir: {e}")))?;
        debug!("Tesseract OSD scratch directory: {}", scratch.path().display());

        options.log(WorkerLog::status("initialized tesseract").with_progress(1.0));

        Ok(Box::new(TesseractWorker {
            binary: self.binary.clone(),
            tessdata_dir: self.tessdata_dir.clone(),
            options,
            scratch: Some(scratch),
            next_image: 0,
        }))
    }
}

/// One OSD worker: an engine configuration plus a private scratch directory
pub struct TesseractWorker {
    binary: PathBuf,
    tessdata_dir: Option<PathBuf>,
    options: WorkerOptions,
    scratch: Option<TempDir>,
    next_image: u64,
}

impl TesseractWorker {
    /// OSD only exists in the legacy engine, so the legacy core pins `--oem 0`
    fn engine_mode(&self) -> u8 {
        if self.options.legacy_core {
            OEM_TESSERACT_ONLY
        } else {
            self.options.engine_mode
        }
    }

    fn command(&self, image_path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.options.language)
            .arg("--oem")
            .arg(self.engine_mode().to_string())
            .arg("--psm")
            .arg(PSM_OSD_ONLY);
        if let Some(dir) = &self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    fn interpret(&self, output: &Output) -> Result<DetectionResult, DetectError> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            self.options.log(WorkerLog::status(line.trim()));
        }

        if !output.status.success() {
            if is_too_few_characters(&stderr) {
                return Ok(DetectionResult::undetected());
            }
            return Err(DetectError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        match parse_report(&stdout) {
            Ok(result) => Ok(result),
            Err(_) if is_too_few_characters(&stderr) => Ok(DetectionResult::undetected()),
            Err(err) => parse_report(&stderr).map_err(|_| err),
        }
    }
}

#[async_trait]
impl DetectorWorker for TesseractWorker {
    async fn detect(&mut self, image: &[u8]) -> Result<DetectionResult, DetectError> {
        let scratch = self
            .scratch
            .as_ref()
            .ok_or_else(|| DetectError::Engine("worker has been terminated".to_string()))?;

        let image_path = scratch.path().join(format!("image-{:04}", self.next_image));
        self.next_image += 1;
        tokio::fs::write(&image_path, image)
            .await
            .map_err(|e| DetectError::Engine(format!("could not stage image: {e}")))?;

        let output = self.command(&image_path).output().await;
        if let Err(e) = tokio::fs::remove_file(&image_path).await {
            debug!("Could not remove {}: {}", image_path.display(), e);
        }

        let output = output.map_err(|e| {
            DetectError::Engine(format!("could not run {}: {}", self.binary.display(), e))
        })?;
        self.interpret(&output)
    }

    async fn terminate(mut self: Box<Self>) -> Result<(), DetectError> {
        if let Some(scratch) = self.scratch.take() {
            scratch.close()?;
        }
        self.options.log(WorkerLog::status("terminated tesseract"));
        Ok(())
    }

    fn abort(&mut self) {
        // Dropping the TempDir removes it
        self.scratch.take();
    }
}
