use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::DetectError;

/// Raw result key holding the detected rotation in degrees
pub const ORIENTATION_DEGREES: &str = "orientation_degrees";
/// Raw result key holding the engine's confidence in the rotation
pub const ORIENTATION_CONFIDENCE: &str = "orientation_confidence";
pub const SCRIPT: &str = "script";
pub const SCRIPT_CONFIDENCE: &str = "script_confidence";
/// Derived output key, true iff both orientation fields are present
pub const TEXT_DETECTED: &str = "textDetected";

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Where the bytes of a binary attachment live
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryContent {
    /// Bytes held in memory
    Inline(Vec<u8>),
    /// Bytes stored on disk, read on demand
    Stored(PathBuf),
}

/// A named binary attachment: raw bytes plus metadata
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryData {
    pub content: BinaryContent,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub file_extension: Option<String>,
}

impl BinaryData {
    /// Attachment backed by in-memory bytes
    pub fn inline(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            content: BinaryContent::Inline(bytes.into()),
            mime_type: mime_type.into(),
            file_name: None,
            file_extension: None,
        }
    }

    /// Attachment backed by a file on disk.
    ///
    /// The MIME type is guessed from the file extension; nothing is read here.
    pub fn stored(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime_type = image::ImageFormat::from_path(&path)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| DEFAULT_MIME_TYPE.to_string());
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let file_extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());

        Self {
            content: BinaryContent::Stored(path),
            mime_type,
            file_name,
            file_extension,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        self.file_extension = Path::new(&file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        self.file_name = Some(file_name);
        self
    }

    /// Load the attachment's bytes
    pub async fn buffer(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match &self.content {
            BinaryContent::Inline(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            BinaryContent::Stored(path) => Ok(Cow::Owned(tokio::fs::read(path).await?)),
        }
    }
}

impl Serialize for BinaryData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.content {
            BinaryContent::Inline(bytes) => map.serialize_entry("data", &BASE64.encode(bytes))?,
            BinaryContent::Stored(path) => map.serialize_entry("id", &path.display().to_string())?,
        }
        map.serialize_entry("mimeType", &self.mime_type)?;
        if let Some(file_name) = &self.file_name {
            map.serialize_entry("fileName", file_name)?;
        }
        if let Some(file_extension) = &self.file_extension {
            map.serialize_entry("fileExtension", file_extension)?;
        }
        map.end()
    }
}

/// Attachment set of one item, keyed by binary property name
pub type BinaryAttachments = BTreeMap<String, BinaryData>;

/// One element of an input batch.
///
/// Attachments are shared through an `Arc` so output records can pass them
/// through without copying the bytes.
#[derive(Debug, Clone, Default)]
pub struct BatchItem {
    pub json: Map<String, Value>,
    pub binary: Option<Arc<BinaryAttachments>>,
}

impl BatchItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.json.insert(key.into(), value.into());
        self
    }

    /// Attach binary data under the given property name
    pub fn with_binary(mut self, name: impl Into<String>, data: BinaryData) -> Self {
        let attachments = self.binary.get_or_insert_with(Default::default);
        Arc::make_mut(attachments).insert(name.into(), data);
        self
    }

    /// Look up a binary attachment by property name
    pub fn binary(&self, name: &str) -> Option<&BinaryData> {
        self.binary.as_ref().and_then(|attachments| attachments.get(name))
    }
}

/// Raw fields reported by the detection engine.
///
/// The key set is engine-defined and not known in advance; only the
/// orientation fields are interpreted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    fields: Map<String, Value>,
}

impl DetectionResult {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Result for an image on which the engine could not detect anything
    pub fn undetected() -> Self {
        let fields = [ORIENTATION_DEGREES, ORIENTATION_CONFIDENCE, SCRIPT, SCRIPT_CONFIDENCE]
            .into_iter()
            .map(|key| (key.to_string(), Value::Null))
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn orientation_degrees(&self) -> Option<f64> {
        self.get(ORIENTATION_DEGREES).and_then(Value::as_f64)
    }

    pub fn orientation_confidence(&self) -> Option<f64> {
        self.get(ORIENTATION_CONFIDENCE).and_then(Value::as_f64)
    }

    /// True iff both orientation fields are present and not null
    pub fn text_detected(&self) -> bool {
        self.is_present(ORIENTATION_DEGREES) && self.is_present(ORIENTATION_CONFIDENCE)
    }

    fn is_present(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_null())
    }

    /// Reject results whose orientation fields carry something other than a number
    pub fn validate(&self) -> Result<(), DetectError> {
        for key in [ORIENTATION_DEGREES, ORIENTATION_CONFIDENCE] {
            match self.get(key) {
                None | Some(Value::Null) | Some(Value::Number(_)) => {}
                Some(other) => {
                    return Err(DetectError::Engine(format!(
                        "malformed detection result: {key} is {other}, expected a number"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Output payload: every raw field plus `textDetected`
    pub fn into_json(self) -> Map<String, Value> {
        let text_detected = self.text_detected();
        let mut json = self.fields;
        json.insert(TEXT_DETECTED.to_string(), Value::Bool(text_detected));
        json
    }
}

impl From<Map<String, Value>> for DetectionResult {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

/// Positional link from an output record back to its input item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairedItem {
    pub item: usize,
}

/// One output element per processed input item
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub json: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<Arc<BinaryAttachments>>,
    pub paired_item: PairedItem,
}

impl OutputRecord {
    pub fn success(
        item_index: usize,
        result: DetectionResult,
        binary: Option<Arc<BinaryAttachments>>,
    ) -> Self {
        Self {
            json: result.into_json(),
            binary,
            paired_item: PairedItem { item: item_index },
        }
    }

    pub fn failure(
        item_index: usize,
        message: impl Into<String>,
        binary: Option<Arc<BinaryAttachments>>,
    ) -> Self {
        let mut json = Map::new();
        json.insert("error".to_string(), Value::String(message.into()));
        Self {
            json,
            binary,
            paired_item: PairedItem { item: item_index },
        }
    }

    pub fn paired_item_index(&self) -> usize {
        self.paired_item.item
    }

    /// Error message of a tolerated failure, if this record is one
    pub fn error(&self) -> Option<&str> {
        self.json.get("error").and_then(Value::as_str)
    }

    pub fn text_detected(&self) -> Option<bool> {
        self.json.get(TEXT_DETECTED).and_then(Value::as_bool)
    }
}
