use thiserror::Error;

/// Failures of a single detection step or of the detector worker
#[derive(Debug, Error)]
pub enum DetectError {
    /// The item has no binary attachment under the resolved property name
    #[error(
        "This operation expects the node's input data to contain a binary file '{property}', \
         but none was found"
    )]
    MissingAttachment { property: String },

    /// The engine rejected the image, timed out, or returned a malformed result
    #[error("orientation detection failed: {0}")]
    Engine(String),

    /// The detector worker could not be created
    #[error("failed to start orientation detector: {0}")]
    WorkerInit(String),

    #[error("failed to read binary data: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DetectError {
    /// Whether a batch may carry on past this error when tolerating failures
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DetectError::WorkerInit(_))
    }
}

/// Error propagated out of a pipeline run
#[derive(Debug, Error)]
pub enum NodeError {
    /// A recognised failure with structured context
    #[error("{source}")]
    Operation {
        #[source]
        source: DetectError,
        item_index: Option<usize>,
    },

    /// Any other underlying failure
    #[error(transparent)]
    Unexpected(anyhow::Error),
}

impl NodeError {
    /// Attach the failing item's index.
    ///
    /// Structured errors get their context overwritten; opaque ones are wrapped.
    pub fn at_item(self, index: usize) -> Self {
        match self {
            NodeError::Operation { source, .. } => NodeError::Operation {
                source,
                item_index: Some(index),
            },
            NodeError::Unexpected(err) => NodeError::Operation {
                source: DetectError::Other(err),
                item_index: Some(index),
            },
        }
    }

    /// Index of the input item that caused the failure, when known
    pub fn item_index(&self) -> Option<usize> {
        match self {
            NodeError::Operation { item_index, .. } => *item_index,
            NodeError::Unexpected(_) => None,
        }
    }

    /// The recognised cause, if this is not an opaque failure
    pub fn detect_error(&self) -> Option<&DetectError> {
        match self {
            NodeError::Operation { source, .. } => Some(source),
            NodeError::Unexpected(_) => None,
        }
    }
}

impl From<DetectError> for NodeError {
    fn from(source: DetectError) -> Self {
        NodeError::Operation {
            source,
            item_index: None,
        }
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::Unexpected(err)
    }
}
