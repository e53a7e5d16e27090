// ============================================================================
// ENGINE ERRORS — one taxonomy shared by codec, filters, LUT and layer ops
// ============================================================================

use crate::canvas::LayerId;

/// Error type for every fallible engine operation.
///
/// Validation always happens before a layer buffer is swapped, so any
/// `Err` leaves the layer stack exactly as it was.
#[derive(Debug)]
pub enum EngineError {
    /// Bad GB7 magic, truncated buffer, or corrupt project file.
    Format(String),
    /// Dimensions above the GB7 limit or the configured resize cap.
    Size(String),
    /// Invalid LUT control points, kernel shape, resize target or transition.
    Range(String),
    /// File is neither a supported image nor a `.gb7` / `.gbp` file.
    UnsupportedFormat(String),
    /// The layer stack already holds `max` layers.
    LayerLimit { max: usize },
    LayerNotFound(LayerId),
    /// An async edit is already in flight for this layer.
    Busy(LayerId),
    /// A background filter job panicked or its worker went away.
    JobFailed(String),
    Io(std::io::Error),
    Image(image::ImageError),
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Format(e) => write!(f, "Invalid format: {}", e),
            EngineError::Size(e) => write!(f, "Size limit exceeded: {}", e),
            EngineError::Range(e) => write!(f, "Out of range: {}", e),
            EngineError::UnsupportedFormat(e) => write!(f, "Unsupported file format: {}", e),
            EngineError::LayerLimit { max } => write!(f, "Maximum {} layers allowed", max),
            EngineError::LayerNotFound(id) => write!(f, "No layer with id {}", id),
            EngineError::Busy(id) => write!(f, "Layer {} already has an edit in progress", id),
            EngineError::JobFailed(e) => write!(f, "Filter job failed: {}", e),
            EngineError::Io(e) => write!(f, "I/O error: {}", e),
            EngineError::Image(e) => write!(f, "Image error: {}", e),
            EngineError::Serialize(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<image::ImageError> for EngineError {
    fn from(e: image::ImageError) -> Self {
        EngineError::Image(e)
    }
}

impl From<Box<bincode::ErrorKind>> for EngineError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EngineError::Serialize(e.to_string())
    }
}
