use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Nothing to compose: item list is empty")]
    Empty,

    #[error("No sizing profile matches sku '{sku}' and the tenant has no default profile")]
    NoProfile { sku: String },

    #[error("Artwork for '{sku}' is {dpi} dpi, below the machine minimum of {min_dpi} dpi")]
    LowDpi { sku: String, dpi: u32, min_dpi: u32 },

    #[error("Unsupported artwork format '{format}' for '{sku}' (expected png or jpeg)")]
    UnsupportedFormat { sku: String, format: String },

    #[error("Item '{sku}' is {height_mm:.3} mm tall after sizing, exceeding the {max_length_mm:.3} mm base length")]
    ItemExceedsMaxLength {
        sku: String,
        height_mm: f64,
        max_length_mm: f64,
    },

    #[error("Item '{sku}' ({width_mm:.3}x{height_mm:.3} mm) cannot be placed even on an empty base")]
    ItemExceedsBase {
        sku: String,
        width_mm: f64,
        height_mm: f64,
    },

    #[error("Storage read failed for '{key}' after {attempts} attempt(s): {source}")]
    StorageRead {
        key: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage write failed for '{key}' after {attempts} attempt(s): {source}")]
    StorageWrite {
        key: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Rendering base {base_index} failed: {reason}")]
    RenderFail { base_index: u32, reason: String },

    #[error("Job exceeded its soft deadline of {deadline_secs} s")]
    Timeout { deadline_secs: u64 },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Unrecoverable placement collision for '{sku}' on base {base_index}; skyline: {skyline:?}")]
    InternalCollision {
        base_index: u32,
        sku: String,
        /// `(x, w, y)` segment triples captured for diagnosis.
        skyline: Vec<(f64, f64, f64)>,
    },
}

impl ComposeError {
    /// Stable machine-readable code, as recorded in the job manifest.
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::Io(_) => "IO",
            ComposeError::Image(_) => "RENDER_FAIL",
            ComposeError::InvalidConfig(_) => "INVALID_CONFIG",
            ComposeError::Empty => "EMPTY_PICKLIST",
            ComposeError::NoProfile { .. } => "NO_PROFILE",
            ComposeError::LowDpi { .. } => "LOW_DPI",
            ComposeError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            ComposeError::ItemExceedsMaxLength { .. } => "ITEM_EXCEEDS_MAX_LENGTH",
            ComposeError::ItemExceedsBase { .. } => "ITEM_EXCEEDS_BASE",
            ComposeError::StorageRead { .. } => "STORAGE_READ_FAIL",
            ComposeError::StorageWrite { .. } => "STORAGE_WRITE_FAIL",
            ComposeError::RenderFail { .. } => "RENDER_FAIL",
            ComposeError::Timeout { .. } => "TIMEOUT",
            ComposeError::Cancelled => "CANCELLED",
            ComposeError::InternalCollision { .. } => "INTERNAL_COLLISION",
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
