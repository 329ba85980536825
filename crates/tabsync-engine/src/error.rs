//! Error types for the synchronization engine.

/// The result type used throughout tabsync-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronizing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The settings are unusable. Fails a run before any queue processing.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A destination header does not match the source header.
    #[error(
        "source header mismatch in table '{table}': column {column} expected '{expected}', got '{found}'"
    )]
    HeaderMismatch {
        /// Destination table name.
        table: String,
        /// 1-based destination column.
        column: usize,
        /// Destination header value.
        expected: String,
        /// Source header value.
        found: String,
    },

    /// A keyed destination row lacks a required column.
    #[error("target sheet '{table}' row {row} missing required column '{column}'")]
    MissingColumn {
        /// Destination table name.
        table: String,
        /// 1-based data row.
        row: usize,
        /// The missing column name.
        column: String,
    },

    /// The destination table could not be read at snapshot time, so its
    /// current rows are unknown.
    #[error("target table '{table}' could not be read; not writing to it")]
    UnreadableTarget {
        /// Destination table name.
        table: String,
    },

    /// The destination sheet for a table does not exist.
    #[error("infrastructure missing for sheet '{sheet}'")]
    MissingInfrastructure {
        /// Sheet name.
        sheet: String,
    },

    /// The control table is missing or malformed.
    #[error("control table error: {message}")]
    ControlTable {
        /// Description of the problem.
        message: String,
    },

    /// A core operation (remote call, property store) failed.
    #[error(transparent)]
    Core(#[from] tabsync_core::Error),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new control table error.
    #[must_use]
    pub fn control_table(message: impl Into<String>) -> Self {
        Self::ControlTable {
            message: message.into(),
        }
    }

    /// Returns true for per-table consistency failures.
    #[must_use]
    pub const fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::HeaderMismatch { .. }
                | Self::MissingColumn { .. }
                | Self::MissingInfrastructure { .. }
                | Self::UnreadableTarget { .. }
                | Self::ControlTable { .. }
        )
    }
}
