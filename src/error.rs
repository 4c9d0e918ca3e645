use thiserror::Error;

/// Failures raised while resolving, negotiating or selecting a handler.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("found no handler for: {url}")]
    NoHandler { url: String },

    #[error("option '{key}' of {handler} is required but was not set")]
    MissingOption { handler: String, key: String },

    #[error("options of {handler} were not negotiated")]
    NotNegotiated { handler: String },

    #[error("invalid choice {choice}, expected a number between 1 and {count}")]
    InvalidChoice { choice: usize, count: usize },

    #[error("prompt failed: {0}")]
    Prompt(#[from] std::io::Error),
}

/// Failures raised by a handler while resolving or fetching items.
///
/// Anything except [`HandlerError::Fatal`] returned from a fetch only fails
/// the item it was raised for.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unsupported url: {0}")]
    Unsupported(String),

    #[error("fatal handler error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures that abort a single URL's download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{handler} could not resolve {url}: {source}")]
    Resolve {
        handler: String,
        url: String,
        #[source]
        source: HandlerError,
    },

    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("packaging failed: {0}")]
    Package(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
