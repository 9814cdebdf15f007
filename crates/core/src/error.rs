use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("document is empty after extraction: {0}")]
    EmptyDocument(String),

    #[error("language {detected} is not in the allowed set for {path}")]
    DisallowedLanguage { detected: String, path: String },

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid split policy: {0}")]
    InvalidSplitPolicy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("credential error: {0}")]
    Credential(String),

    #[error("asset not found: {name} version {version}")]
    AssetNotFound { name: String, version: String },

    #[error("malformed datastore uri: {0}")]
    MalformedUri(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from workspace: {0}")]
    WorkspaceResponse(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index holds no chunks")]
    EmptyIndex,

    #[error("embeddings not computed; run update_embeddings before dense queries")]
    EmbeddingsMissing,

    #[error("embedding dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum AnswerError {
    #[error("no context chunks supplied")]
    NoContext,

    #[error("upstream model error: {0}")]
    Upstream(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Retrieval(#[from] IndexError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
