pub mod answer;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod storage;

pub use answer::{
    AnswerGenerator, AzureOpenAiConfig, AzureOpenAiGenerator, ExtractiveReader, GenerativeReader,
    LocalHttpGenerator, TextGenerator,
};
pub use chunking::{normalize_whitespace, split_document, split_documents, SplitPolicy};
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{AnswerError, IndexError, IngestError, StorageError};
pub use extractor::{extract_document, ExtractionOptions, LopdfExtractor, PdfExtractor};
pub use index::{DocumentIndex, MemoryIndex, OpenSearchConfig, OpenSearchIndex};
pub use ingest::{discover_pdf_files, ingest_file_chunks, ingest_folder_chunks, IngestionReport, SkippedFile};
pub use models::{Answer, Chunk, Document, Query, ScoredChunk};
pub use pipeline::{PipelineOutput, QaPipeline};
pub use retriever::{EmbeddingRetriever, KeywordRetriever, Retriever};
pub use storage::{
    DatastoreUri, FetchedAsset, ResolvedAsset, StorageAccessor, WorkspaceConfig, LATEST_VERSION,
};
