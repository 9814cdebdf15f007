use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use docquery_core::{
    ingest_file_chunks, ingest_folder_chunks, Answer, AnswerGenerator, AzureOpenAiConfig,
    AzureOpenAiGenerator, Chunk, DocumentIndex, Embedder, EmbeddingRetriever, ExtractionOptions,
    ExtractiveReader, GenerativeReader, HashEmbedder, HttpEmbedder, KeywordRetriever,
    LocalHttpGenerator, MemoryIndex, OpenSearchConfig, OpenSearchIndex, QaPipeline, Retriever,
    SplitPolicy, StorageAccessor, WorkspaceConfig, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docquery", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Index backend: ephemeral in-process store or a remote search engine.
    #[arg(long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Chunk snapshot file used to persist the memory backend across runs.
    #[arg(long, default_value = "chunks.json")]
    snapshot: PathBuf,

    /// OpenSearch base URL
    #[arg(long, default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// OpenSearch index name
    #[arg(long, default_value = "doc_chunks")]
    opensearch_index: String,

    /// OpenSearch username
    #[arg(long, env = "OPENSEARCH_USER")]
    opensearch_user: Option<String>,

    /// OpenSearch password
    #[arg(long, env = "OPENSEARCH_PASSWORD")]
    opensearch_password: Option<String>,

    /// Skip TLS certificate verification for the index backend.
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Remote embedding endpoint. Falls back to the local hashing embedder
    /// when unset.
    #[arg(long, env = "EMBED_ENDPOINT")]
    embed_endpoint: Option<String>,

    /// API key for the remote embedding endpoint.
    #[arg(long, env = "EMBED_API_KEY")]
    embed_api_key: Option<String>,

    /// Embedding dimensions (must match the index mapping).
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embed_dimensions: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    Opensearch,
}

#[derive(Clone, Copy, ValueEnum)]
enum RetrieverKind {
    Keyword,
    Embedding,
}

#[derive(Clone, Copy, ValueEnum)]
enum GeneratorKind {
    Extractive,
    Generative,
    Local,
}

#[derive(Args)]
struct WorkspaceArgs {
    /// Workspace API endpoint
    #[arg(long, env = "WORKSPACE_ENDPOINT")]
    endpoint: Option<String>,

    /// Subscription id
    #[arg(long, env = "WORKSPACE_SUBSCRIPTION_ID")]
    subscription_id: Option<String>,

    /// Resource group name
    #[arg(long, env = "WORKSPACE_RESOURCE_GROUP")]
    resource_group: Option<String>,

    /// Workspace name
    #[arg(long, env = "WORKSPACE_NAME")]
    workspace: Option<String>,
}

impl WorkspaceArgs {
    fn accessor(&self) -> anyhow::Result<StorageAccessor> {
        let require = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .with_context(|| format!("workspace access needs {flag}"))
        };

        let config = WorkspaceConfig::from_env(
            require(&self.endpoint, "--endpoint")?,
            require(&self.subscription_id, "--subscription-id")?,
            require(&self.resource_group, "--resource-group")?,
            require(&self.workspace, "--workspace")?,
        )?;
        Ok(StorageAccessor::new(config))
    }
}

#[derive(Subcommand)]
enum Command {
    /// Resolve and download a versioned data asset into a scoped temp
    /// location. The local copy is removed when the command exits.
    Fetch {
        /// Logical data-asset name
        #[arg(long)]
        asset: String,

        /// Asset version, or "latest".
        #[arg(long, default_value = "latest")]
        version: String,

        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
    /// Extract, chunk, and index a PDF file, a folder of PDFs, or a remote
    /// data asset.
    Ingest {
        /// Local PDF file or folder.
        #[arg(long, conflicts_with = "asset")]
        path: Option<PathBuf>,

        /// Remote data-asset name (downloaded before ingestion).
        #[arg(long)]
        asset: Option<String>,

        /// Asset version, or "latest".
        #[arg(long, default_value = "latest")]
        asset_version: String,

        #[command(flatten)]
        workspace: WorkspaceArgs,

        /// Target chunk size in words.
        #[arg(long, default_value = "100")]
        split_length: usize,

        /// Split on word windows instead of sentence boundaries.
        #[arg(long, default_value_t = false)]
        ignore_sentence_boundaries: bool,

        /// Keep pages that are pure numeric tables.
        #[arg(long, default_value_t = false)]
        keep_numeric_tables: bool,

        /// Allowed document languages (ISO 639-1). Repeatable; pass none to
        /// disable the check via --any-language.
        #[arg(long = "language", default_values_t = vec!["en".to_string()])]
        languages: Vec<String>,

        /// Accept documents in any language.
        #[arg(long, default_value_t = false)]
        any_language: bool,

        /// Compute dense embeddings after indexing.
        #[arg(long, default_value_t = false)]
        embed: bool,
    },
    /// Delete every chunk from the index.
    Reset,
    /// Retrieve relevant chunks and answer a question over them.
    Ask {
        /// The question to answer.
        #[arg(long)]
        question: String,

        /// Number of chunks to retrieve.
        #[arg(long, default_value = "5")]
        top_k: usize,

        #[arg(long, value_enum, default_value = "keyword")]
        retriever: RetrieverKind,

        #[arg(long, value_enum, default_value = "extractive")]
        generator: GeneratorKind,

        /// Word budget for generated answers.
        #[arg(long, default_value = "100")]
        max_words: usize,

        /// Hosted LLM base URL
        #[arg(long, env = "AZURE_OPENAI_BASE_URL", default_value = "")]
        llm_base_url: String,

        /// Hosted LLM deployment name
        #[arg(long, env = "AZURE_OPENAI_DEPLOYMENT", default_value = "gpt-4")]
        llm_deployment: String,

        /// Hosted LLM API version
        #[arg(long, default_value = "2023-05-15")]
        llm_api_version: String,

        /// Hosted LLM API key
        #[arg(long, env = "AZURE_OPENAI_API_KEY", default_value = "")]
        llm_api_key: String,

        /// Hosted LLM max completion tokens
        #[arg(long, default_value = "512")]
        llm_max_tokens: u32,

        /// Local model server base URL
        #[arg(long, default_value = "http://localhost:11434")]
        local_llm_url: String,

        /// Local model name
        #[arg(long, default_value = "mistral")]
        local_llm_model: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docquery boot"
    );

    match &cli.command {
        Command::Fetch {
            asset,
            version,
            workspace,
        } => {
            let accessor = workspace.accessor()?;
            let fetched = accessor.fetch(asset, version).await?;
            println!(
                "resolved {}:{} -> {}",
                fetched.asset.name,
                fetched.asset.version,
                fetched.path().display()
            );
            let size = tokio::fs::metadata(fetched.path()).await?.len();
            println!("downloaded {size} bytes (temp copy is removed on exit)");
        }
        Command::Ingest {
            path,
            asset,
            asset_version,
            workspace,
            split_length,
            ignore_sentence_boundaries,
            keep_numeric_tables,
            languages,
            any_language,
            embed,
        } => {
            let extraction = ExtractionOptions {
                drop_numeric_tables: !keep_numeric_tables,
                allowed_languages: if *any_language {
                    Vec::new()
                } else {
                    languages.clone()
                },
            };
            let policy = SplitPolicy {
                split_length: *split_length,
                respect_sentence_boundaries: !ignore_sentence_boundaries,
                ..SplitPolicy::default()
            };

            // Keep a downloaded asset alive until indexing is done.
            let _fetched;
            let chunks = match (path, asset) {
                (Some(path), None) if path.is_dir() => {
                    let report = ingest_folder_chunks(path, &extraction, &policy)?;
                    for skipped in &report.skipped_files {
                        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
                    }
                    report.chunks
                }
                (Some(path), None) => ingest_file_chunks(path, &extraction, &policy)?,
                (None, Some(asset)) => {
                    let fetched = workspace.accessor()?.fetch(asset, asset_version).await?;
                    info!(
                        asset = %fetched.asset.name,
                        version = %fetched.asset.version,
                        "asset downloaded"
                    );
                    let chunks = ingest_file_chunks(fetched.path(), &extraction, &policy)?;
                    _fetched = fetched;
                    chunks
                }
                _ => anyhow::bail!("pass exactly one of --path or --asset"),
            };

            if chunks.is_empty() {
                println!("0 chunks ingested (all files were skipped)");
                return Ok(());
            }

            let index: Arc<dyn DocumentIndex> = match cli.backend {
                Backend::Opensearch => {
                    let remote = opensearch_index(&cli)?;
                    remote.ensure_index().await?;
                    Arc::new(remote)
                }
                Backend::Memory => build_index(&cli).await?,
            };
            index.write_chunks(&chunks).await?;

            let mut embedded = 0;
            if *embed {
                let embedder = build_embedder(&cli);
                embedded = index.update_embeddings(embedder.as_ref()).await?;
            }

            save_snapshot(&cli, index.as_ref()).await?;
            println!(
                "{} chunks ingested ({embedded} embedded) at {}",
                chunks.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Reset => {
            let index = build_index(&cli).await?;
            index.delete_all().await?;
            if let Backend::Memory = cli.backend {
                if cli.snapshot.exists() {
                    tokio::fs::remove_file(&cli.snapshot).await?;
                }
            }
            println!("index reset");
        }
        Command::Ask {
            question,
            top_k,
            retriever,
            generator,
            max_words,
            llm_base_url,
            llm_deployment,
            llm_api_version,
            llm_api_key,
            llm_max_tokens,
            local_llm_url,
            local_llm_model,
        } => {
            let index = build_index(&cli).await?;

            let retriever: Box<dyn Retriever> = match retriever {
                RetrieverKind::Keyword => Box::new(KeywordRetriever::new(index)),
                RetrieverKind::Embedding => {
                    Box::new(EmbeddingRetriever::new(index, build_embedder(&cli)))
                }
            };

            let generator: Box<dyn AnswerGenerator> = match generator {
                GeneratorKind::Extractive => Box::new(ExtractiveReader::new()),
                GeneratorKind::Generative => {
                    anyhow::ensure!(
                        !llm_base_url.is_empty(),
                        "generative answering needs --llm-base-url"
                    );
                    anyhow::ensure!(
                        !llm_api_key.is_empty(),
                        "generative answering needs an API key"
                    );
                    let hosted = AzureOpenAiGenerator::new(AzureOpenAiConfig {
                        base_url: llm_base_url.clone(),
                        deployment: llm_deployment.clone(),
                        api_version: llm_api_version.clone(),
                        api_key: llm_api_key.clone(),
                        max_tokens: *llm_max_tokens,
                    });
                    Box::new(GenerativeReader::new(hosted).with_word_budget(*max_words))
                }
                GeneratorKind::Local => {
                    let local = LocalHttpGenerator::new(local_llm_url.clone(), local_llm_model.clone());
                    Box::new(GenerativeReader::new(local).with_word_budget(*max_words))
                }
            };

            let pipeline = QaPipeline::new(retriever, generator);
            let output = pipeline.run(question, *top_k).await?;

            match &output.answer {
                Answer::Extracted {
                    span,
                    confidence,
                    chunk_id,
                    ..
                } => {
                    println!("answer: {span}");
                    println!("confidence: {confidence:.3}");
                    println!("source_chunk: {chunk_id}");
                }
                Answer::Generated {
                    text,
                    context_chunk_ids,
                    ..
                } => {
                    println!("answer: {text}");
                    println!("context_chunks: {}", context_chunk_ids.join(", "));
                }
            }

            for hit in &output.retrieved {
                println!(
                    "[{:.4}] chunk={} document={} source={}",
                    hit.score, hit.chunk.chunk_id, hit.chunk.document_id, hit.chunk.source_path
                );
                println!("  {}", hit.chunk.text);
            }
        }
    }

    Ok(())
}

fn opensearch_index(cli: &Cli) -> anyhow::Result<OpenSearchIndex> {
    let mut config = OpenSearchConfig::new(&cli.opensearch_url, &cli.opensearch_index);
    config.username = cli.opensearch_user.clone();
    config.password = cli.opensearch_password.clone();
    config.verify_tls = !cli.insecure;
    config.vector_dimensions = cli.embed_dimensions;
    Ok(OpenSearchIndex::new(config)?)
}

async fn build_index(cli: &Cli) -> anyhow::Result<Arc<dyn DocumentIndex>> {
    match cli.backend {
        Backend::Opensearch => Ok(Arc::new(opensearch_index(cli)?)),
        Backend::Memory => {
            let index = MemoryIndex::new();
            if cli.snapshot.exists() {
                let chunks = load_snapshot(&cli.snapshot)?;
                index.write_chunks(&chunks).await?;
            }
            Ok(Arc::new(index))
        }
    }
}

fn load_snapshot(path: &Path) -> anyhow::Result<Vec<Chunk>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let chunks: Vec<Chunk> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;
    Ok(chunks)
}

async fn save_snapshot(cli: &Cli, index: &dyn DocumentIndex) -> anyhow::Result<()> {
    if let Backend::Memory = cli.backend {
        let chunks = index.all_chunks().await?;
        let raw = serde_json::to_string(&chunks)?;
        tokio::fs::write(&cli.snapshot, raw).await?;
        info!(path = %cli.snapshot.display(), chunks = chunks.len(), "snapshot written");
    }
    Ok(())
}

fn build_embedder(cli: &Cli) -> Box<dyn Embedder> {
    match &cli.embed_endpoint {
        Some(endpoint) => Box::new(HttpEmbedder::new(
            endpoint,
            cli.embed_api_key.clone(),
            cli.embed_dimensions,
        )),
        None => Box::new(HashEmbedder {
            dimensions: cli.embed_dimensions,
        }),
    }
}
