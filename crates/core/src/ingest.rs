use crate::chunking::{split_document, SplitPolicy};
use crate::error::IngestError;
use crate::extractor::{extract_document, ExtractionOptions};
use crate::models::Chunk;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Extract and chunk every PDF under `folder`, skipping unreadable or
/// policy-rejected files instead of aborting the run.
pub fn ingest_folder_chunks(
    folder: &Path,
    extraction: &ExtractionOptions,
    policy: &SplitPolicy,
) -> Result<IngestionReport, IngestError> {
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut chunks = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        let result = extract_document(&path, extraction)
            .and_then(|document| split_document(&document, policy));

        match result {
            Ok(file_chunks) => chunks.extend(file_chunks),
            Err(error) => skipped_files.push(SkippedFile {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(IngestionReport {
        chunks,
        skipped_files,
    })
}

/// Extract and chunk a single file; extraction failures propagate.
pub fn ingest_file_chunks(
    path: &Path,
    extraction: &ExtractionOptions,
    policy: &SplitPolicy,
) -> Result<Vec<Chunk>, IngestError> {
    let document = extract_document(path, extraction)?;
    split_document(&document, policy)
}
