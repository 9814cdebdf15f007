use crate::error::IngestError;
use crate::models::Document;
use chrono::Utc;
use lopdf::Document as PdfDocument;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// Extraction policy. Mirrors the knobs a converter exposes: drop pages that
/// are nothing but numeric tables, and reject documents outside an allowed
/// language set.
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub drop_numeric_tables: bool,
    /// ISO 639-1 codes. Empty set disables the language check.
    pub allowed_languages: Vec<String>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            drop_numeric_tables: true,
            allowed_languages: vec!["en".to_string()],
        }
    }
}

pub trait PdfExtractor {
    fn extract(&self, path: &Path, options: &ExtractionOptions) -> Result<Document, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, path: &Path, options: &ExtractionOptions) -> Result<Document, IngestError> {
        let pdf =
            PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        let mut dropped_tables = 0u32;

        for (page_no, _page_id) in pdf.get_pages() {
            let text = pdf
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if text.trim().is_empty() {
                continue;
            }

            if options.drop_numeric_tables && is_numeric_table(&text) {
                dropped_tables += 1;
                continue;
            }

            pages.push(text);
        }

        if pages.is_empty() {
            return Err(IngestError::EmptyDocument(format!(
                "{} ({} numeric-table pages dropped)",
                path.display(),
                dropped_tables
            )));
        }

        let text = pages.join("\n\n");
        let language = identify_language(&text);

        if !options.allowed_languages.is_empty() {
            let detected = language.clone().unwrap_or_else(|| "unknown".to_string());
            if !options.allowed_languages.contains(&detected) {
                return Err(IngestError::DisallowedLanguage {
                    detected,
                    path: path.display().to_string(),
                });
            }
        }

        let title = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?
            .to_string();

        Ok(Document {
            document_id: make_document_id(path),
            title,
            source_path: path.to_string_lossy().to_string(),
            page_count: pages.len() as u32,
            text,
            language,
            fetched_at: Utc::now(),
        })
    }
}

pub fn extract_document(path: &Path, options: &ExtractionOptions) -> Result<Document, IngestError> {
    LopdfExtractor.extract(path, options)
}

fn numeric_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[+-]?[\d.,%]+$").expect("literal pattern compiles"))
}

/// A page counts as a numeric table when most of its whitespace-separated
/// tokens are numeric (digits, decimal points, signs, thousands separators).
pub fn is_numeric_table(page_text: &str) -> bool {
    let numeric = numeric_token_pattern();
    let tokens: Vec<&str> = page_text.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }

    let numeric_count = tokens
        .iter()
        .filter(|token| numeric.is_match(token))
        .count();

    numeric_count * 10 >= tokens.len() * 9
}

const EN_MARKERS: [&str; 12] = [
    "the", "and", "of", "to", "in", "is", "that", "for", "with", "was", "are", "this",
];
const DE_MARKERS: [&str; 12] = [
    "der", "die", "das", "und", "ist", "nicht", "mit", "ein", "eine", "den", "von", "zu",
];
const FR_MARKERS: [&str; 12] = [
    "le", "la", "les", "et", "est", "une", "des", "dans", "pour", "que", "qui", "pas",
];

/// Stopword-ratio language identification over a small marker set. Returns
/// `None` when no language reaches a usable share of the tokens.
pub fn identify_language(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect();

    if tokens.is_empty() {
        return None;
    }

    let count_hits = |markers: &[&str]| {
        let set: HashSet<&str> = markers.iter().copied().collect();
        tokens.iter().filter(|token| set.contains(token.as_str())).count()
    };

    let scored = [
        ("en", count_hits(&EN_MARKERS)),
        ("de", count_hits(&DE_MARKERS)),
        ("fr", count_hits(&FR_MARKERS)),
    ];

    let (best, hits) = scored
        .iter()
        .max_by_key(|(_, hits)| *hits)
        .copied()
        .unwrap_or(("en", 0));

    // Require at least one marker per fifty tokens before committing.
    if hits * 50 >= tokens.len() {
        Some(best.to_string())
    } else {
        None
    }
}

fn make_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}
