//! Population of the similarity index from a labelled dataset directory.
//!
//! The dataset root holds one subdirectory per document type; every file inside one is an image
//! of that type. Images are OCR'd through a [`BatchCoordinator`] and the texts are stored with
//! `{"document_type": <subdirectory>}` metadata.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use walkdir::WalkDir;

use crate::index::{IndexError, SimilarityIndex};
use crate::ocr::ImageInput;
use crate::pipeline::{BatchCoordinator, BatchError};

/// Errors raised while populating the index.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The dataset root does not exist or is not a directory.
    #[error("Dataset directory not found: {0}")]
    DatasetNotFound(PathBuf),
    /// The dataset could not be traversed.
    #[error("Failed to read dataset: {0}")]
    Walk(#[from] walkdir::Error),
    /// The dataset contains no labelled images.
    #[error("No images found under {0}")]
    Empty(PathBuf),
    /// OCR produced no text for any image.
    #[error("No texts were extracted from the dataset")]
    NothingExtracted,
    /// Batch processing was rejected.
    #[error(transparent)]
    Batch(#[from] BatchError),
    /// The texts could not be stored.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Labelled images found under a dataset root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Image paths, sorted.
    pub paths: Vec<PathBuf>,
    /// `{"document_type": ...}` for each path.
    pub metadatas: Vec<Map<String, Value>>,
}

/// Summary of a populate run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// Images found in the dataset.
    pub discovered: usize,
    /// Texts stored in the index.
    pub indexed: usize,
    /// Images whose OCR failed twice.
    pub failed: Vec<PathBuf>,
}

/// Collect `<root>/<document_type>/<file>` entries. Hidden files are skipped.
pub fn read_dataset(root: &Path) -> Result<Dataset, IngestError> {
    if !root.is_dir() {
        return Err(IngestError::DatasetNotFound(root.to_path_buf()));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() || is_hidden(entry.path()) {
            continue;
        }
        let Some(document_type) = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str())
        else {
            continue;
        };
        if document_type.starts_with('.') {
            continue;
        }
        let mut metadata = Map::new();
        metadata.insert(
            "document_type".into(),
            Value::String(document_type.to_string()),
        );
        entries.push((entry.into_path(), metadata));
    }

    let (paths, metadatas) = entries.into_iter().unzip();
    Ok(Dataset { paths, metadatas })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// OCR every image under `root` and add the texts to the active collection of `index`.
pub async fn populate(
    index: &dyn SimilarityIndex,
    coordinator: &BatchCoordinator,
    root: &Path,
) -> Result<IngestReport, IngestError> {
    let dataset = read_dataset(root)?;
    if dataset.paths.is_empty() {
        return Err(IngestError::Empty(root.to_path_buf()));
    }
    let discovered = dataset.paths.len();
    tracing::info!(
        root = %root.display(),
        images = discovered,
        batch_size = coordinator.batch_size(),
        "Populating index"
    );

    let inputs = dataset.paths.into_iter().map(ImageInput::Path).collect();
    let outcome = coordinator.process(inputs, dataset.metadatas).await?;
    if outcome.is_empty() {
        return Err(IngestError::NothingExtracted);
    }

    let indexed = outcome.len();
    index.add(outcome.texts, outcome.metadatas, None).await?;
    let failed: Vec<PathBuf> = outcome
        .failed
        .into_iter()
        .filter_map(|item| match item.input {
            ImageInput::Path(path) => Some(path),
            _ => None,
        })
        .collect();

    tracing::info!(indexed, failed = failed.len(), "Index populated");
    Ok(IngestReport {
        discovered,
        indexed,
        failed,
    })
}
