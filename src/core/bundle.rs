//! Deployable model bundle: one zip with the model, the fitted preprocessor
//! and the metrics the model was selected with.

use crate::core::models::ModelArtifact;
use crate::core::preprocessing::Preprocessor;
use crate::utils::error::{Result, RiskError};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::{FileOptions, ZipWriter};
use zip::ZipArchive;

pub const BUNDLE_FILE: &str = "model_bundle.zip";
const MODEL_ENTRY: &str = "model.json";
const PREPROCESSOR_ENTRY: &str = "preprocessor.json";
const METRICS_ENTRY: &str = "metrics.json";

#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub model: ModelArtifact,
    pub preprocessor: Preprocessor,
    pub metrics: BTreeMap<String, f64>,
}

impl ModelBundle {
    pub fn to_zip_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

        zip.start_file::<_, ()>(MODEL_ENTRY, FileOptions::default())?;
        zip.write_all(&serde_json::to_vec(&self.model)?)?;

        zip.start_file::<_, ()>(PREPROCESSOR_ENTRY, FileOptions::default())?;
        zip.write_all(&serde_json::to_vec_pretty(&self.preprocessor)?)?;

        zip.start_file::<_, ()>(METRICS_ENTRY, FileOptions::default())?;
        zip.write_all(&serde_json::to_vec_pretty(&self.metrics)?)?;

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }

    pub fn from_zip_bytes(data: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(std::io::Cursor::new(data))?;

        let mut read_entry = |name: &str| -> Result<Vec<u8>> {
            let mut entry = archive.by_name(name)?;
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            Ok(buf)
        };

        let model = ModelArtifact::from_json(&read_entry(MODEL_ENTRY)?)?;
        let preprocessor: Preprocessor = serde_json::from_slice(&read_entry(PREPROCESSOR_ENTRY)?)?;
        // 舊版 bundle 可能沒有 metrics
        let metrics = match read_entry(METRICS_ENTRY) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(RiskError::ZipError(zip::result::ZipError::FileNotFound)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            model,
            preprocessor,
            metrics,
        })
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_zip_bytes(&data)
    }
}
