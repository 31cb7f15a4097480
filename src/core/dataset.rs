//! Dataset acquisition and loading.
//!
//! The primary source is the headerless UCI Cleveland file where `?` marks a
//! missing value and the target ranges over `0..=4`. The fallback mirror is a
//! headered CSV. Both are normalised to the same cleaned CSV: a header row,
//! the 13 feature columns in [`FEATURE_NAMES`] order, empty cells for missing
//! values and a binary `target`.

use crate::config::toml_config::DataConfig;
use crate::domain::model::{Dataset, FEATURE_NAMES, N_FEATURES, TARGET_COLUMN};
use crate::utils::error::{Result, RiskError};
use ndarray::Array2;
use reqwest::Client;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 一筆清理後的資料列
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRow {
    pub features: [Option<f64>; N_FEATURES],
    pub target: u8,
}

pub struct DatasetDownloader {
    config: DataConfig,
    client: Client,
}

impl DatasetDownloader {
    pub fn new(config: DataConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn output_path(&self) -> PathBuf {
        Path::new(&self.config.data_dir).join(&self.config.file_name)
    }

    /// 下載並清理資料集，主來源失敗時改用備援鏡像
    pub async fn download(&self) -> Result<PathBuf> {
        let output_path = self.output_path();
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        tracing::info!("📥 Downloading Heart Disease dataset from UCI...");
        tracing::info!("URL: {}", self.config.url);

        let rows = match self.fetch_primary().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Error downloading dataset: {}", e);
                let Some(fallback_url) = &self.config.fallback_url else {
                    return Err(e);
                };
                tracing::warn!("Trying alternative mirror: {}", fallback_url);
                match self.fetch_fallback(fallback_url).await {
                    Ok(rows) => rows,
                    Err(e2) => {
                        tracing::error!("Alternative download also failed: {}", e2);
                        return Err(e2);
                    }
                }
            }
        };

        write_clean_csv(&output_path, &rows)?;

        let positives = rows.iter().filter(|r| r.target == 1).count();
        tracing::info!(
            "✅ Dataset saved to {} with {} rows and {} columns",
            output_path.display(),
            rows.len(),
            N_FEATURES + 1
        );
        tracing::info!(
            "Target distribution: 0 = {}, 1 = {}",
            rows.len() - positives,
            positives
        );

        Ok(output_path)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        tracing::debug!("Download response status: {}", response.status());

        if !response.status().is_success() {
            return Err(RiskError::DownloadError {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    async fn fetch_primary(&self) -> Result<Vec<CleanRow>> {
        let body = self.fetch_text(&self.config.url).await?;
        parse_uci_rows(body.as_bytes())
    }

    async fn fetch_fallback(&self, url: &str) -> Result<Vec<CleanRow>> {
        let body = self.fetch_text(url).await?;
        let rows = parse_headered_rows(body.as_bytes())?;
        tracing::info!("Downloaded alternative dataset with {} rows", rows.len());
        Ok(rows)
    }
}

fn parse_cell(raw: &str) -> Result<Option<f64>> {
    let value = raw.trim();
    if is_missing_token(value) {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| RiskError::data(format!("'{}' is not a number", value)))
}

fn is_missing_token(value: &str) -> bool {
    matches!(value, "" | "?" | "NA" | "nan" | "NaN")
}

fn binarize_target(raw: &str, line: usize) -> Result<u8> {
    match parse_cell(raw)? {
        Some(value) => Ok(u8::from(value > 0.0)),
        None => Err(RiskError::data(format!("row {}: target is missing", line))),
    }
}

/// 解析 UCI 原始檔 (無標題列，`?` 代表缺值，target 0-4)
pub fn parse_uci_rows<R: Read>(reader: R) -> Result<Vec<CleanRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = index + 1;
        if record.len() != N_FEATURES + 1 {
            return Err(RiskError::data(format!(
                "row {}: expected {} columns, found {}",
                line,
                N_FEATURES + 1,
                record.len()
            )));
        }

        let mut features = [None; N_FEATURES];
        for (j, slot) in features.iter_mut().enumerate() {
            *slot = parse_cell(&record[j])
                .map_err(|e| RiskError::data(format!("row {}, column {}: {}", line, FEATURE_NAMES[j], e)))?;
        }
        let target = binarize_target(&record[N_FEATURES], line)?;
        rows.push(CleanRow { features, target });
    }

    if rows.is_empty() {
        return Err(RiskError::data("downloaded dataset is empty"));
    }
    Ok(rows)
}

/// 解析有標題列的 CSV；沒有 target 欄位時視最後一欄為 target
pub fn parse_headered_rows<R: Read>(reader: R) -> Result<Vec<CleanRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    if headers.is_empty() {
        return Err(RiskError::data("dataset has no header row"));
    }
    let target_index = headers
        .iter()
        .position(|h| h == TARGET_COLUMN)
        .unwrap_or(headers.len() - 1);
    let feature_indices = feature_column_indices(&headers)?;

    let mut rows = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = index + 2;

        let mut features = [None; N_FEATURES];
        for (j, slot) in features.iter_mut().enumerate() {
            let raw = record.get(feature_indices[j]).unwrap_or("");
            *slot = parse_cell(raw)
                .map_err(|e| RiskError::data(format!("row {}, column {}: {}", line, FEATURE_NAMES[j], e)))?;
        }
        let target = binarize_target(record.get(target_index).unwrap_or(""), line)?;
        rows.push(CleanRow { features, target });
    }

    if rows.is_empty() {
        return Err(RiskError::data("dataset contains no rows"));
    }
    Ok(rows)
}

fn feature_column_indices(headers: &csv::StringRecord) -> Result<[usize; N_FEATURES]> {
    let mut indices = [0usize; N_FEATURES];
    for (j, name) in FEATURE_NAMES.iter().enumerate() {
        indices[j] = headers
            .iter()
            .position(|h| h == *name)
            .ok_or_else(|| RiskError::data(format!("missing feature column '{}'", name)))?;
    }
    Ok(indices)
}

pub fn write_clean_csv(path: &Path, rows: &[CleanRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = FEATURE_NAMES.to_vec();
    header.push(TARGET_COLUMN);
    writer.write_record(&header)?;

    for row in rows {
        let mut fields: Vec<String> = row
            .features
            .iter()
            .map(|v| v.map(|x| x.to_string()).unwrap_or_default())
            .collect();
        fields.push(row.target.to_string());
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// 讀取清理後的 CSV 為特徵矩陣與標籤
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RiskError::data(format!(
            "Data file not found: {}",
            path.display()
        )));
    }
    let file = std::fs::File::open(path)?;
    let dataset = read_dataset(file)?;
    tracing::debug!(
        "Loaded {} rows x {} features from {}",
        dataset.len(),
        dataset.n_features(),
        path.display()
    );
    Ok(dataset)
}

pub fn read_dataset<R: Read>(reader: R) -> Result<Dataset> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let feature_indices = feature_column_indices(&headers)?;
    let target_index = headers
        .iter()
        .position(|h| h == TARGET_COLUMN)
        .ok_or_else(|| RiskError::data("missing 'target' column"))?;

    let mut values = Vec::new();
    let mut targets = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = index + 2;

        for (j, &col) in feature_indices.iter().enumerate() {
            let cell = parse_cell(record.get(col).unwrap_or(""))
                .map_err(|e| RiskError::data(format!("row {}, column {}: {}", line, FEATURE_NAMES[j], e)))?;
            values.push(cell.unwrap_or(f64::NAN));
        }

        let target = match parse_cell(record.get(target_index).unwrap_or(""))? {
            Some(v) if v == 0.0 => 0,
            Some(v) if v == 1.0 => 1,
            other => {
                return Err(RiskError::data(format!(
                    "row {}: target must be 0 or 1, found {:?}",
                    line, other
                )))
            }
        };
        targets.push(target);
    }

    if targets.is_empty() {
        return Err(RiskError::data("dataset contains no rows"));
    }

    let features = Array2::from_shape_vec((targets.len(), N_FEATURES), values)
        .map_err(|e| RiskError::data(format!("feature matrix shape: {}", e)))?;

    Ok(Dataset { features, targets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    const UCI_SAMPLE: &str = "63.0,1.0,1.0,145.0,233.0,1.0,2.0,150.0,0.0,2.3,3.0,0.0,6.0,0\n\
67.0,1.0,4.0,160.0,286.0,0.0,2.0,108.0,1.0,1.5,2.0,3.0,3.0,2\n\
67.0,1.0,4.0,120.0,229.0,0.0,2.0,129.0,1.0,2.6,2.0,2.0,7.0,1\n\
53.0,1.0,3.0,130.0,197.0,1.0,2.0,152.0,0.0,1.2,3.0,0.0,?,0\n";

    fn data_config(dir: &Path, url: String, fallback_url: Option<String>) -> DataConfig {
        DataConfig {
            url,
            fallback_url,
            data_dir: dir.to_str().unwrap().to_string(),
            file_name: "heart_disease.csv".to_string(),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn test_parse_uci_rows_cleans_missing_and_target() {
        let rows = parse_uci_rows(UCI_SAMPLE.as_bytes()).unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].target, 0);
        assert_eq!(rows[1].target, 1); // 2 → 1
        assert_eq!(rows[2].target, 1);
        assert_eq!(rows[3].features[12], None); // '?' → missing
        assert_eq!(rows[0].features[9], Some(2.3));
    }

    #[test]
    fn test_parse_uci_rows_rejects_wrong_width() {
        let err = parse_uci_rows("1,2,3\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("expected 14 columns"));
    }

    #[test]
    fn test_parse_headered_rows_renames_last_column() {
        let csv = "age,sex,cp,trestbps,chol,fbs,restecg,thalach,exang,oldpeak,slope,ca,thal,condition\n\
63,1,3,145,233,1,0,150,0,2.3,0,0,1,1\n\
37,1,2,130,250,0,1,187,0,3.5,0,0,2,0\n";
        let rows = parse_headered_rows(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].target, 1);
        assert_eq!(rows[1].target, 0);
    }

    #[test]
    fn test_clean_csv_round_trip_keeps_missing_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("heart.csv");
        let rows = parse_uci_rows(UCI_SAMPLE.as_bytes()).unwrap();

        write_clean_csv(&path, &rows).unwrap();
        let dataset = load_dataset(&path).unwrap();

        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.n_features(), N_FEATURES);
        assert_eq!(dataset.missing_count(), 1);
        assert!(dataset.features[[3, 12]].is_nan());
        assert_eq!(dataset.class_counts(), (2, 2));
    }

    #[test]
    fn test_load_dataset_missing_file() {
        let err = load_dataset("/nonexistent/heart.csv").unwrap_err();
        assert!(err.to_string().contains("Data file not found"));
    }

    #[test]
    fn test_read_dataset_requires_feature_columns() {
        let err = read_dataset("age,sex,target\n1,0,1\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("missing feature column 'cp'"));
    }

    #[tokio::test]
    async fn test_download_primary_source() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(GET).path("/processed.cleveland.data");
            then.status(200).body(UCI_SAMPLE);
        });

        let temp_dir = TempDir::new().unwrap();
        let downloader = DatasetDownloader::new(data_config(
            temp_dir.path(),
            server.url("/processed.cleveland.data"),
            None,
        ))
        .unwrap();

        let path = downloader.download().await.unwrap();

        api_mock.assert();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("age,sex,cp,trestbps"));
        let dataset = load_dataset(&path).unwrap();
        assert_eq!(dataset.len(), 4);
    }

    #[tokio::test]
    async fn test_download_falls_back_to_mirror() {
        let server = MockServer::start();
        let primary = server.mock(|when, then| {
            when.method(GET).path("/primary");
            then.status(404);
        });
        let mirror = server.mock(|when, then| {
            when.method(GET).path("/heart.csv");
            then.status(200).body(
                "age,sex,cp,trestbps,chol,fbs,restecg,thalach,exang,oldpeak,slope,ca,thal,target\n\
63,1,3,145,233,1,0,150,0,2.3,0,0,1,1\n",
            );
        });

        let temp_dir = TempDir::new().unwrap();
        let downloader = DatasetDownloader::new(data_config(
            temp_dir.path(),
            server.url("/primary"),
            Some(server.url("/heart.csv")),
        ))
        .unwrap();

        let path = downloader.download().await.unwrap();

        primary.assert();
        mirror.assert();
        assert_eq!(load_dataset(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_download_fails_when_both_sources_fail() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(500);
        });

        let temp_dir = TempDir::new().unwrap();
        let downloader = DatasetDownloader::new(data_config(
            temp_dir.path(),
            server.url("/primary"),
            Some(server.url("/mirror")),
        ))
        .unwrap();

        let err = downloader.download().await.unwrap_err();
        assert!(matches!(err, RiskError::DownloadError { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_download_honours_configured_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200)
                .body(UCI_SAMPLE)
                .delay(Duration::from_secs(3));
        });

        let temp_dir = TempDir::new().unwrap();
        let mut config = data_config(temp_dir.path(), server.url("/slow"), None);
        config.timeout_seconds = 1;
        let downloader = DatasetDownloader::new(config).unwrap();

        let err = downloader.download().await.unwrap_err();
        assert!(matches!(err, RiskError::HttpError(ref e) if e.is_timeout()));
    }
}
