use crate::utils::error::Result;
use async_trait::async_trait;
use ndarray::Array2;
use std::collections::BTreeMap;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Binary classifier over a dense feature matrix.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &Array2<f64>, y: &[u8]) -> Result<()>;

    /// Probability of the positive class for every row.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>>;

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| u8::from(p > 0.5))
            .collect())
    }

    /// Hyper-parameters as recorded by the tracking store.
    fn params(&self) -> BTreeMap<String, String>;
}

/// 三段式流程: 取得資料 → 前處理 → 訓練並記錄
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Raw: Send;
    type Prepared: Send;
    type Output: Send;

    async fn extract(&self) -> Result<Self::Raw>;
    async fn transform(&self, data: Self::Raw) -> Result<Self::Prepared>;
    async fn load(&self, prepared: Self::Prepared) -> Result<Self::Output>;
}
