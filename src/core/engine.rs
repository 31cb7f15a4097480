use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::ResourceMonitor;

pub struct TrainingEngine<P: Pipeline> {
    pipeline: P,
    monitor: ResourceMonitor,
}

impl<P: Pipeline> TrainingEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: ResourceMonitor::new(monitor_enabled),
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<P::Output> {
        tracing::info!("🚀 Starting training process...");
        self.monitor.log_stage("Start");

        // Extract
        tracing::info!("Loading data...");
        let raw = self.pipeline.extract().await?;
        self.monitor.log_stage("Extract");

        // Transform
        tracing::info!("Preprocessing data...");
        let prepared = self.pipeline.transform(raw).await?;
        self.monitor.log_stage("Transform");

        // Load
        tracing::info!("Training and logging models...");
        let output = self.pipeline.load(prepared).await?;
        self.monitor.log_stage("Load");

        self.monitor.log_final();
        tracing::info!("✅ Training process finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::RiskError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPipeline {
        calls: AtomicUsize,
        fail_transform: bool,
    }

    #[async_trait::async_trait]
    impl Pipeline for CountingPipeline {
        type Raw = Vec<u8>;
        type Prepared = usize;
        type Output = String;

        async fn extract(&self) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }

        async fn transform(&self, data: Vec<u8>) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transform {
                return Err(RiskError::data("boom"));
            }
            Ok(data.len())
        }

        async fn load(&self, prepared: usize) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} rows", prepared))
        }
    }

    #[tokio::test]
    async fn test_engine_runs_stages_in_order() {
        let engine = TrainingEngine::new(CountingPipeline {
            calls: AtomicUsize::new(0),
            fail_transform: false,
        });
        assert_eq!(engine.run().await.unwrap(), "3 rows");
        assert_eq!(engine.pipeline().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_engine_stops_on_stage_error() {
        let engine = TrainingEngine::new_with_monitoring(
            CountingPipeline {
                calls: AtomicUsize::new(0),
                fail_transform: true,
            },
            false,
        );
        assert!(engine.run().await.is_err());
        assert_eq!(engine.pipeline().calls.load(Ordering::SeqCst), 2);
    }
}
