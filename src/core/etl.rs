use crate::core::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<String> {
        tracing::info!("Starting agrifood margin run...");
        self.monitor.log_stats("Start");

        // Extract
        tracing::info!("📥 Extracting project data...");
        let dataset = self.pipeline.extract().await?;
        tracing::info!(
            "Extracted {} price rows, {} margin rows, {} markets, {} roads",
            dataset.prices.len(),
            dataset.margin_inputs.len(),
            dataset.markets.len(),
            dataset.roads.len()
        );
        self.monitor.log_stats("Extract");

        // Transform
        tracing::info!("⚙️ Transforming...");
        let result = self.pipeline.transform(dataset).await?;
        tracing::info!(
            "Computed {} margins, extracted {} survey prices, mapped {} regions",
            result.margins.len(),
            result.extracted_prices.len(),
            result
                .map_summary
                .as_ref()
                .map(|s| s.regions.len())
                .unwrap_or(0)
        );
        self.monitor.log_stats("Transform");

        // Load
        tracing::info!("💾 Writing outputs...");
        let output_path = self.pipeline.load(result).await?;
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Dataset, MarginInput, TransformResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPipeline {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Pipeline for CountingPipeline {
        async fn extract(&self) -> Result<Dataset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Dataset {
                margin_inputs: vec![MarginInput {
                    commodity: "maize".to_string(),
                    price_farm: 40.0,
                    price_retail: 65.0,
                    distance_to_market_km: 80.0,
                    road_density: 2.0,
                    storage_availability: 1,
                }],
                ..Dataset::default()
            })
        }

        async fn transform(&self, data: Dataset) -> Result<TransformResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(data.margin_inputs.len(), 1);
            Ok(TransformResult::default())
        }

        async fn load(&self, _result: TransformResult) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("outputs/reports/agrifood_outputs.zip".to_string())
        }
    }

    #[tokio::test]
    async fn test_engine_runs_all_phases_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = EtlEngine::new(CountingPipeline {
            calls: calls.clone(),
        });

        let path = engine.run().await.unwrap();

        assert_eq!(path, "outputs/reports/agrifood_outputs.zip");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
