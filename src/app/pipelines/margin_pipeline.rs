use crate::config::toml_config::ProjectConfig;
use crate::core::aggregate::{commodity_details, default_period, month_name, summarize_markets, summarize_regions};
use crate::core::extraction::PriceExtractor;
use crate::core::geo::{
    market_prices_to_geojson, markets_to_geojson, parse_markets, parse_roads, regions_to_geojson, roads_to_geojson,
    total_length_km,
};
use crate::core::margin::{compute_margins, read_inputs, sample_inputs};
use crate::core::model::train;
use crate::core::prices::{load_price_table, load_retail_table};
use crate::core::raster::Palette;
use crate::core::{Dataset, Pipeline, Storage, TransformResult};
use crate::domain::model::{Grid, MapSummary, PriceRecord, RetailPriceRecord, RetailSummary, TrainedModel};
use crate::utils::csv_out::to_csv;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Project run: read the inputs under the project root, compute margins and layers, write `outputs/`.
pub struct MarginPipeline<S: Storage> {
    storage: S,
    config: ProjectConfig,
    extractor: PriceExtractor,
}

impl<S: Storage> MarginPipeline<S> {
    pub fn new(storage: S, config: ProjectConfig) -> Result<Self> {
        let extractor = PriceExtractor::new(&config.extraction.currencies)?;
        Ok(Self {
            storage,
            config,
            extractor,
        })
    }

    /// Missing optional inputs are logged and skipped.
    async fn read_optional(&self, field: &str, path: Option<&String>) -> Result<Option<Vec<u8>>> {
        let Some(path) = path else {
            tracing::debug!("{} not configured", field);
            return Ok(None);
        };
        if !self.storage.exists(path).await {
            tracing::warn!("⚠️ {} not found at {}, skipping", field, path);
            return Ok(None);
        }
        tracing::debug!("Reading {} from {}", field, path);
        Ok(Some(self.storage.read_file(path).await?))
    }

    async fn read_grid(&self, field: &str, path: Option<&String>) -> Result<Option<Grid>> {
        match self.read_optional(field, path).await? {
            Some(data) => Ok(Some(Grid::from_ascii(&String::from_utf8_lossy(&data))?)),
            None => Ok(None),
        }
    }

    /// Configured period, else the latest one across the region and retail tables.
    fn selected_period(&self, data: &Dataset) -> Option<(i32, u32)> {
        let periods = data
            .prices
            .iter()
            .map(PriceRecord::period)
            .chain(data.retail_prices.iter().map(RetailPriceRecord::period));
        let (latest_year, latest_month) = default_period(periods)?;
        Some((
            self.config.map.year.unwrap_or(latest_year),
            self.config.map.month.unwrap_or(latest_month),
        ))
    }

    async fn put(&self, written: &mut Vec<(String, Vec<u8>)>, sub_dir: &str, name: &str, data: Vec<u8>) -> Result<()> {
        let path = self.config.output_file(sub_dir, name);
        self.storage.write_file(&path, &data).await?;
        tracing::debug!("Wrote {} ({} bytes)", path, data.len());
        written.push((format!("{}/{}", sub_dir, name), data));
        Ok(())
    }

    fn summary_json(&self, result: &TransformResult, files: &[String]) -> serde_json::Value {
        let mean_net_margin = if result.margins.is_empty() {
            None
        } else {
            Some(result.margins.iter().map(|m| m.net_margin).sum::<f64>() / result.margins.len() as f64)
        };

        json!({
            "project": self.config.project.name,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "margins": {
                "rows": result.margins.len(),
                "mean_net_margin": mean_net_margin,
            },
            "model": result.model.as_ref().map(|m| &m.report),
            "map": result.map_summary.as_ref().map(|s: &MapSummary| json!({
                "year": s.year,
                "month": s.month,
                "month_name": month_name(s.month),
                "regions": s.regions.len(),
                "regions_mapped": s.regions_mapped(),
                "skipped_without_coordinates": s.skipped_without_coordinates,
            })),
            "retail_map": result.retail_summary.as_ref().map(|s: &RetailSummary| json!({
                "year": s.year,
                "month": s.month,
                "markets": s.markets.len(),
                "markets_mapped": s.markets_mapped(),
                "skipped_without_coordinates": s.skipped_without_coordinates,
            })),
            "price_table": result.load_report,
            "retail_table": result.retail_report,
            "extracted_prices": result.extracted_prices.len(),
            "markets": result.markets.len(),
            "roads": {
                "count": result.roads.len(),
                "total_length_km": total_length_km(&result.roads),
            },
            "rasters": result.raster_layers.iter().map(|layer| json!({
                "name": layer.name,
                "bounds": layer.bounds,
                "image_bounds": layer.bounds.image_bounds(),
                "stats": layer.stats,
                "legend": layer.legend,
            })).collect::<Vec<_>>(),
            "files": files,
        })
    }
}

fn file_stem(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

#[async_trait]
impl<S: Storage> Pipeline for MarginPipeline<S> {
    async fn extract(&self) -> Result<Dataset> {
        let data = &self.config.data;
        let mut dataset = Dataset::default();

        if let Some(bytes) = self.read_optional("price table", data.prices.as_ref()).await? {
            let (prices, report) = load_price_table(&bytes, &data.columns)?;
            tracing::info!("Loaded {} price rows", prices.len());
            dataset.prices = prices;
            dataset.load_report = Some(report);
        }
        if let Some(bytes) = self.read_optional("retail price table", data.retail_prices.as_ref()).await? {
            let (retail, report) = load_retail_table(&bytes, &data.retail_columns)?;
            tracing::info!("Loaded {} retail price rows", retail.len());
            dataset.retail_prices = retail;
            dataset.retail_report = Some(report);
        }

        dataset.margin_inputs = match self.read_optional("margin inputs", data.margin_inputs.as_ref()).await? {
            Some(bytes) => read_inputs(&bytes)?,
            None => {
                tracing::warn!("No margin input file, using the sample value-chain rows");
                sample_inputs()
            }
        };

        dataset.survey_text = self
            .read_optional("survey text", data.survey_text.as_ref())
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        if let Some(bytes) = self.read_optional("markets layer", data.markets.as_ref()).await? {
            dataset.markets = parse_markets(&bytes)?;
        }
        if let Some(bytes) = self.read_optional("roads layer", data.roads.as_ref()).await? {
            dataset.roads = parse_roads(&bytes)?;
        }

        dataset.travel_time = self.read_grid("travel time raster", data.travel_time.as_ref()).await?;
        dataset.friction = self.read_grid("friction raster", data.friction.as_ref()).await?;

        Ok(dataset)
    }

    async fn transform(&self, data: Dataset) -> Result<TransformResult> {
        let extracted_prices = data
            .survey_text
            .as_deref()
            .map(|text| self.extractor.extract(text))
            .unwrap_or_default();

        let margins = compute_margins(&data.margin_inputs, &self.config.margin)?;

        let model = if margins.len() < 2 {
            tracing::warn!("⚠️ Only {} margin rows, skipping model training", margins.len());
            None
        } else {
            let (model, report) = train(&margins, &self.config.model)?;
            Some(TrainedModel {
                json: model.to_json()?,
                report,
            })
        };

        let (map_summary, retail_summary, details) = match self.selected_period(&data) {
            Some((year, month)) => {
                let selection = &self.config.map.commodities;
                tracing::info!(
                    "Summarising prices for {} {}",
                    month_name(month).unwrap_or("?"),
                    year
                );
                let regions = data
                    .load_report
                    .is_some()
                    .then(|| summarize_regions(&data.prices, year, month, selection));
                let markets = data
                    .retail_report
                    .is_some()
                    .then(|| summarize_markets(&data.retail_prices, year, month, selection));
                (regions, markets, commodity_details(&data.prices, year, month, selection))
            }
            None => {
                if data.load_report.is_some() || data.retail_report.is_some() {
                    tracing::warn!("Price tables have no usable year/month, skipping the price maps");
                }
                (None, None, Vec::new())
            }
        };

        let mut raster_layers = Vec::new();
        if let Some(grid) = &data.travel_time {
            raster_layers.push(grid.to_layer(&Palette::travel_time())?);
        }
        if let Some(grid) = &data.friction {
            raster_layers.push(grid.to_layer(&Palette::friction())?);
        }

        Ok(TransformResult {
            margins,
            extracted_prices,
            model,
            map_summary,
            retail_summary,
            details,
            load_report: data.load_report,
            retail_report: data.retail_report,
            markets: data.markets,
            roads: data.roads,
            raster_layers,
        })
    }

    async fn load(&self, result: TransformResult) -> Result<String> {
        let mut written: Vec<(String, Vec<u8>)> = Vec::new();

        // 地圖圖層
        if let Some(summary) = &result.map_summary {
            let body = serde_json::to_vec_pretty(&regions_to_geojson(summary))?;
            self.put(&mut written, "maps", "regions.geojson", body).await?;
        }
        if let Some(summary) = &result.retail_summary {
            let body = serde_json::to_vec_pretty(&market_prices_to_geojson(summary))?;
            self.put(&mut written, "maps", "market_prices.geojson", body).await?;
        }
        if !result.markets.is_empty() {
            let body = serde_json::to_vec_pretty(&markets_to_geojson(&result.markets))?;
            self.put(&mut written, "maps", "markets.geojson", body).await?;
        }
        if !result.roads.is_empty() {
            let body = serde_json::to_vec_pretty(&roads_to_geojson(&result.roads))?;
            self.put(&mut written, "maps", "roads.geojson", body).await?;
        }

        for layer in &result.raster_layers {
            let name = format!("{}.ppm", file_stem(&layer.name));
            self.put(&mut written, "plots", &name, layer.image.clone()).await?;
        }

        if let Some(model) = &result.model {
            self.put(&mut written, "models", "net_margin_model.json", model.json.clone().into_bytes())
                .await?;
        }

        // 報表
        self.put(&mut written, "reports", "net_margins.csv", to_csv(&result.margins)?.into_bytes())
            .await?;
        if !result.extracted_prices.is_empty() {
            let body = to_csv(&result.extracted_prices)?.into_bytes();
            self.put(&mut written, "reports", "extracted_prices.csv", body).await?;
        }
        if !result.details.is_empty() {
            let body = to_csv(&result.details)?.into_bytes();
            self.put(&mut written, "reports", "commodity_details.csv", body).await?;
        }

        let mut files: Vec<String> = written.iter().map(|(name, _)| name.clone()).collect();
        files.push("reports/summary.json".to_string());
        let summary = serde_json::to_vec_pretty(&self.summary_json(&result, &files))?;
        self.put(&mut written, "reports", "summary.json", summary).await?;

        tracing::debug!("Creating ZIP bundle with {} files", written.len());
        let zip_data = {
            let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
            let options = SimpleFileOptions::default();
            for (name, data) in &written {
                zip.start_file(name.as_str(), options)?;
                zip.write_all(data)?;
            }
            // 完成並取回底層 Vec<u8>
            zip.finish()?.into_inner()
        };

        let archive_path = self.config.archive_path();
        tracing::debug!("Writing ZIP bundle ({} bytes) to {}", zip_data.len(), archive_path);
        self.storage.write_file(&archive_path, &zip_data).await?;

        Ok(archive_path)
    }
}
