use serde::{Deserialize, Serialize};

/// One observation from the merged commodity price table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub commodity: String,
    pub region_name: String,
    pub region_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price: Option<f64>,
    pub unit: String,
}

impl PriceRecord {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn in_period(&self, year: i32, month: u32) -> bool {
        self.year == Some(year) && self.month == Some(month)
    }

    pub fn period(&self) -> (Option<i32>, Option<u32>) {
        (self.year, self.month)
    }
}

/// One observation from the market-level retail price table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailPriceRecord {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub commodity: String,
    pub market: String,
    pub market_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub price: Option<f64>,
    pub unit: String,
}

impl RetailPriceRecord {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn in_period(&self, year: i32, month: u32) -> bool {
        self.year == Some(year) && self.month == Some(month)
    }

    pub fn period(&self) -> (Option<i32>, Option<u32>) {
        (self.year, self.month)
    }
}

/// Counts gathered while loading a price table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows: usize,
    pub invalid_coordinates: usize,
    pub invalid_prices: usize,
    pub duplicates_merged: usize,
}

/// Farm-gate and retail prices plus the access factors that drive transaction cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginInput {
    pub commodity: String,
    pub price_farm: f64,
    pub price_retail: f64,
    pub distance_to_market_km: f64,
    pub road_density: f64,
    /// 1 when storage is available along the chain, 0 otherwise.
    pub storage_availability: u8,
}

impl MarginInput {
    pub fn has_storage(&self) -> bool {
        self.storage_availability > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginRecord {
    pub commodity: String,
    pub price_farm: f64,
    pub price_retail: f64,
    pub distance_to_market_km: f64,
    pub road_density: f64,
    pub storage_availability: u8,
    pub gross_margin: f64,
    pub transaction_cost: f64,
    pub net_margin: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPrice {
    pub commodity: String,
    pub location: String,
    pub price: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommodityEntry {
    pub commodity: String,
    pub price: Option<f64>,
    pub unit: String,
}

impl CommodityEntry {
    pub fn label(&self) -> String {
        match self.price {
            Some(price) => format!("{}: {:.2} {}", self.commodity, price, self.unit),
            None => format!("{}: Price not available", self.commodity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerColor {
    Blue,
    Orange,
    Red,
}

impl MarkerColor {
    pub fn for_count(count: usize) -> Self {
        if count < 5 {
            MarkerColor::Blue
        } else if count < 10 {
            MarkerColor::Orange
        } else {
            MarkerColor::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerColor::Blue => "blue",
            MarkerColor::Orange => "orange",
            MarkerColor::Red => "red",
        }
    }
}

/// Commodities priced in one region for the selected period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub region_name: String,
    pub region_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub entries: Vec<CommodityEntry>,
}

impl RegionSummary {
    pub fn commodity_count(&self) -> usize {
        self.entries.len()
    }

    pub fn color(&self) -> MarkerColor {
        MarkerColor::for_count(self.commodity_count())
    }

    pub fn radius(&self) -> usize {
        8 + self.commodity_count() * 2
    }

    pub fn tooltip(&self) -> String {
        format!("{}: {} commodities", self.region_name, self.commodity_count())
    }

    pub fn popup_lines(&self) -> Vec<String> {
        self.entries.iter().map(CommodityEntry::label).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapSummary {
    pub year: i32,
    pub month: u32,
    pub regions: Vec<RegionSummary>,
    pub skipped_without_coordinates: usize,
}

impl MapSummary {
    pub fn regions_mapped(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.region_name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Retail commodities priced at one market for the selected period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market: String,
    pub market_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub entries: Vec<CommodityEntry>,
}

impl MarketSummary {
    pub const COLOR: &'static str = "green";

    pub fn commodity_count(&self) -> usize {
        self.entries.len()
    }

    pub fn radius(&self) -> f64 {
        6.0 + self.commodity_count() as f64 * 1.5
    }

    pub fn tooltip(&self) -> String {
        format!("{}: {} retail commodities (Market)", self.market, self.commodity_count())
    }

    pub fn popup_lines(&self) -> Vec<String> {
        self.entries.iter().map(CommodityEntry::label).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetailSummary {
    pub year: i32,
    pub month: u32,
    pub markets: Vec<MarketSummary>,
    pub skipped_without_coordinates: usize,
}

impl RetailSummary {
    pub fn markets_mapped(&self) -> Vec<&str> {
        self.markets.iter().map(|m| m.market.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPoint {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadSegment {
    pub name: String,
    pub road_type: String,
    /// Each part is a (lon, lat) polyline.
    pub parts: Vec<Vec<(f64, f64)>>,
}

/// A single-band raster on a regular lon/lat grid, stored row-major from the north edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub ncols: usize,
    pub nrows: usize,
    /// West edge.
    pub xll: f64,
    /// South edge.
    pub yll: f64,
    pub cell_size: f64,
    pub nodata: Option<f64>,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    /// `[[south, west], [north, east]]`, the order web map overlays expect.
    pub fn image_bounds(&self) -> [[f64; 2]; 2] {
        [[self.bottom, self.left], [self.top, self.right]]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterStats {
    pub valid_cells: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// (percentile, value) pairs.
    pub percentiles: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterLayer {
    pub name: String,
    pub bounds: Bounds,
    pub stats: RasterStats,
    pub legend: Vec<LegendEntry>,
    #[serde(skip)]
    pub image: Vec<u8>,
}

/// Everything the extract phase read from the project tree.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub prices: Vec<PriceRecord>,
    pub load_report: Option<LoadReport>,
    pub retail_prices: Vec<RetailPriceRecord>,
    pub retail_report: Option<LoadReport>,
    pub margin_inputs: Vec<MarginInput>,
    pub survey_text: Option<String>,
    pub markets: Vec<MarketPoint>,
    pub roads: Vec<RoadSegment>,
    pub travel_time: Option<Grid>,
    pub friction: Option<Grid>,
}

/// Held-out evaluation of the net-margin model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub rmse: f64,
    pub n_train: usize,
    pub n_test: usize,
    pub feature_names: Vec<String>,
    pub target: String,
}

/// A fitted model in its persisted JSON form.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub json: String,
    pub report: ModelReport,
}

/// One line of the commodity details table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub region: String,
    pub commodity: String,
    pub price: String,
    pub unit: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub margins: Vec<MarginRecord>,
    pub extracted_prices: Vec<ExtractedPrice>,
    pub model: Option<TrainedModel>,
    pub map_summary: Option<MapSummary>,
    pub retail_summary: Option<RetailSummary>,
    pub details: Vec<DetailRow>,
    pub load_report: Option<LoadReport>,
    pub retail_report: Option<LoadReport>,
    pub markets: Vec<MarketPoint>,
    pub roads: Vec<RoadSegment>,
    pub raster_layers: Vec<RasterLayer>,
}
