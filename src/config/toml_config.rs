use crate::core::extraction::DEFAULT_CURRENCIES;
use crate::core::margin::CostCoefficients;
use crate::core::model::ModelParams;
use crate::core::prices::{ColumnMap, RetailColumnMap};
use crate::core::ConfigProvider;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_file_extension, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_relative_path, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "agrifood.toml";

const CSV: &[&str] = &["csv"];
const TEXT: &[&str] = &["txt"];
const GEOJSON: &[&str] = &["geojson", "json"];
const ASCII_GRID: &[&str] = &["asc"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    pub data: DataConfig,
    pub sources: Vec<DataSource>,
    pub extraction: ExtractionConfig,
    pub margin: CostCoefficients,
    pub model: ModelParams,
    pub map: MapConfig,
    pub output: OutputConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub name: String,
    /// Project directory; every other path is relative to it.
    pub root: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: "agrifood-cost-margin-senegal".to_string(),
            root: ".".to_string(),
        }
    }
}

/// Input files inside the project tree. Missing optional inputs are skipped at run time.
/// Without a `[data]` table every default path applies; inside one, unlisted inputs are off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub prices: Option<String>,
    /// Market-level retail prices.
    pub retail_prices: Option<String>,
    pub margin_inputs: Option<String>,
    pub survey_text: Option<String>,
    pub markets: Option<String>,
    pub roads: Option<String>,
    pub travel_time: Option<String>,
    pub friction: Option<String>,
    #[serde(default)]
    pub columns: ColumnMap,
    #[serde(default)]
    pub retail_columns: RetailColumnMap,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            prices: Some("data/processed/merged_prices.csv".to_string()),
            retail_prices: Some("data/processed/retail_prices.csv".to_string()),
            margin_inputs: Some("data/processed/value_chain.csv".to_string()),
            survey_text: Some("data/raw/market_survey.txt".to_string()),
            markets: Some("data/geo/markets.geojson".to_string()),
            roads: Some("data/geo/roads.geojson".to_string()),
            travel_time: Some("data/geo/travel_time.asc".to_string()),
            friction: Some("data/geo/friction_surface.asc".to_string()),
            columns: ColumnMap::default(),
            retail_columns: RetailColumnMap::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub url: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub currencies: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            currencies: DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Period and commodity selection for the region map. Unset period means the latest one present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub commodities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: String,
    pub archive: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "outputs".to_string(),
            archive: "agrifood_outputs.zip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
}

impl ProjectConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Defaults rooted at `root`.
    pub fn for_root(root: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.project.root = root.into();
        config
    }

    /// 替換環境變數 (例如 ${DATA_URL})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("env substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    fn data_files(&self) -> [(&'static str, Option<&String>, &'static [&'static str]); 8] {
        let d = &self.data;
        [
            ("data.prices", d.prices.as_ref(), CSV),
            ("data.retail_prices", d.retail_prices.as_ref(), CSV),
            ("data.margin_inputs", d.margin_inputs.as_ref(), CSV),
            ("data.survey_text", d.survey_text.as_ref(), TEXT),
            ("data.markets", d.markets.as_ref(), GEOJSON),
            ("data.roads", d.roads.as_ref(), GEOJSON),
            ("data.travel_time", d.travel_time.as_ref(), ASCII_GRID),
            ("data.friction", d.friction.as_ref(), ASCII_GRID),
        ]
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("project.name", &self.project.name)?;
        validate_path("project.root", &self.project.root)?;

        for (field, path, extensions) in self.data_files() {
            if let Some(path) = path {
                validate_relative_path(field, path)?;
                validate_file_extension(field, path, extensions)?;
            }
        }

        for (i, source) in self.sources.iter().enumerate() {
            validate_non_empty_string(&format!("sources[{}].name", i), &source.name)?;
            validate_url(&format!("sources[{}].url", i), &source.url)?;
            validate_relative_path(&format!("sources[{}].destination", i), &source.destination)?;
        }

        if self.extraction.currencies.is_empty() {
            return Err(EtlError::MissingConfigError {
                field: "extraction.currencies".to_string(),
            });
        }
        for currency in &self.extraction.currencies {
            validate_non_empty_string("extraction.currencies", currency)?;
        }

        validate_range("margin.per_km", self.margin.per_km, 0.0, f64::MAX)?;
        validate_range("margin.road_access", self.margin.road_access, 0.0, f64::MAX)?;
        validate_range(
            "margin.no_storage_penalty",
            self.margin.no_storage_penalty,
            0.0,
            f64::MAX,
        )?;

        validate_positive_number("model.n_estimators", self.model.n_estimators, 1)?;
        validate_positive_number("model.max_depth", self.model.max_depth, 1)?;
        validate_range("model.learning_rate", self.model.learning_rate, f64::MIN_POSITIVE, 1.0)?;
        validate_range("model.test_fraction", self.model.test_fraction, 0.01, 0.9)?;

        if let Some(month) = self.map.month {
            validate_range("map.month", month, 1, 12)?;
        }

        validate_relative_path("output.path", &self.output.path)?;
        validate_file_extension("output.archive", &self.output.archive, &["zip"])?;

        Ok(())
    }

    /// Relative path of a file under the output directory.
    pub fn output_file(&self, sub_dir: &str, file_name: &str) -> String {
        format!("{}/{}/{}", self.output.path.trim_end_matches('/'), sub_dir, file_name)
    }

    pub fn archive_path(&self) -> String {
        self.output_file("reports", &self.output.archive)
    }
}

impl ConfigProvider for ProjectConfig {
    fn project_root(&self) -> &str {
        &self.project.root
    }

    fn output_path(&self) -> &str {
        &self.output.path
    }

    fn monitoring_enabled(&self) -> bool {
        self.monitoring.enabled
    }
}

impl Validate for ProjectConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_basic_toml_config() {
        let toml_content = r#"
[project]
name = "senegal-margins"
root = "./work"

[data]
prices = "data/processed/prices.csv"
markets = "data/geo/markets.geojson"

[data.columns]
region_name = "Region"

[data.retail_columns]
price = "retail_price"

[[sources]]
name = "wfp-prices"
url = "https://data.example.org/wfp.csv"
destination = "data/raw/wfp.csv"

[extraction]
currencies = ["XOF"]

[margin]
per_km = 0.75

[model]
n_estimators = 50

[map]
year = 2016
month = 1
commodities = ["Rice"]

[monitoring]
enabled = true
"#;

        let config = ProjectConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.project.name, "senegal-margins");
        assert_eq!(config.project_root(), "./work");
        assert_eq!(config.data.columns.region_name, "Region");
        assert_eq!(config.data.retail_columns.price, "retail_price");
        assert_eq!(config.data.retail_columns.market, "market");
        assert_eq!(config.data.columns.year, "Year");
        assert_eq!(config.data.roads, None);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.margin.per_km, 0.75);
        assert_eq!(config.margin.road_access, 10.0);
        assert_eq!(config.model.n_estimators, 50);
        assert_eq!(config.model.max_depth, 3);
        assert_eq!(config.map.month, Some(1));
        assert!(config.monitoring_enabled());
        assert_eq!(config.output_path(), "outputs");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_data_table_disables_unlisted_inputs() {
        let config = ProjectConfig::from_toml_str("[data]\nprices = \"data/processed/prices.csv\"\n").unwrap();
        assert_eq!(config.data.prices.as_deref(), Some("data/processed/prices.csv"));
        assert_eq!(config.data.retail_prices, None);
        assert_eq!(config.data.roads, None);
        assert_eq!(config.data.travel_time, None);
        assert_eq!(config.data.columns.commodity, ColumnMap::default().commodity);
        assert!(config.validate().is_ok());

        let defaults = ProjectConfig::from_toml_str("[project]\nname = \"x\"\n").unwrap();
        assert_eq!(defaults.data.roads.as_deref(), Some("data/geo/roads.geojson"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ProjectConfig::from_toml_str("").unwrap();
        assert_eq!(config.project.root, ".");
        assert_eq!(config.extraction.currencies.len(), DEFAULT_CURRENCIES.len());
        assert_eq!(config.model, ModelParams::default());
        assert_eq!(config.archive_path(), "outputs/reports/agrifood_outputs.zip");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("AGRIFOOD_TEST_DATA_URL", "https://mirror.example.org/prices.csv");

        let toml_content = r#"
[[sources]]
name = "prices"
url = "${AGRIFOOD_TEST_DATA_URL}"
destination = "data/raw/prices.csv"
"#;

        let config = ProjectConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.sources[0].url, "https://mirror.example.org/prices.csv");

        std::env::remove_var("AGRIFOOD_TEST_DATA_URL");
    }

    #[test]
    fn test_config_validation() {
        let invalid = [
            "[[sources]]\nname = \"x\"\nurl = \"invalid-url\"\ndestination = \"data/raw/x.csv\"\n",
            "[[sources]]\nname = \"x\"\nurl = \"https://a.example\"\ndestination = \"../x.csv\"\n",
            "[data]\nprices = \"data/prices.xlsx\"\n",
            "[data]\nretail_prices = \"data/retail.xlsx\"\n",
            "[map]\nmonth = 13\n",
            "[model]\ntest_fraction = 0.0\n",
            "[model]\nmax_depth = 0\n",
            "[margin]\nper_km = -1.0\n",
            "[extraction]\ncurrencies = []\n",
            "[output]\narchive = \"bundle.tar\"\n",
        ];

        for content in invalid {
            let config = ProjectConfig::from_toml_str(content).unwrap();
            assert!(config.validate().is_err(), "expected failure for {:?}", content);
        }
    }

    #[test]
    fn test_invalid_toml_is_a_config_error() {
        let err = ProjectConfig::from_toml_str("[model\n").unwrap_err();
        assert!(matches!(err, EtlError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[project]\nname = \"file-test\"\n")
            .unwrap();

        let config = ProjectConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.project.name, "file-test");
        assert_eq!(config.output_file("maps", "regions.geojson"), "outputs/maps/regions.geojson");
    }
}
