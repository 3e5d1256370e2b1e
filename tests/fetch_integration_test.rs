use agrifood_margins::config::toml_config::ProjectConfig;
use agrifood_margins::utils::validation::Validate;
use agrifood_margins::{DatasetFetcher, EtlEngine, EtlError, LocalStorage, MarginPipeline};
use httpmock::prelude::*;
use tempfile::TempDir;

const PRICES_CSV: &str = "Year,Month,Commodity,Régions Name,Régions - RegionId,Régions - Latitude,Régions - Longitude,Price,Unit\n\
2016,1,Rice,Dakar,SN-DK,14.69,-17.44,350,XOF/kg\n";

fn config_for(server: &MockServer, root: &str) -> ProjectConfig {
    let toml_content = format!(
        r#"
[project]
name = "fetch-test"
root = "{root}"

[[sources]]
name = "prices"
url = "{prices}"
destination = "data/processed/merged_prices.csv"

[[sources]]
name = "survey"
url = "{survey}"
destination = "data/raw/market_survey.txt"
"#,
        root = root.replace('\\', "/"),
        prices = server.url("/prices.csv"),
        survey = server.url("/survey.txt"),
    );
    ProjectConfig::from_toml_str(&toml_content).unwrap()
}

#[tokio::test]
async fn test_fetch_then_run() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_str().unwrap().to_string();

    let server = MockServer::start();
    let prices_mock = server.mock(|when, then| {
        when.method(GET).path("/prices.csv");
        then.status(200)
            .header("Content-Type", "text/csv")
            .body(PRICES_CSV);
    });
    let survey_mock = server.mock(|when, then| {
        when.method(GET).path("/survey.txt");
        then.status(200).body("Rice price in Dakar is XOF 355.");
    });

    let config = config_for(&server, &root);
    assert!(config.validate().is_ok());

    let fetcher = DatasetFetcher::new(LocalStorage::new(root.clone()));
    let outcomes = fetcher.fetch_all(&config.sources).await.unwrap();
    prices_mock.assert();
    survey_mock.assert();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].destination, "data/processed/merged_prices.csv");

    let pipeline = MarginPipeline::new(LocalStorage::new(root.clone()), config).unwrap();
    let output_path = EtlEngine::new(pipeline).run().await.unwrap();
    assert!(temp_dir.path().join(&output_path).is_file());

    let summary: serde_json::Value = serde_json::from_slice(
        &std::fs::read(temp_dir.path().join("outputs/reports/summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["project"], "fetch-test");
    assert_eq!(summary["map"]["regions_mapped"][0], "Dakar");
    assert_eq!(summary["extracted_prices"], 1);
}

#[tokio::test]
async fn test_fetch_stops_on_server_error() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().to_str().unwrap().to_string();

    let server = MockServer::start();
    let prices_mock = server.mock(|when, then| {
        when.method(GET).path("/prices.csv");
        then.status(500);
    });
    let survey_mock = server.mock(|when, then| {
        when.method(GET).path("/survey.txt");
        then.status(200).body("unused");
    });

    let config = config_for(&server, &root);
    let fetcher = DatasetFetcher::new(LocalStorage::new(root));
    let err = fetcher.fetch_all(&config.sources).await.unwrap_err();

    prices_mock.assert();
    survey_mock.assert_hits(0);
    assert!(matches!(err, EtlError::ApiError(_)));
    assert_eq!(err.severity().exit_code(), 2);
}
