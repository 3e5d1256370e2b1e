use agrifood_margins::core::geo::{markets_to_geojson, roads_to_geojson, sample_markets, sample_roads};
use agrifood_margins::core::model::GradientBoostingRegressor;
use agrifood_margins::{EtlEngine, LocalStorage, MarginPipeline, ProjectConfig, ProjectLayout};
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

const PRICES_CSV: &str = "\
Year,Month,Commodity,Régions Name,Régions - RegionId,Régions - Latitude,Régions - Longitude,Price,Unit
2016,1,rice,Dakar,SN-DK,14.69,-17.44,350,XOF/kg
2016,1,rice,Dakar,SN-DK,14.69,-17.44,370,XOF/kg
2016,1,millet,Dakar,SN-DK,14.69,-17.44,,XOF/kg
2016,1,  local   maize ,Kaolack,SN-KL,14.15,-16.07,190,
2016,1,rice,Matam,SN-MT,,,400,XOF/kg
2015,12,rice,Dakar,SN-DK,14.69,-17.44,340,XOF/kg
";

const VALUE_CHAIN_CSV: &str = "\
commodity,price_farm,price_retail,distance_to_market_km,road_density,storage_availability
maize,40,65,80,2.0,1
maize,42,67,150,0.5,0
rice,60,100,60,1.2,1
millet,180,240,95,0.8,0
onion,150,260,40,1.5,1
";

const RETAIL_CSV: &str = "\
year,month,market,market_id,latitude,longitude,commodity_retail,price_retail,unit2_retail
2016,1,Dakar Castors,101,14.71,-17.45,rice,400,KG
2016,1,Dakar Castors,101,14.71,-17.45,Rice,420,KG
2016,1,Dakar Castors,101,14.71,-17.45,millet,,KG
2016,1,Kaolack,205,14.14,-16.08,Rice,380,KG
";

const SURVEY: &str = "Rice price in Dakar is XOF 370 this week. Roads were dry. \
Millet price at the weekly market in Kaolack is FCFA 225.5!";

const TRAVEL_ASC: &str = "ncols 2\nnrows 2\nxllcorner -17.5\nyllcorner 12.3\ncellsize 1\nNODATA_value -9999\n5 45\n-9999 2000\n";

fn write(project: &Path, relative: &str, content: &[u8]) {
    let path = project.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn seeded_project(temp_dir: &TempDir) -> std::path::PathBuf {
    let report = ProjectLayout::default().create(temp_dir.path(), false).unwrap();
    let project = report.project_dir;

    write(&project, "data/processed/merged_prices.csv", PRICES_CSV.as_bytes());
    write(&project, "data/processed/value_chain.csv", VALUE_CHAIN_CSV.as_bytes());
    write(&project, "data/processed/retail_prices.csv", RETAIL_CSV.as_bytes());
    write(&project, "data/raw/market_survey.txt", SURVEY.as_bytes());
    write(
        &project,
        "data/geo/markets.geojson",
        &serde_json::to_vec(&markets_to_geojson(&sample_markets())).unwrap(),
    );
    write(
        &project,
        "data/geo/roads.geojson",
        &serde_json::to_vec(&roads_to_geojson(&sample_roads())).unwrap(),
    );
    write(&project, "data/geo/travel_time.asc", TRAVEL_ASC.as_bytes());
    project
}

fn zip_entry(archive: &mut zip::ZipArchive<std::io::Cursor<Vec<u8>>>, name: &str) -> String {
    let mut file = archive.by_name(name).unwrap();
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    content
}

#[tokio::test]
async fn test_end_to_end_project_run() {
    let temp_dir = TempDir::new().unwrap();
    let project = seeded_project(&temp_dir);
    let root = project.to_str().unwrap().to_string();

    let config = ProjectConfig::for_root(root.clone());
    let pipeline = MarginPipeline::new(LocalStorage::new(root.clone()), config).unwrap();
    let engine = EtlEngine::new_with_monitoring(pipeline, false);

    let output_path = engine.run().await.unwrap();
    assert_eq!(output_path, "outputs/reports/agrifood_outputs.zip");

    let zip_data = std::fs::read(project.join(&output_path)).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_data)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();

    for expected in [
        "maps/regions.geojson",
        "maps/market_prices.geojson",
        "maps/markets.geojson",
        "maps/roads.geojson",
        "plots/travel_time.ppm",
        "models/net_margin_model.json",
        "reports/net_margins.csv",
        "reports/extracted_prices.csv",
        "reports/summary.json",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {} in {:?}", expected, names);
        assert!(project.join("outputs").join(expected).is_file());
    }

    // 預設期間為最新年份與最新月份 (2016, 12)，此資料沒有該期間
    assert!(!names.contains(&"reports/commodity_details.csv".to_string()));
    let summary: serde_json::Value = serde_json::from_str(&zip_entry(&mut archive, "reports/summary.json")).unwrap();
    assert_eq!(summary["map"]["year"], 2016);
    assert_eq!(summary["map"]["month"], 12);
    assert_eq!(summary["map"]["regions"], 0);
    assert_eq!(summary["price_table"]["rows"], 6);
    assert_eq!(summary["price_table"]["duplicates_merged"], 1);
    assert_eq!(summary["retail_table"]["rows"], 4);
    assert_eq!(summary["retail_table"]["duplicates_merged"], 1);
    assert_eq!(summary["retail_map"]["markets"], 0);
    assert_eq!(summary["margins"]["rows"], 5);
    assert_eq!(summary["model"]["n_test"], 2);
    assert_eq!(summary["extracted_prices"], 2);
    assert_eq!(summary["markets"], 2);
    assert_eq!(summary["rasters"][0]["stats"]["valid_cells"], 3);
    assert!(chrono::DateTime::parse_from_rfc3339(summary["generated_at"].as_str().unwrap()).is_ok());

    let extracted = zip_entry(&mut archive, "reports/extracted_prices.csv");
    assert!(extracted.contains("rice,Dakar,370.0,XOF"));
    assert!(extracted.contains("millet,Kaolack,225.5,FCFA"));

    let model_json = std::fs::read(project.join("outputs/models/net_margin_model.json")).unwrap();
    let model = GradientBoostingRegressor::from_json(&model_json).unwrap();
    assert_eq!(model.trees.len(), 100);
}

#[tokio::test]
async fn test_configured_period_builds_region_map() {
    let temp_dir = TempDir::new().unwrap();
    let project = seeded_project(&temp_dir);
    let root = project.to_str().unwrap().to_string();

    let mut config = ProjectConfig::for_root(root.clone());
    config.map.year = Some(2016);
    config.map.month = Some(1);

    let pipeline = MarginPipeline::new(LocalStorage::new(root.clone()), config).unwrap();
    EtlEngine::new(pipeline).run().await.unwrap();

    let regions: serde_json::Value =
        serde_json::from_slice(&std::fs::read(project.join("outputs/maps/regions.geojson")).unwrap()).unwrap();
    let features = regions["features"].as_array().unwrap();
    assert_eq!(features.len(), 2);

    let dakar = &features[0]["properties"];
    assert_eq!(dakar["region_name"], "Dakar");
    assert_eq!(dakar["commodity_count"], 2);
    assert_eq!(dakar["popup"][0], "Rice: 360.00 XOF/kg");
    assert_eq!(dakar["popup"][1], "Millet: Price not available");

    let kaolack = &features[1]["properties"];
    assert_eq!(kaolack["popup"][0], "Local Maize: 190.00 Unknown");

    let retail: serde_json::Value =
        serde_json::from_slice(&std::fs::read(project.join("outputs/maps/market_prices.geojson")).unwrap()).unwrap();
    let markets = retail["features"].as_array().unwrap();
    assert_eq!(markets.len(), 2);
    let castors = &markets[0]["properties"];
    assert_eq!(castors["market"], "Dakar Castors");
    assert_eq!(castors["color"], "green");
    assert_eq!(castors["radius"], 9.0);
    assert_eq!(castors["tooltip"], "Dakar Castors: 2 retail commodities (Market)");
    assert_eq!(castors["popup"][0], "Rice: 410.00 KG");
    assert_eq!(castors["popup"][1], "Millet: Price not available");

    let details = std::fs::read_to_string(project.join("outputs/reports/commodity_details.csv")).unwrap();
    let lines: Vec<&str> = details.lines().collect();
    assert_eq!(lines[0], "region,commodity,price,unit");
    assert_eq!(lines[1], "Dakar,Millet,N/A,XOF/kg");
    assert!(lines.contains(&"Matam,Rice,400.00,XOF/kg"));

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(project.join("outputs/reports/summary.json")).unwrap()).unwrap();
    assert_eq!(summary["map"]["skipped_without_coordinates"], 1);
    assert_eq!(summary["map"]["month_name"], "January");
}

#[tokio::test]
async fn test_invalid_price_table_fails_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let project = seeded_project(&temp_dir);
    write(&project, "data/processed/merged_prices.csv", b"Year,Price\n2016,10\n");

    let root = project.to_str().unwrap().to_string();
    let pipeline = MarginPipeline::new(LocalStorage::new(root.clone()), ProjectConfig::for_root(root)).unwrap();
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("Commodity"), "{}", message);
    assert!(message.contains("Régions Name"), "{}", message);
    assert!(!project.join("outputs/reports/agrifood_outputs.zip").exists());
}
