use agrifood_margins::config::toml_config::DEFAULT_CONFIG_FILE;
use agrifood_margins::config::Command;
use agrifood_margins::core::extraction::PriceExtractor;
use agrifood_margins::core::geo::{markets_to_geojson, roads_to_geojson, sample_markets, sample_roads};
use agrifood_margins::core::margin::{compute_margins, read_inputs, sample_inputs, CostCoefficients};
use agrifood_margins::core::model::{train, ModelParams};
use agrifood_margins::core::raster::{compute_stats, synthetic_cost_surface};
use agrifood_margins::domain::model::{Grid, MarginInput};
use agrifood_margins::utils::csv_out::to_csv;
use agrifood_margins::utils::{logger, validation::Validate};
use agrifood_margins::{
    CliConfig, DatasetFetcher, EtlEngine, EtlError, LocalStorage, MarginPipeline, ProjectConfig,
    ProjectLayout, Result,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FETCH_TIMEOUT_SECS: u64 = 300;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = execute(cli.command).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = e.severity().exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn execute(command: Command) -> Result<()> {
    match command {
        Command::Scaffold {
            root,
            name,
            force,
            archive,
        } => {
            let layout = ProjectLayout::default().with_base_name(name);
            let report = layout.create(&root, force)?;
            println!("✅ Project at {}", report.project_dir.display());
            println!(
                "   {} directories, {} files created, {} existing files kept",
                report.created_dirs.len(),
                report.created_files.len(),
                report.kept_files.len()
            );
            if archive {
                let path = layout.write_archive(&root)?;
                println!("📦 Archive: {}", path.display());
            }
            Ok(())
        }

        Command::Verify { project } => {
            let report = ProjectLayout::default().verify(&project);
            for dir in &report.missing_dirs {
                println!("❌ missing directory: {}", dir);
            }
            for file in &report.missing_files {
                println!("⚠️ missing file: {}", file);
            }
            match &report.requirements {
                Ok(reqs) => println!("✅ requirements.txt: {} packages", reqs.len()),
                Err(e) => println!("❌ requirements.txt: {}", e),
            }
            if report.is_ok() {
                println!("✅ {} is complete", project.display());
                Ok(())
            } else {
                Err(EtlError::validation(format!(
                    "{} is incomplete",
                    project.display()
                )))
            }
        }

        Command::Run {
            config,
            project,
            monitor,
            dry_run,
            year,
            month,
            commodities,
        } => {
            let mut config = load_project_config(config.as_deref(), project.as_deref())?;
            if year.is_some() {
                config.map.year = year;
            }
            if month.is_some() {
                config.map.month = month;
            }
            if !commodities.is_empty() {
                config.map.commodities = commodities;
            }
            config.monitoring.enabled |= monitor;

            // 驗證配置
            config.validate()?;

            if dry_run {
                print_plan(&config);
                return Ok(());
            }

            let monitor_enabled = config.monitoring.enabled;
            if monitor_enabled {
                tracing::info!("🔍 System monitoring enabled");
            }

            let storage = LocalStorage::new(config.project.root.clone());
            let root = config.project.root.clone();
            let pipeline = MarginPipeline::new(storage, config)?;
            let engine = EtlEngine::new_with_monitoring(pipeline, monitor_enabled);

            let output_path = engine.run().await?;
            let full_path = Path::new(&root).join(&output_path);
            tracing::info!("✅ Run completed successfully!");
            println!("✅ Run completed successfully!");
            println!("📁 Outputs bundled in: {}", full_path.display());
            Ok(())
        }

        Command::Extract { input, currencies } => {
            let text = std::fs::read_to_string(&input)?;
            let extractor = if currencies.is_empty() {
                PriceExtractor::default()
            } else {
                PriceExtractor::new(&currencies)?
            };
            let prices = extractor.extract(&text);
            tracing::info!("Extracted {} prices from {}", prices.len(), input.display());
            print!("{}", to_csv(&prices)?);
            Ok(())
        }

        Command::Margins { input, output } => {
            let inputs = margin_inputs(input.as_deref())?;
            let margins = compute_margins(&inputs, &CostCoefficients::default())?;
            let csv = to_csv(&margins)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    println!("📁 {} margins written to {}", margins.len(), path.display());
                }
                None => print!("{}", csv),
            }
            Ok(())
        }

        Command::Train {
            input,
            output,
            seed,
        } => {
            let inputs = margin_inputs(input.as_deref())?;
            let margins = compute_margins(&inputs, &CostCoefficients::default())?;
            let params = ModelParams {
                seed,
                ..ModelParams::default()
            };
            let (model, report) = train(&margins, &params)?;
            std::fs::write(&output, model.to_json()?)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("📁 Model saved to {}", output.display());
            Ok(())
        }

        Command::RasterStats {
            input,
            palette,
            image,
        } => {
            let grid = Grid::from_ascii(&std::fs::read_to_string(&input)?)?;
            let palette = palette.palette();
            let stats = compute_stats(&grid)?;
            let bounds = grid.bounds();
            let report = serde_json::json!({
                "name": palette.name,
                "unit": palette.unit,
                "bounds": bounds,
                "image_bounds": bounds.image_bounds(),
                "stats": stats,
                "legend": palette.legend(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(path) = image {
                std::fs::write(&path, grid.render_ppm(&palette))?;
                println!("🖼️ Rendered {}", path.display());
            }
            Ok(())
        }

        Command::Fetch { config } => {
            let config = ProjectConfig::from_file(&config)?;
            config.validate()?;
            if config.sources.is_empty() {
                tracing::warn!("No [[sources]] configured, nothing to fetch");
                return Ok(());
            }
            let fetcher = DatasetFetcher::with_timeout(
                LocalStorage::new(config.project.root.clone()),
                Duration::from_secs(FETCH_TIMEOUT_SECS),
            )?;
            for outcome in fetcher.fetch_all(&config.sources).await? {
                println!("✅ {} → {} ({} bytes)", outcome.name, outcome.destination, outcome.bytes);
            }
            Ok(())
        }

        Command::Synth { output_dir, seed } => {
            std::fs::create_dir_all(&output_dir)?;
            let files: [(PathBuf, Vec<u8>); 3] = [
                (
                    output_dir.join("roads.geojson"),
                    serde_json::to_vec_pretty(&roads_to_geojson(&sample_roads()))?,
                ),
                (
                    output_dir.join("markets.geojson"),
                    serde_json::to_vec_pretty(&markets_to_geojson(&sample_markets()))?,
                ),
                (
                    output_dir.join("travel_time.asc"),
                    synthetic_cost_surface(seed).to_ascii().into_bytes(),
                ),
            ];
            for (path, data) in files {
                std::fs::write(&path, data)?;
                println!("✅ Created: {}", path.display());
            }
            Ok(())
        }
    }
}

/// Explicit file, else `<project>/agrifood.toml` when present, else defaults rooted at the project.
fn load_project_config(path: Option<&Path>, project: Option<&Path>) -> Result<ProjectConfig> {
    if let Some(path) = path {
        tracing::info!("Loading configuration from {}", path.display());
        return ProjectConfig::from_file(path);
    }

    let root = project.unwrap_or_else(|| Path::new("."));
    let candidate = root.join(DEFAULT_CONFIG_FILE);
    let mut config = if candidate.is_file() {
        tracing::info!("Loading configuration from {}", candidate.display());
        ProjectConfig::from_file(&candidate)?
    } else {
        tracing::info!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
        ProjectConfig::default()
    };
    if project.is_some() || !candidate.is_file() {
        config.project.root = root.to_string_lossy().into_owned();
    }
    Ok(config)
}

fn margin_inputs(input: Option<&Path>) -> Result<Vec<MarginInput>> {
    match input {
        Some(path) => read_inputs(&std::fs::read(path)?),
        None => {
            tracing::info!("No input given, using the sample value-chain rows");
            Ok(sample_inputs())
        }
    }
}

fn print_plan(config: &ProjectConfig) {
    let root = Path::new(&config.project.root);
    println!("🔎 Dry run for {} (root: {})", config.project.name, root.display());

    let d = &config.data;
    let inputs = [
        ("prices", &d.prices),
        ("retail prices", &d.retail_prices),
        ("margin inputs", &d.margin_inputs),
        ("survey text", &d.survey_text),
        ("markets", &d.markets),
        ("roads", &d.roads),
        ("travel time", &d.travel_time),
        ("friction", &d.friction),
    ];
    for (label, path) in inputs {
        match path {
            Some(p) if root.join(p).is_file() => println!("   ✅ {:<14} {}", label, p),
            Some(p) => println!("   ⚠️ {:<14} {} (missing, will be skipped)", label, p),
            None => println!("   -  {:<14} not configured", label),
        }
    }

    let period = match (config.map.year, config.map.month) {
        (Some(y), Some(m)) => format!("{}-{:02}", y, m),
        (Some(y), None) => format!("{} (latest month)", y),
        (None, Some(m)) => format!("latest year, month {}", m),
        (None, None) => "latest year and month".to_string(),
    };
    println!("   map period: {}", period);
    println!("   bundle: {}", config.archive_path());
}
