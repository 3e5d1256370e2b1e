pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use crate::core::scaffold::DEFAULT_BASE_NAME;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "agrifood")]
#[command(about = "Project scaffolding and cost-margin analysis for agrifood value chains")]
pub struct CliConfig {
    #[arg(long, short, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the project tree and its placeholder files
    Scaffold {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long, default_value = DEFAULT_BASE_NAME)]
        name: String,
        #[arg(long, help = "Overwrite existing placeholder files")]
        force: bool,
        #[arg(long, help = "Also write <name>.zip next to the project")]
        archive: bool,
    },
    /// Check an existing project tree and its requirements.txt
    Verify {
        #[arg(default_value = DEFAULT_BASE_NAME)]
        project: PathBuf,
    },
    /// Run the full pipeline and bundle the outputs
    Run {
        #[arg(long, short)]
        config: Option<PathBuf>,
        #[arg(long, help = "Project directory when no config file is given")]
        project: Option<PathBuf>,
        #[arg(long, help = "Enable system monitoring")]
        monitor: bool,
        #[arg(long, help = "Validate configuration and list inputs without running")]
        dry_run: bool,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        #[arg(long = "commodity")]
        commodities: Vec<String>,
    },
    /// Extract commodity prices from a survey text file
    Extract {
        input: PathBuf,
        #[arg(long = "currency", value_delimiter = ',')]
        currencies: Vec<String>,
    },
    /// Compute net margins from a value-chain CSV (sample rows when omitted)
    Margins {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Train the net-margin model and save it as JSON
    Train {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value = "net_margin_model.json")]
        output: PathBuf,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Print statistics of an ASCII grid raster and optionally render it
    RasterStats {
        input: PathBuf,
        #[arg(long, value_enum, default_value = "travel-time")]
        palette: PaletteKind,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Download the datasets listed under [[sources]]
    Fetch {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Write synthetic roads, markets and a cost surface for demos
    Synth {
        #[arg(long, default_value = "data/geo")]
        output_dir: PathBuf,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaletteKind {
    TravelTime,
    Friction,
}

#[cfg(feature = "cli")]
impl PaletteKind {
    pub fn palette(self) -> crate::core::raster::Palette {
        match self {
            PaletteKind::TravelTime => crate::core::raster::Palette::travel_time(),
            PaletteKind::Friction => crate::core::raster::Palette::friction(),
        }
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = CliConfig::parse_from([
            "agrifood", "run", "--config", "agrifood.toml", "--year", "2016", "--month", "1",
            "--commodity", "Rice", "--commodity", "Millet", "--dry-run", "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Run {
                config,
                year,
                month,
                commodities,
                dry_run,
                monitor,
                ..
            } => {
                assert_eq!(config, Some(PathBuf::from("agrifood.toml")));
                assert_eq!((year, month), (Some(2016), Some(1)));
                assert_eq!(commodities, vec!["Rice", "Millet"]);
                assert!(dry_run);
                assert!(!monitor);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_month_out_of_range_is_rejected() {
        assert!(CliConfig::try_parse_from(["agrifood", "run", "--month", "13"]).is_err());
    }

    #[test]
    fn test_scaffold_defaults() {
        let cli = CliConfig::parse_from(["agrifood", "scaffold"]);
        match cli.command {
            Command::Scaffold { root, name, force, archive } => {
                assert_eq!(root, PathBuf::from("."));
                assert_eq!(name, DEFAULT_BASE_NAME);
                assert!(!force && !archive);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_raster_palette_flag() {
        let cli = CliConfig::parse_from(["agrifood", "raster-stats", "f.asc", "--palette", "friction"]);
        match cli.command {
            Command::RasterStats { palette, .. } => assert_eq!(palette, PaletteKind::Friction),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
