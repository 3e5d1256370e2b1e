//! Project skeleton for the Senegal agrifood cost-margin analysis.
//!
//! Creates the data/notebook/script/dashboard/output tree, checks an existing
//! tree for completeness and bundles it as a zip archive.

use crate::utils::error::{EtlError, Result};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zip::write::{SimpleFileOptions, ZipWriter};

pub const DEFAULT_BASE_NAME: &str = "agrifood-cost-margin-senegal";

const DIRECTORIES: &[&str] = &[
    "data/raw/",
    "data/processed/",
    "data/geo/",
    "notebooks/",
    "scripts/",
    "dashboard/",
    "outputs/plots/",
    "outputs/models/",
    "outputs/maps/",
    "outputs/reports/",
    "config/",
    "docs/",
];

const FILES: &[&str] = &[
    "notebooks/01_eda.ipynb",
    "notebooks/02_nlp_extraction.ipynb",
    "notebooks/03_model_training.ipynb",
    "notebooks/04_geospatial_analysis.ipynb",
    "scripts/agrifood_pipeline.py",
    "scripts/preprocess.py",
    "scripts/model.py",
    "scripts/visualize.py",
    "dashboard/streamlit_app.py",
    "config/config.yaml",
    "docs/value_chain_diagrams.pdf",
    ".gitignore",
    "requirements.txt",
    "README.md",
    "LICENSE",
];

/// Directories a usable project must have, whatever else it contains.
const REQUIRED_DIRECTORIES: &[&str] = &[
    "data/raw",
    "data/processed",
    "data/geo",
    "notebooks",
    "scripts",
    "dashboard",
    "outputs",
    "config",
    "docs",
];

/// Packages the analysis notebooks and dashboard import.
const DEFAULT_REQUIREMENTS: &[&str] = &[
    "pandas>=2.0",
    "numpy>=1.24",
    "openpyxl>=3.1",
    "matplotlib>=3.7",
    "geopandas>=0.14",
    "shapely>=2.0",
    "rasterio>=1.3",
    "spacy>=3.7",
    "scikit-learn>=1.3",
    "joblib>=1.3",
    "streamlit>=1.30",
    "folium>=0.15",
    "streamlit-folium>=0.15",
    "Pillow>=10.0",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub base_name: String,
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_BASE_NAME.to_string(),
            directories: DIRECTORIES.iter().map(|d| d.to_string()).collect(),
            files: FILES.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaffoldReport {
    pub project_dir: PathBuf,
    pub created_dirs: Vec<String>,
    pub created_files: Vec<String>,
    pub kept_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub missing_dirs: Vec<String>,
    pub missing_files: Vec<String>,
    pub requirements: std::result::Result<Vec<Requirement>, String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.missing_dirs.is_empty() && self.missing_files.is_empty() && self.requirements.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifier: Option<String>,
}

impl ProjectLayout {
    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    pub fn project_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.base_name)
    }

    /// Creates the project tree under `root`. Existing files are kept unless `force` is set.
    pub fn create(&self, root: &Path, force: bool) -> Result<ScaffoldReport> {
        let project_dir = self.project_dir(root);
        fs::create_dir_all(&project_dir)?;

        let mut report = ScaffoldReport {
            project_dir: project_dir.clone(),
            ..ScaffoldReport::default()
        };

        for dir in &self.directories {
            let path = project_dir.join(dir);
            if !path.is_dir() {
                fs::create_dir_all(&path)?;
                report.created_dirs.push(dir.trim_end_matches('/').to_string());
            }
        }

        for file in &self.files {
            let path = project_dir.join(file);
            if path.exists() && !force {
                tracing::debug!("Keeping existing file {}", file);
                report.kept_files.push(file.clone());
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, self.initial_content(file))?;
            report.created_files.push(file.clone());
        }

        tracing::info!(
            "📁 Scaffolded {} ({} dirs, {} files created, {} kept)",
            project_dir.display(),
            report.created_dirs.len(),
            report.created_files.len(),
            report.kept_files.len()
        );
        Ok(report)
    }

    fn initial_content(&self, file: &str) -> String {
        match file {
            "requirements.txt" => {
                let mut content = DEFAULT_REQUIREMENTS.join("\n");
                content.push('\n');
                content
            }
            "README.md" => self.readme(),
            _ => String::new(),
        }
    }

    fn readme(&self) -> String {
        let mut out = format!("# {}\n\n", self.base_name);
        out.push_str(
            "Cost and margin analysis of agrifood value chains in Senegal: \
             price extraction from survey text, margin modelling, geospatial \
             access layers and an interactive dashboard.\n\n## Layout\n\n```\n",
        );
        for dir in &self.directories {
            out.push_str(dir);
            out.push('\n');
        }
        out.push_str("```\n");
        out
    }

    /// Checks `project_dir` for the required layout and a parsable `requirements.txt`.
    pub fn verify(&self, project_dir: &Path) -> VerifyReport {
        let mut missing_dirs: Vec<String> = REQUIRED_DIRECTORIES
            .iter()
            .map(|d| d.to_string())
            .chain(
                self.directories
                    .iter()
                    .map(|d| d.trim_end_matches('/').to_string()),
            )
            .filter(|d| !project_dir.join(d).is_dir())
            .collect();
        missing_dirs.sort();
        missing_dirs.dedup();

        let missing_files = self
            .files
            .iter()
            .filter(|f| !project_dir.join(f).is_file())
            .cloned()
            .collect();

        let requirements = match fs::read_to_string(project_dir.join("requirements.txt")) {
            Ok(text) => parse_requirements(&text).map_err(|e| e.to_string()),
            Err(e) => Err(format!("requirements.txt unreadable: {}", e)),
        };

        VerifyReport {
            missing_dirs,
            missing_files,
            requirements,
        }
    }

    /// Zips the generated tree. Entry names start with the project directory name.
    pub fn archive(&self, root: &Path) -> Result<Vec<u8>> {
        let project_dir = self.project_dir(root);
        if !project_dir.is_dir() {
            return Err(EtlError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", project_dir.display()),
            )));
        }

        let mut entries = Vec::new();
        collect_entries(&project_dir, &mut entries)?;
        entries.sort();

        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        zip.add_directory(format!("{}/", self.base_name), options)?;
        for path in entries {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| EtlError::processing(e.to_string()))?;
            // zip 內統一使用 '/' 分隔
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if path.is_dir() {
                zip.add_directory(format!("{}/", name), options)?;
            } else {
                zip.start_file(name, options)?;
                zip.write_all(&fs::read(&path)?)?;
            }
        }

        let cursor = zip.finish()?;
        Ok(cursor.into_inner())
    }

    /// Writes `<root>/<base_name>.zip` and returns its path.
    pub fn write_archive(&self, root: &Path) -> Result<PathBuf> {
        let data = self.archive(root)?;
        let path = root.join(format!("{}.zip", self.base_name));
        fs::write(&path, &data)?;
        tracing::info!("✅ Created: {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }
}

fn collect_entries(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            out.push(path.clone());
            collect_entries(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn requirement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[(?P<extras>[A-Za-z0-9._,\s-]*)\])?\s*(?P<spec>(?:===|==|!=|~=|>=|<=|>|<)\s*[A-Za-z0-9.*+!_-]+(?:\s*,\s*(?:===|==|!=|~=|>=|<=|>|<)\s*[A-Za-z0-9.*+!_-]+)*)?\s*$",
        )
        .expect("requirement pattern is valid")
    })
}

/// Parses a pip `requirements.txt`. An empty dependency list is an error.
pub fn parse_requirements(text: &str) -> Result<Vec<Requirement>> {
    let mut requirements = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = match raw.find(" #").or_else(|| raw.starts_with('#').then_some(0)) {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }

        // 環境標記 (例如 ; python_version < "3.11") 不影響套件名稱
        let requirement = line.split(';').next().unwrap_or(line).trim();

        let caps = requirement_regex()
            .captures(requirement)
            .ok_or_else(|| EtlError::parse("requirements.txt", line_no, format!("invalid requirement '{}'", line)))?;

        let extras = caps
            .name("extras")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        requirements.push(Requirement {
            name: caps["name"].to_string(),
            extras,
            specifier: caps
                .name("spec")
                .map(|m| m.as_str().split_whitespace().collect::<String>()),
        });
    }

    if requirements.is_empty() {
        return Err(EtlError::validation("requirements.txt is empty"));
    }
    Ok(requirements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_verify() {
        let root = TempDir::new().unwrap();
        let layout = ProjectLayout::default();

        let report = layout.create(root.path(), false).unwrap();
        assert_eq!(report.created_files.len(), 15);
        assert_eq!(report.created_dirs.len(), 12);

        let verify = layout.verify(&report.project_dir);
        assert!(verify.is_ok(), "{:?}", verify);
        assert_eq!(verify.requirements.unwrap().len(), DEFAULT_REQUIREMENTS.len());
    }

    #[test]
    fn test_create_keeps_existing_files_unless_forced() {
        let root = TempDir::new().unwrap();
        let layout = ProjectLayout::default();
        let dir = layout.project_dir(root.path());
        fs::create_dir_all(dir.join("scripts")).unwrap();
        fs::write(dir.join("scripts/model.py"), "print('hi')").unwrap();

        let report = layout.create(root.path(), false).unwrap();
        assert_eq!(report.kept_files, vec!["scripts/model.py".to_string()]);
        assert_eq!(fs::read_to_string(dir.join("scripts/model.py")).unwrap(), "print('hi')");

        layout.create(root.path(), true).unwrap();
        assert_eq!(fs::read_to_string(dir.join("scripts/model.py")).unwrap(), "");
    }

    #[test]
    fn test_verify_reports_missing_pieces() {
        let root = TempDir::new().unwrap();
        let layout = ProjectLayout::default();
        let report = layout.create(root.path(), false).unwrap();

        fs::remove_dir_all(report.project_dir.join("data/geo")).unwrap();
        fs::write(report.project_dir.join("requirements.txt"), "").unwrap();

        let verify = layout.verify(&report.project_dir);
        assert!(!verify.is_ok());
        assert_eq!(verify.missing_dirs, vec!["data/geo".to_string()]);
        assert!(verify.missing_files.is_empty());
        assert!(verify.requirements.unwrap_err().contains("empty"));
    }

    #[test]
    fn test_archive_entries_are_prefixed_with_base_name() {
        let root = TempDir::new().unwrap();
        let layout = ProjectLayout::default();
        layout.create(root.path(), false).unwrap();

        let data = layout.archive(root.path()).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();

        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"agrifood-cost-margin-senegal/scripts/model.py".to_string()));
        assert!(names.contains(&"agrifood-cost-margin-senegal/data/raw/".to_string()));
        assert!(names.iter().all(|n| n.starts_with("agrifood-cost-margin-senegal/")));

        let mut reqs = String::new();
        archive
            .by_name("agrifood-cost-margin-senegal/requirements.txt")
            .unwrap()
            .read_to_string(&mut reqs)
            .unwrap();
        assert!(reqs.contains("pandas"));
    }

    #[test]
    fn test_parse_requirements_accepts_pip_syntax() {
        let text = "\
# core
pandas>=2.0,<3
streamlit-folium
uvicorn[standard] == 0.29.0
-r extra.txt
tomli ; python_version < \"3.11\"
numpy  # pinned by pandas
";
        let reqs = parse_requirements(text).unwrap();
        let names: Vec<&str> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["pandas", "streamlit-folium", "uvicorn", "tomli", "numpy"]);
        assert_eq!(reqs[0].specifier.as_deref(), Some(">=2.0,<3"));
        assert_eq!(reqs[2].extras, vec!["standard".to_string()]);
        assert_eq!(reqs[2].specifier.as_deref(), Some("==0.29.0"));
        assert!(reqs[1].specifier.is_none());
    }

    #[test]
    fn test_parse_requirements_rejects_garbage() {
        let err = parse_requirements("pandas\n!!not a package\n").unwrap_err();
        match err {
            EtlError::ParseError { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(parse_requirements("# only comments\n\n").is_err());
    }
}
