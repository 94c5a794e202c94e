use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::{API_SOURCE, CSV_SOURCE, JSON_SOURCE};
use crate::error::{EtlError, Result};
use crate::extract::SourceSpec;
use crate::load::{JsonLayout, OutputFormat};
use crate::transform::FillStrategy;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Everything one batch run needs: where the data comes from, how it is
/// cleaned and combined, and what gets written where. Loaded from
/// `config.toml`; any omitted section falls back to the built-in layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: Vec<SourceSpec>,
    pub http: HttpConfig,
    pub transform: TransformConfig,
    pub combine: CombineConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Canonical replacements for the country column, applied after
    /// trimming and lowercasing.
    pub country_aliases: HashMap<String, String>,
    /// Null policy for the age column: `mean`, `median` or `drop_row`.
    pub age_fill: String,
    /// Per-source column renames applied right after name normalization.
    pub renames: HashMap<String, Vec<(String, String)>>,
    /// Columns parsed into timestamps after standardization.
    pub timestamp_columns: Vec<TimestampColumn>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimestampColumn {
    pub column: String,
    /// chrono format string, e.g. `%Y-%m-%d`.
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    /// Cross-source de-duplication key; must exist in every
    /// standardized table.
    pub join_key: String,
    /// Column layout of the combined table, before the source tag.
    pub unified_columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub artifacts: Vec<ArtifactSpec>,
    pub run_log: PathBuf,
    pub separator: char,
    pub json_layout: JsonLayout,
    pub json_indent: usize,
    pub sheet_name: String,
    pub include_index: bool,
}

/// One persisted output file: `{output.directory}/{name}.{ext}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    pub format: OutputFormat,
}

impl PipelineConfig {
    /// Load from the given path, or from `config.toml` when none is
    /// given. A missing default file falls back to the built-in
    /// configuration; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.name() == name)
    }

    /// Restrict the source list to `names`, preserving config order.
    /// Naming a source the config does not declare is an error.
    pub fn select_sources(&self, names: &[String]) -> Result<Vec<SourceSpec>> {
        for name in names {
            if self.source(name).is_none() {
                return Err(EtlError::Config(format!(
                    "unknown source '{}'; configured sources: {:?}",
                    name,
                    self.sources.iter().map(|s| s.name()).collect::<Vec<_>>()
                )));
            }
        }
        Ok(self
            .sources
            .iter()
            .filter(|s| names.iter().any(|n| n == s.name()))
            .cloned()
            .collect())
    }
}

impl TransformConfig {
    pub fn age_fill_strategy(&self) -> Result<FillStrategy> {
        match self.age_fill.as_str() {
            "mean" => Ok(FillStrategy::Mean),
            "median" => Ok(FillStrategy::Median),
            "drop_row" => Ok(FillStrategy::DropRow),
            other => Err(EtlError::Config(format!(
                "unknown age_fill strategy '{other}' (expected mean, median or drop_row)"
            ))),
        }
    }
}

impl OutputConfig {
    pub fn artifact_path(&self, artifact: &ArtifactSpec) -> PathBuf {
        self.directory
            .join(format!("{}.{}", artifact.name, artifact.format.extension()))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            http: HttpConfig::default(),
            transform: TransformConfig::default(),
            combine: CombineConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            max_attempts: 3,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        let mut country_aliases = HashMap::new();
        country_aliases.insert("españa".to_string(), "spain".to_string());

        let mut renames = HashMap::new();
        renames.insert(
            API_SOURCE.to_string(),
            vec![
                ("firstname".to_string(), "first_name".to_string()),
                ("lastname".to_string(), "last_name".to_string()),
            ],
        );

        Self {
            country_aliases,
            age_fill: "mean".to_string(),
            renames,
            timestamp_columns: Vec::new(),
        }
    }
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            join_key: "email".to_string(),
            unified_columns: vec![
                "name".to_string(),
                "email".to_string(),
                "age".to_string(),
                "country".to_string(),
            ],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            artifacts: vec![
                ArtifactSpec {
                    name: "final_users".to_string(),
                    format: OutputFormat::Delimited,
                },
                ArtifactSpec {
                    name: "final_users".to_string(),
                    format: OutputFormat::Json,
                },
                ArtifactSpec {
                    name: "final_users".to_string(),
                    format: OutputFormat::Spreadsheet,
                },
            ],
            run_log: PathBuf::from("etl_log.txt"),
            separator: ',',
            json_layout: JsonLayout::Records,
            json_indent: 2,
            sheet_name: "users".to_string(),
            include_index: false,
        }
    }
}

fn default_sources() -> Vec<SourceSpec> {
    vec![
        SourceSpec::Delimited {
            name: CSV_SOURCE.to_string(),
            path: PathBuf::from("data/users.csv"),
            separator: ',',
        },
        SourceSpec::Json {
            name: JSON_SOURCE.to_string(),
            path: PathBuf::from("data/users_extra.json"),
        },
        SourceSpec::Remote {
            name: API_SOURCE.to_string(),
            url: "https://dummyjson.com/users".to_string(),
            limit: 10,
            list_field: "users".to_string(),
        },
    ]
}
