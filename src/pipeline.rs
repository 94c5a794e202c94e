//! Batch orchestrator: extract, standardize, combine, enrich, load.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ArtifactSpec, PipelineConfig};
use crate::constants::{INCH_TO_METERS, POUNDS_TO_KG};
use crate::combine::{concat, conform, tag_source};
use crate::error::{EtlError, Result};
use crate::extract::{RemoteClient, ReqwestClient, extract_all_with};
use crate::load::{
    OutputFormat, log_event, timestamp_tag, versioned_path, write_delimited, write_json,
    write_spreadsheet,
};
use crate::table::{CellType, Table};
use crate::transform::{
    CleanRule, clean_text_field, convert_units, deduplicate, derive_bmi, derive_full_name,
    derive_is_adult, fill_nulls, normalize_columns, parse_timestamps, rename_columns,
};

/// Per-source outcome of the extract stage, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub rows: Option<usize>,
    pub error: Option<String>,
}

/// Result of one complete batch run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub sources: Vec<SourceReport>,
    pub combined_rows: usize,
    pub final_rows: usize,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RunOptions {
    /// Restrict the run to these configured sources; `None` runs all.
    pub source_filter: Option<Vec<String>>,
    /// Write artifacts under timestamped names instead of the plain ones.
    pub versioned: bool,
}

/// The batch pipeline. Stages run sequentially; tables move between them
/// by value. Extractor failures are isolated per source, everything
/// after extraction aborts the run on the first error.
pub struct EtlPipeline {
    config: PipelineConfig,
    client: Box<dyn RemoteClient>,
}

impl EtlPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let client = ReqwestClient::new(Duration::from_secs(config.http.timeout_seconds))?;
        Ok(Self {
            config,
            client: Box::new(client),
        })
    }

    /// Same pipeline with a caller-supplied HTTP client, for tests.
    pub fn with_client(config: PipelineConfig, client: Box<dyn RemoteClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole batch: extract every configured source, standardize
    /// and combine what survived, enrich, and write artifacts.
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let combine = &self.config.combine;
        if !combine.unified_columns.contains(&combine.join_key) {
            return Err(EtlError::Config(format!(
                "join key '{}' must be one of the unified columns {:?}",
                combine.join_key, combine.unified_columns
            )));
        }

        log_event(
            &format!("ETL run {run_id} started"),
            &self.config.output.run_log,
        )?;
        info!(%run_id, "ETL run started");
        println!("🚀 Starting ETL run {run_id}");

        match self.run_stages(options).await {
            Ok((sources, combined_rows, final_rows, artifacts, started_at, secs)) => {
                log_event(
                    &format!(
                        "ETL run {run_id} finished: {final_rows} rows, {} artifacts",
                        artifacts.len()
                    ),
                    &self.config.output.run_log,
                )?;
                info!(%run_id, rows = final_rows, "ETL run finished");
                println!("✅ ETL run finished in {secs:.2}s");
                Ok(RunReport {
                    run_id,
                    started_at,
                    duration_seconds: secs,
                    sources,
                    combined_rows,
                    final_rows,
                    artifacts,
                })
            }
            Err(e) => {
                let _ = log_event(
                    &format!("ETL run {run_id} failed: {e}"),
                    &self.config.output.run_log,
                );
                error!(%run_id, error = %e, "ETL run failed");
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        options: &RunOptions,
    ) -> Result<(Vec<SourceReport>, usize, usize, Vec<PathBuf>, DateTime<Utc>, f64)> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let specs = self.selected_sources(&options.source_filter)?;
        println!("📡 Extracting {} sources...", specs.len());
        let outcomes =
            extract_all_with(self.client.as_ref(), &specs, self.config.http.max_attempts).await;

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut extracted: Vec<(String, Table)> = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(table) => {
                    println!("   ✅ {}: {} rows", outcome.name, table.row_count());
                    reports.push(SourceReport {
                        name: outcome.name.clone(),
                        rows: Some(table.row_count()),
                        error: None,
                    });
                    extracted.push((outcome.name, table));
                }
                Err(e) => {
                    println!("   ❌ {}: {e}", outcome.name);
                    log_event(
                        &format!("source {} failed: {e}", outcome.name),
                        &self.config.output.run_log,
                    )?;
                    reports.push(SourceReport {
                        name: outcome.name,
                        rows: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        if extracted.is_empty() {
            return Err(EtlError::Schema(
                "every source failed to extract; nothing to combine".to_string(),
            ));
        }

        println!("🔧 Standardizing {} tables...", extracted.len());
        let mut standardized = Vec::with_capacity(extracted.len());
        for (name, table) in extracted {
            let table = self.standardize(&name, table)?;
            standardized.push((name, table));
        }

        let combined = self.combine_sources(&standardized)?;
        let combined_rows = combined.row_count();
        println!("🔗 Combined into {combined_rows} unique rows");

        let final_table = self.enrich(combined)?;
        let final_rows = final_table.row_count();

        println!("💾 Writing {} artifacts...", self.config.output.artifacts.len());
        let artifacts = self.load(&final_table, options.versioned)?;
        for path in &artifacts {
            println!("   💾 {}", path.display());
        }

        Ok((
            reports,
            combined_rows,
            final_rows,
            artifacts,
            started_at,
            timer.elapsed().as_secs_f64(),
        ))
    }

    /// Extract only, reporting per-source outcomes without combining.
    pub async fn run_extract(
        &self,
        source_filter: &Option<Vec<String>>,
    ) -> Result<Vec<SourceReport>> {
        let specs = self.selected_sources(source_filter)?;
        let outcomes =
            extract_all_with(self.client.as_ref(), &specs, self.config.http.max_attempts).await;
        Ok(outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(table) => SourceReport {
                    name: outcome.name,
                    rows: Some(table.row_count()),
                    error: None,
                },
                Err(e) => SourceReport {
                    name: outcome.name,
                    rows: None,
                    error: Some(e.to_string()),
                },
            })
            .collect())
    }

    /// Extract one configured source as-is, for previewing.
    pub async fn extract_source(&self, name: &str) -> Result<Table> {
        let spec = self.config.source(name).ok_or_else(|| {
            EtlError::Config(format!(
                "unknown source '{}'; configured sources: {:?}",
                name,
                self.config.sources.iter().map(|s| s.name()).collect::<Vec<_>>()
            ))
        })?;
        let outcomes = extract_all_with(
            self.client.as_ref(),
            std::slice::from_ref(spec),
            self.config.http.max_attempts,
        )
        .await;
        match outcomes.into_iter().next() {
            Some(outcome) => outcome.result,
            None => Err(EtlError::Config(format!(
                "source '{name}' produced no outcome"
            ))),
        }
    }

    fn selected_sources(
        &self,
        source_filter: &Option<Vec<String>>,
    ) -> Result<Vec<crate::extract::SourceSpec>> {
        match source_filter {
            Some(names) if !names.is_empty() => self.config.select_sources(names),
            _ => Ok(self.config.sources.clone()),
        }
    }

    /// Bring one extracted table onto the shared vocabulary: normalized
    /// column names, per-source renames, a synthesized `name` column
    /// where the source splits it, cleaned text fields, metric units
    /// with BMI, and parsed timestamp columns. Which steps fire depends
    /// on which columns the source actually has.
    #[instrument(skip(self, table))]
    fn standardize(&self, name: &str, table: Table) -> Result<Table> {
        let cfg = &self.config.transform;
        let mut t = normalize_columns(&table);

        if let Some(mapping) = cfg.renames.get(name) {
            t = rename_columns(&t, mapping);
        }

        if t.column_index("name").is_none()
            && t.column_index("first_name").is_some()
            && t.column_index("last_name").is_some()
        {
            t = derive_full_name(&t, "first_name", "last_name", "name")?;
        }

        if is_str_column(&t, "name") {
            t = clean_text_field(&t, "name", &[CleanRule::Trim, CleanRule::Capitalize])?;
        }
        if is_str_column(&t, "email") {
            t = clean_text_field(
                &t,
                "email",
                &[
                    CleanRule::Trim,
                    CleanRule::Lowercase,
                    CleanRule::ValidateEmail,
                ],
            )?;
        }
        if is_str_column(&t, "country") {
            t = clean_text_field(
                &t,
                "country",
                &[
                    CleanRule::Trim,
                    CleanRule::Lowercase,
                    CleanRule::CollapseAliases(cfg.country_aliases.clone()),
                ],
            )?;
        }

        if t.column_index("height_inch").is_some() {
            t = convert_units(&t, "height_inch", INCH_TO_METERS)?;
            t = rename_columns(&t, &[("height_inch", "height_m")]);
        }
        if t.column_index("weight_lb").is_some() {
            t = convert_units(&t, "weight_lb", POUNDS_TO_KG)?;
            t = rename_columns(&t, &[("weight_lb", "weight_kg")]);
        }
        if t.column_index("height_m").is_some()
            && t.column_index("weight_kg").is_some()
            && t.column_index("bmi").is_none()
        {
            t = derive_bmi(&t, "weight_kg", "height_m", "bmi")?;
        }

        for spec in &cfg.timestamp_columns {
            if t.column_index(&spec.column).is_some() {
                t = parse_timestamps(&t, &spec.column, &spec.format)?;
            }
        }

        info!(rows = t.row_count(), columns = t.column_count(), "source standardized");
        Ok(t)
    }

    /// Conform every standardized table onto the unified column list,
    /// tag provenance, stack them, and drop cross-source duplicates by
    /// the join key. Each table must still be non-empty and carry the
    /// join key; the padding in [`conform`] is for the other columns.
    fn combine_sources(&self, tables: &[(String, Table)]) -> Result<Table> {
        let cfg = &self.config.combine;
        let mut tagged = Vec::with_capacity(tables.len());
        for (name, table) in tables {
            if table.column_index(&cfg.join_key).is_none() {
                return Err(EtlError::Schema(format!(
                    "source '{}' lacks the join key '{}' after standardization",
                    name, cfg.join_key
                )));
            }
            if table.row_count() == 0 {
                return Err(EtlError::Schema(format!(
                    "source '{name}' produced an empty table"
                )));
            }
            let conformed = conform(table, &cfg.unified_columns);
            tagged.push(tag_source(&conformed, name)?);
        }
        let combined = concat(&tagged)?;
        let deduped = deduplicate(&combined, &[cfg.join_key.as_str()])?;
        if deduped.row_count() < combined.row_count() {
            warn!(
                dropped = combined.row_count() - deduped.row_count(),
                key = %cfg.join_key,
                "cross-source duplicates removed"
            );
        }
        Ok(deduped)
    }

    /// Post-combine enrichment: fill the age column per the configured
    /// strategy and flag adults.
    fn enrich(&self, table: Table) -> Result<Table> {
        let mut t = table;
        if t.column_index("age").is_some() {
            let strategy = self.config.transform.age_fill_strategy()?;
            t = fill_nulls(&t, "age", &strategy)?;
            if t.column_index("is_adult").is_none() {
                t = derive_is_adult(&t, "age", "is_adult")?;
            }
        }
        Ok(t)
    }

    fn load(&self, table: &Table, versioned: bool) -> Result<Vec<PathBuf>> {
        let out = &self.config.output;
        // One tag per run, so every artifact of a versioned run sorts together.
        let tag = versioned.then(timestamp_tag);
        let mut written = Vec::with_capacity(out.artifacts.len());
        for artifact in &out.artifacts {
            let base = out.artifact_path(artifact);
            let path = match &tag {
                Some(tag) => versioned_path(&base, tag)?,
                None => base,
            };
            self.write_artifact(table, artifact, &path)?;
            info!(path = %path.display(), rows = table.row_count(), "artifact written");
            written.push(path);
        }
        Ok(written)
    }

    /// Write one artifact with the configured output settings. Versioned
    /// and plain runs both come through here, so the separator, JSON
    /// layout, sheet name, and index flag apply to every destination.
    fn write_artifact(&self, table: &Table, artifact: &ArtifactSpec, path: &Path) -> Result<()> {
        let out = &self.config.output;
        match artifact.format {
            OutputFormat::Delimited => {
                write_delimited(table, path, out.separator, out.include_index)
            }
            OutputFormat::Json => write_json(table, path, out.json_layout, out.json_indent),
            OutputFormat::Spreadsheet => {
                write_spreadsheet(table, path, &out.sheet_name, out.include_index)
            }
        }
    }
}

fn is_str_column(table: &Table, name: &str) -> bool {
    table
        .column_index(name)
        .map(|i| table.schema().columns()[i].ty == CellType::Str)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HttpGetResult;
    use crate::table::{Column, Schema, Value};

    struct NoNetwork;

    #[async_trait::async_trait]
    impl RemoteClient for NoNetwork {
        async fn get(&self, url: &str) -> Result<HttpGetResult> {
            Err(EtlError::remote(url, "network disabled in tests"))
        }
    }

    fn pipeline() -> EtlPipeline {
        EtlPipeline::with_client(PipelineConfig::default(), Box::new(NoNetwork))
    }

    #[test]
    fn standardize_synthesizes_name_and_cleans_fields() {
        let schema = Schema::new(vec![
            Column::new("firstName", CellType::Str),
            Column::new("lastName", CellType::Str),
            Column::new("Email", CellType::Str),
            Column::new("age", CellType::Int),
        ]);
        let table = Table::new(
            schema,
            vec![vec![
                Value::Str("ana".into()),
                Value::Str("garcía".into()),
                Value::Str("  Ana@Example.COM".into()),
                Value::Int(31),
            ]],
        )
        .unwrap();

        let out = pipeline().standardize("api", table).unwrap();
        let name = out.column_index("name").unwrap();
        let email = out.column_index("email").unwrap();
        assert_eq!(out.rows()[0][name], Value::Str("Ana García".into()));
        assert_eq!(out.rows()[0][email], Value::Str("ana@example.com".into()));
    }

    #[test]
    fn standardize_converts_units_and_derives_bmi() {
        let schema = Schema::new(vec![
            Column::new("name", CellType::Str),
            Column::new("height_inch", CellType::Int),
            Column::new("weight_lb", CellType::Int),
        ]);
        let table = Table::new(
            schema,
            vec![vec![
                Value::Str("Ana".into()),
                Value::Int(70),
                Value::Int(154),
            ]],
        )
        .unwrap();

        let out = pipeline().standardize("csv", table).unwrap();
        let h = out.column_index("height_m").unwrap();
        let w = out.column_index("weight_kg").unwrap();
        let b = out.column_index("bmi").unwrap();
        assert_eq!(out.rows()[0][h], Value::Float(1.78));
        assert_eq!(out.rows()[0][w], Value::Float(69.85));
        assert_eq!(out.rows()[0][b], Value::Float(22.05));
    }

    #[test]
    fn combine_requires_the_join_key_in_every_source() {
        let keyless = Table::new(
            Schema::new(vec![Column::new("name", CellType::Str)]),
            vec![vec![Value::Str("Ana".into())]],
        )
        .unwrap();

        let err = pipeline()
            .combine_sources(&[("csv".to_string(), keyless)])
            .unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn combine_tags_concats_and_dedupes_by_email() {
        let make = |email: &str| {
            Table::new(
                Schema::new(vec![
                    Column::new("name", CellType::Str),
                    Column::new("email", CellType::Str),
                    Column::new("age", CellType::Int),
                    Column::new("country", CellType::Str),
                ]),
                vec![vec![
                    Value::Str("Ana".into()),
                    Value::Str(email.into()),
                    Value::Int(31),
                    Value::Str("spain".into()),
                ]],
            )
            .unwrap()
        };
        let a = make("ana@example.com");
        let b = make("ana@example.com");

        let out = pipeline()
            .combine_sources(&[("csv".to_string(), a), ("json".to_string(), b)])
            .unwrap();
        assert_eq!(out.row_count(), 1);
        let src = out.column_index("source").unwrap();
        assert_eq!(out.rows()[0][src], Value::Str("csv".into()));
    }

    #[test]
    fn enrich_fills_age_and_flags_adults() {
        let table = Table::new(
            Schema::new(vec![
                Column::new("email", CellType::Str),
                Column::new("age", CellType::Int),
            ]),
            vec![
                vec![Value::Str("a@x.com".into()), Value::Int(40)],
                vec![Value::Str("b@x.com".into()), Value::Null],
            ],
        )
        .unwrap();

        let out = pipeline().enrich(table).unwrap();
        let age = out.column_index("age").unwrap();
        let adult = out.column_index("is_adult").unwrap();
        assert_eq!(out.rows()[1][age], Value::Float(40.0));
        assert_eq!(out.rows()[1][adult], Value::Bool(true));
        assert_eq!(out.null_counts()[age].1, 0);
    }
}
