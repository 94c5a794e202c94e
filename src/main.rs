use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use tablemill::config::PipelineConfig;
use tablemill::logging;
use tablemill::pipeline::{EtlPipeline, RunOptions};
use tablemill::table::Table;

#[derive(Parser)]
#[command(name = "tablemill")]
#[command(about = "Batch ETL pipeline for tabular user data")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: extract, standardize, combine, load
    Run {
        /// Path to the TOML config file (default: config.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Specific sources to run (comma-separated). Available: csv, json, api
        #[arg(long)]
        sources: Option<String>,
        /// Write artifacts under timestamped names instead of overwriting
        #[arg(long)]
        versioned: bool,
    },
    /// Extract configured sources without combining or writing artifacts
    Extract {
        /// Path to the TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Specific sources to extract (comma-separated)
        #[arg(long)]
        sources: Option<String>,
    },
    /// Show the first rows of one source, as extracted
    Preview {
        /// Name of the configured source to preview
        #[arg(long)]
        source: String,
        /// How many rows to show
        #[arg(long, default_value_t = 5)]
        rows: usize,
        /// Path to the TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_source_list(sources: Option<String>) -> Option<Vec<String>> {
    sources.map(|list| list.split(',').map(|s| s.trim().to_string()).collect())
}

fn print_table(table: &Table) {
    println!("   {}", table.column_names().join(" | "));
    for row in table.rows() {
        let cells: Vec<String> = row.iter().map(|v| v.to_field()).collect();
        println!("   {}", cells.join(" | "));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            sources,
            versioned,
        } => {
            let config = PipelineConfig::load(config.as_deref())?;
            let pipeline = EtlPipeline::new(config)?;
            let options = RunOptions {
                source_filter: parse_source_list(sources),
                versioned,
            };
            match pipeline.run(&options).await {
                Ok(report) => {
                    let ok = report.sources.iter().filter(|s| s.error.is_none()).count();
                    println!("\n📊 Run results:");
                    println!("   Run id: {}", report.run_id);
                    println!("   Sources: {} ok, {} failed", ok, report.sources.len() - ok);
                    println!("   Combined rows: {}", report.combined_rows);
                    println!("   Final rows: {}", report.final_rows);
                    println!("   Artifacts: {}", report.artifacts.len());
                    for source in report.sources.iter().filter(|s| s.error.is_some()) {
                        println!(
                            "   ⚠️  {}: {}",
                            source.name,
                            source.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
                Err(e) => {
                    error!("ETL run failed: {e}");
                    println!("❌ ETL run failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Extract { config, sources } => {
            println!("📥 Running extract only...");
            let config = PipelineConfig::load(config.as_deref())?;
            let pipeline = EtlPipeline::new(config)?;
            let reports = pipeline.run_extract(&parse_source_list(sources)).await?;
            let mut failed = false;
            for report in &reports {
                match &report.error {
                    None => println!("   ✅ {}: {} rows", report.name, report.rows.unwrap_or(0)),
                    Some(e) => {
                        failed = true;
                        println!("   ❌ {}: {e}", report.name);
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
        }
        Commands::Preview {
            source,
            rows,
            config,
        } => {
            let config = PipelineConfig::load(config.as_deref())?;
            let pipeline = EtlPipeline::new(config)?;
            match pipeline.extract_source(&source).await {
                Ok(table) => {
                    let (r, c) = table.shape();
                    println!("📋 {source}: {r} rows, {c} columns");
                    print_table(&table.head(rows));
                    let nulls: Vec<String> = table
                        .null_counts()
                        .into_iter()
                        .filter(|(_, count)| *count > 0)
                        .map(|(name, count)| format!("{name}={count}"))
                        .collect();
                    if nulls.is_empty() {
                        println!("   No null cells");
                    } else {
                        println!("   Null cells: {}", nulls.join(", "));
                    }
                }
                Err(e) => {
                    error!("preview failed: {e}");
                    println!("❌ Preview of '{source}' failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}
