/// Source name constants to ensure consistency across config, pipeline, and CLI
// Canonical source names (used in config.toml and --sources)
pub const CSV_SOURCE: &str = "csv";
pub const JSON_SOURCE: &str = "json";
pub const API_SOURCE: &str = "api";

/// Name of the provenance column added at combine time.
pub const SOURCE_COLUMN: &str = "source";

// Unit conversion factors used by the transform stage
pub const INCH_TO_METERS: f64 = 0.0254;
pub const POUNDS_TO_KG: f64 = 0.45359237;

/// Timestamp layout for versioned artifacts and run-log lines,
/// e.g. 20250115_093042. Sorts lexicographically.
pub const VERSION_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
