pub mod combine;
pub mod config;
pub mod constants;
pub mod error;
pub mod extract;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod table;
pub mod transform;

pub use config::PipelineConfig;
pub use error::{EtlError, Result};
pub use pipeline::{EtlPipeline, RunOptions, RunReport};
pub use table::{CellType, Column, Schema, Table, Value};
