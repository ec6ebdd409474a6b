//! PHOENIX 归档的站点间同步与传输台账

pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;
pub mod transport;

pub use config::PipelineConfig;
pub use crate::core::{SendOptions, SendReport, SyncEngine};
pub use error::{Result, SyncError};
pub use transport::{TransferRecord, TransferReport, TransportKind, TransportStrategy};
