pub mod analyzers;
pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod parser;
pub mod snapshot;
pub mod stats;
pub mod table;
