//! Reading the durable log and driving the engine

mod client;
mod ingestor;

pub use client::{LogClient, LogRecord, MemoryLog, MemoryLogClient};
pub use ingestor::{BatchReport, EventIngestor};
