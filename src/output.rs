use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::domain::ChunkKey;
use crate::materialize::{MaterializeReport, ProgressEvent, ProgressSink};
use crate::resolver::ResolvedLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeysResult {
    pub version: String,
    pub keys: Vec<ChunkKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResult {
    pub key: ChunkKey,
    pub location: ResolvedLocation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationProblem {
    pub key: ChunkKey,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub references: usize,
    pub problems: Vec<ValidationProblem>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_keys(result: &KeysResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resolve(result: &ResolveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_validate(result: &ValidateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(report: &MaterializeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn to_pretty<T: Serialize>(value: &T) -> io::Result<String> {
        serde_json::to_string_pretty(value).map_err(io::Error::other)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = Self::to_pretty(value)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
