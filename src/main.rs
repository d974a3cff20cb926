//! Garnishment Engine CLI
//!
//! Runs a batch of enriched case records through the engine and prints the
//! batch result.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- cases.json [rules.json] [--csv] > result.json
//! ```
//!
//! The cases file holds `{"batch_id": "...", "cases": [...]}`. Without a
//! rules file the built-in federal defaults are used.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `GARNISHMENT_WORKERS`: Worker threads per batch
//! - `GARNISHMENT_TIMEOUT_MS`: Batch deadline in milliseconds

use garnishment_engine::{BatchProcessor, CaseInput, EngineConfig, EngineError, Result, RuleBook, RuleTable};
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct BatchRequest {
    batch_id: String,
    cases: Vec<CaseInput>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let csv_output = args.iter().any(|a| a == "--csv");
    let mut paths = args.iter().filter(|a| !a.starts_with("--"));

    let cases_path = paths.next().ok_or(EngineError::MissingArgument)?;
    let table = match paths.next() {
        Some(rules_path) => RuleTable::from_json(&fs::read_to_string(rules_path)?)?,
        None => RuleTable::federal_defaults(),
    };

    let request: BatchRequest = serde_json::from_str(&fs::read_to_string(cases_path)?)?;
    let processor = BatchProcessor::new(Arc::new(RuleBook::new(table)), engine_config()?);
    let batch = processor.process(&request.batch_id, request.cases)?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    if csv_output {
        batch.write_csv(handle)?;
    } else {
        serde_json::to_writer_pretty(handle, &batch)?;
        println!();
    }

    Ok(())
}

fn engine_config() -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    if let Some(workers) = env_number("GARNISHMENT_WORKERS")? {
        config = config.with_workers(workers as usize);
    }
    if let Some(millis) = env_number("GARNISHMENT_TIMEOUT_MS")? {
        config = config.with_timeout(Duration::from_millis(millis));
    }
    Ok(config)
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::invalid(name, format!("expected a number, got {:?}", value))),
        Err(_) => Ok(None),
    }
}
