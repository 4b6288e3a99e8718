//! Structured line logging for the CLI: one event per line, optionally
//! mirrored to a log file as JSON.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use color_eyre::eyre::Result;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    Info { message: String },
    Error { message: String },
}

pub struct StructuredLogger {
    start: Instant,
    file: Option<File>,
}

impl StructuredLogger {
    pub fn new(log_path: Option<&Path>) -> Result<Self> {
        let file = match log_path {
            Some(path) => Some(File::create(path)?),
            None => None,
        };
        Ok(Self {
            start: Instant::now(),
            file,
        })
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn log(&mut self, event: LogEvent) -> Result<()> {
        let stamp: DateTime<Utc> = Utc::now();
        match &event {
            LogEvent::Info { message } => {
                eprintln!("{} INFO  {}", stamp.format("%Y-%m-%d %H:%M:%S"), message);
            }
            LogEvent::Error { message } => {
                eprintln!("{} ERROR {}", stamp.format("%Y-%m-%d %H:%M:%S"), message);
            }
        }

        if let Some(file) = self.file.as_mut() {
            let line = serde_json::json!({
                "time": stamp.to_rfc3339(),
                "event": event,
            });
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

}
