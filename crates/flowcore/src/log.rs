use chrono::Utc;
use std::sync::{Arc, Mutex};

/// Append-only execution log of one run, mirrored to `tracing`
#[derive(Clone, Default)]
pub struct RunLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: &str, message: &str) {
        let line = format!(
            "{} [{}] -> {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            message
        );
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push(line);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(target: "flow", "{}", message);
        self.push("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(target: "flow", "{}", message);
        self.push("WARN", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(target: "flow", "{}", message);
        self.push("ERRR", message);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
