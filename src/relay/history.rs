//! Generation event history and reporting.
//!
//! Stores one JSONL record per generation request at
//! `{dir}/{date}-generate.jsonl`, default dir `~/.voice-relay-history`.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

const SUFFIX: &str = "-generate.jsonl";

pub fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voice-relay-history")
}

fn resolve_date(date: &str) -> String {
    if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text_chars: usize,
    pub voice: String,
    pub rate: u32,
    pub pitch: u32,
    pub backend: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub synth_latency_ms: i64,
    pub total_latency_ms: i64,
}

#[derive(Clone)]
pub struct History {
    dir: PathBuf,
}

impl History {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{}{SUFFIX}", resolve_date(date)))
    }

    /// Append to the file named after the record's own date.
    pub fn save(&self, record: &GenerationRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create history dir: {e}");
            return;
        }

        let date = record.timestamp.get(..10).unwrap_or("today");
        let path = self.file(date);

        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open history file: {e}");
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write history record: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize history record: {e}"),
        }
    }

    pub fn load(&self, date: &str) -> Vec<GenerationRecord> {
        let contents = match fs::read_to_string(self.file(date)) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Dates with records, newest first.
    pub fn list_dates(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };

        let mut dates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(SUFFIX).map(str::to_string)
            })
            .collect();
        dates.sort_by(|a, b| b.cmp(a));
        dates
    }

    pub fn report(&self, date: &str) -> String {
        let display_date = resolve_date(date);
        let records = self.load(date);
        if records.is_empty() {
            return format!("No generation records for {display_date}.");
        }

        let total = records.len();
        let failed = records.iter().filter(|r| !r.success).count();
        let ok: Vec<&GenerationRecord> = records.iter().filter(|r| r.success).collect();

        let avg = |f: fn(&GenerationRecord) -> i64| -> f64 {
            if ok.is_empty() {
                0.0
            } else {
                ok.iter().map(|r| f(r) as f64).sum::<f64>() / ok.len() as f64
            }
        };
        let avg_synth = avg(|r| r.synth_latency_ms);
        let avg_total = avg(|r| r.total_latency_ms);

        let mut voices = BTreeMap::new();
        for r in &records {
            *voices.entry(r.voice.as_str()).or_insert(0) += 1;
        }

        let mut report = format!(
            "# Generation Report for {display_date}\n\n\
            - Total requests: {total}\n\
            - Failed: {failed}\n\
            - Avg synthesis latency: {avg_synth:.0}ms\n\
            - Avg total latency: {avg_total:.0}ms\n\n\
            ## Voices\n"
        );

        for (voice, count) in &voices {
            report.push_str(&format!("- {voice}: {count}\n"));
        }

        let errors: Vec<&str> = records.iter().filter_map(|r| r.error.as_deref()).collect();
        if !errors.is_empty() {
            report.push_str("\n## Errors\n");
            for e in errors {
                report.push_str(&format!("- {e}\n"));
            }
        }

        report
    }
}
