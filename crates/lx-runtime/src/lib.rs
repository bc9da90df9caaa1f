#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    /// The whole expression failed to parse and was kept verbatim.
    OriginalKept,
    /// One function argument failed to parse and became `<error>`.
    ArgumentPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionIssue {
    pub kind: FallbackKind,
    /// The legacy text that could not be converted.
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub ts_unix_ms: u64,
    pub issue: ConversionIssue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub originals_kept: usize,
    pub argument_placeholders: usize,
}

impl LedgerSummary {
    #[must_use]
    pub fn from_records(records: &[ConversionRecord]) -> Self {
        let originals_kept = records
            .iter()
            .filter(|record| record.issue.kind == FallbackKind::OriginalKept)
            .count();
        Self {
            total: records.len(),
            originals_kept,
            argument_placeholders: records.len() - originals_kept,
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.total == 0
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        format!(
            "fallbacks={} originals_kept={} argument_placeholders={}",
            self.total, self.originals_kept, self.argument_placeholders
        )
    }
}

/// Append-only log of conversions that degraded instead of failing.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionLedger {
    records: Vec<ConversionRecord>,
}

impl ConversionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ConversionRecord) {
        self.records.push(record);
    }

    pub fn record(
        &mut self,
        kind: FallbackKind,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(ConversionRecord {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            issue: ConversionIssue {
                kind,
                subject: subject.into(),
                detail: detail.into(),
            },
        });
    }

    #[must_use]
    pub fn records(&self) -> &[ConversionRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary::from_records(&self.records)
    }

    /// One JSON object per line, in insertion order.
    pub fn to_jsonl(&self) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}
