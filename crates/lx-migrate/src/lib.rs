#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use lx_expr::{contains_script, transpile_embedded_with_ledger, transpile_expression_with_ledger};
use lx_runtime::{ConversionLedger, LedgerSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionKind {
    /// The whole string is one legacy expression.
    Expression,
    /// Free text that may hold `||expr||` spans.
    Embedded,
}

/// Which object keys of a legacy document hold formulas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub expression_keys: Vec<String>,
    #[serde(default)]
    pub embedded_keys: Vec<String>,
    /// Leave embedded-kind strings that already hold a `<script>` alone.
    #[serde(default = "default_skip_converted")]
    pub skip_converted: bool,
    /// Top-level field holding the document's data version.
    #[serde(default = "default_version_key")]
    pub version_key: String,
    /// Documents at or above this version already hold script formulas and
    /// are left untouched. Migrated documents are stamped with it.
    #[serde(default = "default_script_version")]
    pub script_version: u64,
}

fn default_skip_converted() -> bool {
    true
}

fn default_version_key() -> String {
    "version".to_owned()
}

fn default_script_version() -> u64 {
    5
}

impl MigrationPlan {
    #[must_use]
    pub fn legacy_defaults() -> Self {
        Self {
            expression_keys: ["expression", "expr", "level_formula", "formula"]
                .map(str::to_owned)
                .to_vec(),
            embedded_keys: ["notes", "name", "description", "text", "local_notes"]
                .map(str::to_owned)
                .to_vec(),
            skip_converted: true,
            version_key: default_version_key(),
            script_version: default_script_version(),
        }
    }

    /// Whether `document` is stamped with [`Self::script_version`] or later.
    #[must_use]
    pub fn is_migrated(&self, document: &Value) -> bool {
        document
            .get(self.version_key.as_str())
            .and_then(Value::as_u64)
            .is_some_and(|version| version >= self.script_version)
    }

    fn stamp(&self, document: &mut Value) {
        if let Value::Object(map) = document {
            map.insert(self.version_key.clone(), Value::from(self.script_version));
        }
    }

    /// Loads a plan from YAML (`.yaml` / `.yml`) or JSON (anything else).
    pub fn from_path(path: &Path) -> Result<Self, MigrateError> {
        let body = fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            Ok(serde_yaml::from_str(&body)?)
        } else {
            Ok(serde_json::from_str(&body)?)
        }
    }

    #[must_use]
    pub fn kind_for(&self, key: &str) -> Option<ConversionKind> {
        if self.expression_keys.iter().any(|candidate| candidate == key) {
            Some(ConversionKind::Expression)
        } else if self.embedded_keys.iter().any(|candidate| candidate == key) {
            Some(ConversionKind::Embedded)
        } else {
            None
        }
    }
}

impl Default for MigrationPlan {
    fn default() -> Self {
        Self::legacy_defaults()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSummary {
    /// Strings found under a planned key.
    pub candidates: usize,
    pub converted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// The document was already at the script version; nothing was visited.
    pub already_migrated: bool,
    pub fallbacks: LedgerSummary,
}

impl MigrationSummary {
    #[must_use]
    pub fn render_plain(&self) -> String {
        format!(
            "candidates={} converted={} unchanged={} skipped={} already_migrated={} {}",
            self.candidates,
            self.converted,
            self.unchanged,
            self.skipped,
            self.already_migrated,
            self.fallbacks.render_plain()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub summary: MigrationSummary,
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Runtime(#[from] lx_runtime::RuntimeError),
}

/// Rewrite every planned string in `document`, in place, and stamp an
/// object root with the script version.
///
/// A document already stamped is returned untouched, so converted formulas
/// are never parsed a second time (`2 ** 3` would read back as `2 * 3`).
/// Roots other than objects carry no version and are always migrated.
pub fn migrate_value(
    document: &mut Value,
    plan: &MigrationPlan,
    ledger: &mut ConversionLedger,
) -> MigrationSummary {
    let mut summary = MigrationSummary::default();
    if plan.is_migrated(document) {
        tracing::info!(
            version_key = plan.version_key.as_str(),
            "document already migrated"
        );
        summary.already_migrated = true;
        return summary;
    }
    let before = ledger.len();
    walk(document, plan, ledger, &mut summary);
    summary.fallbacks = LedgerSummary::from_records(&ledger.records()[before..]);
    plan.stamp(document);
    summary
}

fn walk(
    value: &mut Value,
    plan: &MigrationPlan,
    ledger: &mut ConversionLedger,
    summary: &mut MigrationSummary,
) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match (plan.kind_for(key), child) {
                    (Some(kind), Value::String(text)) => {
                        migrate_field(key, kind, text, plan, ledger, summary);
                    }
                    (_, child) => walk(child, plan, ledger, summary),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, plan, ledger, summary);
            }
        }
        _ => {}
    }
}

fn migrate_field(
    key: &str,
    kind: ConversionKind,
    text: &mut String,
    plan: &MigrationPlan,
    ledger: &mut ConversionLedger,
    summary: &mut MigrationSummary,
) {
    summary.candidates += 1;
    if text.trim().is_empty() {
        summary.unchanged += 1;
        return;
    }
    if plan.skip_converted && kind == ConversionKind::Embedded && contains_script(text) {
        summary.skipped += 1;
        return;
    }
    let fallbacks = ledger.len();
    let migrated = match kind {
        ConversionKind::Expression => transpile_expression_with_ledger(text, ledger),
        ConversionKind::Embedded => transpile_embedded_with_ledger(text, ledger),
    };
    if ledger.len() > fallbacks {
        tracing::warn!(
            key,
            legacy = text.as_str(),
            fallbacks = ledger.len() - fallbacks,
            "legacy formula only partially converted"
        );
    }
    if migrated == *text {
        summary.unchanged += 1;
    } else {
        summary.converted += 1;
        *text = migrated;
    }
}

/// Migrate a JSON document held in memory; the result is pretty-printed.
pub fn migrate_document(
    input: &str,
    plan: &MigrationPlan,
    ledger: &mut ConversionLedger,
) -> Result<(String, MigrationSummary), MigrateError> {
    let mut document: Value = serde_json::from_str(input)?;
    let summary = migrate_value(&mut document, plan, ledger);
    Ok((serde_json::to_string_pretty(&document)?, summary))
}

pub fn migrate_file(
    input: &Path,
    output: &Path,
    plan: &MigrationPlan,
    ledger: &mut ConversionLedger,
) -> Result<MigrationReport, MigrateError> {
    let body = fs::read_to_string(input)?;
    let (migrated, summary) = migrate_document(&body, plan, ledger)?;
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(output, migrated)?;
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        converted = summary.converted,
        fallbacks = summary.fallbacks.total,
        "migrated legacy document"
    );
    Ok(MigrationReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        summary,
    })
}

pub fn write_ledger(path: &Path, ledger: &ConversionLedger) -> Result<(), MigrateError> {
    fs::write(path, ledger.to_jsonl()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use lx_runtime::{ConversionLedger, FallbackKind};
    use serde_json::json;

    use super::{ConversionKind, MigrationPlan, migrate_document, migrate_file, migrate_value};

    #[test]
    fn planned_keys_are_converted_in_nested_documents() {
        let mut document = json!({
            "version": 2,
            "rows": [
                {
                    "name": "Sword (||skill_level(Broadsword)||)",
                    "features": [{ "expression": "2+3*4" }],
                    "reference": "B208"
                }
            ]
        });
        let mut ledger = ConversionLedger::new();
        let summary = migrate_value(&mut document, &MigrationPlan::legacy_defaults(), &mut ledger);

        assert_eq!(
            document["rows"][0]["name"],
            "Sword (<script>entity.skillLevel(\"Broadsword\")</script>)"
        );
        assert_eq!(document["rows"][0]["features"][0]["expression"], "2 + 3 * 4");
        assert_eq!(document["rows"][0]["reference"], "B208");
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.converted, 2);
        assert!(summary.fallbacks.is_clean());
    }

    #[test]
    fn malformed_formula_is_kept_and_logged() {
        let mut document = json!({ "expression": "foo(1,2)", "notes": "no formulas here" });
        let mut ledger = ConversionLedger::new();
        let summary = migrate_value(&mut document, &MigrationPlan::legacy_defaults(), &mut ledger);

        assert_eq!(document["expression"], "foo(1,2)");
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.fallbacks.originals_kept, 1);
        assert_eq!(ledger.records()[0].issue.kind, FallbackKind::OriginalKept);
    }

    #[test]
    fn converted_text_is_not_converted_twice() {
        let plan = MigrationPlan::legacy_defaults();
        let mut ledger = ConversionLedger::new();
        let (first, _) = migrate_document(r#"{"notes": "Bonus ||1+2||"}"#, &plan, &mut ledger)
            .expect("first pass");
        let (second, summary) = migrate_document(&first, &plan, &mut ledger).expect("second pass");
        assert_eq!(first, second);
        assert!(summary.already_migrated);

        let mixed = r#"{"notes": "<script>1</script> and ||2||"}"#;
        let (kept, _) = migrate_document(mixed, &plan, &mut ledger).expect("skip");
        assert!(kept.contains("||2||"));

        let eager = MigrationPlan {
            skip_converted: false,
            ..MigrationPlan::legacy_defaults()
        };
        let (rewritten, summary) = migrate_document(mixed, &eager, &mut ledger).expect("eager");
        assert!(rewritten.contains("<script>2</script>"));
        assert_eq!(summary.converted, 1);
    }

    #[test]
    fn migrating_twice_keeps_expression_output() {
        let plan = MigrationPlan::legacy_defaults();
        let mut ledger = ConversionLedger::new();
        let (first, summary) =
            migrate_document(r#"{"expression": "2^3"}"#, &plan, &mut ledger).expect("first pass");
        assert_eq!(summary.converted, 1);
        let (second, summary) = migrate_document(&first, &plan, &mut ledger).expect("second pass");
        assert_eq!(first, second);
        assert!(summary.already_migrated);
        assert_eq!(summary.candidates, 0);

        let value: serde_json::Value = serde_json::from_str(&second).expect("json");
        assert_eq!(value["expression"], "2 ** 3");
        assert_eq!(value["version"], 5);
    }

    #[test]
    fn script_version_documents_are_left_alone() {
        let plan = MigrationPlan::legacy_defaults();
        let mut document = json!({ "version": 6, "expression": "2 ** 3", "notes": "||1+2||" });
        let original = document.clone();
        let mut ledger = ConversionLedger::new();
        let summary = migrate_value(&mut document, &plan, &mut ledger);
        assert!(summary.already_migrated);
        assert_eq!(document, original);

        let mut legacy = json!({ "version": 4, "expression": "2^3" });
        let summary = migrate_value(&mut legacy, &plan, &mut ledger);
        assert!(!summary.already_migrated);
        assert_eq!(legacy, json!({ "version": 5, "expression": "2 ** 3" }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn summary_counts_only_this_document() {
        let plan = MigrationPlan::legacy_defaults();
        let mut ledger = ConversionLedger::new();
        migrate_document(r#"{"expr": "x)"}"#, &plan, &mut ledger).expect("first");
        let (_, summary) =
            migrate_document(r#"{"expr": "1+1"}"#, &plan, &mut ledger).expect("second");
        assert_eq!(ledger.len(), 1);
        assert!(summary.fallbacks.is_clean());
    }

    #[test]
    fn plan_loads_from_yaml_and_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let yaml = dir.path().join("plan.yaml");
        std::fs::write(&yaml, "expression_keys: [calc]\nembedded_keys: [blurb]\n").expect("write");
        let plan = MigrationPlan::from_path(&yaml).expect("yaml plan");
        assert_eq!(plan.kind_for("calc"), Some(ConversionKind::Expression));
        assert_eq!(plan.kind_for("blurb"), Some(ConversionKind::Embedded));
        assert_eq!(plan.kind_for("notes"), None);
        assert!(plan.skip_converted);
        assert_eq!(plan.version_key, "version");
        assert_eq!(plan.script_version, 5);

        let json = dir.path().join("plan.json");
        std::fs::write(
            &json,
            r#"{"expression_keys": ["calc"], "skip_converted": false, "script_version": 7}"#,
        )
        .expect("write");
        let plan = MigrationPlan::from_path(&json).expect("json plan");
        assert!(plan.embedded_keys.is_empty());
        assert!(!plan.skip_converted);
        assert_eq!(plan.script_version, 7);
    }

    #[test]
    fn migrate_file_writes_output_and_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("legacy.gcs");
        let output = dir.path().join("out/migrated.gcs");
        std::fs::write(&input, r#"{"formula": "-5+3"}"#).expect("write");

        let mut ledger = ConversionLedger::new();
        let report = migrate_file(&input, &output, &MigrationPlan::default(), &mut ledger)
            .expect("migrate");
        assert_eq!(report.summary.converted, 1);
        let written = std::fs::read_to_string(&output).expect("read output");
        let value: serde_json::Value = serde_json::from_str(&written).expect("json");
        assert_eq!(value["formula"], "-5 + 3");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut ledger = ConversionLedger::new();
        assert!(migrate_document("{", &MigrationPlan::default(), &mut ledger).is_err());
    }
}
