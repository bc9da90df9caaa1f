#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lx_expr::{
    transpile_embedded_with_ledger, transpile_expression_with_ledger, try_transpile_expression,
};
use lx_runtime::ConversionLedger;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub repo_root: PathBuf,
    pub fixture_root: PathBuf,
    /// Where per-packet reports are written.
    pub report_root: PathBuf,
    /// A packet without a `parity_gate.yaml` fails its gate.
    pub strict_mode: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            report_root: repo_root.join("artifacts/conformance"),
            strict_mode: true,
            repo_root,
        }
    }

    #[must_use]
    pub fn packet_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("packets")
    }

    #[must_use]
    pub fn packet_report_root(&self, packet_id: &str) -> PathBuf {
        self.report_root.join(packet_id)
    }

    #[must_use]
    pub fn parity_gate_path(&self, packet_id: &str) -> PathBuf {
        self.packet_fixture_root()
            .join(packet_id)
            .join("parity_gate.yaml")
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub strict_mode: bool,
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = fs::read_dir(&config.fixture_root)
        .ok()
        .into_iter()
        .flat_map(|it| it.filter_map(Result::ok))
        .count();

    HarnessReport {
        suite: "smoke",
        fixture_count,
        strict_mode: config.strict_mode,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    TranspileExpression,
    TranspileEmbedded,
    /// The input must fail to transpile; `expected_error` pins the message.
    ParseError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketFixture {
    pub packet_id: String,
    pub case_id: String,
    pub operation: FixtureOperation,
    pub input: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub expected_error: Option<String>,
    #[serde(default)]
    pub expected_fallbacks: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub packet_id: String,
    pub case_id: String,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub fallback_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketParityReport {
    pub suite: String,
    pub packet_id: Option<String>,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl PacketParityReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketGateResult {
    pub packet_id: String,
    pub pass: bool,
    pub fixture_count: usize,
    pub failed: usize,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenPacketArtifacts {
    pub packet_id: String,
    pub parity_report_path: PathBuf,
    pub gate_result_path: PathBuf,
    /// `sha256:<hex>` of the parity report bytes as written.
    pub report_hash: String,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
    #[error("packet gates failed: {0}")]
    GateFailed(String),
}

#[derive(Debug, Deserialize)]
struct ParityGateConfig {
    packet_id: String,
    require_fixture_count_at_least: usize,
    #[serde(default)]
    require_failed: usize,
}

pub fn run_packet_suite(config: &HarnessConfig) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, None)?;
    Ok(build_report("packets".to_owned(), None, &fixtures))
}

pub fn run_packet_by_id(
    config: &HarnessConfig,
    packet_id: &str,
) -> Result<PacketParityReport, HarnessError> {
    let fixtures = load_fixtures(config, Some(packet_id))?;
    Ok(build_report(
        format!("packets:{packet_id}"),
        Some(packet_id.to_owned()),
        &fixtures,
    ))
}

pub fn run_packets_grouped(
    config: &HarnessConfig,
    packet_filter: Option<&str>,
) -> Result<Vec<PacketParityReport>, HarnessError> {
    let fixtures = load_fixtures(config, packet_filter)?;
    let mut grouped = BTreeMap::<String, Vec<PacketFixture>>::new();
    for fixture in fixtures {
        grouped
            .entry(fixture.packet_id.clone())
            .or_default()
            .push(fixture);
    }

    Ok(grouped
        .into_iter()
        .map(|(packet_id, packet_fixtures)| {
            build_report(
                format!("packets:{packet_id}"),
                Some(packet_id),
                &packet_fixtures,
            )
        })
        .collect())
}

pub fn evaluate_parity_gate(
    config: &HarnessConfig,
    report: &PacketParityReport,
) -> Result<PacketGateResult, HarnessError> {
    let packet_id = report
        .packet_id
        .clone()
        .ok_or_else(|| HarnessError::FixtureFormat("report has no packet_id".to_owned()))?;

    let mut reasons = Vec::new();
    let gate_path = config.parity_gate_path(&packet_id);
    if gate_path.exists() {
        let gate: ParityGateConfig = serde_yaml::from_str(&fs::read_to_string(&gate_path)?)?;
        if gate.packet_id != packet_id {
            reasons.push(format!(
                "packet_id mismatch between gate ({}) and report ({packet_id})",
                gate.packet_id
            ));
        }
        if report.fixture_count < gate.require_fixture_count_at_least {
            reasons.push(format!(
                "fixture_count={} below required {}",
                report.fixture_count, gate.require_fixture_count_at_least
            ));
        }
        if report.failed != gate.require_failed {
            reasons.push(format!(
                "failed={} but gate requires {}",
                report.failed, gate.require_failed
            ));
        }
    } else if config.strict_mode {
        reasons.push(format!("missing gate file {}", gate_path.display()));
    }

    Ok(PacketGateResult {
        packet_id,
        pass: reasons.is_empty(),
        fixture_count: report.fixture_count,
        failed: report.failed,
        reasons,
    })
}

pub fn enforce_packet_gates(
    config: &HarnessConfig,
    reports: &[PacketParityReport],
) -> Result<(), HarnessError> {
    let mut failures = Vec::new();
    for report in reports {
        let packet_id = report.packet_id.as_deref().unwrap_or("<unknown>");
        if !report.is_green() {
            failures.push(format!(
                "{packet_id}: parity report failed fixtures={}",
                report.failed
            ));
        }
        let gate = evaluate_parity_gate(config, report)?;
        if !gate.pass {
            failures.push(format!(
                "{packet_id}: gate failed reasons={}",
                gate.reasons.join("; ")
            ));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::GateFailed(failures.join(" | ")))
    }
}

pub fn write_packet_report(
    config: &HarnessConfig,
    report: &PacketParityReport,
) -> Result<WrittenPacketArtifacts, HarnessError> {
    let packet_id = report
        .packet_id
        .as_deref()
        .ok_or_else(|| HarnessError::FixtureFormat("packet_id is required".to_owned()))?;

    let root = config.packet_report_root(packet_id);
    fs::create_dir_all(&root)?;

    let parity_report_path = root.join("parity_report.json");
    let report_bytes = serde_json::to_vec_pretty(report)?;
    fs::write(&parity_report_path, &report_bytes)?;
    let report_hash = format!("sha256:{}", hash_bytes(&report_bytes));

    let gate_result = evaluate_parity_gate(config, report)?;
    let gate_result_path = root.join("parity_gate_result.json");
    let gate_payload = serde_json::json!({
        "report_hash": report_hash,
        "gate": gate_result,
    });
    fs::write(
        &gate_result_path,
        serde_json::to_string_pretty(&gate_payload)?,
    )?;

    Ok(WrittenPacketArtifacts {
        packet_id: packet_id.to_owned(),
        parity_report_path,
        gate_result_path,
        report_hash,
    })
}

pub fn write_grouped_reports(
    config: &HarnessConfig,
    reports: &[PacketParityReport],
) -> Result<Vec<WrittenPacketArtifacts>, HarnessError> {
    reports
        .iter()
        .map(|report| write_packet_report(config, report))
        .collect()
}

fn build_report(
    suite: String,
    packet_id: Option<String>,
    fixtures: &[PacketFixture],
) -> PacketParityReport {
    let results = fixtures.iter().map(run_fixture).collect::<Vec<_>>();
    let failed = results
        .iter()
        .filter(|result| matches!(result.status, CaseStatus::Fail))
        .count();

    PacketParityReport {
        suite,
        packet_id,
        fixture_count: results.len(),
        passed: results.len().saturating_sub(failed),
        failed,
        results,
    }
}

fn load_fixtures(
    config: &HarnessConfig,
    packet_filter: Option<&str>,
) -> Result<Vec<PacketFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.packet_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if packet_filter.is_none_or(|packet| fixture.packet_id == packet) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<PacketFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    serde_json::from_str(&body)
        .map_err(|error| HarnessError::FixtureFormat(format!("{}: {error}", path.display())))
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn run_fixture(fixture: &PacketFixture) -> CaseResult {
    let mut ledger = ConversionLedger::new();
    let mismatch = run_fixture_operation(fixture, &mut ledger).err();

    CaseResult {
        packet_id: fixture.packet_id.clone(),
        case_id: fixture.case_id.clone(),
        operation: fixture.operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        fallback_records: ledger.len(),
    }
}

fn run_fixture_operation(
    fixture: &PacketFixture,
    ledger: &mut ConversionLedger,
) -> Result<(), String> {
    match fixture.operation {
        FixtureOperation::TranspileExpression => {
            let actual = transpile_expression_with_ledger(&fixture.input, ledger);
            compare_expected(fixture, &actual)?;
        }
        FixtureOperation::TranspileEmbedded => {
            let actual = transpile_embedded_with_ledger(&fixture.input, ledger);
            compare_expected(fixture, &actual)?;
        }
        FixtureOperation::ParseError => {
            let error = match try_transpile_expression(&fixture.input) {
                Ok(script) => return Err(format!("expected a parse error, got {script:?}")),
                Err(error) => error.to_string(),
            };
            if let Some(expected) = fixture.expected_error.as_deref() {
                if expected != error {
                    return Err(format!("error mismatch: expected {expected:?}, got {error:?}"));
                }
            }
        }
    }

    if let Some(expected) = fixture.expected_fallbacks {
        if ledger.len() != expected {
            return Err(format!(
                "fallback count mismatch: expected {expected}, got {}",
                ledger.len()
            ));
        }
    }
    Ok(())
}

fn compare_expected(fixture: &PacketFixture, actual: &str) -> Result<(), String> {
    let expected = fixture
        .expected
        .as_deref()
        .ok_or_else(|| "expected is required for transpile operations".to_owned())?;
    if expected == actual {
        Ok(())
    } else {
        Err(format!("output mismatch: expected {expected:?}, got {actual:?}"))
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{
        CaseStatus, FixtureOperation, HarnessConfig, HarnessError, PacketFixture,
        enforce_packet_gates, evaluate_parity_gate, run_fixture, run_packet_by_id,
        run_packet_suite, run_packets_grouped, run_smoke, write_packet_report,
    };

    fn fixture(operation: FixtureOperation, input: &str) -> PacketFixture {
        PacketFixture {
            packet_id: "LX-T-000".to_owned(),
            case_id: "case".to_owned(),
            operation,
            input: input.to_owned(),
            expected: None,
            expected_error: None,
            expected_fallbacks: None,
        }
    }

    #[test]
    fn smoke_harness_finds_fixtures() {
        let cfg = HarnessConfig::default_paths();
        let report = run_smoke(&cfg);
        assert!(report.fixture_count >= 1, "expected at least one fixture");
        assert!(report.strict_mode);
    }

    #[test]
    fn packet_suite_is_green() {
        let cfg = HarnessConfig::default_paths();
        let report = run_packet_suite(&cfg).expect("suite should run");
        assert!(report.fixture_count >= 1, "expected packet fixtures");
        assert!(report.is_green(), "expected report green: {report:?}");
    }

    #[test]
    fn packet_filter_runs_only_requested_packet() {
        let cfg = HarnessConfig::default_paths();
        let report = run_packet_by_id(&cfg, "LX-P-002").expect("report");
        assert_eq!(report.packet_id.as_deref(), Some("LX-P-002"));
        assert!(report.fixture_count >= 3);
        assert!(
            report
                .results
                .iter()
                .all(|result| result.packet_id == "LX-P-002")
        );
        assert!(report.is_green());
    }

    #[test]
    fn grouped_reports_pass_their_gates() {
        let cfg = HarnessConfig::default_paths();
        let reports = run_packets_grouped(&cfg, None).expect("grouped");
        assert!(reports.len() >= 3);
        let ids = reports
            .iter()
            .filter_map(|report| report.packet_id.clone())
            .collect::<Vec<_>>();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        enforce_packet_gates(&cfg, &reports).expect("gates should pass");
    }

    #[test]
    fn mismatched_output_fails_the_case() {
        let mut case = fixture(FixtureOperation::TranspileExpression, "2+2");
        case.expected = Some("4".to_owned());
        let result = run_fixture(&case);
        assert_eq!(result.status, CaseStatus::Fail);
        assert!(
            result
                .mismatch
                .as_deref()
                .is_some_and(|message| message.contains("\"2 + 2\""))
        );
    }

    #[test]
    fn parse_error_cases_compare_messages() {
        let mut case = fixture(FixtureOperation::ParseError, "x)");
        case.expected_error = Some("unmatched ')' at index 1".to_owned());
        assert_eq!(run_fixture(&case).status, CaseStatus::Pass);

        let valid = fixture(FixtureOperation::ParseError, "1+1");
        assert_eq!(run_fixture(&valid).status, CaseStatus::Fail);
    }

    #[test]
    fn fallback_count_is_checked() {
        let mut case = fixture(FixtureOperation::TranspileExpression, "max(foo(1), 2)");
        case.expected = Some("Math.max(<error>, 2)".to_owned());
        case.expected_fallbacks = Some(1);
        let result = run_fixture(&case);
        assert_eq!(result.status, CaseStatus::Pass, "{result:?}");
        assert_eq!(result.fallback_records, 1);

        case.expected_fallbacks = Some(0);
        assert_eq!(run_fixture(&case).status, CaseStatus::Fail);
    }

    #[test]
    fn strict_mode_requires_a_gate_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = HarnessConfig::default_paths();
        cfg.fixture_root = dir.path().to_path_buf();

        let mut case = fixture(FixtureOperation::TranspileExpression, "1");
        case.expected = Some("1".to_owned());
        let report = super::build_report(
            "packets:LX-T-000".to_owned(),
            Some("LX-T-000".to_owned()),
            &[case],
        );

        let gate = evaluate_parity_gate(&cfg, &report).expect("gate");
        assert!(!gate.pass);
        assert!(matches!(
            enforce_packet_gates(&cfg, std::slice::from_ref(&report)),
            Err(HarnessError::GateFailed(_))
        ));

        cfg.strict_mode = false;
        assert!(evaluate_parity_gate(&cfg, &report).expect("gate").pass);
    }

    #[test]
    fn written_report_hash_matches_file_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = HarnessConfig::default_paths();
        cfg.report_root = dir.path().join("reports");

        let report = run_packet_by_id(&cfg, "LX-P-001").expect("report");
        let written = write_packet_report(&cfg, &report).expect("write");

        let bytes = fs::read(&written.parity_report_path).expect("read report");
        assert_eq!(
            written.report_hash,
            format!("sha256:{}", super::hash_bytes(&bytes))
        );
        let gate: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written.gate_result_path).expect("gate"))
                .expect("json");
        assert_eq!(gate["report_hash"], written.report_hash.as_str());
        assert_eq!(gate["gate"]["pass"], true);
    }
}
