#![forbid(unsafe_code)]

use std::path::PathBuf;

use lx_conformance::{
    HarnessConfig, enforce_packet_gates, run_packets_grouped, write_grouped_reports,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut packet_filter: Option<String> = None;
    let mut write_artifacts = false;
    let mut require_green = false;
    let mut fixture_root: Option<PathBuf> = None;
    let mut report_root: Option<PathBuf> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--packet-id" => {
                let value = args
                    .next()
                    .ok_or("--packet-id requires a value (e.g. LX-P-001)")?;
                packet_filter = Some(value);
            }
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a path")?;
                fixture_root = Some(PathBuf::from(value));
            }
            "--report-root" => {
                let value = args.next().ok_or("--report-root requires a path")?;
                report_root = Some(PathBuf::from(value));
            }
            "--write-artifacts" => {
                write_artifacts = true;
            }
            "--require-green" => {
                require_green = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = HarnessConfig::default_paths();
    if let Some(root) = fixture_root {
        config.fixture_root = root;
    }
    if let Some(root) = report_root {
        config.report_root = root;
    }

    let reports = run_packets_grouped(&config, packet_filter.as_deref())?;
    for report in &reports {
        println!(
            "packet={} suite={} fixtures={} passed={} failed={} green={}",
            report.packet_id.as_deref().unwrap_or("<all>"),
            report.suite,
            report.fixture_count,
            report.passed,
            report.failed,
            report.is_green()
        );
        for result in report.results.iter().filter(|result| result.mismatch.is_some()) {
            println!(
                "  case={} mismatch={}",
                result.case_id,
                result.mismatch.as_deref().unwrap_or_default()
            );
        }
    }

    if write_artifacts {
        for artifact in write_grouped_reports(&config, &reports)? {
            println!(
                "wrote packet={} parity={} gate={} hash={}",
                artifact.packet_id,
                artifact.parity_report_path.display(),
                artifact.gate_result_path.display(),
                artifact.report_hash
            );
        }
    }

    if require_green {
        enforce_packet_gates(&config, &reports)?;
    }

    Ok(())
}

fn print_help() {
    println!(
        "lx-conformance-cli\n\
         Usage:\n\
         \tlx-conformance-cli [--packet-id LX-P-001] [--write-artifacts] [--require-green]\n\
         Options:\n\
         \t--packet-id <id>       Run only one packet id\n\
         \t--fixture-root <path>  Fixture directory (default: crate fixtures/)\n\
         \t--report-root <path>   Report directory (default: artifacts/conformance)\n\
         \t--write-artifacts      Emit parity report + gate result per packet\n\
         \t--require-green        Fail with non-zero exit when any packet parity/gate check fails\n\
         \t-h, --help             Show this help"
    );
}
