#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use lx_migrate::{MigrationPlan, migrate_file, write_ledger};
use lx_runtime::ConversionLedger;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct CliArgs {
    input: PathBuf,
    output: Option<PathBuf>,
    plan: Option<PathBuf>,
    ledger: Option<PathBuf>,
    strict: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(error) => {
            eprintln!("lx-migrate-cli error: {error}");
            ExitCode::from(1)
        }
    }
}

/// Returns `false` when `--strict` is set and some formula fell back.
fn run() -> Result<bool, String> {
    let args = parse_args()?;
    let plan = match args.plan.as_deref() {
        Some(path) => MigrationPlan::from_path(path).map_err(|error| error.to_string())?,
        None => MigrationPlan::legacy_defaults(),
    };
    let output = args.output.clone().unwrap_or_else(|| args.input.clone());

    let mut ledger = ConversionLedger::new();
    let report =
        migrate_file(&args.input, &output, &plan, &mut ledger).map_err(|error| error.to_string())?;
    println!(
        "input={} output={} {}",
        report.input.display(),
        report.output.display(),
        report.summary.render_plain()
    );

    if let Some(path) = args.ledger.as_deref() {
        write_ledger(path, &ledger).map_err(|error| error.to_string())?;
        println!("ledger={} records={}", path.display(), ledger.len());
    }

    Ok(!args.strict || report.summary.fallbacks.is_clean())
}

fn parse_args() -> Result<CliArgs, String> {
    let mut input = None;
    let mut output = None;
    let mut plan = None;
    let mut ledger = None;
    let mut strict = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--output" | "-o" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--output requires a path".to_owned())?;
                output = Some(PathBuf::from(value));
            }
            "--plan" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--plan requires a path".to_owned())?;
                plan = Some(PathBuf::from(value));
            }
            "--ledger" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--ledger requires a path".to_owned())?;
                ledger = Some(PathBuf::from(value));
            }
            "--strict" => {
                strict = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => return Err(format!("unknown argument: {other}")),
            other => {
                if input.replace(PathBuf::from(other)).is_some() {
                    return Err("only one input file may be given".to_owned());
                }
            }
        }
    }

    Ok(CliArgs {
        input: input.ok_or_else(|| "missing input file (see --help)".to_owned())?,
        output,
        plan,
        ledger,
        strict,
    })
}

fn print_help() {
    println!(
        "lx-migrate-cli\n\
         Usage:\n\
         \tlx-migrate-cli <input.json> [--output <path>] [--plan <plan.yaml|plan.json>] [--ledger <path.jsonl>] [--strict]\n\
         Options:\n\
         \t-o, --output <path>   write the migrated document here (default: overwrite input)\n\
         \t--plan <path>         keys to convert; YAML or JSON by extension (default: legacy keys)\n\
         \t                      documents already at the plan's script version are left untouched\n\
         \t--ledger <path>       write every fallback as one JSON object per line\n\
         \t--strict              exit with status 2 if any formula fell back\n\
         \t-h, --help            show this help\n\
         Logging is controlled by RUST_LOG (default: warn)."
    );
}
