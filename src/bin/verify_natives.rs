// ── verify-natives ────────────────────────────────────────────────────────────
//
// Release-verification tool. Loads the native module in strict mode, asks it
// for its version, and checks it against the pinned release identifier.
// Run by CI before tagging a release; a mismatch exits nonzero and must
// fail the pipeline.
//
// Usage: verify-natives [--report <path>]

use std::path::PathBuf;
use std::process::ExitCode;

use lumen_natives::loader;
use lumen_natives::verify::{
    self, VerificationOutcome, VerificationReport, DEV_OVERRIDE_VAR, PINNED_VERSION,
};

fn parse_report_path() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args().skip(1);
    let mut report = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--report" => match args.next() {
                Some(p) => report = Some(PathBuf::from(p)),
                None => return Err("--report requires a path".to_owned()),
            },
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(report)
}

fn run() -> Result<VerificationOutcome, String> {
    let report_path = parse_report_path()?;

    let loader = loader::global();
    if !loader.ensure_loaded_strict() {
        // Strict mode fails closed; recover the reason for the human.
        return Err(match loader.load_failure() {
            Some(e) => format!("could not load natives: {e}"),
            None => "strict mode requires a full-featured desktop host".to_owned(),
        });
    }

    let Some(actual) = loader.current_version() else {
        // Unreachable after a strict load, but fail closed rather than panic.
        return Err("version query failed after load".to_owned());
    };

    let dev = verify::dev_override_enabled();
    let outcome = verify::verify(actual, PINNED_VERSION, dev);

    // One line per fact, so a maintainer can immediately tell which of the
    // three outcomes occurred and which versions were involved.
    println!("lumen-natives version: {actual}");
    println!("lumen-natives release-lock: {PINNED_VERSION}");
    println!("dev override ({DEV_OVERRIDE_VAR}=1): {dev}");
    println!("outcome: {}", outcome.as_str());

    if let Some(path) = report_path {
        let report = VerificationReport::new(actual, dev, outcome);
        report
            .write_to(&path)
            .map_err(|e| format!("could not write report to {}: {e}", path.display()))?;
    }

    Ok(outcome)
}

fn main() -> ExitCode {
    match run() {
        Ok(outcome) if outcome.passes() => ExitCode::SUCCESS,
        Ok(_) => {
            eprintln!(
                "verify-natives: version mismatch. Must be in dev mode \
                 (export {DEV_OVERRIDE_VAR}=1) OR must be the last released \
                 lumen-natives version. This check prevents accidentally \
                 releasing an unreproducible binary."
            );
            ExitCode::FAILURE
        }
        Err(msg) => {
            eprintln!("verify-natives: {msg}");
            ExitCode::FAILURE
        }
    }
}
