// ── Reproducibility guard ─────────────────────────────────────────────────────
//
// Compares the loaded module's self-reported version against the pinned
// release identifier. A mismatch fails release verification: it means a
// build is about to ship with an unpinned, unreproducible native module.
// The only escape hatch is an explicit developer opt-in via a single
// environment variable, and even then the diagnostic output must make the
// override visible.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

// ── Pinned version ────────────────────────────────────────────────────────────

/// The release identifier of the last released native module.
// This line is changed after each release.
pub const PINNED_VERSION: &str = "cordial-heron";

/// The one environment variable that can soften a mismatch.
pub const DEV_OVERRIDE_VAR: &str = "LUMEN_NATIVES_DEV";

// ── Outcome ───────────────────────────────────────────────────────────────────

/// Result of a reproducibility check.
///
/// `Match` and `DevOverride` both pass verification, but they are distinct
/// so output can tell "this is pinned" from "this is running in dev mode
/// and may be wrong".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The module's version equals the pinned identifier.
    Match,
    /// Versions differ, but the developer override is active.
    DevOverride,
    /// Versions differ and no override is active. Hard failure.
    Mismatch,
}

impl VerificationOutcome {
    /// Whether verification tooling should treat this as a pass.
    pub fn passes(self) -> bool {
        !matches!(self, Self::Mismatch)
    }

    /// Short token used in diagnostic output and the JSON report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::DevOverride => "dev-override",
            Self::Mismatch => "mismatch",
        }
    }
}

// ── Decision rule ─────────────────────────────────────────────────────────────

/// The guard's decision rule, in full:
/// `Match` iff `actual == expected`; else `DevOverride` iff `dev_override`;
/// else `Mismatch`. The version strings are compared, never parsed.
pub fn verify(actual: &str, expected: &str, dev_override: bool) -> VerificationOutcome {
    if actual == expected {
        VerificationOutcome::Match
    } else if dev_override {
        VerificationOutcome::DevOverride
    } else {
        VerificationOutcome::Mismatch
    }
}

// ── Override gate ─────────────────────────────────────────────────────────────

/// The literal-match rule: only the exact string `"1"` enables the override.
/// `"true"`, `"yes"`, `"0"`, the empty string, and absence all disable it.
fn override_from(value: Option<&str>) -> bool {
    value == Some("1")
}

/// Whether the developer override is active.
///
/// This is the only place in the crate where `LUMEN_NATIVES_DEV` may be
/// read. It is a safety guard with no other side effects; reading it
/// anywhere else would weaken the guarantee it exists to give.
pub fn dev_override_enabled() -> bool {
    override_from(std::env::var(DEV_OVERRIDE_VAR).ok().as_deref())
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Machine-readable record of one verification run, for CI artifacts.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerificationReport {
    /// The module's self-reported version.
    pub actual: String,
    /// The pinned release identifier it was compared against.
    pub expected: String,
    /// Whether the developer override was active during the run.
    pub dev_override: bool,
    /// `"match"`, `"dev-override"`, or `"mismatch"`.
    pub outcome: String,
}

impl VerificationReport {
    pub fn new(actual: &str, dev_override: bool, outcome: VerificationOutcome) -> Self {
        Self {
            actual: actual.to_owned(),
            expected: PINNED_VERSION.to_owned(),
            dev_override,
            outcome: outcome.as_str().to_owned(),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// The full truth table: equality wins, then the override, then failure.
    #[test]
    fn truth_table_is_exhaustive() {
        use VerificationOutcome::*;
        let cases = [
            ("1.2.3", "1.2.3", false, Match),
            ("1.2.3", "1.2.3", true, Match), // equality beats the override
            ("1.2.2", "1.2.3", false, Mismatch),
            ("1.2.2", "1.2.3", true, DevOverride),
            ("", "1.2.3", false, Mismatch),
            ("", "1.2.3", true, DevOverride),
            ("", "", false, Match),
        ];
        for (actual, expected, dev, want) in cases {
            assert_eq!(
                verify(actual, expected, dev),
                want,
                "verify({actual:?}, {expected:?}, {dev})"
            );
        }
    }

    /// Only the literal `"1"` enables the override. Truthy-looking values
    /// do not count; the gate must be an explicit, unambiguous opt-in.
    #[test]
    fn override_gate_accepts_only_literal_one() {
        assert!(override_from(Some("1")));
        assert!(!override_from(Some("true")));
        assert!(!override_from(Some("yes")));
        assert!(!override_from(Some("0")));
        assert!(!override_from(Some("")));
        assert!(!override_from(Some(" 1")));
        assert!(!override_from(None));
    }

    #[test]
    fn match_and_dev_override_pass_mismatch_fails() {
        assert!(VerificationOutcome::Match.passes());
        assert!(VerificationOutcome::DevOverride.passes());
        assert!(!VerificationOutcome::Mismatch.passes());
    }

    #[test]
    fn pinned_version_is_nonempty() {
        assert!(!PINNED_VERSION.is_empty());
    }

    #[test]
    fn report_records_the_run() {
        let r = VerificationReport::new("stray-ibis", true, VerificationOutcome::DevOverride);
        assert_eq!(r.actual, "stray-ibis");
        assert_eq!(r.expected, PINNED_VERSION);
        assert!(r.dev_override);
        assert_eq!(r.outcome, "dev-override");

        let json = serde_json::to_string(&r).expect("serialize");
        let back: VerificationReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.outcome, "dev-override");
        assert_eq!(back.actual, "stray-ibis");
    }
}
