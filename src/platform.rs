// ── Platform resolution ───────────────────────────────────────────────────────
//
// Maps the compile-time target to the canonical identifier used to name the
// prebuilt Lumen native artifact (`lumen-natives.<arch>-<os>`). Resolution is
// a pure function of the target constants: computed once, cached for the
// process lifetime, identical on every call.

use std::sync::OnceLock;

use crate::error::{NativesError, Result};

// ── Os ────────────────────────────────────────────────────────────────────────

/// Operating systems for which a prebuilt native artifact exists.
///
/// The ABI variant is folded into the token (`-gnu`, `-android`); the
/// artifact naming scheme never treats it independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    Windows,
    MacOs,
    /// Constrained host: artifacts exist, but `ensure_loaded_strict`
    /// rejects it (see `loader`).
    Android,
}

impl Os {
    /// Canonical token used in artifact file names.
    pub fn token(self) -> &'static str {
        match self {
            Self::Linux => "linux-gnu",
            Self::Windows => "windows-gnu",
            Self::MacOs => "macos",
            Self::Android => "linux-android",
        }
    }
}

// ── Arch ──────────────────────────────────────────────────────────────────────

/// CPU architectures for which a prebuilt native artifact exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
    Riscv64,
    X86,
    Arm,
}

impl Arch {
    /// Canonical token used in artifact file names.
    pub fn token(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Riscv64 => "riscv64",
            Self::X86 => "x86",
            Self::Arm => "arm",
        }
    }
}

// ── CanonicalPlatformId ───────────────────────────────────────────────────────

/// The resolved (OS, architecture) pair selecting a native artifact.
///
/// Immutable; obtained from [`resolve`] and never constructed from runtime
/// probing — the target is fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalPlatformId {
    pub os: Os,
    pub arch: Arch,
}

impl CanonicalPlatformId {
    /// Canonical `<arch>-<os>` name, e.g. `x86_64-linux-gnu`.
    pub fn canonical_name(self) -> String {
        format!("{}-{}", self.arch.token(), self.os.token())
    }
}

impl std::fmt::Display for CanonicalPlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.arch.token(), self.os.token())
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

fn detect_os() -> Option<Os> {
    if cfg!(target_os = "linux") {
        Some(Os::Linux)
    } else if cfg!(target_os = "windows") {
        Some(Os::Windows)
    } else if cfg!(target_os = "macos") {
        Some(Os::MacOs)
    } else if cfg!(target_os = "android") {
        Some(Os::Android)
    } else {
        None
    }
}

fn detect_arch() -> Option<Arch> {
    if cfg!(target_arch = "x86_64") {
        Some(Arch::X86_64)
    } else if cfg!(target_arch = "aarch64") {
        Some(Arch::Aarch64)
    } else if cfg!(target_arch = "riscv64") {
        Some(Arch::Riscv64)
    } else if cfg!(target_arch = "x86") {
        Some(Arch::X86)
    } else if cfg!(target_arch = "arm") {
        Some(Arch::Arm)
    } else {
        None
    }
}

/// Resolve the canonical platform identifier for this process.
///
/// Deterministic: the first call computes the value from the compile-time
/// target constants; every later call returns the cached copy. Fails with
/// [`NativesError::UnsupportedPlatform`] when no known os/arch pair matches —
/// a hard stop, since no alternative artifact exists.
pub fn resolve() -> Result<CanonicalPlatformId> {
    static RESOLVED: OnceLock<Result<CanonicalPlatformId>> = OnceLock::new();
    RESOLVED
        .get_or_init(|| match (detect_os(), detect_arch()) {
            (Some(os), Some(arch)) => Ok(CanonicalPlatformId { os, arch }),
            // build.rs gates target_os, but target_arch can still miss
            // (e.g. a linux-powerpc64 cross build reaches this arm).
            _ => Err(NativesError::UnsupportedPlatform {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
            }),
        })
        .clone()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// `resolve()` called twice in the same process returns identical values.
    #[test]
    fn resolve_is_deterministic() {
        let a = resolve();
        let b = resolve();
        assert_eq!(a, b);
    }

    /// The test host is always one of the supported desktop targets.
    #[test]
    fn resolve_succeeds_on_test_host() {
        let id = resolve().expect("test host must be a supported platform");
        assert!(!id.canonical_name().is_empty());
    }

    #[test]
    fn canonical_name_is_arch_then_os() {
        let id = CanonicalPlatformId {
            os: Os::Linux,
            arch: Arch::Aarch64,
        };
        assert_eq!(id.canonical_name(), "aarch64-linux-gnu");
        assert_eq!(id.to_string(), "aarch64-linux-gnu");
    }

    #[test]
    fn windows_token_carries_gnu_abi() {
        assert_eq!(Os::Windows.token(), "windows-gnu");
    }

    #[test]
    fn android_token_is_linux_android() {
        assert_eq!(Os::Android.token(), "linux-android");
    }
}
