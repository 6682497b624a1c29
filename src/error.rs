// ── Central error type ────────────────────────────────────────────────────────
//
// All fallible operations in lumen-natives return `error::Result<T>`.
// Load-time failures are process-wide and permanent (see `loader`); instance
// creation failures are local to the call and retryable.

use crate::binding::InstanceCreationError;
use crate::loader::LoadError;

/// Every error that lumen-natives can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativesError {
    /// No Lumen native artifact exists for the running os/arch combination.
    /// Fatal: there is nothing to retry, no alternative module exists.
    UnsupportedPlatform {
        /// Raw `target_os` token, for display purposes.
        os: &'static str,
        /// Raw `target_arch` token, for display purposes.
        arch: &'static str,
    },

    /// The native module exists but could not be loaded (missing artifact,
    /// ABI mismatch, OS rejection). Cached by the loader; every later caller
    /// sees the same failure.
    Load(LoadError),

    /// The module loaded but instance construction failed (e.g. no
    /// compatible device). Not cached; a later attempt may succeed.
    InstanceCreation(InstanceCreationError),
}

impl std::fmt::Display for NativesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedPlatform { os, arch } => {
                write!(f, "unsupported platform: {arch}-{os}")
            }
            Self::Load(e) => write!(f, "native module load failed: {e}"),
            Self::InstanceCreation(e) => write!(f, "instance creation failed: {e}"),
        }
    }
}

impl std::error::Error for NativesError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Load(e) => Some(e),
            Self::InstanceCreation(e) => Some(e),
            Self::UnsupportedPlatform { .. } => None,
        }
    }
}

impl From<LoadError> for NativesError {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<InstanceCreationError> for NativesError {
    fn from(e: InstanceCreationError) -> Self {
        Self::InstanceCreation(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NativesError>;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::CreationFailureKind;

    #[test]
    fn unsupported_platform_display_names_the_pair() {
        let e = NativesError::UnsupportedPlatform {
            os: "haiku",
            arch: "powerpc64",
        };
        assert_eq!(e.to_string(), "unsupported platform: powerpc64-haiku");
    }

    #[test]
    fn load_error_display_carries_the_reason() {
        let e = NativesError::from(LoadError::new("no candidate artifact found"));
        assert!(e.to_string().contains("no candidate artifact found"));
    }

    #[test]
    fn instance_creation_error_converts() {
        let e = NativesError::from(InstanceCreationError {
            kind: CreationFailureKind::Recoverable,
            detail: "no EGL display".to_owned(),
        });
        assert!(matches!(e, NativesError::InstanceCreation(_)));
        assert!(e.to_string().contains("no EGL display"));
    }
}
