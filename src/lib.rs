// ── Safety policy ─────────────────────────────────────────────────────────────
// Unsafe code is forbidden everywhere except:
//   • `loader`  – dynamic library loading and export resolution
//   • `binding` – raw calls across the native ABI
// Each unsafe block in those modules MUST carry a `// SAFETY:` comment.
#![deny(unsafe_code)]

// ── Crate layout ──────────────────────────────────────────────────────────────
//
// `platform` resolves the running os/arch pair to the canonical identifier
// naming the prebuilt Lumen artifact. `loader` loads that artifact into the
// process exactly once and resolves its export table. `binding` is the flat
// unsafe surface over those exports, operating on opaque handles. `verify`
// is the reproducibility guard used by the `verify-natives` tool; normal
// runtime use never touches it.

pub mod binding;
pub mod error;
pub mod loader;
pub mod platform;
pub mod verify;

pub use error::{NativesError, Result};
