// ── Native module loading ─────────────────────────────────────────────────────
//
// This is one of exactly two modules where `unsafe` is permitted.
// Every `unsafe` block MUST carry a `// SAFETY:` comment.
//
// ── Ownership model ───────────────────────────────────────────────────────────
//
// `ModuleLoader` owns the single `libloading::Library` for the Lumen native
// module. The module is loaded at most once per process and is never
// unloaded: a failed load leaves partially initialised native state behind,
// so neither retry nor reload is supported. The loaded `NativeModule` (and
// with it the `Library`) lives inside a `OnceLock` until process exit.
//
// Concurrency: the `Unloaded → Loading` transition is the `OnceLock`'s
// internal compare-and-set. Exactly one thread runs the load; everyone else
// blocks until that thread publishes `Loaded` or `Failed`, then observes the
// same terminal state.

#![allow(unsafe_code)]

use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use libloading::{library_filename, Library};

use crate::binding::RawApi;
use crate::platform;

// ── Artifact identity ─────────────────────────────────────────────────────────

/// Base name of the native module, decorated per platform
/// (`liblumen-natives.so`, `lumen-natives.dll`, `liblumen-natives.dylib`).
const MODULE_NAME: &str = "lumen-natives";

/// Hosts on which `ensure_loaded_strict` is willing to run. Android (and
/// anything else constrained) is excluded: verification tooling only ever
/// runs on desktop machines, and failing closed there beats a misleading
/// pass.
const FULL_FEATURED_HOST: bool = cfg!(any(
    target_os = "linux",
    target_os = "windows",
    target_os = "macos"
));

// ── LoadError ─────────────────────────────────────────────────────────────────

/// A cached, process-permanent load failure.
///
/// Cloned out to every caller after the first failed attempt; the reason
/// never changes because the load is never re-attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    reason: String,
}

impl LoadError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Human-readable reason, listing every artifact candidate that was
    /// tried and why it was rejected.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for LoadError {}

// ── LoadOnce ──────────────────────────────────────────────────────────────────

/// At-most-once load state machine: `Unloaded → Loading → Loaded | Failed`.
///
/// The `OnceLock` provides the atomic `Unloaded → Loading` transition and
/// blocks concurrent callers until the winning thread publishes a terminal
/// state. The attempt counter exists so that the no-retry guarantee is
/// observable (and testable) rather than merely promised.
pub(crate) struct LoadOnce<T> {
    state: OnceLock<Result<T, LoadError>>,
    attempts: AtomicUsize,
}

impl<T> LoadOnce<T> {
    pub(crate) const fn new() -> Self {
        Self {
            state: OnceLock::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Run `init` if no attempt has happened yet; otherwise return the
    /// cached terminal state. Failures are cached exactly like successes.
    pub(crate) fn get_or_attempt(
        &self,
        init: impl FnOnce() -> Result<T, LoadError>,
    ) -> Result<&T, LoadError> {
        self.state
            .get_or_init(|| {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                init()
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Terminal state, or `None` while `Unloaded`/`Loading`.
    pub(crate) fn get(&self) -> Option<&Result<T, LoadError>> {
        self.state.get()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

// ── NativeModule ──────────────────────────────────────────────────────────────

/// The loaded native module: the OS library handle plus the resolved export
/// table and a cache of its self-reported version.
pub(crate) struct NativeModule {
    /// Keeps the OS mapping alive. Never dropped before process exit.
    _lib: Library,
    pub(crate) api: RawApi,
    version: OnceLock<String>,
}

impl NativeModule {
    /// The module's self-reported build identity. Queried once, cached for
    /// the process lifetime; the value cannot change without reloading,
    /// which is unsupported.
    fn version(&self) -> &str {
        self.version.get_or_init(|| {
            // SAFETY: `self` only exists after a successful load, so the
            // export table is valid. `lumenGetVersion` returns a pointer to
            // a static NUL-terminated string owned by the module, which
            // outlives this call because the module is never unloaded.
            let raw = unsafe { (self.api.get_version)() };
            if raw.is_null() {
                return String::new();
            }
            // SAFETY: non-null, NUL-terminated, static (see above).
            unsafe { CStr::from_ptr(raw) }
                .to_string_lossy()
                .into_owned()
        })
    }
}

// ── Artifact search ───────────────────────────────────────────────────────────

/// Candidate artifact locations, most-preferred first, mirroring the
/// escalation ladder of the original distribution scheme:
///
/// 1. `lumen-natives` via the system library search path;
/// 2. `lumen-natives-<canonical>` via the system library search path;
/// 3. `lumen-natives.<canonical>` in the current directory;
/// 4. `lumen-natives.<canonical>` beside the current executable.
fn candidates(canonical: &str) -> Vec<PathBuf> {
    let mut out = vec![
        PathBuf::from(library_filename(MODULE_NAME)),
        PathBuf::from(library_filename(format!("{MODULE_NAME}-{canonical}"))),
    ];
    let artifact = format!("{MODULE_NAME}.{canonical}");
    if let Ok(cwd) = std::env::current_dir() {
        out.push(cwd.join(&artifact));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            out.push(dir.join(&artifact));
        }
    }
    out
}

fn load_native() -> Result<NativeModule, LoadError> {
    let id = platform::resolve().map_err(|e| LoadError::new(e.to_string()))?;
    let canonical = id.canonical_name();

    let mut rejected: Vec<String> = Vec::new();
    for candidate in candidates(&canonical) {
        // SAFETY: loading a library runs its initialisers; the Lumen
        // artifacts are plain C libraries whose initialisers touch no
        // process state beyond their own. A hostile library on the search
        // path is outside this crate's threat model, as with any dlopen.
        let lib = match unsafe { Library::new(&candidate) } {
            Ok(lib) => lib,
            Err(e) => {
                trace(&candidate, &e.to_string());
                rejected.push(format!("{}: {e}", candidate.display()));
                continue;
            }
        };
        // A library that opens but lacks the export set is an ABI mismatch
        // (wrong or truncated artifact); record it and keep walking.
        match RawApi::resolve(&lib) {
            Ok(api) => {
                return Ok(NativeModule {
                    _lib: lib,
                    api,
                    version: OnceLock::new(),
                })
            }
            Err(e) => {
                trace(&candidate, e.reason());
                rejected.push(format!("{}: {e}", candidate.display()));
            }
        }
    }

    Err(LoadError::new(format!(
        "no loadable artifact for {canonical}: [{}]",
        rejected.join("; ")
    )))
}

/// Per-candidate stderr trace, debug builds only.
fn trace(candidate: &std::path::Path, why: &str) {
    if cfg!(debug_assertions) {
        eprintln!("lumen-natives loader: {}: {why}", candidate.display());
    }
}

// ── ModuleLoader ──────────────────────────────────────────────────────────────

/// Loads the native module at most once and hands out the terminal outcome.
///
/// Normally used through [`global`]; separately constructible so a
/// composition root (or a test) can hold its own instance instead of the
/// process-wide one.
pub struct ModuleLoader {
    state: LoadOnce<NativeModule>,
}

impl ModuleLoader {
    pub const fn new() -> Self {
        Self {
            state: LoadOnce::new(),
        }
    }

    /// Load the native module if this process has not yet tried.
    ///
    /// The first caller resolves the platform, walks the artifact candidate
    /// list, and resolves the export table. Every subsequent or concurrent
    /// caller gets the cached terminal outcome; a failure is never silently
    /// retried.
    pub fn ensure_loaded(&self) -> Result<(), LoadError> {
        self.state.get_or_attempt(load_native).map(|_| ())
    }

    /// Verification entry point: like [`ensure_loaded`](Self::ensure_loaded)
    /// but additionally requires a full-featured desktop host. Fails closed
    /// (returns `false`) so tooling can assert on the result instead of
    /// catching a panic.
    pub fn ensure_loaded_strict(&self) -> bool {
        if !FULL_FEATURED_HOST {
            return false;
        }
        self.ensure_loaded().is_ok()
    }

    /// The module's self-reported version string.
    ///
    /// `None` until the module is loaded. After a successful load the value
    /// is non-empty and identical across calls for the process lifetime.
    pub fn current_version(&self) -> Option<&str> {
        match self.state.get()? {
            Ok(module) => Some(module.version()),
            Err(_) => None,
        }
    }

    /// The cached load failure, if the one permitted attempt failed.
    pub fn load_failure(&self) -> Option<LoadError> {
        match self.state.get()? {
            Ok(_) => None,
            Err(e) => Some(e.clone()),
        }
    }

    /// `true` once the module is loaded.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state.get(), Some(Ok(_)))
    }

    /// How many load attempts have run (0 or 1 by construction).
    pub fn attempts(&self) -> usize {
        self.state.attempts()
    }

    /// The resolved export table, without any state check.
    ///
    /// # Safety
    ///
    /// [`ensure_loaded`](Self::ensure_loaded) must have returned `Ok` on
    /// this loader before this is called. There is deliberately no check:
    /// this backs the zero-overhead raw binding layer.
    pub(crate) unsafe fn api_unchecked(&self) -> &RawApi {
        // SAFETY: per this function's contract the state is terminal and Ok.
        let state = unsafe { self.state.get().unwrap_unchecked() };
        match state {
            Ok(module) => &module.api,
            // SAFETY: per this function's contract the state is Ok.
            Err(_) => unsafe { std::hint::unreachable_unchecked() },
        }
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide loader used by the raw binding layer.
pub fn global() -> &'static ModuleLoader {
    static GLOBAL: ModuleLoader = ModuleLoader::new();
    &GLOBAL
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// N threads racing `get_or_attempt` produce exactly one attempt, and
    /// every thread observes the same terminal outcome.
    #[test]
    fn load_once_runs_initializer_exactly_once_under_contention() {
        const THREADS: usize = 16;
        let cell: LoadOnce<u32> = LoadOnce::new();
        let runs = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let got = cell.get_or_attempt(|| {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    });
                    assert_eq!(got.copied(), Ok(7));
                });
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cell.attempts(), 1);
    }

    /// Once `Failed`, later callers get the identical reason and no new
    /// attempt runs.
    #[test]
    fn load_once_caches_failure_without_retry() {
        let cell: LoadOnce<u32> = LoadOnce::new();

        let first = cell.get_or_attempt(|| Err(LoadError::new("artifact missing")));
        assert_eq!(first.unwrap_err().reason(), "artifact missing");

        // A would-be-successful retry must not run.
        let second = cell.get_or_attempt(|| Ok(1));
        assert_eq!(second.unwrap_err().reason(), "artifact missing");
        assert_eq!(cell.attempts(), 1);
    }

    /// Concurrent callers joining a failed attempt all see the same reason.
    #[test]
    fn load_once_failure_is_shared_across_threads() {
        const THREADS: usize = 8;
        let cell: LoadOnce<u32> = LoadOnce::new();

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    let got = cell.get_or_attempt(|| Err(LoadError::new("abi mismatch")));
                    assert_eq!(got.unwrap_err().reason(), "abi mismatch");
                });
            }
        });

        assert_eq!(cell.attempts(), 1);
    }

    #[test]
    fn candidates_cover_the_search_ladder() {
        let c = candidates("x86_64-linux-gnu");
        assert!(c.len() >= 2);
        // System-search names come first and carry the platform decoration.
        let first = c[0].to_string_lossy().into_owned();
        assert!(first.contains("lumen-natives"), "first candidate: {first}");
        let second = c[1].to_string_lossy().into_owned();
        assert!(
            second.contains("lumen-natives-x86_64-linux-gnu"),
            "second candidate: {second}"
        );
        // File-convention candidates use the dotted artifact name.
        for p in &c[2..] {
            assert!(p
                .to_string_lossy()
                .ends_with("lumen-natives.x86_64-linux-gnu"));
        }
    }

    /// No native artifact exists in the test environment, so a real load
    /// fails; the failure must be cached, not re-attempted.
    #[test]
    fn ensure_loaded_caches_real_failure() {
        let loader = ModuleLoader::new();
        let first = loader.ensure_loaded().unwrap_err();
        let second = loader.ensure_loaded().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(loader.attempts(), 1);
        assert!(!loader.is_loaded());
        assert_eq!(loader.load_failure(), Some(first));
    }

    #[test]
    fn current_version_is_none_before_load() {
        let loader = ModuleLoader::new();
        assert_eq!(loader.current_version(), None);
    }

    /// Strict mode refuses before loading anything when the host is not
    /// full-featured; on desktop test hosts it simply mirrors the load
    /// outcome (which fails here, absent an artifact).
    #[test]
    fn ensure_loaded_strict_fails_closed() {
        let loader = ModuleLoader::new();
        assert!(!loader.ensure_loaded_strict());
    }
}
