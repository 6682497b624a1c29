// ── Raw native binding ────────────────────────────────────────────────────────
//
// This is one of exactly two modules where `unsafe` is permitted.
// Every `unsafe` block MUST carry a `// SAFETY:` comment.
//
// A flat, one-to-one mirror of the Lumen native export set. Functions here
// operate on raw integer handles, never on owning Rust objects, and perform
// zero state checks: the hot path must cost nothing beyond the ABI crossing
// itself. Safety (live-handle tracking, load-state checks, RAII) belongs to
// a higher-level wrapper, not this layer.
//
// Contract for every function in this module: `loader::global()` must have
// reported `Loaded` before the call. Calling earlier is a programming error
// with undefined behaviour, not a recoverable condition.

#![allow(unsafe_code)]

use std::ffi::CStr;
use std::ops::{BitOr, BitOrAssign};
use std::os::raw::{c_char, c_uchar, c_void};
use std::ptr;

use libloading::Library;

use crate::loader::{self, LoadError};

// ── Native export signatures ──────────────────────────────────────────────────

type NewInstanceFn = unsafe extern "C" fn(u32, *mut *const c_char) -> *mut c_void;
type GetMetaInfoFn = unsafe extern "C" fn(*mut c_void, i32) -> *const c_char;
type RefFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;
type UnrefFn = unsafe extern "C" fn(*mut c_void) -> c_uchar;
type GetVersionFn = unsafe extern "C" fn() -> *const c_char;

/// The resolved export table. Plain fn pointers copied out of the loaded
/// library; valid for the process lifetime because the loader never unloads.
pub(crate) struct RawApi {
    pub(crate) new_instance: NewInstanceFn,
    pub(crate) get_meta_info: GetMetaInfoFn,
    pub(crate) ref_obj: RefFn,
    pub(crate) unref_obj: UnrefFn,
    pub(crate) get_version: GetVersionFn,
}

fn missing(name: &str, e: libloading::Error) -> LoadError {
    LoadError::new(format!("missing export {name}: {e}"))
}

impl RawApi {
    /// Resolve the full export set or report which export is absent.
    ///
    /// A library that opens but lacks any one of these is the wrong artifact
    /// (ABI mismatch); the loader treats that as a rejected candidate.
    pub(crate) fn resolve(lib: &Library) -> Result<Self, LoadError> {
        // SAFETY: each symbol is declared with the exact signature the Lumen
        // ABI documents for it; the fn pointers are copied out of `Symbol`s
        // whose backing `Library` the loader keeps alive for the process
        // lifetime.
        unsafe {
            Ok(Self {
                new_instance: *lib
                    .get::<NewInstanceFn>(b"lumenNewInstance\0")
                    .map_err(|e| missing("lumenNewInstance", e))?,
                get_meta_info: *lib
                    .get::<GetMetaInfoFn>(b"lumenGetMetaInfo\0")
                    .map_err(|e| missing("lumenGetMetaInfo", e))?,
                ref_obj: *lib
                    .get::<RefFn>(b"lumenRef\0")
                    .map_err(|e| missing("lumenRef", e))?,
                unref_obj: *lib
                    .get::<UnrefFn>(b"lumenUnref\0")
                    .map_err(|e| missing("lumenUnref", e))?,
                get_version: *lib
                    .get::<GetVersionFn>(b"lumenGetVersion\0")
                    .map_err(|e| missing("lumenGetVersion", e))?,
            })
        }
    }
}

// ── InstanceHandle ────────────────────────────────────────────────────────────

/// Opaque token for a native execution instance.
///
/// A fixed-width integer, not a reference: the state it names is owned by
/// the native module, outside any Rust lifetime. Zero is reserved to mean
/// "creation failed" and is never a live handle. The crate never
/// dereferences a handle; it only passes it back across the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    /// The reserved failure sentinel.
    pub const NULL: InstanceHandle = InstanceHandle(0);

    /// Wrap a raw handle value, rejecting the zero sentinel.
    pub fn from_raw(raw: u64) -> Option<InstanceHandle> {
        if raw == 0 {
            None
        } else {
            Some(InstanceHandle(raw))
        }
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn as_ptr(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    fn from_ptr(p: *mut c_void) -> u64 {
        p as usize as u64
    }
}

// ── InstanceFlags ─────────────────────────────────────────────────────────────

/// Bitmask of optional instance behaviours.
///
/// Each bit enables one behaviour independently; flags combine with `|` in
/// any order. Values are fixed by the native ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceFlags(u32);

impl InstanceFlags {
    pub const NONE: InstanceFlags = InstanceFlags(0);
    /// Let the instance print diagnostics to the process stderr.
    pub const CAN_PRINTF: InstanceFlags = InstanceFlags(1);
    /// Check the backend for known-broken behaviour at creation time.
    pub const BACKEND_CHECK: InstanceFlags = InstanceFlags(2);
    /// As `BACKEND_CHECK`, but reject anything suspicious.
    pub const BACKEND_CHECK_AGGRESSIVE: InstanceFlags = InstanceFlags(4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: InstanceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InstanceFlags {
    type Output = InstanceFlags;
    fn bitor(self, rhs: InstanceFlags) -> InstanceFlags {
        InstanceFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for InstanceFlags {
    fn bitor_assign(&mut self, rhs: InstanceFlags) {
        self.0 |= rhs.0;
    }
}

// ── MetaInfoKind ──────────────────────────────────────────────────────────────

/// What to ask a live instance about itself. Values are fixed by the native
/// ABI (GL-derived).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MetaInfoKind {
    Vendor = 0x1F00,
    Renderer = 0x1F01,
    Version = 0x1F02,
}

// ── Instance creation failure ─────────────────────────────────────────────────

/// How the caller wants a creation failure treated.
///
/// The binding does not act on this itself; it is carried inside the error
/// so the caller (or its caller) can pick abort-vs-retry by inspecting the
/// value rather than by catching a particular panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationFailureKind {
    /// Worth retrying later (e.g. after a display becomes available).
    Recoverable,
    /// The caller considers this unrecoverable for the whole process.
    Fatal,
}

/// A failed `new_instance` call. Local to the call: nothing is cached, and
/// a later attempt may succeed after external state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCreationError {
    pub kind: CreationFailureKind,
    /// The native module's own description of what went wrong.
    pub detail: String,
}

impl std::fmt::Display for InstanceCreationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            CreationFailureKind::Recoverable => "recoverable",
            CreationFailureKind::Fatal => "fatal",
        };
        write!(f, "{} ({kind})", self.detail)
    }
}

impl std::error::Error for InstanceCreationError {}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Create a native execution instance.
///
/// On success the handle is always non-zero. On failure the native error
/// string becomes `detail` and `on_failure` becomes the error's `kind`.
/// Instances are independent: calling this twice yields two instances with
/// independent lifetimes, each of which must eventually be released with
/// [`unref_instance`].
///
/// # Safety
///
/// The global loader must have reported `Loaded`.
pub unsafe fn new_instance(
    flags: InstanceFlags,
    on_failure: CreationFailureKind,
) -> Result<InstanceHandle, InstanceCreationError> {
    // SAFETY: loaded per this function's contract.
    let api = unsafe { loader::global().api_unchecked() };
    let mut err: *const c_char = ptr::null();
    // SAFETY: `err` is a valid out-pointer for the duration of the call;
    // the module either returns a non-zero instance or fills `err` with a
    // pointer to a static NUL-terminated string.
    let raw = unsafe { (api.new_instance)(flags.bits(), &mut err) };
    match InstanceHandle::from_raw(InstanceHandle::from_ptr(raw)) {
        Some(handle) => Ok(handle),
        None => {
            let detail = if err.is_null() {
                "instance creation failed (module gave no detail)".to_owned()
            } else {
                // SAFETY: non-null error strings from the module are static
                // and NUL-terminated.
                unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
            };
            Err(InstanceCreationError {
                kind: on_failure,
                detail,
            })
        }
    }
}

/// Query a textual property of a live instance.
///
/// Returns `None` if the module has no value for `kind`. The string is
/// copied out; the returned value does not borrow from the module.
///
/// # Safety
///
/// The global loader must have reported `Loaded`, and `handle` must be a
/// live handle from [`new_instance`]. A released or forged handle is
/// undefined behaviour.
pub unsafe fn get_meta_info(handle: InstanceHandle, kind: MetaInfoKind) -> Option<String> {
    // SAFETY: loaded per this function's contract.
    let api = unsafe { loader::global().api_unchecked() };
    // SAFETY: `handle` is live per this function's contract.
    let raw = unsafe { (api.get_meta_info)(handle.as_ptr(), kind as i32) };
    if raw.is_null() {
        return None;
    }
    // SAFETY: non-null meta strings are NUL-terminated and remain valid at
    // least until the instance is released, which cannot happen during this
    // call (the caller holds the live handle).
    Some(unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned())
}

/// Take an additional reference on an instance. Returns the same handle.
///
/// # Safety
///
/// The global loader must have reported `Loaded`, and `handle` must be live.
pub unsafe fn ref_instance(handle: InstanceHandle) -> InstanceHandle {
    // SAFETY: loaded per this function's contract.
    let api = unsafe { loader::global().api_unchecked() };
    // SAFETY: `handle` is live per this function's contract.
    let raw = unsafe { (api.ref_obj)(handle.as_ptr()) };
    InstanceHandle(InstanceHandle::from_ptr(raw))
}

/// Release a reference on an instance; the counterpart to [`new_instance`]
/// (and [`ref_instance`]). Returns `true` when this call destroyed the
/// underlying object.
///
/// # Safety
///
/// The global loader must have reported `Loaded`, and `handle` must hold an
/// unreleased reference. Releasing more times than referenced
/// (double-release) is undefined behaviour, not a checked error.
pub unsafe fn unref_instance(handle: InstanceHandle) -> bool {
    // SAFETY: loaded per this function's contract.
    let api = unsafe { loader::global().api_unchecked() };
    // SAFETY: `handle` holds an unreleased reference per this function's
    // contract.
    unsafe { (api.unref_obj)(handle.as_ptr()) != 0 }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Zero is the failure sentinel; `from_raw` must reject it so a zero
    /// handle can never coexist with a success result.
    #[test]
    fn zero_is_never_a_handle() {
        assert_eq!(InstanceHandle::from_raw(0), None);
        assert!(InstanceHandle::NULL.is_null());
    }

    #[test]
    fn nonzero_roundtrips_through_from_raw() {
        let h = InstanceHandle::from_raw(0xDEAD_BEEF).expect("nonzero");
        assert!(!h.is_null());
        assert_eq!(h.as_raw(), 0xDEAD_BEEF);
    }

    /// Flags combine by OR with no ordering dependency.
    #[test]
    fn flags_or_is_order_independent() {
        let a = InstanceFlags::CAN_PRINTF | InstanceFlags::BACKEND_CHECK;
        let b = InstanceFlags::BACKEND_CHECK | InstanceFlags::CAN_PRINTF;
        assert_eq!(a, b);
        assert_eq!(a.bits(), 3);
        assert!(a.contains(InstanceFlags::CAN_PRINTF));
        assert!(a.contains(InstanceFlags::BACKEND_CHECK));
        assert!(!a.contains(InstanceFlags::BACKEND_CHECK_AGGRESSIVE));
    }

    #[test]
    fn flags_abi_values_are_fixed() {
        assert_eq!(InstanceFlags::NONE.bits(), 0);
        assert_eq!(InstanceFlags::CAN_PRINTF.bits(), 1);
        assert_eq!(InstanceFlags::BACKEND_CHECK.bits(), 2);
        assert_eq!(InstanceFlags::BACKEND_CHECK_AGGRESSIVE.bits(), 4);
    }

    #[test]
    fn meta_info_abi_values_are_fixed() {
        assert_eq!(MetaInfoKind::Vendor as i32, 0x1F00);
        assert_eq!(MetaInfoKind::Renderer as i32, 0x1F01);
        assert_eq!(MetaInfoKind::Version as i32, 0x1F02);
    }

    /// The caller's chosen failure kind survives into the error value, so
    /// a wrapper can dispatch on it.
    #[test]
    fn creation_error_carries_caller_chosen_kind() {
        let e = InstanceCreationError {
            kind: CreationFailureKind::Fatal,
            detail: "no compatible device".to_owned(),
        };
        assert_eq!(e.kind, CreationFailureKind::Fatal);
        assert_eq!(e.to_string(), "no compatible device (fatal)");
    }
}
