/// lumen-natives build script.
///
/// The crate itself is pure Rust; the native module is a prebuilt artifact
/// picked up at runtime. The build script's only job is to fail loudly on
/// targets for which no Lumen native artifact exists, rather than silently
/// producing a loader that can never succeed.
fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "linux" | "windows" | "macos" | "android" => {}
        other => panic!(
            "no Lumen native artifact exists for this target \
             (CARGO_CFG_TARGET_OS = {other:?})"
        ),
    }

    // Only re-run the build script when it changes.
    println!("cargo:rerun-if-changed=build.rs");
}
