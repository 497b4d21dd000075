//! Build script to create the V8 startup snapshot.
//!
//! Every extension module (deno web APIs plus the virtual browser in
//! `src/js/`) is evaluated at build time, so each render session only
//! deserializes the snapshot instead of parsing and compiling the JS again.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

// The ops and the DOM tree types are shared with the library so they are
// IDENTICAL between the snapshot and the runtime
#[path = "src/dom.rs"]
mod dom;
#[path = "src/ops.rs"]
mod ops;

fn main() {
    println!("cargo:rerun-if-changed=src/js");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/ops.rs");
    println!("cargo:rerun-if-changed=src/dom.rs");

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let snapshot_path = out_dir.join("SSPR_SNAPSHOT.bin");

    // deno_web needs a blob store even while snapshotting
    let blob_store = Arc::new(deno_web::BlobStore::default());

    let snapshot = deno_core::snapshot::create_snapshot(
        deno_core::snapshot::CreateSnapshotOptions {
            cargo_manifest_dir: env!("CARGO_MANIFEST_DIR"),
            startup_snapshot: None,
            skip_op_registration: false,
            extensions: vec![
                // Order matters: dependencies first
                deno_webidl::deno_webidl::init_ops_and_esm(),
                deno_console::deno_console::init_ops_and_esm(),
                deno_url::deno_url::init_ops_and_esm(),
                deno_web::deno_web::init_ops_and_esm::<deno_permissions::PermissionsContainer>(
                    blob_store,
                    None,
                ),
                deno_crypto::deno_crypto::init_ops_and_esm(None),
                ops::sspr_host::init_ops_and_esm(),
            ],
            with_runtime_cb: None,
            extension_transpiler: None,
        },
        None,
    )
    .expect("Failed to create snapshot");

    std::fs::write(&snapshot_path, snapshot.output).expect("Failed to write snapshot");

    println!(
        "cargo:warning=Snapshot created at {:?} ({} bytes)",
        snapshot_path,
        std::fs::metadata(&snapshot_path).map(|m| m.len()).unwrap_or_default()
    );
}
