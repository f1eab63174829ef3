//! Shared test infrastructure for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Path to the built `sam-translate` binary.
pub fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sam-translate"))
}

/// Run the binary in `dir` with the given arguments.
pub fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run sam-translate")
}

/// Install a stub `aws` executable in `dir`.
///
/// The stub appends its argument vector to `$AWS_STUB_LOG`, copies the
/// `--template-file` value to the `--output-template-file` value for
/// `package` (mimicking the real CLI's rewrite), and exits with
/// `$AWS_STUB_EXIT` (default 0).
#[cfg(unix)]
pub fn install_stub_aws(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = "#!/bin/sh\n\
        echo \"$@\" >> \"$AWS_STUB_LOG\"\n\
        if [ \"$2\" = \"package\" ] && [ \"${AWS_STUB_EXIT:-0}\" = \"0\" ]; then\n\
        \x20 cp \"$4\" \"$6\"\n\
        fi\n\
        exit \"${AWS_STUB_EXIT:-0}\"\n";
    let path = dir.join("aws");
    std::fs::write(&path, script).expect("write stub aws");
    let mut permissions = std::fs::metadata(&path).expect("stat stub aws").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod stub aws");
    path
}

/// `PATH` value that resolves `aws` to the stub in `stub_dir` while keeping
/// the shell and coreutils reachable.
#[cfg(unix)]
pub fn stub_path_env(stub_dir: &Path) -> std::ffi::OsString {
    let mut paths = vec![stub_dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).expect("join PATH")
}
