//! Build pipeline tests for the local backend.
//!
//! Each test assembles a throwaway base store and context, runs a full build
//! and checks what is left in the output directory afterwards.

mod helpers;

use helpers::{assert_absent, assert_dir_exists, assert_file_exists, TestEnv, IMAGE};
use imagewright::base::BaseStore;
use imagewright::builder::LocalBackend;
use imagewright::digest::hash_tree;
use imagewright::image;
use imagewright::{Backend, BuildError, BuildPlan, Descriptor};
use std::fs;
use std::os::unix::fs::PermissionsExt;

const RUST_BUILD: &str = "\
FROM rust-build
MAINTAINER Dev Team <dev@example.com>
RUN mkdir /app
ADD . /app
WORKDIR /app
RUN test -f Cargo.toml && test -f src/main.rs
";

// =============================================================================
// Successful builds
// =============================================================================

#[test]
fn test_build_copies_source_and_passes() {
    let env = TestEnv::new();
    env.create_base("rust-build", "latest");
    env.write_source("Cargo.toml", "[package]\nname = \"calc\"\n");
    env.write_source("src/main.rs", "fn main() {}\n");

    let outcome = env.build(RUST_BUILD).expect("Build should succeed");
    assert_eq!(outcome.manifest.exit_code, 0);
    assert_eq!(outcome.manifest.backend, "local");
    assert_eq!(outcome.manifest.base, "rust-build:latest");
    assert_eq!(outcome.manifest.target, "/app");
    assert_eq!(
        outcome.manifest.maintainer.as_deref(),
        Some("Dev Team <dev@example.com>")
    );

    let rootfs = env.image_rootfs();
    assert_file_exists(&rootfs.join("etc/os-release"));
    assert_file_exists(&rootfs.join("app/Cargo.toml"));
    assert_file_exists(&rootfs.join("app/src/main.rs"));
    assert_eq!(
        fs::read_to_string(rootfs.join("app/src/main.rs")).unwrap(),
        "fn main() {}\n"
    );
    assert_absent(&env.staging());

    let manifest = image::load_image(&env.output, IMAGE).unwrap();
    assert_eq!(manifest, outcome.manifest);
}

#[test]
fn test_empty_source_tree_yields_empty_target() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    env.build("FROM base\nCOPY . /app\nRUN test -z \"$(ls -A)\"\n")
        .expect("Empty context should build");

    let app = env.image_rootfs().join("app");
    assert_dir_exists(&app);
    assert_eq!(fs::read_dir(&app).unwrap().count(), 0);
}

#[test]
fn test_existing_target_is_not_an_error() {
    let env = TestEnv::new();
    let base = env.create_base("base", "latest");
    fs::create_dir_all(base.join("app")).unwrap();
    fs::write(base.join("app/from-base.txt"), "kept\n").unwrap();
    env.write_source("new.txt", "added\n");

    env.build("FROM base\nRUN mkdir /app\nRUN mkdir -p /app\nCOPY . /app\nRUN true\n")
        .expect("Existing /app should be accepted");

    let app = env.image_rootfs().join("app");
    assert_file_exists(&app.join("from-base.txt"));
    assert_file_exists(&app.join("new.txt"));
}

#[test]
fn test_verification_runs_from_target() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    env.build("FROM base\nCOPY . /app\nRUN [ \"$(pwd -P)\" = \"$IMAGE_ROOT/app\" ]\n")
        .expect("Working directory should be the target");
}

#[test]
fn test_workdir_changes_target() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("Makefile", "all:\n");

    let outcome = env
        .build("FROM base\nWORKDIR /src\nCOPY . .\nRUN test -f Makefile\n")
        .expect("Build should succeed");
    assert_eq!(outcome.manifest.target, "/src");
    assert_file_exists(&env.image_rootfs().join("src/Makefile"));
}

#[test]
fn test_env_reaches_verification() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    env.build("FROM base\nENV GREETING=hello\nCOPY . /app\nRUN test \"$GREETING\" = hello\n")
        .expect("ENV should be visible to the verification command");
}

#[test]
fn test_exec_form_verification() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("data.txt", "x\n");

    env.build("FROM base\nCOPY . /app\nCMD [\"test\", \"-f\", \"data.txt\"]\n")
        .expect("Exec form should run without a shell");
}

#[test]
fn test_rebuild_is_reproducible() {
    let env = TestEnv::new();
    env.create_base("rust-build", "latest");
    env.write_source("Cargo.toml", "[package]\nname = \"calc\"\n");
    env.write_source("src/main.rs", "fn main() {}\n");

    let first = env.build(RUST_BUILD).expect("First build should succeed");
    let first_tree = hash_tree(&env.image_rootfs(), None).unwrap();

    let second = env.build(RUST_BUILD).expect("Second build should succeed");
    let second_tree = hash_tree(&env.image_rootfs(), None).unwrap();

    assert_eq!(first.manifest.inputs_digest, second.manifest.inputs_digest);
    assert_eq!(first_tree, second_tree);
}

#[test]
fn test_source_change_changes_inputs_digest() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("a.txt", "one\n");
    let first = env.build("FROM base\nCOPY . /app\nRUN true\n").unwrap();

    env.write_source("a.txt", "two\n");
    let second = env.build("FROM base\nCOPY . /app\nRUN true\n").unwrap();

    assert_ne!(first.manifest.source_digest, second.manifest.source_digest);
    assert_ne!(first.manifest.inputs_digest, second.manifest.inputs_digest);
    assert_eq!(first.manifest.base_digest, second.manifest.base_digest);
}

#[test]
fn test_output_inside_context_is_not_copied() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("main.rs", "fn main() {}\n");

    let descriptor = Descriptor::parse("FROM base\nCOPY . /app\nRUN test ! -e out\n").unwrap();
    let output = env.context.join("out");
    let plan = BuildPlan::new(descriptor, &env.context, IMAGE, &output);
    LocalBackend::new(BaseStore::new(&env.store))
        .build(&plan)
        .expect("Output directory should be excluded from the copy");

    assert_file_exists(&output.join(IMAGE).join("rootfs/app/main.rs"));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failing_verification_propagates_exit_code() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    let err = env
        .build("FROM base\nCOPY . /app\nRUN exit 3\n")
        .expect_err("Build should fail");
    assert!(matches!(err, BuildError::VerificationCommandFailed { exit_code: 3 }));
    assert_eq!(err.exit_code(), 3);

    assert_absent(&env.image_rootfs());
    assert_absent(&env.staging());
}

#[test]
fn test_signal_maps_to_128_plus_signal() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    let err = env
        .build("FROM base\nCOPY . /app\nRUN kill -9 $$\n")
        .expect_err("Build should fail");
    assert_eq!(err.exit_code(), 137);
}

#[test]
fn test_failed_rebuild_keeps_previous_image() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    env.build("FROM base\nCOPY . /app\nRUN true\n").unwrap();
    env.build("FROM base\nCOPY . /app\nRUN false\n")
        .expect_err("Second build should fail");

    let manifest = image::load_image(&env.output, IMAGE).unwrap();
    assert_eq!(manifest.verify, "true");
}

#[test]
fn test_keep_failed_leaves_staging() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("a.txt", "a\n");

    let plan = env.plan("FROM base\nCOPY . /app\nRUN exit 1\n").keep_failed(true);
    env.build_plan(&plan).expect_err("Build should fail");

    assert_file_exists(&env.staging().join("rootfs/app/a.txt"));
    assert_absent(&env.image_rootfs());
}

#[test]
fn test_missing_base_creates_nothing() {
    let env = TestEnv::new();

    let err = env
        .build("FROM nonexistent:1.0\nRUN mkdir /app\nCOPY . /app\nRUN true\n")
        .expect_err("Build should fail");
    assert!(matches!(err, BuildError::BaseEnvironmentNotFound { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("nonexistent:1.0"));

    assert_absent(&env.output);
}

#[test]
fn test_wrong_tag_is_not_found() {
    let env = TestEnv::new();
    env.create_base("base", "1.0");

    let err = env.build("FROM base:2.0\nRUN true\n").unwrap_err();
    assert!(matches!(err, BuildError::BaseEnvironmentNotFound { .. }));
}

#[test]
fn test_pinned_digest_must_match() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    let digest = "0".repeat(64);

    let err = env
        .build(&format!("FROM base@sha256:{}\nRUN true\n", digest))
        .unwrap_err();
    assert!(matches!(err, BuildError::BaseDigestMismatch { .. }));
}

#[test]
fn test_missing_source_is_copy_error() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    let err = env
        .build("FROM base\nCOPY missing.txt /app/\nRUN true\n")
        .unwrap_err();
    assert!(matches!(err, BuildError::Copy { .. }));
    assert_absent(&env.staging());
    assert_absent(&env.image_rootfs());
}

#[test]
fn test_missing_context_is_copy_error() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    let descriptor = Descriptor::parse("FROM base\nCOPY . /app\nRUN true\n").unwrap();
    let plan = BuildPlan::new(descriptor, &env.context.join("nope"), IMAGE, &env.output);
    let err = env.build_plan(&plan).unwrap_err();
    assert!(matches!(err, BuildError::Copy { .. }));
}

#[test]
fn test_unreadable_source_is_copy_error() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("secret.txt", "hidden\n");
    let secret = env.context.join("secret.txt");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

    // Root reads through any mode bits; the failure can't be staged then.
    if fs::read(&secret).is_ok() {
        return;
    }

    let err = env
        .build("FROM base\nCOPY . /app\nRUN true\n")
        .expect_err("Build should fail");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();

    assert!(matches!(err, BuildError::Copy { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_absent(&env.staging());
    assert_absent(&env.image_rootfs());
}

#[test]
fn test_target_over_file_is_directory_creation_error() {
    let env = TestEnv::new();
    let base = env.create_base("base", "latest");
    fs::write(base.join("app"), "not a directory\n").unwrap();

    let err = env
        .build("FROM base\nCOPY . /app\nRUN true\n")
        .expect_err("Build should fail");
    assert!(matches!(err, BuildError::DirectoryCreation { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_absent(&env.staging());
    assert_absent(&env.image_rootfs());
}

#[test]
fn test_unrunnable_exec_command() {
    let env = TestEnv::new();
    env.create_base("base", "latest");

    let err = env
        .build("FROM base\nCOPY . /app\nCMD [\"nonexistent_command_12345\"]\n")
        .unwrap_err();
    assert!(matches!(err, BuildError::VerificationSpawn { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_absent(&env.staging());
}

// =============================================================================
// Image root containment
// =============================================================================

#[test]
fn test_absolute_symlink_in_base_stays_inside_image() {
    let env = TestEnv::new();
    let base = env.create_base("base", "latest");
    let host = tempfile::TempDir::new().unwrap();
    std::os::unix::fs::symlink(host.path(), base.join("app")).unwrap();
    env.write_source("payload.txt", "data\n");

    env.build("FROM base\nCOPY . /app\nRUN test -f payload.txt\n")
        .expect("Build should succeed");

    assert_eq!(fs::read_dir(host.path()).unwrap().count(), 0);
    let rerooted = env
        .image_rootfs()
        .join(host.path().strip_prefix("/").unwrap());
    assert_file_exists(&rerooted.join("payload.txt"));
}

#[test]
fn test_copied_symlink_is_not_followed_by_later_copy() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    let host = tempfile::TempDir::new().unwrap();
    std::os::unix::fs::symlink(host.path(), env.context.join("link")).unwrap();
    env.write_source("a.txt", "a\n");

    env.build("FROM base\nCOPY . /app\nCOPY a.txt /app/link/\nRUN true\n")
        .expect("Build should succeed");

    assert_eq!(fs::read_dir(host.path()).unwrap().count(), 0);
    assert!(env.image_rootfs().join("app/link").is_symlink());
}

#[test]
fn test_fifo_in_context_does_not_block_build() {
    let env = TestEnv::new();
    env.create_base("base", "latest");
    env.write_source("a.txt", "a\n");
    let status = std::process::Command::new("mkfifo")
        .arg(env.context.join("pipe"))
        .status()
        .unwrap();
    assert!(status.success());

    let (tx, rx) = std::sync::mpsc::channel();
    let plan = env.plan("FROM base\nCOPY . /app\nRUN test -f a.txt && test ! -e pipe\n");
    let store = env.store.clone();
    std::thread::spawn(move || {
        let result = LocalBackend::new(BaseStore::new(&store)).build(&plan);
        let _ = tx.send(result.is_ok());
    });

    let ok = rx
        .recv_timeout(std::time::Duration::from_secs(30))
        .expect("Build should not hang on a FIFO");
    assert!(ok);
}

// =============================================================================
// Descriptor files
// =============================================================================

#[test]
fn test_build_from_located_descriptor() {
    let env = TestEnv::new();
    env.create_base("rust-build", "latest");
    env.write_source("Cargo.toml", "[package]\nname = \"calc\"\n");
    env.write_source("src/main.rs", "fn main() {}\n");
    let written = env.write_descriptor(RUST_BUILD);

    let path = Descriptor::locate(&env.context).expect("Buildfile should be found");
    assert_eq!(path, written);

    let descriptor = Descriptor::load(&path).unwrap();
    let plan = BuildPlan::new(descriptor, &env.context, IMAGE, &env.output);
    env.build_plan(&plan).expect("Build should succeed");

    assert_file_exists(&env.image_rootfs().join("app/Buildfile"));
}
