//! Shared test utilities for imagewright tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use imagewright::base::BaseStore;
use imagewright::builder::LocalBackend;
use imagewright::{Backend, BuildPlan, BuildResult, Descriptor};

/// Image name used by `TestEnv::build`.
pub const IMAGE: &str = "test";

/// Test environment with a base store, a build context and an output dir.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Base environment store
    pub store: PathBuf,
    /// Build context (source tree)
    pub context: PathBuf,
    /// Output directory; not created until a build gets that far
    pub output: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with temporary directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let store = base.join("store");
        let context = base.join("context");
        let output = base.join("output");

        fs::create_dir_all(&store).expect("Failed to create store dir");
        fs::create_dir_all(&context).expect("Failed to create context dir");

        Self {
            _temp_dir: temp_dir,
            store,
            context,
            output,
        }
    }

    /// Create a minimal base environment `<name>:<tag>` and return its root.
    pub fn create_base(&self, name: &str, tag: &str) -> PathBuf {
        let rootfs = self.store.join(name).join(tag).join("rootfs");
        for dir in ["bin", "etc", "usr/lib"] {
            fs::create_dir_all(rootfs.join(dir)).expect("Failed to create base dir");
        }
        fs::write(
            rootfs.join("etc/os-release"),
            format!("NAME=\"{}\"\nVERSION_ID=\"{}\"\n", name, tag),
        )
        .expect("Failed to create os-release");
        rootfs
    }

    /// Write a file into the build context.
    pub fn write_source(&self, rel: &str, content: &str) {
        let path = self.context.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create source dir");
        }
        fs::write(path, content).expect("Failed to write source file");
    }

    /// Write `Buildfile` into the build context.
    pub fn write_descriptor(&self, text: &str) -> PathBuf {
        let path = self.context.join("Buildfile");
        fs::write(&path, text).expect("Failed to write Buildfile");
        path
    }

    /// Build plan for a descriptor given as text.
    pub fn plan(&self, descriptor: &str) -> BuildPlan {
        let descriptor = Descriptor::parse(descriptor).expect("Descriptor should parse");
        BuildPlan::new(descriptor, &self.context, IMAGE, &self.output)
    }

    /// Run a local build of `plan`.
    pub fn build_plan(&self, plan: &BuildPlan) -> BuildResult {
        LocalBackend::new(BaseStore::new(&self.store)).build(plan)
    }

    /// Run a local build of a descriptor given as text.
    pub fn build(&self, descriptor: &str) -> BuildResult {
        self.build_plan(&self.plan(descriptor))
    }

    /// Root filesystem of the committed image.
    pub fn image_rootfs(&self) -> PathBuf {
        self.output.join(IMAGE).join("rootfs")
    }

    /// Staging directory of the image.
    pub fn staging(&self) -> PathBuf {
        self.output.join(format!(".staging-{}", IMAGE))
    }
}

/// Assert that a file exists and is a regular file.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "File should exist: {}", path.display());
    assert!(path.is_file(), "Should be a file: {}", path.display());
}

/// Assert that a directory exists.
pub fn assert_dir_exists(path: &Path) {
    assert!(path.exists(), "Directory should exist: {}", path.display());
    assert!(path.is_dir(), "Should be a directory: {}", path.display());
}

/// Assert that a path does not exist.
pub fn assert_absent(path: &Path) {
    assert!(!path.exists(), "Should not exist: {}", path.display());
}
