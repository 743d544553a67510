//! [`TestDocs`]: manifest files in a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};

use manifest_core::FsSourceLoader;
use tempfile::TempDir;

/// A temporary directory of manifest files served by an [`FsSourceLoader`].
///
/// # Example
///
/// ```rust,no_run
/// use manifest_test_utils::TestDocs;
///
/// let docs = TestDocs::new();
/// docs.write("root.yaml", "imports: [a.yaml]\n");
/// docs.write("a.yaml", "title: A\n");
/// let loader = docs.loader();
/// ```
pub struct TestDocs {
    temp_dir: TempDir,
}

impl Default for TestDocs {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDocs {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write `body` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, body: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        path
    }

    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.root().join(relative)).unwrap();
    }

    pub fn loader(&self) -> FsSourceLoader {
        FsSourceLoader::new(self.root())
    }
}
