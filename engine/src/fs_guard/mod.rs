use sdk::errors::EngineError;
use std::path::{Path, PathBuf};

/// Path names that are never readable or writable, wherever they appear in a
/// path. The sandbox validator rejects string literals naming them too.
pub const DENIED_NAMES: &[&str] = &[
    ".ssh",
    ".env",
    ".aws/credentials",
    ".config/gcloud",
    "id_rsa",
    "id_ed25519",
    "id_dsa",
    ".gnupg",
    ".kube/config",
    "credentials",
    "private_key",
    ".npmrc",
    ".pypirc",
    ".netrc",
];

/// FileSystemGuard provides multi-layer defense against path traversal and unauthorized access.
///
/// It maintains a deny list of sensitive paths and performs double canonicalization checks
/// to prevent symlink-based bypass attacks. The built-in workspace capabilities and the
/// generated-unit runner both resolve paths through it.
///
/// # Security Model
///
/// The guard implements a four-gate validation process:
/// 1. Check deny list before canonicalization
/// 2. Canonicalize path to resolve symlinks and .. patterns
/// 3. Check deny list after canonicalization
/// 4. Verify path is within workspace
#[derive(Debug, Clone)]
pub struct FileSystemGuard {
    workspace: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl FileSystemGuard {
    /// Creates a new FileSystemGuard rooted at `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathCanonicalization` if the workspace doesn't exist
    /// or is inaccessible.
    pub fn new(workspace: PathBuf) -> Result<Self, EngineError> {
        // Canonicalize workspace to handle symlinks (e.g., /var -> /private/var on macOS)
        let workspace = workspace
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(workspace.clone(), e.to_string()))?;

        let deny_list = DENIED_NAMES.iter().map(PathBuf::from).collect();

        Ok(Self {
            workspace,
            deny_list,
        })
    }

    /// Validates an existing path through four security gates.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::PathDenied` if the path matches the deny list.
    /// Returns `EngineError::PathCanonicalization` if canonicalization fails.
    /// Returns `EngineError::PathOutsideWorkspace` if the path is outside workspace.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        // Gate 1: Check deny list before canonicalization
        if self.is_denied(path) {
            return Err(EngineError::PathDenied(path.to_path_buf()));
        }

        // Gate 2: Canonicalize to resolve symlinks and .. patterns
        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.to_path_buf(), e.to_string()))?;

        // Gate 3: Check deny list after canonicalization (catches symlink bypasses)
        if self.is_denied(&canonical) {
            return Err(EngineError::PathDenied(canonical));
        }

        // Gate 4: Verify within workspace
        if !canonical.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }

        Ok(canonical)
    }

    /// Validates a path that may not exist yet (a write target).
    ///
    /// The deny list applies to the full path; the parent directory must
    /// already exist and pass the four gates. Returns the canonical parent
    /// joined with the file name.
    pub fn validate_new_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        if path.exists() {
            return self.validate_path(path);
        }

        self.check_denied(path)?;

        let file_name = path
            .file_name()
            .ok_or_else(|| EngineError::PathCanonicalization(path.to_path_buf(), "no file name".into()))?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let canonical_parent = self.validate_path(parent)?;
        Ok(canonical_parent.join(file_name))
    }

    /// Resolve a user-supplied path against the workspace root
    pub fn absolutize(&self, path: &str) -> PathBuf {
        let target = Path::new(path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.workspace.join(target)
        }
    }

    /// Checks if a path matches any entry in the deny list.
    ///
    /// This catches patterns like:
    /// - `/home/user/.ssh/id_rsa` (ends with denied path)
    /// - `/tmp/.env` (contains denied component)
    /// - `workspace/../.ssh/id_rsa` (contains denied component)
    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .is_some_and(|name| denied.as_os_str().to_str() == Some(name))
                })
        })
    }

    /// Returns a reference to the workspace path.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Check if a path is denied without requiring it to exist on disk.
    pub fn check_denied(&self, path: &Path) -> Result<(), EngineError> {
        if self.is_denied(path) {
            return Err(EngineError::PathDenied(path.to_path_buf()));
        }
        Ok(())
    }
}
