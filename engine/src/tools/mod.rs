//! Built-in capabilities
//!
//! Native capabilities registered with `Origin::Builtin` before any session
//! starts. Generated capabilities can never replace them.

pub mod filesystem;

pub use filesystem::{ListDir, ReadFile, WorkspaceFiles, WriteFile};

use crate::fs_guard::FileSystemGuard;
use crate::registry::CapabilityRegistry;
use sdk::errors::EngineError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Register every built-in capability, rooted at `workspace`.
///
/// # Errors
///
/// Fails when the workspace does not exist or a built-in name is already
/// taken in `registry`.
pub fn register_builtins(
    registry: &CapabilityRegistry,
    workspace: PathBuf,
) -> Result<(), EngineError> {
    let files = Arc::new(WorkspaceFiles::new(FileSystemGuard::new(workspace)?));

    registry.register(ReadFile::descriptor(), Arc::new(ReadFile(files.clone())))?;
    registry.register(ListDir::descriptor(), Arc::new(ListDir(files.clone())))?;
    registry.register(WriteFile::descriptor(), Arc::new(WriteFile(files.clone())))?;

    info!(
        "Registered built-in capabilities for workspace {}",
        files.workspace().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::descriptor::Origin;
    use tempfile::TempDir;

    #[test]
    fn test_register_builtins() {
        let temp = TempDir::new().unwrap();
        let registry = CapabilityRegistry::new();
        register_builtins(&registry, temp.path().to_path_buf()).unwrap();

        assert_eq!(
            registry.names(),
            vec![
                "workspace:list_dir",
                "workspace:read_file",
                "workspace:write_file"
            ]
        );
        assert!(registry
            .list(Some("workspace"))
            .iter()
            .all(|d| d.origin == Origin::Builtin));

        let err = register_builtins(&registry, temp.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateCapability(_)));
    }

    #[test]
    fn test_missing_workspace() {
        let temp = TempDir::new().unwrap();
        let registry = CapabilityRegistry::new();
        let err = register_builtins(&registry, temp.path().join("missing")).unwrap_err();
        assert!(matches!(err, EngineError::PathCanonicalization(_, _)));
        assert!(registry.is_empty());
    }
}
