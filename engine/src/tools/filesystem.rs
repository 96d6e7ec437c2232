//! Workspace file capabilities
//!
//! Built-in `workspace:*` capabilities for reading, listing and writing files
//! inside the configured workspace. Every path goes through `FileSystemGuard`
//! (deny list + workspace boundary) before any I/O happens.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sdk::capability::Capability;
use sdk::descriptor::{CapabilityDescriptor, Origin, ParamType, SideEffect};
use sdk::types::{CapabilityError, CapabilityInput, CapabilityOutput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::fs_guard::FileSystemGuard;

/// Files larger than this are refused by `workspace:read_file`
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Identifier kind emitted for every file `workspace:list_dir` reports
pub const FILE_IDENTIFIER: &str = "file";

/// Shared file operations behind the three workspace capabilities
#[derive(Debug)]
pub struct WorkspaceFiles {
    guard: FileSystemGuard,
}

impl WorkspaceFiles {
    pub fn new(guard: FileSystemGuard) -> Self {
        Self { guard }
    }

    pub fn workspace(&self) -> &Path {
        self.guard.workspace()
    }

    /// Read a UTF-8 file within the workspace.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let path = self.guard.validate_path(&self.guard.absolutize(path))?;
        info!("Reading file: {}", path.display());

        let size = fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        if size > MAX_READ_BYTES {
            bail!(
                "{} is {} and exceeds the {} read limit",
                self.relative(&path),
                format_size(size),
                format_size(MAX_READ_BYTES)
            );
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        debug!("Read {} bytes from {}", content.len(), path.display());
        Ok(content)
    }

    /// Write content to a file within the workspace, creating parent
    /// directories as needed. Returns the canonical target path.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<PathBuf> {
        let target = self.guard.absolutize(path);
        self.guard.check_denied(&target)?;

        // The nearest existing ancestor must already sit inside the workspace,
        // otherwise create_dir_all could build directories outside it.
        if let Some(parent) = target.parent() {
            if !parent.exists() {
                let anchor = parent
                    .ancestors()
                    .find(|p| p.exists())
                    .unwrap_or_else(|| self.guard.workspace());
                self.guard.validate_path(anchor)?;
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directories {}", parent.display()))?;
            }
        }

        let validated = self.guard.validate_new_path(&target)?;
        info!("Writing {} bytes to: {}", content.len(), validated.display());

        fs::write(&validated, content)
            .await
            .with_context(|| format!("Failed to write {}", validated.display()))?;
        Ok(validated)
    }

    /// List a directory within the workspace. Returns the rendered listing
    /// and the workspace-relative paths of the regular files in it.
    pub async fn list_dir(&self, path: &str) -> Result<(String, Vec<String>)> {
        let path = self.guard.validate_path(&self.guard.absolutize(path))?;
        info!("Listing directory: {}", path.display());

        let mut entries = fs::read_dir(&path)
            .await
            .with_context(|| format!("Failed to read directory {}", path.display()))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut links = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // Denied names are hidden rather than listed and then refused.
            if self.guard.check_denied(Path::new(&name)).is_err() {
                continue;
            }
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                dirs.push(format!("d  {}/", name));
            } else if ft.is_symlink() {
                links.push(format!("l  {}", name));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push((name, size));
            }
        }

        dirs.sort();
        files.sort();
        links.sort();

        let total = dirs.len() + files.len() + links.len();
        let mut out = Vec::with_capacity(total + 1);
        out.push(format!("{}/  ({} entries)", self.relative(&path), total));
        out.extend(dirs);
        out.extend(
            files
                .iter()
                .map(|(name, size)| format!("f  {:>8}  {}", format_size(*size), name)),
        );
        out.extend(links);

        let identifiers = files
            .iter()
            .map(|(name, _)| self.relative(&path.join(name)))
            .collect();

        Ok((out.join("\n"), identifiers))
    }

    fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(self.guard.workspace()) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}K", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}M", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}G", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn failed(err: anyhow::Error) -> CapabilityError {
    CapabilityError::Failed(format!("{:#}", err))
}

/// `workspace:read_file path=...`
pub struct ReadFile(pub Arc<WorkspaceFiles>);

impl ReadFile {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "workspace:read_file",
            "Read a UTF-8 text file inside the workspace",
            SideEffect::Read,
            Origin::Builtin,
        )
        .with_param("path", ParamType::String, true)
        .with_example("workspace:read_file path=notes/todo.txt")
    }
}

#[async_trait]
impl Capability for ReadFile {
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let path = input.arg("path")?;
        let content = self.0.read_file(path).await.map_err(failed)?;
        Ok(CapabilityOutput::text(content))
    }
}

/// `workspace:list_dir [path=...]`
pub struct ListDir(pub Arc<WorkspaceFiles>);

impl ListDir {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "workspace:list_dir",
            "List a directory inside the workspace; yields one `file` identifier per file",
            SideEffect::Read,
            Origin::Builtin,
        )
        .with_param("path", ParamType::String, false)
        .with_example("workspace:list_dir")
        .with_example("workspace:list_dir path=notes")
    }
}

#[async_trait]
impl Capability for ListDir {
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let path = input.arg_opt("path").unwrap_or(".");
        let (listing, files) = self.0.list_dir(path).await.map_err(failed)?;
        Ok(files
            .into_iter()
            .fold(CapabilityOutput::text(listing), |out, file| {
                out.with_identifier(FILE_IDENTIFIER, file)
            }))
    }
}

/// `workspace:write_file path=... content=...`
pub struct WriteFile(pub Arc<WorkspaceFiles>);

impl WriteFile {
    pub fn descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            "workspace:write_file",
            "Create or overwrite a text file inside the workspace",
            SideEffect::Write,
            Origin::Builtin,
        )
        .with_param("path", ParamType::String, true)
        .with_param("content", ParamType::String, true)
        .with_example("workspace:write_file path=notes/summary.txt content=\"weekly summary\"")
    }
}

#[async_trait]
impl Capability for WriteFile {
    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let path = input.arg("path")?;
        let content = input.arg("content")?;
        let written = self.0.write_file(path, content).await.map_err(failed)?;
        let relative = self.0.relative(&written);
        Ok(
            CapabilityOutput::text(format!("Wrote {} bytes to {}", content.len(), relative))
                .with_effect(format!("wrote {}", relative))
                .with_identifier(FILE_IDENTIFIER, relative),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<WorkspaceFiles>) {
        let temp = TempDir::new().unwrap();
        let guard = FileSystemGuard::new(temp.path().to_path_buf()).unwrap();
        (temp, Arc::new(WorkspaceFiles::new(guard)))
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let (_temp, files) = setup();

        let out = WriteFile(files.clone())
            .invoke(
                CapabilityInput::new("workspace:write_file")
                    .with_arg("path", "notes/hello.txt")
                    .with_arg("content", "Hello, world!"),
            )
            .await
            .unwrap();
        assert_eq!(out.text, "Wrote 13 bytes to notes/hello.txt");
        assert_eq!(out.effects, vec!["wrote notes/hello.txt"]);

        let out = ReadFile(files)
            .invoke(CapabilityInput::new("workspace:read_file").with_arg("path", "notes/hello.txt"))
            .await
            .unwrap();
        assert_eq!(out.text, "Hello, world!");
    }

    #[tokio::test]
    async fn test_read_nonexistent_file() {
        let (_temp, files) = setup();
        let err = ReadFile(files)
            .invoke(CapabilityInput::new("workspace:read_file").with_arg("path", "nope.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Failed(_)));
    }

    #[tokio::test]
    async fn test_missing_path_argument() {
        let (_temp, files) = setup();
        let err = ReadFile(files)
            .invoke(CapabilityInput::new("workspace:read_file"))
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::MissingArgument(_)));
    }

    #[tokio::test]
    async fn test_list_dir_emits_file_identifiers() {
        let (temp, files) = setup();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::write(temp.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir(temp.path().join("subdir")).unwrap();
        std::fs::write(temp.path().join("subdir").join("c.txt"), "c").unwrap();

        let out = ListDir(files.clone())
            .invoke(CapabilityInput::new("workspace:list_dir"))
            .await
            .unwrap();
        assert!(out.text.starts_with("./  (3 entries)"));
        assert!(out.text.contains("d  subdir/"));
        let ids: Vec<_> = out.identifiers.iter().map(|i| i.value.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "b.txt"]);
        assert!(out.identifiers.iter().all(|i| i.kind == FILE_IDENTIFIER));

        let out = ListDir(files)
            .invoke(CapabilityInput::new("workspace:list_dir").with_arg("path", "subdir"))
            .await
            .unwrap();
        assert_eq!(out.identifiers[0].value, "subdir/c.txt");
    }

    #[tokio::test]
    async fn test_list_dir_hides_denied_entries() {
        let (temp, files) = setup();
        std::fs::write(temp.path().join(".env"), "TOKEN=x").unwrap();
        std::fs::write(temp.path().join("visible.txt"), "v").unwrap();

        let (listing, ids) = files.list_dir(".").await.unwrap();
        assert!(!listing.contains(".env"));
        assert_eq!(ids, vec!["visible.txt"]);
    }

    #[tokio::test]
    async fn test_path_traversal_blocked() {
        let outer = TempDir::new().unwrap();
        let workspace = outer.path().join("ws");
        std::fs::create_dir(&workspace).unwrap();
        std::fs::write(outer.path().join("outside_secret.txt"), "secret").unwrap();
        let files = WorkspaceFiles::new(FileSystemGuard::new(workspace).unwrap());

        assert!(files.read_file("../outside_secret.txt").await.is_err());
        assert!(files.write_file("../escape.txt", "x").await.is_err());
        assert!(files.write_file("../made/escape.txt", "x").await.is_err());
        assert!(!outer.path().join("made").exists());
        assert!(!outer.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_denied_path_blocked() {
        let (temp, files) = setup();
        let ssh_dir = temp.path().join(".ssh");
        std::fs::create_dir(&ssh_dir).unwrap();
        std::fs::write(ssh_dir.join("id_rsa"), "private key").unwrap();

        assert!(files.read_file(".ssh/id_rsa").await.is_err());
        assert!(files.write_file(".env", "TOKEN=x").await.is_err());
    }

    #[test]
    fn test_descriptors_are_valid() {
        for descriptor in [ReadFile::descriptor(), ListDir::descriptor(), WriteFile::descriptor()] {
            descriptor.validate_schema().unwrap();
            assert_eq!(descriptor.origin, Origin::Builtin);
        }
        assert!(WriteFile::descriptor().requires_approval());
        assert!(!ReadFile::descriptor().requires_approval());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0K");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0M");
    }
}
