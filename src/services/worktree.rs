//! Git worktree isolation for worker instances.
//!
//! Each spawned instance can get its own checkout so parallel workers
//! never trample each other's files. Allocation is idempotent per
//! instance id; non-repo workspaces fall back to the shared workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{WorktreeCleanup, WorktreeConfig};

pub struct WorktreeManager {
    config: WorktreeConfig,
}

impl WorktreeManager {
    pub fn new(config: WorktreeConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn cleanup_strategy(&self) -> WorktreeCleanup {
        self.config.cleanup
    }

    /// Whether the workspace is a version-controlled repository.
    pub async fn is_git_repo(workspace: &Path) -> bool {
        git(workspace, &["rev-parse", "--is-inside-work-tree"])
            .await
            .is_ok()
    }

    /// Directory a given instance's worktree lives in.
    pub fn worktree_dir(&self, workspace: &Path, instance_id: &str) -> PathBuf {
        workspace.join(&self.config.root).join(instance_id)
    }

    fn branch_name(instance_id: &str) -> String {
        format!("tandem/{instance_id}")
    }

    /// Allocate (or re-use) a worktree for an instance.
    ///
    /// The branch forks from the configured base branch, or from current
    /// HEAD when none is configured. Re-spawning the same instance id
    /// finds the existing checkout and returns it unchanged.
    pub async fn allocate(&self, workspace: &Path, instance_id: &str) -> DomainResult<PathBuf> {
        let dir = self.worktree_dir(workspace, instance_id);

        if is_valid_worktree(&dir).await {
            info!(instance_id, dir = %dir.display(), "Reusing existing worktree");
            return Ok(dir);
        }

        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::Storage(format!("cannot create worktree root: {e}"))
            })?;
        }

        let branch = Self::branch_name(instance_id);
        let base = if self.config.base_branch.is_empty() {
            "HEAD".to_string()
        } else {
            self.config.base_branch.clone()
        };

        let dir_str = dir.to_string_lossy().into_owned();
        git(
            workspace,
            &["worktree", "add", "-B", &branch, &dir_str, &base],
        )
        .await
        .map_err(|e| DomainError::Storage(format!("git worktree add failed: {e}")))?;

        info!(instance_id, branch = %branch, dir = %dir.display(), "Worktree created");
        Ok(dir)
    }

    /// Release an instance's worktree and its branch.
    pub async fn release(&self, workspace: &Path, instance_id: &str) {
        let dir = self.worktree_dir(workspace, instance_id);
        if !dir.exists() {
            return;
        }
        let dir_str = dir.to_string_lossy().into_owned();
        if let Err(err) = git(workspace, &["worktree", "remove", "--force", &dir_str]).await {
            warn!(instance_id, error = %err, "git worktree remove failed");
            return;
        }
        let branch = Self::branch_name(instance_id);
        if let Err(err) = git(workspace, &["branch", "-D", &branch]).await {
            debug!(instance_id, error = %err, "worktree branch already gone");
        }
        info!(instance_id, "Worktree released");
    }

    /// Remove every tandem worktree under the configured root.
    pub async fn cleanup_all(&self, workspace: &Path) {
        let root = workspace.join(&self.config.root);
        let Ok(mut entries) = tokio::fs::read_dir(&root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                self.release(workspace, name).await;
            }
        }
        let _ = git(workspace, &["worktree", "prune"]).await;
    }
}

/// A directory is a valid worktree if it contains the `.git` link file
/// git places in linked worktrees.
async fn is_valid_worktree(dir: &Path) -> bool {
    tokio::fs::metadata(dir.join(".git")).await.is_ok()
}

async fn git(cwd: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}
