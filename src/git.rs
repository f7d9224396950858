//! Repository synchronization for fillings.
//!
//! Fillings may live in a git repository. A missing working copy is
//! cloned. An existing one is fetched and moved to the requested tag, or
//! pulled when no tag is requested. All of it goes through the `git` CLI.
//! A deploy key is passed to each `git` child through `GIT_SSH_COMMAND`
//! and never set on the bakeshop process itself.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::process::Cmd;

/// What to synchronize and where.
#[derive(Debug, Clone)]
pub struct SyncRequest<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    pub tag: Option<&'a str>,
    /// Absolute path to an SSH private key.
    pub ssh_key: Option<&'a Path>,
}

/// Source-control capability used by the filling resolver.
pub trait RepoSync {
    /// Bring `dest` up to date with `url` (and `tag`, if given).
    fn sync(&self, request: &SyncRequest<'_>) -> Result<()>;
}

/// [`RepoSync`] backed by the `git` binary.
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    fn git(&self, request: &SyncRequest<'_>) -> Cmd {
        let cmd = Cmd::new("git").env("GIT_TERMINAL_PROMPT", "0");
        match request.ssh_key {
            Some(key) => cmd.env("GIT_SSH_COMMAND", ssh_command(key)),
            None => cmd,
        }
    }

    fn clone_repo(&self, request: &SyncRequest<'_>) -> Result<()> {
        info!("Cloning {} into {}", request.url, request.dest.display());
        self.git(request)
            .arg("clone")
            .arg(request.url)
            .arg_path(request.dest)
            .error_msg(format!("git clone {} failed", request.url))
            .run()?;
        Ok(())
    }

    fn pull(&self, request: &SyncRequest<'_>) -> Result<()> {
        info!("Pulling latest into {}", request.dest.display());
        self.git(request)
            .arg("pull")
            .dir(request.dest)
            .error_msg(format!("git pull in {} failed", request.dest.display()))
            .run()?;
        Ok(())
    }

    fn fetch(&self, request: &SyncRequest<'_>) -> Result<()> {
        self.git(request)
            .args(["fetch", "--tags", "--force", "origin"])
            .dir(request.dest)
            .error_msg(format!("git fetch in {} failed", request.dest.display()))
            .run()?;
        Ok(())
    }

    fn checkout(&self, request: &SyncRequest<'_>, rev: &str) -> Result<()> {
        info!("Checking out {} in {}", rev, request.dest.display());
        self.git(request)
            .args(["checkout", "-q", "--detach", rev])
            .dir(request.dest)
            .error_msg(format!("git checkout {} failed", rev))
            .run()?;
        Ok(())
    }

    /// Whether HEAD is on a branch rather than detached.
    fn on_branch(&self, request: &SyncRequest<'_>) -> Result<bool> {
        let result = self
            .git(request)
            .args(["symbolic-ref", "-q", "HEAD"])
            .dir(request.dest)
            .allow_fail()
            .run()?;
        Ok(result.success())
    }
}

impl RepoSync for GitCli {
    fn sync(&self, request: &SyncRequest<'_>) -> Result<()> {
        if is_checkout(request.dest) {
            debug!("{} is an existing checkout", request.dest.display());
            match request.tag {
                Some(tag) => {
                    self.fetch(request)?;
                    self.checkout(request, tag)?;
                }
                None if self.on_branch(request)? => self.pull(request)?,
                // A previous tagged sync left HEAD detached.
                None => {
                    self.fetch(request)?;
                    self.checkout(request, "origin/HEAD")?;
                }
            }
            return Ok(());
        }

        if request.dest.exists() && !is_empty_dir(request.dest)? {
            bail!(
                "{} exists but is not a git checkout; refusing to clone over it",
                request.dest.display()
            );
        }
        self.clone_repo(request)?;
        if let Some(tag) = request.tag {
            self.checkout(request, tag)?;
        }
        Ok(())
    }
}

/// Whether `path` is the top of a git working copy.
pub fn is_checkout(path: &Path) -> bool {
    path.join(".git").exists()
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries =
        std::fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(entries.next().is_none())
}

/// Only HTTPS and SSH (`git@host:path`) transports are accepted.
pub fn is_supported_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("git@")
}

/// Resolve a recipe `ssh_key` value to an absolute path, expanding `~/`.
pub fn resolve_key_path(key: &str) -> Result<PathBuf> {
    let path = match key.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .context("Cannot expand ~ in ssh_key: no home directory")?
            .join(rest),
        None => PathBuf::from(key),
    };
    std::path::absolute(&path)
        .with_context(|| format!("Cannot resolve ssh_key path {}", path.display()))
}

fn ssh_command(key: &Path) -> String {
    format!("ssh -i '{}'", key.display().to_string().replace('\'', r"'\''"))
}
