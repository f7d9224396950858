//! Recipe locator resolution.
//!
//! A locator is either a local path or an http(s) URL. Remote recipes are
//! cached under the recipes directory by their trailing path segment, and
//! the cached copy is used when the fetch fails.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::ConfigError;

/// Where a recipe comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Local(PathBuf),
    Remote(String),
}

impl Locator {
    pub fn parse(locator: &str) -> Self {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            Locator::Remote(locator.to_string())
        } else {
            Locator::Local(PathBuf::from(locator))
        }
    }
}

/// Fetches the body of a remote recipe.
pub trait Fetch {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("bakeshop/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", url))?;
        response
            .text()
            .with_context(|| format!("Failed to read body of {}", url))
    }
}

/// Cache file for a remote recipe: the URL's last path segment under
/// `recipes_dir`.
pub fn cache_path(url: &str, recipes_dir: &Path) -> Result<PathBuf> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains(':') {
        bail!("Recipe URL {} does not end in a file name", url);
    }
    Ok(recipes_dir.join(name))
}

/// Turn a locator into a readable local file.
pub fn resolve(locator: &Locator, recipes_dir: &Path, fetcher: &dyn Fetch) -> Result<PathBuf> {
    let path = match locator {
        Locator::Local(path) => path.clone(),
        Locator::Remote(url) => {
            let cached = cache_path(url, recipes_dir)?;
            match fetch_into(url, &cached, fetcher) {
                Ok(()) => info!("Fetched recipe {} to {}", url, cached.display()),
                Err(e) => {
                    error!("Error while getting recipe {}: {:#}", url, e);
                    info!("Checking if a local version exists");
                    if !cached.exists() {
                        error!("Recipe does not exist locally");
                        return Err(ConfigError::RecipeMissing(cached).into());
                    }
                    warn!(
                        "Using cached {}; it may not be the latest version",
                        cached.display()
                    );
                }
            }
            cached
        }
    };

    if !path.is_file() {
        return Err(ConfigError::RecipeMissing(path).into());
    }
    Ok(path)
}

fn fetch_into(url: &str, cached: &Path, fetcher: &dyn Fetch) -> Result<()> {
    let body = fetcher.fetch(url)?;
    if let Some(parent) = cached.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(cached, body).with_context(|| format!("Failed to write {}", cached.display()))
}
