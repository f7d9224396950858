//! Clean command - removes staging left behind by a recipe.

use tracing::warn;

use crate::clean::{self, CleanReport};
use crate::config::Config;
use crate::recipe::Recipe;

/// Execute the clean command. Never fails; problems are in the report.
pub fn cmd_clean(config: &Config, recipe: &Recipe) -> CleanReport {
    let report = clean::clean(config, recipe);
    for path in &report.failed {
        warn!("Left behind: {}", path.display());
    }
    report
}
