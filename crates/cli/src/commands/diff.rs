use std::fmt::Write;
use std::path::PathBuf;

use campaigns_core::resolvers::{FileDiffResolverPage, PatchResolver};
use clap::Args;
use tracing::{debug, instrument};

use crate::commands::read_patch;
use crate::errors::CliError;

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;

/// Arguments for the diff command
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Path to a unified diff touching one or more files
    pub file: PathBuf,

    /// Number of file diffs to show
    #[arg(long)]
    pub first: Option<i32>,

    /// Cursor returned by a previous page
    #[arg(long)]
    pub after: Option<String>,
}

/// Execute the diff command
#[instrument(skip(args), fields(file = ?args.file))]
pub async fn execute(args: DiffArgs) -> Result<(), CliError> {
    let resolver = PatchResolver::new(read_patch(&args.file, "HEAD")?);
    let page = resolver.file_diffs(args.first, args.after.as_deref())?;
    debug!(nodes = page.nodes.len(), "Loaded file diff page");

    print!("{}", render_page(&page));
    Ok(())
}

/// Formats one page of file diffs, one line per file followed by the cursor.
pub fn render_page(page: &FileDiffResolverPage) -> String {
    let mut out = String::new();
    for node in &page.nodes {
        let file_diff = node.file_diff();
        let path = match (file_diff.old_path(), file_diff.new_path()) {
            (Some(old), Some(new)) if old != new => format!("{} -> {}", old, new),
            (_, Some(new)) => new.to_string(),
            (Some(old), None) => old.to_string(),
            (None, None) => "(unnamed)".to_string(),
        };
        let stat = node.stat();
        let _ = writeln!(
            out,
            "{}\t+{} ~{} -{}",
            path, stat.added, stat.changed, stat.deleted
        );
    }

    if page.has_next_page {
        let _ = writeln!(out, "next page: --after {}", page.end_cursor);
    }
    out
}
