use std::path::PathBuf;

use campaigns_core::models::DiffStat;
use campaigns_core::resolvers::PatchResolver;
use clap::Args;
use tracing::instrument;

use crate::commands::read_patch;
use crate::errors::CliError;

/// Arguments for the stat command
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Path to a unified diff
    pub diff: PathBuf,
}

/// Execute the stat command
#[instrument(skip(args), fields(diff = ?args.diff))]
pub async fn execute(args: StatArgs) -> Result<(), CliError> {
    let (files, stat) = diff_summary(&args)?;
    println!(
        "{} files: {} added, {} changed, {} deleted",
        files, stat.added, stat.changed, stat.deleted
    );
    Ok(())
}

/// Counts the files of a diff and totals their lines.
pub fn diff_summary(args: &StatArgs) -> Result<(usize, DiffStat), CliError> {
    let resolver = PatchResolver::new(read_patch(&args.diff, "HEAD")?);
    Ok((resolver.file_diff_count()?, resolver.diff_stat()?))
}
