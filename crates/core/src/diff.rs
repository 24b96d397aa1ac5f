//! # Diff Engine
//!
//! Unified diff handling for patches:
//!
//! - [`MultiFileDiffReader`] lazily parses a multi-file diff one file at a time.
//! - [`apply_patch`] rebuilds the new content of a file from its old content.
//! - [`FileDiffConnection`] serves windows of a patch's file diffs behind
//!   stable cursors, parsing each file at most once.
//!
//! Nothing in here performs I/O.

mod apply;
mod pagination;
mod parser;

pub use apply::apply_patch;
pub use pagination::{parse_cursor, FileDiffConnection, FileDiffPage};
pub use parser::{
    diff_stat, parse_multi_file_diff, parse_next_file, DiffParseError, FileDiff, Hunk,
    MultiFileDiffReader, Position,
};
