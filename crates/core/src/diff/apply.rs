use super::parser::FileDiff;

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;

/// Produces the content of a file after applying `file_diff` to `original`.
///
/// Hunks must be sorted by ascending original line. Out of order or
/// overlapping hunks produce unspecified (but deterministic) output; the diff
/// is never checked against the content it is applied to.
///
/// Lines of `original` between hunks are copied verbatim, and lines after the
/// last hunk are appended unchanged, including the trailing newline.
///
/// # Examples
///
/// ```
/// use campaigns_core::diff::{apply_patch, parse_multi_file_diff};
///
/// let diff = "--- a/f\n+++ b/f\n@@ -2 +2 @@\n-b\n+B\n";
/// let files = parse_multi_file_diff(diff).unwrap();
/// assert_eq!(apply_patch("a\nb\nc\n", &files[0]), "a\nB\nc\n");
/// ```
pub fn apply_patch(original: &str, file_diff: &FileDiff) -> String {
    let original_lines: Vec<&str> = original.split('\n').collect();
    let mut output: Vec<&str> = Vec::with_capacity(original_lines.len());

    // 1-based number of the next original line not yet consumed
    let mut last_line: usize = 1;

    for hunk in &file_diff.hunks {
        // A hunk without original lines inserts after `orig_start_line`.
        let start = if hunk.orig_lines == 0 {
            hunk.orig_start_line as usize + 1
        } else {
            hunk.orig_start_line as usize
        };

        if start > last_line {
            let hole = original_lines
                .get(last_line - 1..start - 1)
                .or_else(|| original_lines.get(last_line - 1..))
                .unwrap_or_default();
            output.extend_from_slice(hole);
            last_line = start;
        }

        for line in hunk.body.lines() {
            match line.as_bytes().first() {
                Some(b'-') => last_line += 1,
                Some(b'+') => output.push(&line[1..]),
                Some(b'\\') => {}
                _ => {
                    if let Some(context) = original_lines.get(last_line - 1) {
                        output.push(context);
                    }
                    last_line += 1;
                }
            }
        }
    }

    if let Some(rest) = original_lines.get(last_line - 1..) {
        output.extend_from_slice(rest);
    }

    output.join("\n")
}
