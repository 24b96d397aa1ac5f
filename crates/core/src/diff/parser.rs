use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::models::DiffStat;

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;

lazy_static! {
    static ref HUNK_HEADER_REGEX: Regex =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$")
            .expect("Failed to compile hunk header regex");
}

/// A syntax error in a unified diff. Line numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffParseError {
    #[error("line {line}: malformed hunk header '{header}'")]
    MalformedHunkHeader { line: usize, header: String },

    #[error("line {line}: hunk ends before its declared line counts are reached")]
    TruncatedHunk { line: usize },

    #[error("line {line}: unexpected line")]
    UnexpectedLine { line: usize },

    #[error("line {line}: '---' file header is not followed by a '+++' file header")]
    MissingNewFileHeader { line: usize },
}

/// One contiguous block of changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hunk {
    pub orig_start_line: u32,
    pub orig_lines: u32,
    pub new_start_line: u32,
    pub new_lines: u32,

    /// Text after the closing `@@`, usually the enclosing function
    pub section: String,

    /// The prefixed body lines, each terminated by `\n`
    pub body: String,
}

impl Hunk {
    /// Counts added, changed and deleted lines.
    ///
    /// A removal directly followed by an addition (or the other way round)
    /// counts as one changed line.
    pub fn stat(&self) -> DiffStat {
        let mut stat = DiffStat::default();
        let mut last = None;

        for line in self.body.lines() {
            match line.as_bytes().first() {
                Some(b'-') if last == Some(b'+') => {
                    stat.added -= 1;
                    stat.changed += 1;
                    last = None;
                }
                Some(b'-') => {
                    stat.deleted += 1;
                    last = Some(b'-');
                }
                Some(b'+') if last == Some(b'-') => {
                    stat.deleted -= 1;
                    stat.changed += 1;
                    last = None;
                }
                Some(b'+') => {
                    stat.added += 1;
                    last = Some(b'+');
                }
                _ => last = None,
            }
        }

        stat
    }
}

/// The changes to a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    /// The name on the `---` line, without any timestamp
    pub orig_name: String,

    /// The name on the `+++` line, without any timestamp
    pub new_name: String,

    /// Header lines preceding the file names (`diff --git`, `index`, ...)
    pub extended: Vec<String>,

    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    pub fn stat(&self) -> DiffStat {
        self.hunks.iter().map(Hunk::stat).sum()
    }

    /// The path before the change, or `None` for added files.
    pub fn old_path(&self) -> Option<&str> {
        strip_path(&self.orig_name, "a/")
    }

    /// The path after the change, or `None` for deleted files.
    pub fn new_path(&self) -> Option<&str> {
        strip_path(&self.new_name, "b/")
    }
}

fn strip_path<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    match name {
        "" | "/dev/null" => None,
        name => Some(name.strip_prefix(prefix).unwrap_or(name)),
    }
}

/// How far into a diff text parsing has progressed.
///
/// Holding a position rather than a borrow lets parsing be suspended and
/// resumed later on the same text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    offset: usize,
    line: usize,
}

struct Cursor<'a> {
    text: &'a str,
    pos: Position,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        let rest = self.text.get(self.pos.offset..)?;
        if rest.is_empty() {
            return None;
        }
        Some(match rest.find('\n') {
            Some(end) => &rest[..end],
            None => rest,
        })
    }

    fn bump(&mut self) {
        if let Some(line) = self.peek() {
            self.pos.offset = (self.pos.offset + line.len() + 1).min(self.text.len());
            self.pos.line += 1;
        }
    }

    /// 1-based number of the line `peek` returns.
    fn line_number(&self) -> usize {
        self.pos.line + 1
    }
}

/// Parses the file diff starting at `pos` and moves `pos` past it.
///
/// Returns `None` once only blank lines remain, or when the remaining text
/// holds no further file header. Such trailing text is not a file.
pub fn parse_next_file(text: &str, pos: &mut Position) -> Option<Result<FileDiff, DiffParseError>> {
    let mut cursor = Cursor { text, pos: *pos };
    while cursor.peek().is_some_and(|line| line.trim().is_empty()) {
        cursor.bump();
    }

    if cursor.peek().is_none() {
        *pos = cursor.pos;
        return None;
    }

    let result = parse_file(&mut cursor);
    *pos = cursor.pos;
    result.transpose()
}

/// Lines that make a `diff --git` record complete without `---`/`+++`.
const GIT_HEADER_ONLY_PREFIXES: &[&str] = &[
    "Binary files ",
    "GIT binary patch",
    "old mode ",
    "new mode ",
    "new file mode ",
    "deleted file mode ",
    "rename from ",
    "rename to ",
    "copy from ",
    "copy to ",
];

fn is_git_header_only(extended: &[String]) -> bool {
    extended
        .first()
        .is_some_and(|line| line.starts_with("diff --git "))
        && extended[1..].iter().any(|line| {
            GIT_HEADER_ONLY_PREFIXES
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
}

fn parse_file(cursor: &mut Cursor<'_>) -> Result<Option<FileDiff>, DiffParseError> {
    let start_line = cursor.line_number();
    let mut file = FileDiff::default();

    loop {
        match cursor.peek() {
            None => break,
            Some(line) if line.starts_with("--- ") => break,
            Some(line) if line.starts_with("@@") => {
                return Err(DiffParseError::UnexpectedLine {
                    line: cursor.line_number(),
                })
            }
            // A second `diff` line starts the next file, so this one has no
            // content changes (binary, mode change, pure rename).
            Some(line) if line.starts_with("diff ") && !file.extended.is_empty() => break,
            Some(line) => {
                file.extended.push(line.to_string());
                cursor.bump();
            }
        }
    }

    let Some(orig_header) = cursor.peek().filter(|line| line.starts_with("--- ")) else {
        if is_git_header_only(&file.extended) {
            names_from_git_header(&mut file);
            return Ok(Some(file));
        }
        if cursor.peek().is_none() {
            return Ok(None);
        }
        return Err(DiffParseError::UnexpectedLine { line: start_line });
    };
    let orig_line = cursor.line_number();
    file.orig_name = file_name(&orig_header[4..]);
    cursor.bump();

    match cursor.peek() {
        Some(line) if line.starts_with("+++ ") => {
            file.new_name = file_name(&line[4..]);
            cursor.bump();
        }
        _ => {
            return Err(DiffParseError::MissingNewFileHeader { line: orig_line });
        }
    }

    while cursor.peek().is_some_and(|line| line.starts_with("@@")) {
        file.hunks.push(parse_hunk(cursor)?);
    }

    Ok(Some(file))
}

fn parse_hunk(cursor: &mut Cursor<'_>) -> Result<Hunk, DiffParseError> {
    let header_line = cursor.line_number();
    let header = cursor.peek().unwrap_or_default();
    let malformed = || DiffParseError::MalformedHunkHeader {
        line: header_line,
        header: header.to_string(),
    };

    let captures = HUNK_HEADER_REGEX.captures(header).ok_or_else(malformed)?;
    let number = |index: usize| -> Result<u32, DiffParseError> {
        match captures.get(index) {
            Some(m) => m.as_str().parse().map_err(|_| malformed()),
            None => Ok(1),
        }
    };

    let mut hunk = Hunk {
        orig_start_line: number(1)?,
        orig_lines: number(2)?,
        new_start_line: number(3)?,
        new_lines: number(4)?,
        section: captures
            .get(5)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        body: String::new(),
    };
    cursor.bump();

    let (mut orig_left, mut new_left) = (hunk.orig_lines, hunk.new_lines);
    while orig_left > 0 || new_left > 0 {
        let Some(line) = cursor.peek() else {
            return Err(DiffParseError::TruncatedHunk { line: header_line });
        };
        let unexpected = DiffParseError::UnexpectedLine {
            line: cursor.line_number(),
        };

        // Some tools strip the trailing space of empty context lines.
        match line.as_bytes().first() {
            None | Some(b' ') => {
                if orig_left == 0 || new_left == 0 {
                    return Err(unexpected);
                }
                orig_left -= 1;
                new_left -= 1;
            }
            Some(b'-') => {
                if orig_left == 0 {
                    return Err(unexpected);
                }
                orig_left -= 1;
            }
            Some(b'+') => {
                if new_left == 0 {
                    return Err(unexpected);
                }
                new_left -= 1;
            }
            Some(b'\\') => {}
            Some(_) => return Err(DiffParseError::TruncatedHunk { line: header_line }),
        }

        hunk.body.push_str(line);
        hunk.body.push('\n');
        cursor.bump();
    }

    if let Some(marker) = cursor.peek().filter(|line| line.starts_with('\\')) {
        hunk.body.push_str(marker);
        hunk.body.push('\n');
        cursor.bump();
    }

    Ok(hunk)
}

fn file_name(raw: &str) -> String {
    raw.split('\t').next().unwrap_or_default().trim_end().to_string()
}

fn names_from_git_header(file: &mut FileDiff) {
    let names = file
        .extended
        .first()
        .and_then(|line| line.strip_prefix("diff --git "))
        .and_then(|rest| rest.split_once(" b/"));

    if let Some((orig, new)) = names {
        file.orig_name = orig.to_string();
        file.new_name = format!("b/{}", new);
    }
}

/// Iterates over the file diffs of a multi-file unified diff.
///
/// Parsing is lazy: each call to `next` reads exactly one file diff. After an
/// error the iterator is exhausted.
///
/// # Examples
///
/// ```
/// use campaigns_core::diff::MultiFileDiffReader;
///
/// let text = "--- a/README\n+++ b/README\n@@ -1 +1 @@\n-hello\n+hello, world\n";
/// let files: Vec<_> = MultiFileDiffReader::new(text).collect::<Result<_, _>>().unwrap();
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].stat().changed, 1);
/// ```
pub struct MultiFileDiffReader<'a> {
    text: &'a str,
    pos: Position,
    failed: bool,
}

impl<'a> MultiFileDiffReader<'a> {
    pub fn new(text: &'a str) -> Self {
        MultiFileDiffReader {
            text,
            pos: Position::default(),
            failed: false,
        }
    }
}

impl Iterator for MultiFileDiffReader<'_> {
    type Item = Result<FileDiff, DiffParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = parse_next_file(self.text, &mut self.pos)?;
        self.failed = item.is_err();
        Some(item)
    }
}

/// Parses every file diff in `text`.
pub fn parse_multi_file_diff(text: &str) -> Result<Vec<FileDiff>, DiffParseError> {
    MultiFileDiffReader::new(text).collect()
}

/// Sums the statistics of every file in `text`.
pub fn diff_stat(text: &str) -> Result<DiffStat, DiffParseError> {
    MultiFileDiffReader::new(text)
        .map(|file| file.map(|f| f.stat()))
        .sum()
}
