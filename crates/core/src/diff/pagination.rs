use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::parser::{parse_next_file, DiffParseError, FileDiff, Position};

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod tests;

/// One window of file diffs.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDiffPage {
    pub nodes: Vec<Arc<FileDiff>>,

    /// Pass as `after` to get the next window
    pub end_cursor: String,

    pub has_next_page: bool,
}

#[derive(Debug, Default)]
struct ParseProgress {
    position: Position,
    records: Vec<Arc<FileDiff>>,
    exhausted: bool,
    error: Option<DiffParseError>,
}

/// Paginated access to the file diffs of one patch.
///
/// The diff text is parsed incrementally and only as far as the requested
/// windows reach. Every record is parsed at most once for the lifetime of the
/// connection, no matter how many callers ask for overlapping or different
/// windows concurrently: parsing happens under a lock and the results are kept.
/// The first parse error is kept as well: from then on every call returns it,
/// whatever window it asks for.
#[derive(Debug)]
pub struct FileDiffConnection {
    diff: Arc<str>,
    progress: Mutex<ParseProgress>,
}

impl FileDiffConnection {
    pub fn new(diff: impl Into<Arc<str>>) -> Self {
        FileDiffConnection {
            diff: diff.into(),
            progress: Mutex::new(ParseProgress::default()),
        }
    }

    /// Returns up to `first` file diffs following the cursor `after`.
    ///
    /// `first = None` returns everything after the cursor. A negative `first`
    /// is treated as zero. See [`parse_cursor`] for cursor handling.
    ///
    /// # Errors
    ///
    /// Returns the parse error of the diff if the window, or the single record
    /// after it, cannot be parsed.
    pub fn page(
        &self,
        first: Option<i32>,
        after: Option<&str>,
    ) -> Result<FileDiffPage, DiffParseError> {
        let offset = parse_cursor(after);
        let limit = first.map(|n| offset.saturating_add(n.max(0) as usize));

        let mut progress = self.lock();
        // One record past the window tells whether there is a next page.
        self.parse_until(&mut progress, limit.map(|l| l.saturating_add(1)))?;

        let available = progress.records.len();
        let end = limit.map_or(available, |l| l.min(available));
        let nodes = progress
            .records
            .get(offset..end)
            .map(<[Arc<FileDiff>]>::to_vec)
            .unwrap_or_default();
        let has_next_page = limit.is_some_and(|l| available > l);

        Ok(FileDiffPage {
            end_cursor: (offset + nodes.len()).to_string(),
            nodes,
            has_next_page,
        })
    }

    /// The number of file diffs in the patch. Parses the whole diff.
    pub fn total_count(&self) -> Result<usize, DiffParseError> {
        let mut progress = self.lock();
        self.parse_until(&mut progress, None)?;
        Ok(progress.records.len())
    }

    /// How many file diff records have been parsed so far.
    #[cfg(test)]
    pub(crate) fn records_parsed(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> MutexGuard<'_, ParseProgress> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn parse_until(
        &self,
        progress: &mut ParseProgress,
        wanted: Option<usize>,
    ) -> Result<(), DiffParseError> {
        if let Some(error) = &progress.error {
            return Err(error.clone());
        }

        while !progress.exhausted && wanted.map_or(true, |w| progress.records.len() < w) {
            match parse_next_file(&self.diff, &mut progress.position) {
                None => progress.exhausted = true,
                Some(Ok(file)) => progress.records.push(Arc::new(file)),
                Some(Err(error)) => {
                    debug!(error = %error, records = progress.records.len(), "Failed to parse file diff");
                    progress.error = Some(error.clone());
                    return Err(error);
                }
            }
        }

        Ok(())
    }
}

/// Interprets a pagination cursor.
///
/// A cursor is the decimal offset of the first record to return. A missing,
/// negative or malformed cursor is treated as zero, so such requests return the
/// first page rather than an error.
pub fn parse_cursor(after: Option<&str>) -> usize {
    after
        .and_then(|cursor| cursor.trim().parse::<i64>().ok())
        .map_or(0, |offset| offset.max(0) as usize)
}
