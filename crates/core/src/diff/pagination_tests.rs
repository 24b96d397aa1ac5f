use std::sync::Arc;

use proptest::prelude::*;

use super::*;

fn diff_with_files(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "diff --git a/f{i} b/f{i}\n--- a/f{i}\n+++ b/f{i}\n@@ -1 +1 @@\n-old {i}\n+new {i}\n"
            )
        })
        .collect()
}

fn names(page: &FileDiffPage) -> Vec<String> {
    page.nodes.iter().map(|f| f.new_name.clone()).collect()
}

#[test]
fn test_first_page_reads_one_extra_record() {
    let connection = FileDiffConnection::new(diff_with_files(10));

    let page = connection.page(Some(2), None).unwrap();

    assert_eq!(names(&page), vec!["b/f0", "b/f1"]);
    assert_eq!(page.end_cursor, "2");
    assert!(page.has_next_page);
    assert_eq!(connection.records_parsed(), 3);
}

#[test]
fn test_following_the_end_cursor() {
    let connection = FileDiffConnection::new(diff_with_files(5));

    let first = connection.page(Some(3), None).unwrap();
    let second = connection
        .page(Some(3), Some(first.end_cursor.as_str()))
        .unwrap();

    assert_eq!(names(&second), vec!["b/f3", "b/f4"]);
    assert_eq!(second.end_cursor, "5");
    assert!(!second.has_next_page);
}

#[test]
fn test_exact_last_page_has_no_next_page() {
    let connection = FileDiffConnection::new(diff_with_files(4));

    let page = connection.page(Some(2), Some("2")).unwrap();

    assert_eq!(names(&page), vec!["b/f2", "b/f3"]);
    assert!(!page.has_next_page);
}

#[test]
fn test_without_limit_returns_everything() {
    let connection = FileDiffConnection::new(diff_with_files(7));

    let page = connection.page(None, Some("1")).unwrap();

    assert_eq!(page.nodes.len(), 6);
    assert!(!page.has_next_page);
    assert_eq!(connection.total_count().unwrap(), 7);
}

#[test]
fn test_bad_cursors_are_clamped_to_start() {
    let connection = FileDiffConnection::new(diff_with_files(3));
    let from_start = connection.page(Some(1), None).unwrap();

    for cursor in ["-5", "garbage", "", "1.5"] {
        let page = connection.page(Some(1), Some(cursor)).unwrap();
        assert_eq!(page, from_start, "cursor {:?}", cursor);
    }
}

#[test]
fn test_parse_cursor() {
    assert_eq!(parse_cursor(None), 0);
    assert_eq!(parse_cursor(Some("12")), 12);
    assert_eq!(parse_cursor(Some(" 3 ")), 3);
    assert_eq!(parse_cursor(Some("-1")), 0);
    assert_eq!(parse_cursor(Some("0x10")), 0);
}

#[test]
fn test_zero_and_negative_first() {
    let connection = FileDiffConnection::new(diff_with_files(3));

    let zero = connection.page(Some(0), Some("1")).unwrap();
    assert!(zero.nodes.is_empty());
    assert_eq!(zero.end_cursor, "1");
    assert!(zero.has_next_page);

    let negative = connection.page(Some(-4), None).unwrap();
    assert!(negative.nodes.is_empty());
}

#[test]
fn test_cursor_past_end_is_empty() {
    let connection = FileDiffConnection::new(diff_with_files(2));

    let page = connection.page(Some(5), Some("10")).unwrap();

    assert!(page.nodes.is_empty());
    assert!(!page.has_next_page);
}

#[test]
fn test_empty_diff() {
    let connection = FileDiffConnection::new("");

    let page = connection.page(Some(10), None).unwrap();

    assert!(page.nodes.is_empty());
    assert!(!page.has_next_page);
    assert_eq!(connection.total_count().unwrap(), 0);
}

#[test]
fn test_parse_error_is_cached_for_every_caller() {
    let mut text = diff_with_files(2);
    text.push_str("--- a/broken\n+++ b/broken\n@@ broken @@\n");
    text.push_str(&diff_with_files(2));
    let connection = FileDiffConnection::new(text);

    // The window and its look-ahead record stay clear of the broken file.
    assert!(connection.page(Some(1), None).is_ok());

    let err = connection.page(Some(2), None).unwrap_err();
    assert!(matches!(err, DiffParseError::MalformedHunkHeader { .. }));

    assert_eq!(connection.page(Some(1), None).unwrap_err(), err);
    assert_eq!(connection.total_count().unwrap_err(), err);
    assert_eq!(connection.records_parsed(), 2);
}

#[test]
fn test_trailing_text_does_not_count_as_a_record() {
    let mut text = diff_with_files(2);
    text.push_str("trailing notes\n");
    let connection = FileDiffConnection::new(text);

    let page = connection.page(Some(2), None).unwrap();

    assert_eq!(names(&page), vec!["b/f0", "b/f1"]);
    assert!(!page.has_next_page);
    assert_eq!(connection.total_count().unwrap(), 2);
}

#[test]
fn test_text_without_diff_has_no_records() {
    let connection = FileDiffConnection::new("hello world\n");

    let page = connection.page(Some(5), None).unwrap();

    assert!(page.nodes.is_empty());
    assert_eq!(page.end_cursor, "0");
    assert_eq!(connection.total_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_windows_parse_each_record_once() {
    let connection = Arc::new(FileDiffConnection::new(diff_with_files(40)));

    let requests = (0..32).map(|i| {
        let connection = Arc::clone(&connection);
        tokio::spawn(async move {
            let after = ((i * 7) % 40).to_string();
            connection.page(Some(5), Some(after.as_str())).map(|p| p.nodes.len())
        })
    });
    let results = futures::future::join_all(requests).await;

    for result in results {
        assert!(result.unwrap().unwrap() <= 5);
    }
    assert!(connection.records_parsed() <= 40);

    assert_eq!(connection.total_count().unwrap(), 40);
    assert_eq!(connection.records_parsed(), 40);
}

proptest! {
    #[test]
    fn test_concatenated_pages_equal_the_whole_set(files in 0usize..25, page_size in 1i32..7) {
        let text = diff_with_files(files);
        let everything = FileDiffConnection::new(text.as_str()).page(None, None).unwrap();

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            // A fresh connection per request, as separate requests would get.
            let connection = FileDiffConnection::new(text.as_str());
            let page = connection.page(Some(page_size), cursor.as_deref()).unwrap();
            collected.extend(page.nodes.iter().cloned());
            if !page.has_next_page {
                break;
            }
            cursor = Some(page.end_cursor);
        }

        prop_assert_eq!(collected, everything.nodes);
    }
}
