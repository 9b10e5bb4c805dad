//! Book title matcher.
//!
//! A deliberately simple "contains" predicate over the catalog: queries are
//! trimmed, matched case-insensitively as substrings of titles, and ranked
//! lexicographically by title. No fuzzy matching or typo tolerance. The zero
//! and exactly-one result counts are special cases that drive different
//! conversation transitions, so the outcome is classified here rather than
//! leaving every caller to re-derive it from a list length.

use anyhow::Result;
use rusqlite::Connection;

use crate::db::{self, Book};

/// Result limit used inside conversation flows
pub const CONVERSATION_LIMIT: usize = 10;
/// Result limit for slash-command autocomplete
pub const AUTOCOMPLETE_LIMIT: usize = 25;

/// Classified outcome of a title search
#[derive(Debug, Clone, PartialEq)]
pub enum TitleMatch {
    /// Nothing in the catalog contains the query
    None,
    /// Exactly one hit; safe to resolve without asking
    Unique(Book),
    /// Several hits, ranked by title, truncated to the caller's limit
    Ambiguous(Vec<Book>),
}

/// Raw substring search, ordered by title, truncated to `limit`
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<Book>> {
    db::find_books_by_title(conn, query.trim(), limit)
}

/// Search and classify by result count
pub fn match_title(conn: &Connection, query: &str, limit: usize) -> Result<TitleMatch> {
    let books = search(conn, query, limit)?;
    Ok(match books.len() {
        0 => TitleMatch::None,
        1 => TitleMatch::Unique(books.into_iter().next().expect("one element")),
        _ => TitleMatch::Ambiguous(books),
    })
}

/// Best single match for a mention, or None
pub fn best_match(conn: &Connection, query: &str) -> Result<Option<Book>> {
    Ok(search(conn, query, 1)?.into_iter().next())
}

/// Format a book as "Title by Author" when the author is known
pub fn display_title(book: &Book) -> String {
    match &book.author {
        Some(author) => format!("{} by {}", book.title, author),
        None => book.title.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        db::create_book(&conn, "Dune (Extended)", Some("Frank Herbert"), None).unwrap();
        db::create_book(&conn, "Dune Messiah", Some("Frank Herbert"), None).unwrap();
        db::create_book(&conn, "The Left Hand of Darkness", Some("Ursula K. Le Guin"), None)
            .unwrap();
        conn
    }

    #[test]
    fn test_match_is_case_insensitive_substring() {
        let conn = catalog();

        for query in ["dune", "DUNE", "Dune", "une mes"] {
            let books = search(&conn, query, 10).unwrap();
            assert!(!books.is_empty(), "query {query:?} should match");
        }
    }

    #[test]
    fn test_zero_one_and_many_are_classified() {
        let conn = catalog();

        assert_eq!(match_title(&conn, "nonexistent", 10).unwrap(), TitleMatch::None);

        match match_title(&conn, "left hand", 10).unwrap() {
            TitleMatch::Unique(book) => assert_eq!(book.title, "The Left Hand of Darkness"),
            other => panic!("Expected unique match, got {other:?}"),
        }

        match match_title(&conn, "dune", 10).unwrap() {
            TitleMatch::Ambiguous(books) => {
                assert_eq!(books.len(), 2);
                // Lexicographic by title, not relevance
                assert_eq!(books[0].title, "Dune (Extended)");
            }
            other => panic!("Expected ambiguous match, got {other:?}"),
        }
    }

    #[test]
    fn test_query_is_trimmed() {
        let conn = catalog();

        match match_title(&conn, "  left hand  ", 10).unwrap() {
            TitleMatch::Unique(book) => assert_eq!(book.title, "The Left Hand of Darkness"),
            other => panic!("Expected unique match, got {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_truncates_to_limit() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        for i in 0..15 {
            db::create_book(&conn, &format!("Series Volume {i:02}"), None, None).unwrap();
        }

        match match_title(&conn, "series", CONVERSATION_LIMIT).unwrap() {
            TitleMatch::Ambiguous(books) => assert_eq!(books.len(), CONVERSATION_LIMIT),
            other => panic!("Expected ambiguous match, got {other:?}"),
        }
    }

    #[test]
    fn test_best_match_takes_first_by_title() {
        let conn = catalog();

        let book = best_match(&conn, "dune").unwrap().unwrap();
        assert_eq!(book.title, "Dune (Extended)");

        assert!(best_match(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_display_title() {
        let conn = catalog();
        let book = best_match(&conn, "left hand").unwrap().unwrap();
        assert_eq!(
            display_title(&book),
            "The Left Hand of Darkness by Ursula K. Le Guin"
        );
    }
}
