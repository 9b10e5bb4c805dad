//! Conversation state model for multi-turn book disambiguation.
//!
//! A conversation is a persisted row keyed by (user, channel) holding a state
//! tag plus a context payload whose shape depends on the state. The payload is
//! modeled as one struct per state so every transition knows statically which
//! fields it can rely on; the open-ended map the row stores on disk only
//! exists at the serialization boundary.

use chrono::Duration;
use serde::{Deserialize, Serialize};

pub const STATE_AWAITING_BOOK_SOURCE: &str = "AWAITING_BOOK_SOURCE";
pub const STATE_AWAITING_BOOK_SELECTION: &str = "AWAITING_BOOK_SELECTION";
pub const STATE_OCR_TEXT_SELECTION: &str = "OCR_TEXT_SELECTION";

/// How long a conversation stays answerable
pub const CONVERSATION_TTL_MINUTES: i64 = 5;
/// OCR selection gets longer since the user has to read the extracted text
pub const OCR_TTL_MINUTES: i64 = 10;

/// Candidate book stored in a selection context; a snapshot of the catalog
/// row at offer time, re-resolved against the store before committing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookCandidate {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Context while waiting for the user to name a book (or "none", or "1")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSourceContext {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Set when the flow started from an unmatched `[[title]]` tag; replying
    /// "1" creates a book with this exact title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_title: Option<String>,
}

/// Context while waiting for a numeric pick from an offered candidate list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSelectionContext {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub books: Vec<BookCandidate>,
}

/// Context while waiting for the user to pick an excerpt of OCR output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSelectionContext {
    pub full_text: String,
}

/// The conversation state machine's states with their typed contexts
#[derive(Debug, Clone, PartialEq)]
pub enum Conversation {
    AwaitingBookSource(BookSourceContext),
    AwaitingBookSelection(BookSelectionContext),
    OcrTextSelection(OcrSelectionContext),
}

/// Why a stored row could not be turned back into a `Conversation`
#[derive(Debug)]
pub enum ParseError {
    /// The state tag is not one the machine knows; handled by defensive reset
    UnknownState(String),
    /// The context payload does not match the state's schema
    BadContext(serde_json::Error),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownState(tag) => write!(f, "Unknown conversation state: {tag}"),
            ParseError::BadContext(e) => write!(f, "Undecodable conversation context: {e}"),
        }
    }
}

impl std::error::Error for ParseError {}

impl Conversation {
    /// The state tag stored in the database row
    pub fn tag(&self) -> &'static str {
        match self {
            Conversation::AwaitingBookSource(_) => STATE_AWAITING_BOOK_SOURCE,
            Conversation::AwaitingBookSelection(_) => STATE_AWAITING_BOOK_SELECTION,
            Conversation::OcrTextSelection(_) => STATE_OCR_TEXT_SELECTION,
        }
    }

    /// Serialize the context payload for storage
    pub fn context_json(&self) -> serde_json::Result<String> {
        match self {
            Conversation::AwaitingBookSource(ctx) => serde_json::to_string(ctx),
            Conversation::AwaitingBookSelection(ctx) => serde_json::to_string(ctx),
            Conversation::OcrTextSelection(ctx) => serde_json::to_string(ctx),
        }
    }

    /// Time-to-live applied whenever this state is written
    pub fn ttl(&self) -> Duration {
        match self {
            Conversation::OcrTextSelection(_) => Duration::minutes(OCR_TTL_MINUTES),
            _ => Duration::minutes(CONVERSATION_TTL_MINUTES),
        }
    }

    /// Rebuild the typed state from a stored (tag, context) pair
    pub fn parse(state: &str, context: &str) -> Result<Self, ParseError> {
        match state {
            STATE_AWAITING_BOOK_SOURCE => serde_json::from_str(context)
                .map(Conversation::AwaitingBookSource)
                .map_err(ParseError::BadContext),
            STATE_AWAITING_BOOK_SELECTION => serde_json::from_str(context)
                .map(Conversation::AwaitingBookSelection)
                .map_err(ParseError::BadContext),
            STATE_OCR_TEXT_SELECTION => serde_json::from_str(context)
                .map(Conversation::OcrTextSelection)
                .map_err(ParseError::BadContext),
            other => Err(ParseError::UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_source_round_trip() {
        let conv = Conversation::AwaitingBookSource(BookSourceContext {
            content: "knowledge is power".to_string(),
            source_url: None,
            suggested_title: Some("Nonexistent Title".to_string()),
        });

        let json = conv.context_json().unwrap();
        let parsed = Conversation::parse(conv.tag(), &json).unwrap();
        assert_eq!(parsed, conv);
    }

    #[test]
    fn test_selection_round_trip_keeps_candidates() {
        let conv = Conversation::AwaitingBookSelection(BookSelectionContext {
            content: "a quote".to_string(),
            source_url: Some("https://example.com".to_string()),
            books: vec![
                BookCandidate {
                    id: 1,
                    title: "Dune".to_string(),
                    author: Some("Frank Herbert".to_string()),
                },
                BookCandidate {
                    id: 2,
                    title: "Dune Messiah".to_string(),
                    author: None,
                },
            ],
        });

        let json = conv.context_json().unwrap();
        match Conversation::parse(conv.tag(), &json).unwrap() {
            Conversation::AwaitingBookSelection(ctx) => {
                assert_eq!(ctx.books.len(), 2);
                assert_eq!(ctx.books[0].title, "Dune");
            }
            other => panic!("Unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_state_tag() {
        let err = Conversation::parse("SOMETHING_ELSE", "{}").unwrap_err();
        assert!(matches!(err, ParseError::UnknownState(_)));
    }

    #[test]
    fn test_bad_context_payload() {
        let err = Conversation::parse(STATE_AWAITING_BOOK_SELECTION, "not json").unwrap_err();
        assert!(matches!(err, ParseError::BadContext(_)));

        // Valid JSON but missing required fields is also a bad context
        let err = Conversation::parse(STATE_AWAITING_BOOK_SELECTION, "{}").unwrap_err();
        assert!(matches!(err, ParseError::BadContext(_)));
    }

    #[test]
    fn test_ttl_per_state() {
        let ocr = Conversation::OcrTextSelection(OcrSelectionContext {
            full_text: "text".to_string(),
        });
        assert_eq!(ocr.ttl(), Duration::minutes(10));

        let source = Conversation::AwaitingBookSource(BookSourceContext {
            content: "text".to_string(),
            source_url: None,
            suggested_title: None,
        });
        assert_eq!(source.ttl(), Duration::minutes(5));
    }
}
