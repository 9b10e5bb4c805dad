//! Slash-command handlers.
//!
//! Each handler is a plain function over the database plus already-parsed
//! option values, returning a `CommandReply`. Discord interaction plumbing
//! (option extraction, deferrals, response editing) lives in `crate::gateway`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::conversation::{BookSourceContext, Conversation, OcrSelectionContext};
use crate::db::{self, EntryType, NewEntry, StoreError};
use crate::matcher::{self, AUTOCOMPLETE_LIMIT};

use super::conversation_handler::{open_conversation, DUPLICATE_ENTRY_REPLY};
use super::ui_builder::stored_quote;

/// Embed color for reading-list and bookshelf replies
pub const EMBED_COLOR_READING: u32 = 0x00AE86;
/// Embed color for graph replies
pub const EMBED_COLOR_GRAPH: u32 = 0x7289DA;

/// A rich embed reply, kept platform-neutral for testing
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub color: u32,
}

/// What a command handler wants sent back
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// Plain text, visible to the channel
    Text(String),
    /// Plain text, visible only to the invoking user
    Ephemeral(String),
    /// A rich embed
    Embed(Embed),
}

/// `/store <content> [book] [source]`: commit immediately when a book was
/// picked, otherwise start the guided capture flow. The interaction id stands
/// in for a message id so the per-message uniqueness of entries still holds.
pub fn store(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    channel_id: &str,
    interaction_id: &str,
    content: &str,
    book_id: Option<i64>,
    source_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CommandReply> {
    let user = db::get_or_create_user(conn, discord_id, username)?;

    if let Some(book_id) = book_id {
        let book = match db::find_book(conn, book_id)? {
            Some(book) => book,
            None => return Ok(CommandReply::Ephemeral("Book not found!".to_string())),
        };

        return match db::create_entry(
            conn,
            &NewEntry {
                content,
                entry_type: EntryType::Quote,
                user_id: user.id,
                book_id: Some(book.id),
                source_url,
                message_id: interaction_id,
                channel_id,
            },
        ) {
            Ok(_) => Ok(CommandReply::Text(stored_quote(content, &book))),
            Err(StoreError::UniqueViolation(_)) => {
                Ok(CommandReply::Text(DUPLICATE_ENTRY_REPLY.to_string()))
            }
            Err(e) => Err(e.into()),
        };
    }

    let conversation = Conversation::AwaitingBookSource(BookSourceContext {
        content: content.to_string(),
        source_url: source_url.map(|s| s.to_string()),
        suggested_title: None,
    });
    open_conversation(conn, user.id, channel_id, &conversation, now)?;

    Ok(CommandReply::Text(format!(
        "📝 **Entry received:** \"{content}\"\n\n🤔 Which book is this from? You can:\n• Type a book title\n• Say \"none\" if it's a general thought"
    )))
}

/// `/cr list`: the caller's currently-reading shelf as an embed
pub fn cr_list(conn: &Connection, discord_id: &str, username: &str) -> Result<CommandReply> {
    let user = db::get_or_create_user(conn, discord_id, username)?;
    let reading = db::currently_reading(conn, user.id)?;

    if reading.is_empty() {
        return Ok(CommandReply::Text(
            "📚 You are not currently reading any books. Use `/cr add` to add some!".to_string(),
        ));
    }

    let description = reading
        .iter()
        .map(|(_, book)| format!("• {}", matcher::display_title(book)))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(CommandReply::Embed(Embed {
        title: "📚 Currently Reading".to_string(),
        description,
        fields: Vec::new(),
        color: EMBED_COLOR_READING,
    }))
}

/// `/cr add <title> [author] [image]`: create a book and put it on the
/// caller's shelf
pub fn cr_add(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    title: &str,
    author: Option<&str>,
    image_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CommandReply> {
    let user = db::get_or_create_user(conn, discord_id, username)?;

    let book = match db::create_book(conn, title, author, image_url) {
        Ok(book) => book,
        Err(StoreError::UniqueViolation(_)) => {
            return Ok(CommandReply::Text(format!(
                "A book with the title \"{title}\" already exists. Use `/cr existing` to add it to your reading list instead."
            )));
        }
        Err(e) => return Err(e.into()),
    };

    db::upsert_currently_reading(conn, user.id, book.id, now)?;
    info!(user_id = user.id, book_id = book.id, "Book added to reading list");

    Ok(CommandReply::Text(format!(
        "📖 Added \"{}\" to your currently reading list and the database!",
        book.title
    )))
}

/// `/cr existing <book_id>`: put an already-cataloged book on the caller's shelf
pub fn cr_existing(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    book_id: i64,
    now: DateTime<Utc>,
) -> Result<CommandReply> {
    let user = db::get_or_create_user(conn, discord_id, username)?;

    let book = match db::find_book(conn, book_id)? {
        Some(book) => book,
        None => return Ok(CommandReply::Ephemeral("Book not found!".to_string())),
    };

    if let Some(existing) = db::find_user_book(conn, user.id, book.id)? {
        if existing.status == db::ReadingStatus::CurrentlyReading {
            return Ok(CommandReply::Ephemeral(format!(
                "You are already reading \"{}\"!",
                book.title
            )));
        }
    }

    db::upsert_currently_reading(conn, user.id, book.id, now)?;

    Ok(CommandReply::Text(format!(
        "📖 Added \"{}\" to your currently reading list!",
        book.title
    )))
}

/// `/cr finished <user_book_id>`: mark a shelf row finished
pub fn cr_finished(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    user_book_id: i64,
    now: DateTime<Utc>,
) -> Result<CommandReply> {
    let user = db::get_or_create_user(conn, discord_id, username)?;

    let row = match db::find_user_book_by_id(conn, user_book_id)? {
        Some(row) if row.user_id == user.id && row.status == db::ReadingStatus::CurrentlyReading => {
            row
        }
        _ => {
            return Ok(CommandReply::Text(
                "Book not found in your currently reading list!".to_string(),
            ));
        }
    };

    let book = db::find_book(conn, row.book_id)?;
    db::mark_finished(conn, row.id, now)?;

    let title = book.map(|b| b.title).unwrap_or_else(|| "that book".to_string());
    Ok(CommandReply::Text(format!(
        "✅ Marked \"{title}\" as finished! Great job! 🎉"
    )))
}

/// `/ocr` after extraction: open the text-selection flow, unless extraction
/// produced nothing: an empty result never opens a conversation.
pub fn begin_ocr_selection(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    channel_id: &str,
    extracted_text: &str,
    now: DateTime<Utc>,
) -> Result<CommandReply> {
    let extracted_text = extracted_text.trim();
    if extracted_text.is_empty() {
        return Ok(CommandReply::Text(
            "No text could be extracted from the image.".to_string(),
        ));
    }

    let user = db::get_or_create_user(conn, discord_id, username)?;
    let conversation = Conversation::OcrTextSelection(OcrSelectionContext {
        full_text: extracted_text.to_string(),
    });
    open_conversation(conn, user.id, channel_id, &conversation, now)?;

    Ok(CommandReply::Text(format!(
        "🔍 **OCR Complete!** Extracted text:\n\n```\n{extracted_text}\n```\n\n📝 Reply with the portion you want to save, or \"all\" to save everything."
    )))
}

/// Autocomplete for book-title options: (label, book id) pairs
pub fn autocomplete_books(conn: &Connection, partial: &str) -> Result<Vec<(String, i64)>> {
    let books = matcher::search(conn, partial, AUTOCOMPLETE_LIMIT)?;
    Ok(books
        .iter()
        .map(|book| (matcher::display_title(book), book.id))
        .collect())
}

/// Autocomplete for currently-reading options: (label, user_book id) pairs
pub fn autocomplete_currently_reading(
    conn: &Connection,
    discord_id: &str,
    partial: &str,
) -> Result<Vec<(String, i64)>> {
    let user = match db::find_user(conn, discord_id)? {
        Some(user) => user,
        None => return Ok(Vec::new()),
    };

    let partial = partial.to_lowercase();
    let choices = db::currently_reading(conn, user.id)?
        .into_iter()
        .filter(|(_, book)| book.title.to_lowercase().contains(&partial))
        .take(AUTOCOMPLETE_LIMIT)
        .map(|(user_book, book)| (matcher::display_title(&book), user_book.id))
        .collect();

    Ok(choices)
}

/// `/bookshelf`: link to the external bookshelf site
pub fn bookshelf(conn: &Connection, bookshelf_url: &str) -> Result<CommandReply> {
    let total = db::count_entries(conn)?;

    Ok(CommandReply::Embed(Embed {
        title: "📚 Book Club Bookshelf".to_string(),
        description: format!(
            "Browse everything the club has captured:\n{bookshelf_url}"
        ),
        fields: vec![("Total Entries".to_string(), total.to_string())],
        color: EMBED_COLOR_READING,
    }))
}

/// `/graph`: link to the external knowledge-graph site with entry counts
pub fn graph(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    graph_url: &str,
) -> Result<CommandReply> {
    let user = db::get_or_create_user(conn, discord_id, username)?;
    let total = db::count_entries(conn)?;
    let yours = db::count_entries_for_user(conn, user.id)?;

    Ok(CommandReply::Embed(Embed {
        title: "🗺️ Commonbase Graph".to_string(),
        description: format!(
            "Explore the connections between entries and books:\n{graph_url}"
        ),
        fields: vec![
            ("Total Entries".to_string(), total.to_string()),
            ("Your Entries".to_string(), yours.to_string()),
        ],
        color: EMBED_COLOR_GRAPH,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{STATE_AWAITING_BOOK_SOURCE, STATE_OCR_TEXT_SELECTION};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_store_without_book_opens_book_source_conversation() {
        let conn = setup();
        let now = Utc::now();

        let reply = store(
            &conn, "42", "alice", "chan-1", "ix-1", "a great idea", None, None, now,
        )
        .unwrap();
        match reply {
            CommandReply::Text(text) => {
                assert!(text.contains("a great idea"));
                assert!(text.contains("Which book is this from?"));
            }
            other => panic!("Expected text reply, got {other:?}"),
        }

        let user = db::find_user(&conn, "42").unwrap().unwrap();
        let row = db::find_conversation(&conn, user.id, "chan-1").unwrap().unwrap();
        assert_eq!(row.state, STATE_AWAITING_BOOK_SOURCE);
    }

    #[test]
    fn test_store_with_book_commits_immediately() {
        let conn = setup();
        let now = Utc::now();
        let book = db::create_book(&conn, "Dune", None, None).unwrap();

        let reply = store(
            &conn,
            "42",
            "alice",
            "chan-1",
            "ix-1",
            "a quote",
            Some(book.id),
            Some("https://example.com"),
            now,
        )
        .unwrap();
        match reply {
            CommandReply::Text(text) => assert!(text.contains("Stored to Commonbase")),
            other => panic!("Expected text reply, got {other:?}"),
        }

        let entry = db::find_entry_by_message(&conn, "ix-1").unwrap().unwrap();
        assert_eq!(entry.book_id, Some(book.id));
        assert_eq!(entry.source_url.as_deref(), Some("https://example.com"));
        assert_eq!(db::count_conversations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_store_with_missing_book_id() {
        let conn = setup();

        let reply = store(
            &conn, "42", "alice", "chan-1", "ix-1", "a quote", Some(999), None,
            Utc::now(),
        )
        .unwrap();
        // Only the invoker needs to see the miss
        assert_eq!(reply, CommandReply::Ephemeral("Book not found!".to_string()));
    }

    #[test]
    fn test_cr_list_empty_shelf() {
        let conn = setup();

        let reply = cr_list(&conn, "42", "alice").unwrap();
        assert_eq!(
            reply,
            CommandReply::Text(
                "📚 You are not currently reading any books. Use `/cr add` to add some!"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_cr_add_then_list() {
        let conn = setup();
        let now = Utc::now();

        cr_add(&conn, "42", "alice", "Dune", Some("Frank Herbert"), None, now).unwrap();

        let reply = cr_list(&conn, "42", "alice").unwrap();
        match reply {
            CommandReply::Embed(embed) => {
                assert_eq!(embed.title, "📚 Currently Reading");
                assert!(embed.description.contains("Dune by Frank Herbert"));
                assert_eq!(embed.color, EMBED_COLOR_READING);
            }
            other => panic!("Expected embed, got {other:?}"),
        }
    }

    #[test]
    fn test_cr_add_duplicate_title() {
        let conn = setup();
        let now = Utc::now();

        cr_add(&conn, "42", "alice", "Dune", None, None, now).unwrap();
        let reply = cr_add(&conn, "43", "bob", "Dune", None, None, now).unwrap();

        match reply {
            CommandReply::Text(text) => assert!(text.contains("already exists")),
            other => panic!("Expected text reply, got {other:?}"),
        }
    }

    #[test]
    fn test_cr_existing_and_already_reading() {
        let conn = setup();
        let now = Utc::now();
        let book = db::create_book(&conn, "VALIS", None, None).unwrap();

        let reply = cr_existing(&conn, "42", "alice", book.id, now).unwrap();
        match reply {
            CommandReply::Text(text) => assert!(text.contains("Added \"VALIS\"")),
            other => panic!("Expected text reply, got {other:?}"),
        }

        let reply = cr_existing(&conn, "42", "alice", book.id, now).unwrap();
        match reply {
            CommandReply::Ephemeral(text) => assert!(text.contains("already reading")),
            other => panic!("Expected ephemeral reply, got {other:?}"),
        }

        let reply = cr_existing(&conn, "42", "alice", 999, now).unwrap();
        assert_eq!(reply, CommandReply::Ephemeral("Book not found!".to_string()));
    }

    #[test]
    fn test_cr_finished_happy_path_and_missing() {
        let conn = setup();
        let now = Utc::now();

        cr_add(&conn, "42", "alice", "Dune", None, None, now).unwrap();
        let user = db::find_user(&conn, "42").unwrap().unwrap();
        let shelf = db::currently_reading(&conn, user.id).unwrap();
        let row_id = shelf[0].0.id;

        let reply = cr_finished(&conn, "42", "alice", row_id, now).unwrap();
        match reply {
            CommandReply::Text(text) => assert!(text.contains("Marked \"Dune\" as finished")),
            other => panic!("Expected text reply, got {other:?}"),
        }

        // Already finished: no longer on the currently-reading list
        let reply = cr_finished(&conn, "42", "alice", row_id, now).unwrap();
        match reply {
            CommandReply::Text(text) => assert!(text.contains("not found")),
            other => panic!("Expected text reply, got {other:?}"),
        }
    }

    #[test]
    fn test_cr_finished_rejects_other_users_row() {
        let conn = setup();
        let now = Utc::now();

        cr_add(&conn, "42", "alice", "Dune", None, None, now).unwrap();
        let alice = db::find_user(&conn, "42").unwrap().unwrap();
        let row_id = db::currently_reading(&conn, alice.id).unwrap()[0].0.id;

        let reply = cr_finished(&conn, "43", "bob", row_id, now).unwrap();
        match reply {
            CommandReply::Text(text) => assert!(text.contains("not found")),
            other => panic!("Expected text reply, got {other:?}"),
        }
    }

    #[test]
    fn test_begin_ocr_selection_opens_conversation() {
        let conn = setup();
        let now = Utc::now();

        let reply =
            begin_ocr_selection(&conn, "42", "alice", "chan-1", "extracted words", now).unwrap();
        match reply {
            CommandReply::Text(text) => {
                assert!(text.contains("OCR Complete"));
                assert!(text.contains("extracted words"));
            }
            other => panic!("Expected text reply, got {other:?}"),
        }

        let user = db::find_user(&conn, "42").unwrap().unwrap();
        let row = db::find_conversation(&conn, user.id, "chan-1").unwrap().unwrap();
        assert_eq!(row.state, STATE_OCR_TEXT_SELECTION);
    }

    #[test]
    fn test_begin_ocr_selection_empty_text_opens_nothing() {
        let conn = setup();
        let now = Utc::now();

        let reply = begin_ocr_selection(&conn, "42", "alice", "chan-1", "   \n ", now).unwrap();
        assert_eq!(
            reply,
            CommandReply::Text("No text could be extracted from the image.".to_string())
        );

        // No user row was needed, and no conversation exists
        assert_eq!(db::count_conversations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_autocomplete_books() {
        let conn = setup();
        db::create_book(&conn, "Dune", Some("Frank Herbert"), None).unwrap();
        db::create_book(&conn, "Dune Messiah", Some("Frank Herbert"), None).unwrap();
        db::create_book(&conn, "VALIS", None, None).unwrap();

        let choices = autocomplete_books(&conn, "dune").unwrap();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].0, "Dune by Frank Herbert");
    }

    #[test]
    fn test_autocomplete_currently_reading_filters_by_partial() {
        let conn = setup();
        let now = Utc::now();

        cr_add(&conn, "42", "alice", "Dune", None, None, now).unwrap();
        cr_add(&conn, "42", "alice", "VALIS", None, None, now).unwrap();

        let choices = autocomplete_currently_reading(&conn, "42", "val").unwrap();
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].0, "VALIS");

        // Unknown user gets an empty list, not an error
        assert!(autocomplete_currently_reading(&conn, "99", "").unwrap().is_empty());
    }

    #[test]
    fn test_graph_embed_counts_entries() {
        let conn = setup();
        let user = db::get_or_create_user(&conn, "42", "alice").unwrap();
        db::create_entry(
            &conn,
            &db::NewEntry {
                content: "text",
                entry_type: db::EntryType::Thought,
                user_id: user.id,
                book_id: None,
                source_url: None,
                message_id: "msg-1",
                channel_id: "chan",
            },
        )
        .unwrap();

        let reply = graph(&conn, "42", "alice", "http://localhost:3001").unwrap();
        match reply {
            CommandReply::Embed(embed) => {
                assert_eq!(embed.color, EMBED_COLOR_GRAPH);
                assert_eq!(
                    embed.fields,
                    vec![
                        ("Total Entries".to_string(), "1".to_string()),
                        ("Your Entries".to_string(), "1".to_string()),
                    ]
                );
            }
            other => panic!("Expected embed, got {other:?}"),
        }
    }

    #[test]
    fn test_bookshelf_embed() {
        let conn = setup();
        let reply = bookshelf(&conn, "http://localhost:3000").unwrap();
        match reply {
            CommandReply::Embed(embed) => {
                assert!(embed.description.contains("http://localhost:3000"));
                assert_eq!(embed.fields[0].0, "Total Entries");
            }
            other => panic!("Expected embed, got {other:?}"),
        }
    }
}
