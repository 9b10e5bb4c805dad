//! Conversation engine: the state machine driving multi-turn book
//! disambiguation.
//!
//! Each handler receives the incoming reply plus the typed state parsed from
//! the stored row, performs any entry/book mutation, and returns the reply
//! text. Transitions that commit an entry are two sequential steps (create
//! the entry, then delete the state), so the worst interleaving leaves an
//! orphaned state behind, never a duplicate entry (entries are unique per
//! message).

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::conversation::{
    BookCandidate, BookSelectionContext, BookSourceContext, Conversation, OcrSelectionContext,
};
use crate::db::{self, ConversationRow, EntryType, NewEntry, StoreError};
use crate::matcher::{self, TitleMatch, CONVERSATION_LIMIT};

use super::message_handler::IncomingMessage;
use super::ui_builder::{format_book_list, stored_quote, stored_thought};

pub const DUPLICATE_ENTRY_REPLY: &str =
    "This message has already been added to the Commonbase.";

/// Open (or replace) the conversation for a (user, channel) pair
pub fn open_conversation(
    conn: &Connection,
    user_id: i64,
    channel_id: &str,
    conversation: &Conversation,
    now: DateTime<Utc>,
) -> Result<()> {
    db::upsert_conversation(
        conn,
        user_id,
        channel_id,
        conversation.tag(),
        &conversation.context_json()?,
        now + conversation.ttl(),
    )
}

/// Transition an existing conversation row to a new state, refreshing expiry
fn transition(
    conn: &Connection,
    row: &ConversationRow,
    conversation: &Conversation,
    now: DateTime<Utc>,
) -> Result<()> {
    db::update_conversation(
        conn,
        row.id,
        conversation.tag(),
        &conversation.context_json()?,
        now + conversation.ttl(),
    )?;
    Ok(())
}

/// Commit an entry, then clear the conversation. A duplicate-message conflict
/// is terminal too: the capture already exists, so the state is cleared and
/// the user gets a friendly reply instead of a retry loop.
fn commit_and_clear(
    conn: &Connection,
    row: &ConversationRow,
    entry: &NewEntry<'_>,
    success_reply: String,
) -> Result<String> {
    match db::create_entry(conn, entry) {
        Ok(_) => {
            db::delete_conversation(conn, row.id)?;
            Ok(success_reply)
        }
        Err(StoreError::UniqueViolation(_)) => {
            db::delete_conversation(conn, row.id)?;
            Ok(DUPLICATE_ENTRY_REPLY.to_string())
        }
        Err(e) => Err(e.into()),
    }
}

/// Dispatch an incoming reply to the handler for the current state
pub fn handle_conversation(
    conn: &Connection,
    msg: &IncomingMessage,
    row: &ConversationRow,
    conversation: Conversation,
    now: DateTime<Utc>,
) -> Result<String> {
    debug!(
        user_id = row.user_id,
        channel_id = %row.channel_id,
        state = conversation.tag(),
        "Handling conversation reply"
    );

    match conversation {
        Conversation::AwaitingBookSource(ctx) => handle_book_source(conn, msg, row, ctx, now),
        Conversation::AwaitingBookSelection(ctx) => handle_book_selection(conn, msg, row, ctx),
        Conversation::OcrTextSelection(ctx) => handle_ocr_selection(conn, msg, row, ctx, now),
    }
}

fn handle_book_source(
    conn: &Connection,
    msg: &IncomingMessage,
    row: &ConversationRow,
    ctx: BookSourceContext,
    now: DateTime<Utc>,
) -> Result<String> {
    let response = msg.content.trim();

    if response.eq_ignore_ascii_case("none") {
        return commit_and_clear(
            conn,
            row,
            &NewEntry {
                content: &ctx.content,
                entry_type: EntryType::Thought,
                user_id: row.user_id,
                book_id: None,
                source_url: ctx.source_url.as_deref(),
                message_id: &msg.id,
                channel_id: &msg.channel_id,
            },
            stored_thought(&ctx.content),
        );
    }

    if response == "1" {
        if let Some(suggested_title) = &ctx.suggested_title {
            let book = match db::create_book(conn, suggested_title, None, None) {
                Ok(book) => book,
                Err(StoreError::UniqueViolation(_)) => {
                    db::delete_conversation(conn, row.id)?;
                    return Ok(format!(
                        "A book with the title \"{suggested_title}\" already exists. Try storing the quote again with that title."
                    ));
                }
                Err(e) => return Err(e.into()),
            };

            info!(book_id = book.id, title = %book.title, "Created book from suggested title");
            return commit_and_clear(
                conn,
                row,
                &NewEntry {
                    content: &ctx.content,
                    entry_type: EntryType::Quote,
                    user_id: row.user_id,
                    book_id: Some(book.id),
                    source_url: ctx.source_url.as_deref(),
                    message_id: &msg.id,
                    channel_id: &msg.channel_id,
                },
                format!(
                    "✅ **Created new book and stored to Commonbase:**\n\"{}\"\n📚 From: **{}**",
                    ctx.content, book.title
                ),
            );
        }
    }

    match matcher::match_title(conn, response, CONVERSATION_LIMIT)? {
        TitleMatch::None => Ok(format!(
            "No books found for \"{response}\". Please try another search or reply \"none\" if this is a general thought."
        )),
        TitleMatch::Unique(book) => commit_and_clear(
            conn,
            row,
            &NewEntry {
                content: &ctx.content,
                entry_type: EntryType::Quote,
                user_id: row.user_id,
                book_id: Some(book.id),
                source_url: ctx.source_url.as_deref(),
                message_id: &msg.id,
                channel_id: &msg.channel_id,
            },
            stored_quote(&ctx.content, &book),
        ),
        TitleMatch::Ambiguous(books) => {
            let reply = format!(
                "📚 Multiple books found:\n\n{}\n\nReply with the number of the correct book.",
                format_book_list(&books)
            );

            let next = Conversation::AwaitingBookSelection(BookSelectionContext {
                content: ctx.content,
                source_url: ctx.source_url,
                books: books
                    .into_iter()
                    .map(|b| BookCandidate {
                        id: b.id,
                        title: b.title,
                        author: b.author,
                    })
                    .collect(),
            });
            transition(conn, row, &next, now)?;
            Ok(reply)
        }
    }
}

fn handle_book_selection(
    conn: &Connection,
    msg: &IncomingMessage,
    row: &ConversationRow,
    ctx: BookSelectionContext,
) -> Result<String> {
    let selection = msg.content.trim().parse::<usize>().ok();

    let index = match selection {
        Some(n) if n >= 1 && n <= ctx.books.len() => n - 1,
        _ => {
            // Invalid pick: re-prompt in place, context untouched
            return Ok(format!(
                "Please reply with a number between 1 and {}.",
                ctx.books.len()
            ));
        }
    };

    let candidate = &ctx.books[index];
    let book = match db::find_book(conn, candidate.id)? {
        Some(book) => book,
        None => {
            // The candidate vanished from the catalog since it was offered
            db::delete_conversation(conn, row.id)?;
            return Ok("Selected book not found. Please try again.".to_string());
        }
    };

    commit_and_clear(
        conn,
        row,
        &NewEntry {
            content: &ctx.content,
            entry_type: EntryType::Quote,
            user_id: row.user_id,
            book_id: Some(book.id),
            source_url: ctx.source_url.as_deref(),
            message_id: &msg.id,
            channel_id: &msg.channel_id,
        },
        stored_quote(&ctx.content, &book),
    )
}

fn handle_ocr_selection(
    conn: &Connection,
    msg: &IncomingMessage,
    row: &ConversationRow,
    ctx: OcrSelectionContext,
    now: DateTime<Utc>,
) -> Result<String> {
    let selection = msg.content.trim();
    let text_to_save = if selection.eq_ignore_ascii_case("all") {
        ctx.full_text
    } else {
        selection.to_string()
    };

    let reply = format!(
        "📝 **Text selected for saving:**\n\"{text_to_save}\"\n\n🤔 Which book is this from? You can:\n• Type a book title\n• Say \"none\" if it's a general note"
    );

    // Fresh sub-flow: the excerpt becomes the content of a book-source prompt
    let next = Conversation::AwaitingBookSource(BookSourceContext {
        content: text_to_save,
        source_url: None,
        suggested_title: None,
    });
    transition(conn, row, &next, now)?;

    Ok(reply)
}
