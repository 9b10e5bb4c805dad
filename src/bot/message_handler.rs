//! Message router for plain (non-command) messages.
//!
//! An open conversation for the author in this channel wins exclusively:
//! passive pattern detection is suppressed until it reaches a terminal
//! outcome or expires. Without one, passive detectors run in priority order:
//! the quote-with-tag pattern first, then book mentions.

use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::conversation::{
    BookCandidate, BookSelectionContext, BookSourceContext, Conversation, ParseError,
};
use crate::db::{self, EntryType, NewEntry, StoreError};
use crate::matcher::{self, TitleMatch, CONVERSATION_LIMIT};

use super::conversation_handler::{
    handle_conversation, open_conversation, DUPLICATE_ENTRY_REPLY,
};
use super::ui_builder::{book_attribution, format_book_list};

/// `>> quote text [[Book Title]]`
static QUOTE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>>\s*(.+?)\s*\[\[(.+?)\]\]$").expect("valid quote pattern"));

/// `[[Book Title]]` anywhere in the message
static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid mention pattern"));

pub const CONVERSATION_ERROR_REPLY: &str =
    "Sorry, there was an error processing your response. Please try again.";

/// A plain inbound chat message, already stripped of platform types
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
}

/// Route one plain message. Returns the reply to send, if any.
pub fn handle_message(
    conn: &Connection,
    bookshelf_url: &str,
    msg: &IncomingMessage,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    if let Some(user) = db::find_user(conn, &msg.author_id)? {
        if let Some(row) = db::find_conversation(conn, user.id, &msg.channel_id)? {
            if now > row.expires_at {
                // Expired state is discarded, not silently resumed; the
                // message falls through to the passive detectors.
                debug!(
                    user_id = user.id,
                    channel_id = %msg.channel_id,
                    "Discarding expired conversation state"
                );
                db::delete_conversation(conn, row.id)?;
            } else {
                match Conversation::parse(&row.state, &row.context) {
                    Ok(conversation) => {
                        return Ok(Some(run_conversation(conn, msg, &row, conversation, now)));
                    }
                    Err(ParseError::UnknownState(tag)) => {
                        // Defensive reset: the row is unusable, drop it and
                        // treat the message as if no conversation existed
                        warn!(
                            state = %tag,
                            conversation_id = row.id,
                            "Discarding unknown conversation state"
                        );
                        db::delete_conversation(conn, row.id)?;
                    }
                    Err(ParseError::BadContext(e)) => {
                        error!(
                            error = %e,
                            conversation_id = row.id,
                            "Resetting undecodable conversation context"
                        );
                        db::delete_conversation(conn, row.id)?;
                        return Ok(Some(CONVERSATION_ERROR_REPLY.to_string()));
                    }
                }
            }
        }
    }

    if let Some(captures) = QUOTE_PATTERN.captures(msg.content.trim()) {
        let quote = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let title = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        return handle_quote_message(conn, msg, quote, title, now).map(Some);
    }

    let mentions: Vec<&str> = MENTION_PATTERN
        .captures_iter(&msg.content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if !mentions.is_empty() {
        return handle_book_mentions(conn, bookshelf_url, msg, &mentions).map(Some);
    }

    Ok(None)
}

/// Run the engine on an open conversation, applying the fail-safe-to-reset
/// policy: any unexpected failure clears the state so no conversation can
/// get stuck, and the user is asked to retry.
fn run_conversation(
    conn: &Connection,
    msg: &IncomingMessage,
    row: &db::ConversationRow,
    conversation: Conversation,
    now: DateTime<Utc>,
) -> String {
    match handle_conversation(conn, msg, row, conversation, now) {
        Ok(reply) => reply,
        Err(e) => {
            error!(error = %e, conversation_id = row.id, "Error in conversation handler");
            let _ = db::delete_conversation(conn, row.id);
            CONVERSATION_ERROR_REPLY.to_string()
        }
    }
}

/// Quote-with-tag detector: resolve the tagged title immediately when it is
/// unique, otherwise open a conversation to disambiguate.
fn handle_quote_message(
    conn: &Connection,
    msg: &IncomingMessage,
    quote: &str,
    book_title: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let user = db::get_or_create_user(conn, &msg.author_id, &msg.author_name)?;

    match matcher::match_title(conn, book_title, CONVERSATION_LIMIT)? {
        TitleMatch::None => {
            let conversation = Conversation::AwaitingBookSource(BookSourceContext {
                content: quote.to_string(),
                source_url: None,
                suggested_title: Some(book_title.trim().to_string()),
            });
            open_conversation(conn, user.id, &msg.channel_id, &conversation, now)?;

            Ok(format!(
                "📚 No books found matching \"{book_title}\". Would you like to:\n\n1. Add a new book with this title\n2. Try a different search term\n\nReply with \"1\" to add a new book or try rephrasing your search."
            ))
        }
        TitleMatch::Unique(book) => {
            match db::create_entry(
                conn,
                &NewEntry {
                    content: quote,
                    entry_type: EntryType::Quote,
                    user_id: user.id,
                    book_id: Some(book.id),
                    source_url: None,
                    message_id: &msg.id,
                    channel_id: &msg.channel_id,
                },
            ) {
                Ok(_) => Ok(format!(
                    "✅ **Added to Commonbase:**\n\"{}\"\n📚 From: {}",
                    quote,
                    book_attribution(&book)
                )),
                Err(StoreError::UniqueViolation(_)) => Ok(DUPLICATE_ENTRY_REPLY.to_string()),
                Err(e) => Err(e.into()),
            }
        }
        TitleMatch::Ambiguous(books) => {
            let reply = format!(
                "📚 Multiple books found for \"{book_title}\":\n\n{}\n\nReply with the number of the correct book.",
                format_book_list(&books)
            );

            let conversation = Conversation::AwaitingBookSelection(BookSelectionContext {
                content: quote.to_string(),
                source_url: None,
                books: books
                    .into_iter()
                    .map(|b| BookCandidate {
                        id: b.id,
                        title: b.title,
                        author: b.author,
                    })
                    .collect(),
            });
            open_conversation(conn, user.id, &msg.channel_id, &conversation, now)?;

            Ok(reply)
        }
    }
}

/// Mention detector: resolve each `[[title]]` independently and post the
/// message back with resolved mentions rewritten as bookshelf links. Pure
/// lookup/formatting, nothing is persisted.
fn handle_book_mentions(
    conn: &Connection,
    bookshelf_url: &str,
    msg: &IncomingMessage,
    mentions: &[&str],
) -> Result<String> {
    let mut resolved: Vec<(String, db::Book)> = Vec::new();
    let mut not_found: Vec<String> = Vec::new();

    for title in mentions {
        let title = title.trim();
        match matcher::best_match(conn, title)? {
            Some(book) => resolved.push((format!("[[{}]]", title), book)),
            None => not_found.push(title.to_string()),
        }
    }

    if resolved.is_empty() {
        let not_found_list = not_found
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ");
        return Ok(format!(
            "📚 Book(s) not found in database: {not_found_list}\n\nUse `/cr add` to add them first!"
        ));
    }

    let mut rewritten = msg.content.clone();
    for (original_token, book) in &resolved {
        let link = format!("[{}]({}/book/{})", book.title, bookshelf_url, book.id);
        rewritten = rewritten.replace(original_token.as_str(), &link);
    }

    if !not_found.is_empty() {
        let not_found_list = not_found
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ");
        rewritten.push_str(&format!("\n\n*Note: {not_found_list} not found in database*"));
    }

    Ok(format!("📚 **Book mentions detected:**\n\n{rewritten}"))
}
