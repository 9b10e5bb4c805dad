//! Reaction capture: a ➕ reaction on any message saves its content as a
//! REACTION entry attributed to the reactor.

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::{self, EntryType, NewEntry, StoreError};

/// The emoji that triggers capture
pub const CAPTURE_EMOJI: &str = "➕";

/// Handle a ➕ reaction. Returns the reply to post, or None when the target
/// message has no text to capture (embeds, attachments only).
pub fn handle_plus_reaction(
    conn: &Connection,
    discord_id: &str,
    username: &str,
    message_id: &str,
    channel_id: &str,
    content: &str,
) -> Result<Option<String>> {
    if content.trim().is_empty() {
        debug!(message_id = %message_id, "Ignoring reaction on message with no text content");
        return Ok(None);
    }

    let user = db::get_or_create_user(conn, discord_id, username)?;

    match db::create_entry(
        conn,
        &NewEntry {
            content,
            entry_type: EntryType::Reaction,
            user_id: user.id,
            book_id: None,
            source_url: None,
            message_id,
            channel_id,
        },
    ) {
        Ok(entry_id) => {
            info!(entry_id, user_id = user.id, "Reaction capture committed");
            Ok(Some(format!(
                "✅ Added \"{content}\" to the Commonbase! 📚"
            )))
        }
        Err(StoreError::UniqueViolation(_)) => Ok(Some(
            "This message has already been added to the Commonbase.".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_reaction_saves_message_content() {
        let conn = setup();

        let reply = handle_plus_reaction(&conn, "42", "alice", "msg-1", "chan-1", "great point")
            .unwrap()
            .expect("should reply");
        assert!(reply.contains("great point"));

        let entry = db::find_entry_by_message(&conn, "msg-1").unwrap().unwrap();
        assert_eq!(entry.entry_type, EntryType::Reaction);
        assert_eq!(entry.content, "great point");
        assert_eq!(entry.book_id, None);
    }

    #[test]
    fn test_second_reaction_on_same_message_is_friendly_duplicate() {
        let conn = setup();

        handle_plus_reaction(&conn, "42", "alice", "msg-1", "chan-1", "great point").unwrap();
        let reply = handle_plus_reaction(&conn, "43", "bob", "msg-1", "chan-1", "great point")
            .unwrap()
            .expect("should reply");

        assert_eq!(reply, "This message has already been added to the Commonbase.");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_empty_content_is_ignored() {
        let conn = setup();

        let reply = handle_plus_reaction(&conn, "42", "alice", "msg-1", "chan-1", "   ").unwrap();
        assert!(reply.is_none());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
