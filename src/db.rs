use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

/// Storage errors that callers need to tell apart from plain failures.
///
/// Unique-constraint violations drive user-facing behavior (duplicate book
/// titles, duplicate entry captures), so they get their own variant instead
/// of disappearing into an opaque error chain.
#[derive(Debug)]
pub enum StoreError {
    /// A UNIQUE constraint rejected the write
    UniqueViolation(String),
    /// Any other SQLite failure
    Sqlite(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UniqueViolation(msg) => write!(f, "Unique constraint violated: {msg}"),
            StoreError::Sqlite(e) => write!(f, "Database error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                return StoreError::UniqueViolation(err.to_string());
            }
        }
        StoreError::Sqlite(err)
    }
}

/// A known Discord user, created lazily on first interaction
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub discord_id: String,
    pub username: String,
}

/// A book in the shared catalog, unique by title
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

/// Kind of captured content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Quote,
    Thought,
    Reaction,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Quote => "QUOTE",
            EntryType::Thought => "THOUGHT",
            EntryType::Reaction => "REACTION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUOTE" => Some(EntryType::Quote),
            "THOUGHT" => Some(EntryType::Thought),
            "REACTION" => Some(EntryType::Reaction),
            _ => None,
        }
    }
}

/// A committed entry in the Commonbase. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: i64,
    pub content: String,
    pub entry_type: EntryType,
    pub user_id: i64,
    pub book_id: Option<i64>,
    pub source_url: Option<String>,
    pub message_id: String,
    pub channel_id: String,
    pub is_completed: bool,
}

/// Fields for a new entry; `is_completed` is always set on insert
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub content: &'a str,
    pub entry_type: EntryType,
    pub user_id: i64,
    pub book_id: Option<i64>,
    pub source_url: Option<&'a str>,
    pub message_id: &'a str,
    pub channel_id: &'a str,
}

/// Reading-list status for a (user, book) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingStatus {
    CurrentlyReading,
    Finished,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::CurrentlyReading => "CURRENTLY_READING",
            ReadingStatus::Finished => "FINISHED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CURRENTLY_READING" => Some(ReadingStatus::CurrentlyReading),
            "FINISHED" => Some(ReadingStatus::Finished),
            _ => None,
        }
    }
}

/// A row on a user's reading list
#[derive(Debug, Clone, PartialEq)]
pub struct UserBook {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub status: ReadingStatus,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// A pending conversation row, one per (user, channel)
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRow {
    pub id: i64,
    pub user_id: i64,
    pub channel_id: String,
    pub state: String,
    pub context: String,
    pub expires_at: DateTime<Utc>,
}

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    info!("Initializing database schema...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            discord_id TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create users table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL UNIQUE,
            author TEXT,
            image_url TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create books table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id),
            book_id INTEGER REFERENCES books(id),
            source_url TEXT,
            message_id TEXT NOT NULL UNIQUE,
            channel_id TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )
    .context("Failed to create entries table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            book_id INTEGER NOT NULL REFERENCES books(id),
            status TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id, book_id)
        )",
        [],
    )
    .context("Failed to create user_books table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS conversation_states (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            channel_id TEXT NOT NULL,
            state TEXT NOT NULL,
            context TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(user_id, channel_id)
        )",
        [],
    )
    .context("Failed to create conversation_states table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Look up a user by Discord id
pub fn find_user(conn: &Connection, discord_id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, discord_id, username FROM users WHERE discord_id = ?1",
            params![discord_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    discord_id: row.get(1)?,
                    username: row.get(2)?,
                })
            },
        )
        .optional()
        .context("Failed to query user")?;
    Ok(user)
}

/// Fetch the user for a Discord id, creating the row on first contact
pub fn get_or_create_user(conn: &Connection, discord_id: &str, username: &str) -> Result<User> {
    if let Some(user) = find_user(conn, discord_id)? {
        return Ok(user);
    }

    debug!(discord_id = %discord_id, "Creating user record");
    conn.execute(
        "INSERT INTO users (discord_id, username) VALUES (?1, ?2)",
        params![discord_id, username],
    )
    .context("Failed to insert user")?;

    Ok(User {
        id: conn.last_insert_rowid(),
        discord_id: discord_id.to_string(),
        username: username.to_string(),
    })
}

/// Create a new book. Titles are unique; a duplicate surfaces as
/// `StoreError::UniqueViolation`.
pub fn create_book(
    conn: &Connection,
    title: &str,
    author: Option<&str>,
    image_url: Option<&str>,
) -> Result<Book, StoreError> {
    conn.execute(
        "INSERT INTO books (title, author, image_url) VALUES (?1, ?2, ?3)",
        params![title, author, image_url],
    )?;

    let id = conn.last_insert_rowid();
    info!(book_id = id, title = %title, "Book created");

    Ok(Book {
        id,
        title: title.to_string(),
        author: author.map(|s| s.to_string()),
        image_url: image_url.map(|s| s.to_string()),
    })
}

fn book_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        image_url: row.get(3)?,
    })
}

/// Look up a book by id
pub fn find_book(conn: &Connection, book_id: i64) -> Result<Option<Book>> {
    let book = conn
        .query_row(
            "SELECT id, title, author, image_url FROM books WHERE id = ?1",
            params![book_id],
            book_from_row,
        )
        .optional()
        .context("Failed to query book")?;
    Ok(book)
}

fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Case-insensitive substring search over book titles, ordered
/// lexicographically by title and truncated to `limit`.
pub fn find_books_by_title(conn: &Connection, query: &str, limit: usize) -> Result<Vec<Book>> {
    let pattern = format!("%{}%", escape_like(query));
    let mut stmt = conn
        .prepare(
            "SELECT id, title, author, image_url FROM books
             WHERE title LIKE ?1 ESCAPE '\\'
             ORDER BY title ASC
             LIMIT ?2",
        )
        .context("Failed to prepare title search")?;

    let books = stmt
        .query_map(params![pattern, limit as i64], book_from_row)
        .context("Failed to run title search")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read title search rows")?;

    Ok(books)
}

/// Commit an entry. Entries are unique on the originating message id, so a
/// second capture of the same message surfaces as `StoreError::UniqueViolation`.
pub fn create_entry(conn: &Connection, entry: &NewEntry<'_>) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO entries (content, entry_type, user_id, book_id, source_url, message_id, channel_id, is_completed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
        params![
            entry.content,
            entry.entry_type.as_str(),
            entry.user_id,
            entry.book_id,
            entry.source_url,
            entry.message_id,
            entry.channel_id,
        ],
    )?;

    let id = conn.last_insert_rowid();
    info!(
        entry_id = id,
        entry_type = entry.entry_type.as_str(),
        user_id = entry.user_id,
        "Entry committed"
    );
    Ok(id)
}

/// Look up an entry by the message that produced it
pub fn find_entry_by_message(conn: &Connection, message_id: &str) -> Result<Option<Entry>> {
    let entry = conn
        .query_row(
            "SELECT id, content, entry_type, user_id, book_id, source_url, message_id, channel_id, is_completed
             FROM entries WHERE message_id = ?1",
            params![message_id],
            |row| {
                let type_str: String = row.get(2)?;
                Ok(Entry {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    entry_type: EntryType::from_str(&type_str).unwrap_or(EntryType::Thought),
                    user_id: row.get(3)?,
                    book_id: row.get(4)?,
                    source_url: row.get(5)?,
                    message_id: row.get(6)?,
                    channel_id: row.get(7)?,
                    is_completed: row.get(8)?,
                })
            },
        )
        .optional()
        .context("Failed to query entry")?;
    Ok(entry)
}

/// Count all completed entries
pub fn count_entries(conn: &Connection) -> Result<i64> {
    let count = conn
        .query_row(
            "SELECT COUNT(*) FROM entries WHERE is_completed = 1",
            [],
            |row| row.get(0),
        )
        .context("Failed to count entries")?;
    Ok(count)
}

/// Count completed entries for one user
pub fn count_entries_for_user(conn: &Connection, user_id: i64) -> Result<i64> {
    let count = conn
        .query_row(
            "SELECT COUNT(*) FROM entries WHERE is_completed = 1 AND user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .context("Failed to count user entries")?;
    Ok(count)
}

/// Put a book on a user's currently-reading list, reviving a finished row
/// if one exists for the pair.
pub fn upsert_currently_reading(
    conn: &Connection,
    user_id: i64,
    book_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_books (user_id, book_id, status, start_date)
         VALUES (?1, ?2, 'CURRENTLY_READING', ?3)
         ON CONFLICT(user_id, book_id) DO UPDATE SET
             status = 'CURRENTLY_READING',
             start_date = excluded.start_date,
             end_date = NULL",
        params![user_id, book_id, now.to_rfc3339()],
    )
    .context("Failed to upsert reading-list row")?;
    Ok(())
}

fn user_book_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserBook> {
    let status_str: String = row.get(3)?;
    Ok(UserBook {
        id: row.get(0)?,
        user_id: row.get(1)?,
        book_id: row.get(2)?,
        status: ReadingStatus::from_str(&status_str).unwrap_or(ReadingStatus::Finished),
        start_date: row.get(4)?,
        end_date: row.get(5)?,
    })
}

/// Look up the reading-list row for a (user, book) pair
pub fn find_user_book(conn: &Connection, user_id: i64, book_id: i64) -> Result<Option<UserBook>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, book_id, status, start_date, end_date
             FROM user_books WHERE user_id = ?1 AND book_id = ?2",
            params![user_id, book_id],
            user_book_from_row,
        )
        .optional()
        .context("Failed to query reading-list row")?;
    Ok(row)
}

/// Look up a reading-list row by id
pub fn find_user_book_by_id(conn: &Connection, user_book_id: i64) -> Result<Option<UserBook>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, book_id, status, start_date, end_date
             FROM user_books WHERE id = ?1",
            params![user_book_id],
            user_book_from_row,
        )
        .optional()
        .context("Failed to query reading-list row")?;
    Ok(row)
}

/// A user's currently-reading list with the joined books, newest first
pub fn currently_reading(conn: &Connection, user_id: i64) -> Result<Vec<(UserBook, Book)>> {
    let mut stmt = conn
        .prepare(
            "SELECT ub.id, ub.user_id, ub.book_id, ub.status, ub.start_date, ub.end_date,
                    b.id, b.title, b.author, b.image_url
             FROM user_books ub
             JOIN books b ON b.id = ub.book_id
             WHERE ub.user_id = ?1 AND ub.status = 'CURRENTLY_READING'
             ORDER BY ub.created_at DESC, ub.id DESC",
        )
        .context("Failed to prepare reading-list query")?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            let status_str: String = row.get(3)?;
            Ok((
                UserBook {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    book_id: row.get(2)?,
                    status: ReadingStatus::from_str(&status_str)
                        .unwrap_or(ReadingStatus::Finished),
                    start_date: row.get(4)?,
                    end_date: row.get(5)?,
                },
                Book {
                    id: row.get(6)?,
                    title: row.get(7)?,
                    author: row.get(8)?,
                    image_url: row.get(9)?,
                },
            ))
        })
        .context("Failed to run reading-list query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read reading-list rows")?;

    Ok(rows)
}

/// Mark a reading-list row finished. Returns false when the row is missing.
pub fn mark_finished(conn: &Connection, user_book_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE user_books SET status = 'FINISHED', end_date = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), user_book_id],
        )
        .context("Failed to mark reading-list row finished")?;
    Ok(rows > 0)
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    let expires_raw: String = row.get(5)?;
    let expires_at = DateTime::parse_from_rfc3339(&expires_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(ConversationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        channel_id: row.get(2)?,
        state: row.get(3)?,
        context: row.get(4)?,
        expires_at,
    })
}

/// Look up the open conversation for a (user, channel) pair
pub fn find_conversation(
    conn: &Connection,
    user_id: i64,
    channel_id: &str,
) -> Result<Option<ConversationRow>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, channel_id, state, context, expires_at
             FROM conversation_states WHERE user_id = ?1 AND channel_id = ?2",
            params![user_id, channel_id],
            conversation_from_row,
        )
        .optional()
        .context("Failed to query conversation state")?;
    Ok(row)
}

/// Open or replace the conversation for a (user, channel) pair. The UNIQUE
/// constraint plus `ON CONFLICT DO UPDATE` keeps concurrent opens idempotent.
pub fn upsert_conversation(
    conn: &Connection,
    user_id: i64,
    channel_id: &str,
    state: &str,
    context: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_states (user_id, channel_id, state, context, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id, channel_id) DO UPDATE SET
             state = excluded.state,
             context = excluded.context,
             expires_at = excluded.expires_at",
        params![user_id, channel_id, state, context, expires_at.to_rfc3339()],
    )
    .context("Failed to upsert conversation state")?;

    debug!(user_id, channel_id = %channel_id, state = %state, "Conversation state upserted");
    Ok(())
}

/// Transition an existing conversation in place
pub fn update_conversation(
    conn: &Connection,
    id: i64,
    state: &str,
    context: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE conversation_states SET state = ?1, context = ?2, expires_at = ?3 WHERE id = ?4",
            params![state, context, expires_at.to_rfc3339(), id],
        )
        .context("Failed to update conversation state")?;
    Ok(rows > 0)
}

/// Delete a conversation row. Returns false when it was already gone.
pub fn delete_conversation(conn: &Connection, id: i64) -> Result<bool> {
    let rows = conn
        .execute("DELETE FROM conversation_states WHERE id = ?1", params![id])
        .context("Failed to delete conversation state")?;

    debug!(conversation_id = id, deleted = rows > 0, "Conversation state cleared");
    Ok(rows > 0)
}

/// Total open conversations, for invariant checks
pub fn count_conversations(conn: &Connection) -> Result<i64> {
    let count = conn
        .query_row("SELECT COUNT(*) FROM conversation_states", [], |row| {
            row.get(0)
        })
        .context("Failed to count conversation states")?;
    Ok(count)
}
