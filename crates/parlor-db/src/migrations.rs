use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Timestamps on rooms, participants and messages are stored as integer
/// microseconds since the Unix epoch so ordering is exact.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            privacy     TEXT NOT NULL DEFAULT 'public'
                        CHECK (privacy IN ('public', 'private')),
            creator_id  TEXT NOT NULL REFERENCES users(id),
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS room_participants (
            room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   INTEGER NOT NULL,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            author_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
