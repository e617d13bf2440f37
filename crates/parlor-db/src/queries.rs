use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use parlor_types::{Identity, Message, Privacy, Room};

use crate::Database;
use crate::models::{MessageRow, ParticipantRow, RoomRow, UserRow, from_micros, now_micros};

/// Password placeholder for accounts that can never log in.
const UNUSABLE_PASSWORD: &str = "!";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, email, password_hash],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    /// Look up `username`, creating a password-less account if it is missing.
    /// Used for the development identity.
    pub fn ensure_user(&self, username: &str) -> Result<Identity> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                params![Uuid::new_v4().to_string(), username, UNUSABLE_PASSWORD],
            )?;
            query_user(conn, "username", username)?
                .ok_or_else(|| anyhow!("User not found after insert: {}", username))?
                .identity()
        })
    }

    // -- Rooms --

    pub fn get_room(&self, name: &str) -> Result<Option<Room>> {
        self.with_conn(|conn| load_room(conn, name))
    }

    /// Returns the room and whether this call created it.
    pub fn get_or_create_room(
        &self,
        name: &str,
        creator: &Identity,
        privacy: Privacy,
    ) -> Result<(Room, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created = ensure_room(&tx, name, creator, privacy)?;
            let room = load_room(&tx, name)?.ok_or_else(|| anyhow!("Room vanished: {}", name))?;
            tx.commit()?;
            Ok((room, created))
        })
    }

    /// Idempotent. Returns false when the user already was a participant or
    /// the room does not exist.
    pub fn add_participant(&self, room_name: &str, user: &Identity) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO room_participants (room_id, user_id, joined_at)
                 SELECT id, ?2, ?3 FROM rooms WHERE name = ?1",
                params![room_name, user.id.to_string(), now_micros()],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn list_rooms(&self) -> Result<Vec<Room>> {
        self.with_conn(|conn| {
            let rows = query_rooms(conn)?;

            // One pass over all participants instead of a query per room
            let mut participants: HashMap<String, Vec<Identity>> = HashMap::new();
            for p in query_all_participants(conn)? {
                let identity = p.identity()?;
                participants.entry(p.room_id).or_default().push(identity);
            }

            rows.into_iter()
                .map(|row| {
                    let members = participants.remove(&row.id).unwrap_or_default();
                    row.into_room(members)
                })
                .collect()
        })
    }

    // -- Messages --

    /// Persist a message, creating the room on first use. The timestamp is
    /// bumped past the room's latest one so ordering is strict even when the
    /// clock stalls or steps backwards.
    pub fn insert_message(&self, room_name: &str, author: &Identity, content: &str) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            ensure_room(&tx, room_name, author, Privacy::Public)?;

            let room_id: String =
                tx.query_row("SELECT id FROM rooms WHERE name = ?1", [room_name], |row| row.get(0))?;
            let last: Option<i64> = tx.query_row(
                "SELECT MAX(created_at) FROM messages WHERE room_id = ?1",
                [&room_id],
                |row| row.get(0),
            )?;

            let now = now_micros();
            let created_at = match last {
                Some(prev) if prev >= now => prev + 1,
                _ => now,
            };

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO messages (id, room_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), room_id, author.id.to_string(), content, created_at],
            )?;
            tx.commit()?;

            Ok(Message {
                id,
                room: room_name.to_string(),
                author: author.clone(),
                content: content.to_string(),
                timestamp: from_micros(created_at)?,
            })
        })
    }

    /// All messages of a room, oldest first. Unknown rooms yield an empty list.
    pub fn get_messages(&self, room_name: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            query_messages(conn, room_name)?
                .into_iter()
                .map(MessageRow::into_message)
                .collect()
        })
    }

    pub fn latest_message_at(&self, room_name: &str) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let latest: Option<i64> = conn.query_row(
                "SELECT MAX(m.created_at) FROM messages m
                 JOIN rooms r ON r.id = m.room_id
                 WHERE r.name = ?1",
                [room_name],
                |row| row.get(0),
            )?;
            latest.map(from_micros).transpose()
        })
    }
}

/// Inserts the room if missing, seeding the creator as sole participant.
fn ensure_room(conn: &Connection, name: &str, creator: &Identity, privacy: Privacy) -> Result<bool> {
    let now = now_micros();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO rooms (id, name, privacy, creator_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![Uuid::new_v4().to_string(), name, privacy.as_str(), creator.id.to_string(), now],
    )?;

    if inserted == 1 {
        conn.execute(
            "INSERT INTO room_participants (room_id, user_id, joined_at)
             SELECT id, ?2, ?3 FROM rooms WHERE name = ?1",
            params![name, creator.id.to_string(), now],
        )?;
    }

    Ok(inserted == 1)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input
    let sql = format!(
        "SELECT id, username, email, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

const ROOM_COLUMNS: &str = "SELECT r.id, r.name, r.privacy, r.creator_id, u.username, r.created_at
     FROM rooms r
     JOIN users u ON u.id = r.creator_id";

fn map_room_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        privacy: row.get(2)?,
        creator_id: row.get(3)?,
        creator_username: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn load_room(conn: &Connection, name: &str) -> Result<Option<Room>> {
    let sql = format!("{} WHERE r.name = ?1", ROOM_COLUMNS);
    let row = conn.query_row(&sql, [name], map_room_row).optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let participants = query_participants(conn, &row.id)?
        .iter()
        .map(ParticipantRow::identity)
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(row.into_room(participants)?))
}

fn query_rooms(conn: &Connection) -> Result<Vec<RoomRow>> {
    let sql = format!("{} ORDER BY r.name", ROOM_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_room_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_participant_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        room_id: row.get(0)?,
        user_id: row.get(1)?,
        username: row.get(2)?,
    })
}

fn query_participants(conn: &Connection, room_id: &str) -> Result<Vec<ParticipantRow>> {
    // rowid follows insertion order, so this is join order
    let mut stmt = conn.prepare(
        "SELECT p.room_id, p.user_id, u.username
         FROM room_participants p
         JOIN users u ON u.id = p.user_id
         WHERE p.room_id = ?1
         ORDER BY p.rowid",
    )?;
    let rows = stmt
        .query_map([room_id], map_participant_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_all_participants(conn: &Connection) -> Result<Vec<ParticipantRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.room_id, p.user_id, u.username
         FROM room_participants p
         JOIN users u ON u.id = p.user_id
         ORDER BY p.rowid",
    )?;
    let rows = stmt
        .query_map([], map_participant_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_messages(conn: &Connection, room_name: &str) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the author name in the same query
    let mut stmt = conn.prepare(
        "SELECT m.id, r.name, m.author_id, u.username, m.content, m.created_at
         FROM messages m
         JOIN rooms r ON r.id = m.room_id
         JOIN users u ON u.id = m.author_id
         WHERE r.name = ?1
         ORDER BY m.created_at ASC, m.rowid ASC",
    )?;

    let rows = stmt
        .query_map([room_name], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                room_name: row.get(1)?,
                author_id: row.get(2)?,
                author_username: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
