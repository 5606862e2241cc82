//! Append-only file store backend.
//!
//! Each record kind lives in its own JSON-lines file under the data
//! directory. Writes append one line while holding the store lock, so id
//! assignment and persistence are a single atomic step. The files are
//! replayed into memory on open. A write that fails part way leaves an
//! unterminated fragment; the next record starts on a fresh line so replay
//! skips only the fragment.

use super::tables::Tables;
use super::{NewMessage, NewRoom, NewUser, Room, Store, StoreError, UserRecord};
use crate::message::ChatMessage;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const USERS_FILE: &str = "users.jsonl";
const ROOMS_FILE: &str = "rooms.jsonl";
const MESSAGES_FILE: &str = "messages.jsonl";

struct FileState {
    tables: Tables,
    users: Log,
    rooms: Log,
    messages: Log,
}

/// One append-only JSON-lines file.
struct Log<W = File> {
    out: W,
    /// The last line written may be unterminated.
    torn: bool,
}

impl<W: AsyncWrite + Unpin> Log<W> {
    async fn append<T: Serialize>(&mut self, record: &T) -> Result<(), StoreError> {
        let mut line = Vec::new();
        if self.torn {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');

        if let Err(e) = write_flushed(&mut self.out, &line).await {
            self.torn = true;
            return Err(e.into());
        }
        self.torn = false;
        Ok(())
    }
}

async fn write_flushed<W: AsyncWrite + Unpin>(out: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    out.write_all(bytes).await?;
    out.flush().await
}

/// A [`Store`] persisted as JSON-lines logs in a directory.
pub struct FileStore {
    dir: PathBuf,
    state: Mutex<FileState>,
}

impl FileStore {
    /// Open (or create) a store in `dir`, replaying existing records.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or its files cannot be created or read.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let (users, users_log) = open_log::<UserRecord>(&dir.join(USERS_FILE)).await?;
        let (rooms, rooms_log) = open_log::<Room>(&dir.join(ROOMS_FILE)).await?;
        let (messages, messages_log) = open_log::<ChatMessage>(&dir.join(MESSAGES_FILE)).await?;

        let mut tables = Tables::default();
        users.into_iter().for_each(|user| tables.insert_user(user));
        rooms.into_iter().for_each(|room| tables.insert_room(room));
        messages
            .into_iter()
            .for_each(|message| tables.insert_message(message));

        info!(
            dir = %dir.display(),
            messages = tables.message_count(),
            "Opened file store"
        );

        let state = FileState {
            tables,
            users: users_log,
            rooms: rooms_log,
            messages: messages_log,
        };

        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    /// Directory holding the log files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Replay a log and open it for appending.
async fn open_log<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, Log), StoreError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            // Torn writes leave unreadable fragments on their own lines.
            Err(e) => warn!(
                file = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping unreadable record"
            ),
        }
    }

    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let log = Log {
        out,
        torn: !contents.is_empty() && !contents.ends_with('\n'),
    };

    debug!(file = %path.display(), records = records.len(), "Replayed log");
    Ok((records, log))
}

#[async_trait]
impl Store for FileStore {
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage, StoreError> {
        let mut state = self.state.lock().await;
        let message = state.tables.build_message(message);
        state.messages.append(&message).await?;
        state.tables.insert_message(message.clone());
        Ok(message)
    }

    async fn list_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.state.lock().await.tables.list_messages(room_id, limit))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.state.lock().await.tables.rooms())
    }

    async fn create_room(&self, room: NewRoom) -> Result<Room, StoreError> {
        let mut state = self.state.lock().await;
        let room = state.tables.build_room(room);
        state.rooms.append(&room).await?;
        state.tables.insert_room(room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.state.lock().await.tables.room(room_id))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut state = self.state.lock().await;
        let user = state.tables.build_user(user)?;
        state.users.append(&user).await?;
        state.tables.insert_user(user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.lock().await.tables.user(user_id))
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.lock().await.tables.user_by_username(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts `budget` bytes, fails once, then accepts everything.
    struct FlakyWriter {
        written: Vec<u8>,
        budget: Option<usize>,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let this = &mut *self;
            let n = match this.budget {
                Some(0) => {
                    this.budget = None;
                    return Poll::Ready(Err(io::Error::other("no space left on device")));
                }
                Some(left) => {
                    let n = left.min(buf.len());
                    this.budget = Some(left - n);
                    n
                }
                None => buf.len(),
            };
            this.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn hello(room: &str) -> NewMessage {
        NewMessage {
            room_id: room.into(),
            sender_id: "1".into(),
            sender_username: "alice".into(),
            body: "hello".into(),
            encrypted: false,
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store
                .create_user(NewUser {
                    username: "alice".into(),
                    email: "alice@example.com".into(),
                    password_hash: "hash".into(),
                })
                .await
                .unwrap();
            store
                .create_room(NewRoom {
                    name: "General".into(),
                    description: String::new(),
                    created_by: "system".into(),
                    is_private: false,
                })
                .await
                .unwrap();
            store.append_message(hello("general")).await.unwrap();
            store.append_message(hello("general")).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.find_user_by_username("alice").await.unwrap().is_some());
        assert_eq!(store.list_rooms().await.unwrap().len(), 1);

        let messages = store.list_messages("general", 10).await.unwrap();
        assert_eq!(messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2]);

        // Numbering continues after the replayed log.
        let next = store.append_message(hello("random")).await.unwrap();
        assert_eq!(next.id, 3);
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.append_message(hello("general")).await.unwrap();
        }

        let path = dir.path().join(MESSAGES_FILE);
        let mut contents = fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"id\":2,\"room_");
        fs::write(&path, contents).await.unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.list_messages("general", 10).await.unwrap().len(), 1);
        assert_eq!(store.dir(), dir.path());

        let next = store.append_message(hello("general")).await.unwrap();
        assert_eq!(next.id, 2);
        drop(store);

        let store = FileStore::open(dir.path()).await.unwrap();
        let ids: Vec<_> = store
            .list_messages("general", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_append_keeps_next_record_readable() {
        let record = json!({"id": 5, "room_id": "general", "body": "hello"});
        let mut log = Log {
            out: FlakyWriter {
                written: Vec::new(),
                budget: Some(10),
            },
            torn: false,
        };

        assert!(matches!(log.append(&record).await, Err(StoreError::Io(_))));
        assert!(log.torn);
        log.append(&record).await.unwrap();
        assert!(!log.torn);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MESSAGES_FILE);
        fs::write(&path, &log.out.written).await.unwrap();

        let (replayed, reopened) = open_log::<Value>(&path).await.unwrap();
        assert_eq!(replayed, vec![record]);
        assert!(!reopened.torn);
    }
}
