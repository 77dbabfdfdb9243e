// Durable store for conversations, messages, groups, and presence inputs.
//
// Every operation is available against PostgreSQL or an in-memory state so
// the full gateway can run (and be tested) without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;

use quad_common::protocol::group::GroupMessageRecord;

/// Profile fields attached to fanned-out chat frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderProfile {
    pub full_name: Option<String>,
    pub profile_picture: Option<String>,
}

/// A chat event queued for the persistence batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub sender: String,
    pub receiver: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: i64,
    pub sender: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: i64,
    pub participant_a: String,
    pub participant_b: String,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn involves(&self, username: &str) -> bool {
        self.participant_a == username || self.participant_b == username
    }
}

/// A user's most recent location fix.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Conversation participants are normalized lexicographically so the pair is
/// unique up to ordering.
fn normalize_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    Memory(Arc<MemoryStore>),
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, SenderProfile>,
    conversation_ids: HashMap<(String, String), i64>,
    conversations: HashMap<i64, ConversationSummary>,
    messages: Vec<MessageRecord>,
    groups: HashMap<i64, (String, String)>,
    group_members: HashSet<(i64, String)>,
    group_messages: Vec<GroupMessageRecord>,
    tab_activity: HashMap<(String, String), DateTime<Utc>>,
    locations: HashMap<String, LocationFix>,
    next_conversation_id: i64,
    next_message_id: i64,
    next_group_id: i64,
    next_group_message_id: i64,
}

impl MemoryStore {
    fn writes_failing(&self) -> bool {
        self.fail_writes.load(Ordering::Relaxed)
    }
}

impl ChatStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryStore::default()))
    }

    /// Flip the in-memory store into a mode where durable writes fail.
    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        if let Self::Memory(mem) = self {
            mem.fail_writes.store(fail, Ordering::Relaxed);
        }
    }

    // ── Conversations & messages ────────────────────────────────────

    /// Resolve the conversation for an unordered participant pair, creating
    /// it if absent. Safe under concurrent callers for the same pair: the
    /// uniqueness constraint on the normalized pair makes the first writer
    /// win and everyone else observe its row.
    pub async fn find_or_create_conversation(&self, a: &str, b: &str) -> Result<(i64, bool)> {
        let (participant_a, participant_b) = normalize_pair(a, b);
        match self {
            Self::Postgres(pool) => {
                let inserted = sqlx::query_scalar::<_, i64>(
                    r#"
                    INSERT INTO conversations (participant_a, participant_b)
                    VALUES ($1, $2)
                    ON CONFLICT (participant_a, participant_b) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(&participant_a)
                .bind(&participant_b)
                .fetch_optional(pool)
                .await
                .context("failed to insert conversation")?;

                if let Some(id) = inserted {
                    return Ok((id, true));
                }

                let id = sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM conversations WHERE participant_a = $1 AND participant_b = $2",
                )
                .bind(&participant_a)
                .bind(&participant_b)
                .fetch_one(pool)
                .await
                .context("failed to look up conversation after insert conflict")?;

                Ok((id, false))
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                let key = (participant_a.clone(), participant_b.clone());
                if let Some(id) = state.conversation_ids.get(&key) {
                    return Ok((*id, false));
                }

                state.next_conversation_id += 1;
                let id = state.next_conversation_id;
                state.conversation_ids.insert(key, id);
                state.conversations.insert(
                    id,
                    ConversationSummary { id, participant_a, participant_b, updated_at: Utc::now() },
                );
                Ok((id, true))
            }
        }
    }

    /// Read-only lookup used on the fanout path.
    pub async fn conversation_between(&self, a: &str, b: &str) -> Result<Option<i64>> {
        let (participant_a, participant_b) = normalize_pair(a, b);
        match self {
            Self::Postgres(pool) => sqlx::query_scalar::<_, i64>(
                "SELECT id FROM conversations WHERE participant_a = $1 AND participant_b = $2",
            )
            .bind(&participant_a)
            .bind(&participant_b)
            .fetch_optional(pool)
            .await
            .context("failed to look up conversation"),
            Self::Memory(mem) => {
                let state = mem.inner.read().await;
                Ok(state.conversation_ids.get(&(participant_a, participant_b)).copied())
            }
        }
    }

    pub async fn append_message(
        &self,
        conversation_id: i64,
        sender: &str,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<MessageRecord> {
        match self {
            Self::Postgres(pool) => {
                let (id, stored_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
                    r#"
                    INSERT INTO messages (conversation_id, sender, content, sent_at)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id, sent_at
                    "#,
                )
                .bind(conversation_id)
                .bind(sender)
                .bind(body)
                .bind(sent_at)
                .fetch_one(pool)
                .await
                .context("failed to append message")?;

                sqlx::query("UPDATE conversations SET updated_at = now() WHERE id = $1")
                    .bind(conversation_id)
                    .execute(pool)
                    .await
                    .context("failed to touch conversation")?;

                Ok(MessageRecord {
                    id,
                    conversation_id,
                    sender: sender.to_string(),
                    content: body.to_string(),
                    sent_at: stored_at,
                    is_read: false,
                })
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                if !state.conversations.contains_key(&conversation_id) {
                    bail!("conversation {conversation_id} does not exist");
                }

                state.next_message_id += 1;
                let record = MessageRecord {
                    id: state.next_message_id,
                    conversation_id,
                    sender: sender.to_string(),
                    content: body.to_string(),
                    sent_at,
                    is_read: false,
                };
                state.messages.push(record.clone());
                if let Some(summary) = state.conversations.get_mut(&conversation_id) {
                    summary.updated_at = Utc::now();
                }
                Ok(record)
            }
        }
    }

    /// Transactional direct send: resolve the conversation and append in one
    /// call. Returns the stored record and whether the conversation is new.
    pub async fn store_direct_message(
        &self,
        sender: &str,
        receiver: &str,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(MessageRecord, bool)> {
        if let Self::Memory(mem) = self {
            if mem.writes_failing() {
                bail!("memory store writes are disabled");
            }
        }

        let (conversation_id, created) = self.find_or_create_conversation(sender, receiver).await?;
        let record = self.append_message(conversation_id, sender, body, sent_at).await?;
        Ok((record, created))
    }

    /// Batcher entry point. Each event resolves its conversation and appends
    /// a message; failures are logged and the event is dropped, never
    /// retried — delivery already happened over the fanout path.
    pub async fn persist_batch(&self, batch: &[PendingMessage]) {
        for pending in batch {
            if let Err(error) = self
                .store_direct_message(&pending.sender, &pending.receiver, &pending.body, pending.sent_at)
                .await
            {
                warn!(
                    error = ?error,
                    sender = %pending.sender,
                    receiver = %pending.receiver,
                    "dropping chat message after failed durable write"
                );
            }
        }
    }

    pub async fn conversation(&self, conversation_id: i64) -> Result<Option<ConversationSummary>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
                    "SELECT id, participant_a, participant_b, updated_at FROM conversations WHERE id = $1",
                )
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .context("failed to load conversation")?;

                Ok(row.map(|(id, participant_a, participant_b, updated_at)| ConversationSummary {
                    id,
                    participant_a,
                    participant_b,
                    updated_at,
                }))
            }
            Self::Memory(mem) => {
                Ok(mem.inner.read().await.conversations.get(&conversation_id).cloned())
            }
        }
    }

    pub async fn conversations_for(&self, username: &str) -> Result<Vec<ConversationSummary>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
                    r#"
                    SELECT id, participant_a, participant_b, updated_at
                    FROM conversations
                    WHERE participant_a = $1 OR participant_b = $1
                    ORDER BY updated_at DESC
                    "#,
                )
                .bind(username)
                .fetch_all(pool)
                .await
                .context("failed to list conversations")?;

                Ok(rows
                    .into_iter()
                    .map(|(id, participant_a, participant_b, updated_at)| ConversationSummary {
                        id,
                        participant_a,
                        participant_b,
                        updated_at,
                    })
                    .collect())
            }
            Self::Memory(mem) => {
                let state = mem.inner.read().await;
                let mut summaries = state
                    .conversations
                    .values()
                    .filter(|summary| summary.involves(username))
                    .cloned()
                    .collect::<Vec<_>>();
                summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                Ok(summaries)
            }
        }
    }

    pub async fn messages_in(&self, conversation_id: i64) -> Result<Vec<MessageRecord>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (i64, i64, String, String, DateTime<Utc>, bool)>(
                    r#"
                    SELECT id, conversation_id, sender, content, sent_at, is_read
                    FROM messages
                    WHERE conversation_id = $1 AND NOT is_deleted
                    ORDER BY sent_at, id
                    "#,
                )
                .bind(conversation_id)
                .fetch_all(pool)
                .await
                .context("failed to list messages")?;

                Ok(rows
                    .into_iter()
                    .map(|(id, conversation_id, sender, content, sent_at, is_read)| MessageRecord {
                        id,
                        conversation_id,
                        sender,
                        content,
                        sent_at,
                        is_read,
                    })
                    .collect())
            }
            Self::Memory(mem) => {
                let state = mem.inner.read().await;
                let mut messages = state
                    .messages
                    .iter()
                    .filter(|record| record.conversation_id == conversation_id)
                    .cloned()
                    .collect::<Vec<_>>();
                messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.id.cmp(&b.id)));
                Ok(messages)
            }
        }
    }

    /// Mark every message in the conversation that `reader` did not send as
    /// read. Returns the number of rows updated.
    pub async fn mark_read(&self, conversation_id: i64, reader: &str) -> Result<u64> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    UPDATE messages
                    SET is_read = TRUE
                    WHERE conversation_id = $1 AND sender <> $2 AND NOT is_read
                    "#,
                )
                .bind(conversation_id)
                .bind(reader)
                .execute(pool)
                .await
                .context("failed to mark messages read")?;

                Ok(result.rows_affected())
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                let mut updated = 0;
                for record in state.messages.iter_mut() {
                    if record.conversation_id == conversation_id
                        && record.sender != reader
                        && !record.is_read
                    {
                        record.is_read = true;
                        updated += 1;
                    }
                }
                Ok(updated)
            }
        }
    }

    // ── Groups ──────────────────────────────────────────────────────

    pub async fn create_group(&self, name: &str, creator: &str) -> Result<i64> {
        match self {
            Self::Postgres(pool) => {
                let group_id = sqlx::query_scalar::<_, i64>(
                    "INSERT INTO groups (name, created_by) VALUES ($1, $2) RETURNING id",
                )
                .bind(name)
                .bind(creator)
                .fetch_one(pool)
                .await
                .context("failed to create group")?;

                sqlx::query(
                    r#"
                    INSERT INTO group_members (group_id, username, role)
                    VALUES ($1, $2, 'admin')
                    ON CONFLICT (group_id, username) DO NOTHING
                    "#,
                )
                .bind(group_id)
                .bind(creator)
                .execute(pool)
                .await
                .context("failed to add group creator as member")?;

                Ok(group_id)
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                state.next_group_id += 1;
                let group_id = state.next_group_id;
                state.groups.insert(group_id, (name.to_string(), creator.to_string()));
                state.group_members.insert((group_id, creator.to_string()));
                Ok(group_id)
            }
        }
    }

    pub async fn add_group_member(&self, group_id: i64, username: &str) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO group_members (group_id, username)
                    VALUES ($1, $2)
                    ON CONFLICT (group_id, username) DO NOTHING
                    "#,
                )
                .bind(group_id)
                .bind(username)
                .execute(pool)
                .await
                .context("failed to add group member")?;
                Ok(())
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                if !state.groups.contains_key(&group_id) {
                    bail!("group {group_id} does not exist");
                }
                state.group_members.insert((group_id, username.to_string()));
                Ok(())
            }
        }
    }

    pub async fn is_group_member(&self, group_id: i64, username: &str) -> Result<bool> {
        match self {
            Self::Postgres(pool) => sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM group_members WHERE group_id = $1 AND username = $2)",
            )
            .bind(group_id)
            .bind(username)
            .fetch_one(pool)
            .await
            .context("failed to check group membership"),
            Self::Memory(mem) => {
                let state = mem.inner.read().await;
                Ok(state.group_members.contains(&(group_id, username.to_string())))
            }
        }
    }

    /// Synchronous durable write for group chat. The returned record is what
    /// gets fanned out; a failure here means nothing is published.
    pub async fn append_group_message(
        &self,
        group_id: i64,
        sender: &str,
        body: &str,
        attachment: Option<String>,
    ) -> Result<GroupMessageRecord> {
        match self {
            Self::Postgres(pool) => {
                let (id, sent_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
                    r#"
                    INSERT INTO group_messages (group_id, sender, content, attachment)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id, sent_at
                    "#,
                )
                .bind(group_id)
                .bind(sender)
                .bind(body)
                .bind(&attachment)
                .fetch_one(pool)
                .await
                .context("failed to append group message")?;

                Ok(GroupMessageRecord {
                    id,
                    group_id,
                    sender: sender.to_string(),
                    message: body.to_string(),
                    attachment,
                    timestamp: sent_at.timestamp(),
                })
            }
            Self::Memory(mem) => {
                if mem.writes_failing() {
                    bail!("memory store writes are disabled");
                }

                let mut state = mem.inner.write().await;
                if !state.groups.contains_key(&group_id) {
                    bail!("group {group_id} does not exist");
                }

                state.next_group_message_id += 1;
                let record = GroupMessageRecord {
                    id: state.next_group_message_id,
                    group_id,
                    sender: sender.to_string(),
                    message: body.to_string(),
                    attachment,
                    timestamp: Utc::now().timestamp(),
                };
                state.group_messages.push(record.clone());
                Ok(record)
            }
        }
    }

    pub async fn group_messages(&self, group_id: i64) -> Result<Vec<GroupMessageRecord>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (i64, i64, String, String, Option<String>, DateTime<Utc>)>(
                    r#"
                    SELECT id, group_id, sender, content, attachment, sent_at
                    FROM group_messages
                    WHERE group_id = $1
                    ORDER BY sent_at, id
                    "#,
                )
                .bind(group_id)
                .fetch_all(pool)
                .await
                .context("failed to list group messages")?;

                Ok(rows
                    .into_iter()
                    .map(|(id, group_id, sender, message, attachment, sent_at)| GroupMessageRecord {
                        id,
                        group_id,
                        sender,
                        message,
                        attachment,
                        timestamp: sent_at.timestamp(),
                    })
                    .collect())
            }
            Self::Memory(mem) => {
                let state = mem.inner.read().await;
                Ok(state
                    .group_messages
                    .iter()
                    .filter(|record| record.group_id == group_id)
                    .cloned()
                    .collect())
            }
        }
    }

    // ── Users & presence inputs ─────────────────────────────────────

    pub async fn upsert_user(
        &self,
        username: &str,
        full_name: Option<&str>,
        profile_picture: Option<&str>,
    ) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO users (username, full_name, profile_picture)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (username) DO UPDATE
                        SET full_name = EXCLUDED.full_name,
                            profile_picture = EXCLUDED.profile_picture
                    "#,
                )
                .bind(username)
                .bind(full_name)
                .bind(profile_picture)
                .execute(pool)
                .await
                .context("failed to upsert user")?;
                Ok(())
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                state.users.insert(
                    username.to_string(),
                    SenderProfile {
                        full_name: full_name.map(ToOwned::to_owned),
                        profile_picture: profile_picture.map(ToOwned::to_owned),
                    },
                );
                Ok(())
            }
        }
    }

    pub async fn profile_of(&self, username: &str) -> Result<Option<SenderProfile>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
                    "SELECT full_name, profile_picture FROM users WHERE username = $1",
                )
                .bind(username)
                .fetch_optional(pool)
                .await
                .context("failed to load user profile")?;

                Ok(row.map(|(full_name, profile_picture)| SenderProfile {
                    full_name,
                    profile_picture,
                }))
            }
            Self::Memory(mem) => Ok(mem.inner.read().await.users.get(username).cloned()),
        }
    }

    pub async fn touch_tab_session(&self, username: &str, tab_id: &str) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO tab_sessions (username, tab_id)
                    VALUES ($1, $2)
                    ON CONFLICT (tab_id) DO UPDATE
                        SET last_activity = now(), username = EXCLUDED.username
                    "#,
                )
                .bind(username)
                .bind(tab_id)
                .execute(pool)
                .await
                .context("failed to touch tab session")?;
                Ok(())
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                state
                    .tab_activity
                    .insert((username.to_string(), tab_id.to_string()), Utc::now());
                Ok(())
            }
        }
    }

    pub async fn last_tab_activity(&self, username: &str) -> Result<Option<DateTime<Utc>>> {
        match self {
            Self::Postgres(pool) => sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
                "SELECT MAX(last_activity) FROM tab_sessions WHERE username = $1",
            )
            .bind(username)
            .fetch_one(pool)
            .await
            .context("failed to read tab activity"),
            Self::Memory(mem) => {
                let state = mem.inner.read().await;
                Ok(state
                    .tab_activity
                    .iter()
                    .filter(|((user, _), _)| user == username)
                    .map(|(_, at)| *at)
                    .max())
            }
        }
    }

    pub async fn update_location(&self, username: &str, latitude: f64, longitude: f64) -> Result<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO user_locations (username, latitude, longitude) VALUES ($1, $2, $3)",
                )
                .bind(username)
                .bind(latitude)
                .bind(longitude)
                .execute(pool)
                .await
                .context("failed to record location")?;
                Ok(())
            }
            Self::Memory(mem) => {
                let mut state = mem.inner.write().await;
                state.locations.insert(
                    username.to_string(),
                    LocationFix {
                        username: username.to_string(),
                        latitude,
                        longitude,
                        recorded_at: Utc::now(),
                    },
                );
                Ok(())
            }
        }
    }

    pub async fn latest_location(&self, username: &str) -> Result<Option<LocationFix>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (String, f64, f64, DateTime<Utc>)>(
                    r#"
                    SELECT username, latitude, longitude, recorded_at
                    FROM user_locations
                    WHERE username = $1
                    ORDER BY recorded_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(username)
                .fetch_optional(pool)
                .await
                .context("failed to read latest location")?;

                Ok(row.map(|(username, latitude, longitude, recorded_at)| LocationFix {
                    username,
                    latitude,
                    longitude,
                    recorded_at,
                }))
            }
            Self::Memory(mem) => Ok(mem.inner.read().await.locations.get(username).cloned()),
        }
    }

    pub async fn latest_locations(&self) -> Result<Vec<LocationFix>> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, (String, f64, f64, DateTime<Utc>)>(
                    r#"
                    SELECT DISTINCT ON (username) username, latitude, longitude, recorded_at
                    FROM user_locations
                    ORDER BY username, recorded_at DESC
                    "#,
                )
                .fetch_all(pool)
                .await
                .context("failed to list latest locations")?;

                Ok(rows
                    .into_iter()
                    .map(|(username, latitude, longitude, recorded_at)| LocationFix {
                        username,
                        latitude,
                        longitude,
                        recorded_at,
                    })
                    .collect())
            }
            Self::Memory(mem) => Ok(mem.inner.read().await.locations.values().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_or_create_is_symmetric_and_idempotent() {
        let store = ChatStore::memory();

        let (first, created) =
            store.find_or_create_conversation("bo", "amara").await.expect("first call");
        assert!(created);

        let (second, created) =
            store.find_or_create_conversation("amara", "bo").await.expect("second call");
        assert!(!created);
        assert_eq!(first, second);

        assert_eq!(store.conversation_between("amara", "bo").await.expect("lookup"), Some(first));
    }

    #[tokio::test]
    async fn concurrent_find_or_create_resolves_to_one_conversation() {
        let store = ChatStore::memory();

        let (left, right) = tokio::join!(
            store.find_or_create_conversation("amara", "bo"),
            store.find_or_create_conversation("bo", "amara"),
        );
        let (left_id, left_created) = left.expect("left call");
        let (right_id, right_created) = right.expect("right call");

        assert_eq!(left_id, right_id);
        assert_eq!(
            [left_created, right_created].iter().filter(|created| **created).count(),
            1,
            "exactly one caller should create the conversation",
        );
        assert_eq!(store.conversations_for("amara").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn self_conversation_is_allowed() {
        let store = ChatStore::memory();
        let (id, created) =
            store.find_or_create_conversation("amara", "amara").await.expect("self pair");
        assert!(created);
        assert_eq!(store.conversation_between("amara", "amara").await.expect("lookup"), Some(id));
    }

    #[tokio::test]
    async fn appending_touches_conversation_updated_at() {
        let store = ChatStore::memory();
        let (id, _) = store.find_or_create_conversation("amara", "bo").await.expect("pair");
        let before = store.conversation(id).await.expect("load").expect("exists").updated_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append_message(id, "amara", "hello", Utc::now()).await.expect("append");

        let after = store.conversation(id).await.expect("load").expect("exists").updated_at;
        assert!(after > before);
        assert_eq!(store.messages_in(id).await.expect("messages").len(), 1);
    }

    #[tokio::test]
    async fn mark_read_only_affects_incoming_messages() {
        let store = ChatStore::memory();
        let (id, _) = store.find_or_create_conversation("amara", "bo").await.expect("pair");
        store.append_message(id, "amara", "hi bo", Utc::now()).await.expect("append");
        store.append_message(id, "bo", "hi amara", Utc::now()).await.expect("append");

        let updated = store.mark_read(id, "bo").await.expect("mark read");
        assert_eq!(updated, 1);

        let messages = store.messages_in(id).await.expect("messages");
        assert!(messages.iter().find(|m| m.sender == "amara").expect("incoming").is_read);
        assert!(!messages.iter().find(|m| m.sender == "bo").expect("own").is_read);
    }

    #[tokio::test]
    async fn group_membership_gates_are_accurate() {
        let store = ChatStore::memory();
        let group_id = store.create_group("algorithms study", "amara").await.expect("group");
        store.add_group_member(group_id, "bo").await.expect("member");

        assert!(store.is_group_member(group_id, "amara").await.expect("creator"));
        assert!(store.is_group_member(group_id, "bo").await.expect("added"));
        assert!(!store.is_group_member(group_id, "cai").await.expect("outsider"));
    }

    #[tokio::test]
    async fn group_messages_come_back_in_order() {
        let store = ChatStore::memory();
        let group_id = store.create_group("algorithms study", "amara").await.expect("group");

        let first = store
            .append_group_message(group_id, "amara", "first", None)
            .await
            .expect("append");
        let second = store
            .append_group_message(group_id, "amara", "second", None)
            .await
            .expect("append");
        assert!(first.id < second.id);

        let messages = store.group_messages(group_id).await.expect("list");
        assert_eq!(
            messages.iter().map(|m| m.message.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"],
        );
    }

    #[tokio::test]
    async fn failed_writes_leave_the_store_empty() {
        let store = ChatStore::memory();
        store.set_fail_writes(true);

        assert!(store.store_direct_message("amara", "bo", "hello", Utc::now()).await.is_err());
        assert!(store.conversations_for("amara").await.expect("list").is_empty());

        store.set_fail_writes(false);
        store.store_direct_message("amara", "bo", "hello", Utc::now()).await.expect("write");
        assert_eq!(store.conversations_for("amara").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn presence_inputs_round_trip() {
        let store = ChatStore::memory();

        assert!(store.last_tab_activity("amara").await.expect("empty").is_none());
        store.touch_tab_session("amara", "tab-1").await.expect("touch");
        assert!(store.last_tab_activity("amara").await.expect("activity").is_some());

        store.update_location("amara", 52.52, 13.405).await.expect("location");
        let fix = store.latest_location("amara").await.expect("read").expect("present");
        assert_eq!(fix.latitude, 52.52);
        assert_eq!(store.latest_locations().await.expect("all").len(), 1);
    }

    #[tokio::test]
    async fn profile_fields_round_trip() {
        let store = ChatStore::memory();
        assert!(store.profile_of("amara").await.expect("missing").is_none());

        store
            .upsert_user("amara", Some("Amara Okafor"), Some("profile_pictures/amara.png"))
            .await
            .expect("upsert");
        let profile = store.profile_of("amara").await.expect("load").expect("present");
        assert_eq!(profile.full_name.as_deref(), Some("Amara Okafor"));
    }
}
