//! Document store backed by the official MongoDB driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use mongodb::options::{ReplaceOptions, UpdateOptions};
use mongodb::{Client, ClientSession, Collection, Cursor, IndexModel, SessionCursor};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ConnectConfig;
use crate::error::{MongoError, MongoResult};
use crate::store::{
    BulkWriteFailure, BulkWriteResult, CursorSource, DocumentStore, Namespace, SessionId,
    UpdateOutcome, WriteFailure, WriteIntent, WriteKind,
};

type SharedSession = Arc<tokio::sync::Mutex<ClientSession>>;

/// A [`DocumentStore`] talking to a MongoDB deployment.
///
/// The driver pools connections internally; sessions opened through the
/// store are kept in a table keyed by [`SessionId`] until they are ended.
pub struct MongoStore {
    client: Client,
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
    next_session: AtomicU64,
}

impl MongoStore {
    /// Create a store from configuration.
    ///
    /// No round trip is made; use [`DocumentStore::ping`] to check the
    /// deployment is reachable.
    pub async fn connect(config: &ConnectConfig) -> MongoResult<Self> {
        let options = config.to_client_options().await?;
        let client = Client::with_options(options)
            .map_err(|e| MongoError::connection(format!("failed to create client: {}", e)))?;

        info!(uri = %config.uri, "MongoDB store created");

        Ok(Self::from_client(client))
    }

    /// Wrap an existing driver client.
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
        }
    }

    /// Get the underlying driver client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn collection(&self, namespace: &Namespace) -> Collection<Document> {
        self.client
            .database(&namespace.database)
            .collection(&namespace.collection)
    }

    fn session(&self, id: SessionId) -> MongoResult<SharedSession> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| MongoError::operation(format!("{} has ended", id)))
    }

    async fn run_command(
        &self,
        session: Option<SessionId>,
        database: &str,
        command: Document,
    ) -> MongoResult<Document> {
        let db = self.client.database(database);
        Ok(match session {
            None => db.run_command(command, None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                db.run_command_with_session(command, None, &mut session)
                    .await?
            }
        })
    }
}

impl std::fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("open_sessions", &self.sessions.lock().len())
            .finish()
    }
}

enum CursorKind {
    Plain(Cursor<Document>),
    Session {
        cursor: SessionCursor<Document>,
        session: SharedSession,
    },
}

/// A driver cursor exposed as a [`CursorSource`].
pub struct MongoCursor {
    inner: Option<CursorKind>,
}

impl MongoCursor {
    fn plain(cursor: Cursor<Document>) -> Box<Self> {
        Box::new(Self {
            inner: Some(CursorKind::Plain(cursor)),
        })
    }

    fn with_session(cursor: SessionCursor<Document>, session: SharedSession) -> Box<Self> {
        Box::new(Self {
            inner: Some(CursorKind::Session { cursor, session }),
        })
    }

    fn closed() -> MongoError {
        MongoError::usage("cursor has been closed")
    }
}

#[async_trait]
impl CursorSource for MongoCursor {
    async fn advance(&mut self) -> MongoResult<bool> {
        match self.inner.as_mut().ok_or_else(Self::closed)? {
            CursorKind::Plain(cursor) => Ok(cursor.advance().await?),
            CursorKind::Session { cursor, session } => {
                let mut session = session.lock().await;
                Ok(cursor.advance(&mut session).await?)
            }
        }
    }

    fn current(&self) -> MongoResult<Document> {
        match self.inner.as_ref().ok_or_else(Self::closed)? {
            CursorKind::Plain(cursor) => Ok(cursor.deserialize_current()?),
            CursorKind::Session { cursor, .. } => Ok(cursor.deserialize_current()?),
        }
    }

    async fn close(&mut self) -> MongoResult<()> {
        // Dropping a driver cursor kills it server-side.
        self.inner.take().map(|_| ()).ok_or_else(Self::closed)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> MongoResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }

    async fn start_session(&self) -> MongoResult<SessionId> {
        let session = self.client.start_session(None).await?;
        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        self.sessions
            .lock()
            .insert(id, Arc::new(tokio::sync::Mutex::new(session)));
        debug!(session = %id, "started session");
        Ok(id)
    }

    async fn start_transaction(&self, session: SessionId) -> MongoResult<()> {
        let handle = self.session(session)?;
        handle.lock().await.start_transaction(None).await?;
        Ok(())
    }

    async fn commit_transaction(&self, session: SessionId) -> MongoResult<()> {
        let handle = self.session(session)?;
        handle.lock().await.commit_transaction().await?;
        Ok(())
    }

    async fn abort_transaction(&self, session: SessionId) -> MongoResult<()> {
        let handle = self.session(session)?;
        handle.lock().await.abort_transaction().await?;
        Ok(())
    }

    async fn end_session(&self, session: SessionId) -> MongoResult<()> {
        // The driver ends a session (aborting any open transaction) on drop.
        match self.sessions.lock().remove(&session) {
            Some(_) => {
                debug!(session = %session, "ended session");
                Ok(())
            }
            None => Err(MongoError::operation(format!("{} has ended", session))),
        }
    }

    async fn find(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<Box<dyn CursorSource>> {
        let collection = self.collection(namespace);
        Ok(match session {
            None => MongoCursor::plain(collection.find(filter, None).await?),
            Some(id) => {
                let handle = self.session(id)?;
                let cursor = {
                    let mut session = handle.lock().await;
                    collection
                        .find_with_session(filter, None, &mut session)
                        .await?
                };
                MongoCursor::with_session(cursor, handle)
            }
        })
    }

    async fn find_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<Option<Document>> {
        let collection = self.collection(namespace);
        Ok(match session {
            None => collection.find_one(filter, None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .find_one_with_session(filter, None, &mut session)
                    .await?
            }
        })
    }

    async fn aggregate(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        pipeline: Vec<Document>,
    ) -> MongoResult<Box<dyn CursorSource>> {
        let collection = self.collection(namespace);
        Ok(match session {
            None => MongoCursor::plain(collection.aggregate(pipeline, None).await?),
            Some(id) => {
                let handle = self.session(id)?;
                let cursor = {
                    let mut session = handle.lock().await;
                    collection
                        .aggregate_with_session(pipeline, None, &mut session)
                        .await?
                };
                MongoCursor::with_session(cursor, handle)
            }
        })
    }

    async fn insert_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        document: Document,
    ) -> MongoResult<Bson> {
        let collection = self.collection(namespace);
        let result = match session {
            None => collection.insert_one(document, None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .insert_one_with_session(document, None, &mut session)
                    .await?
            }
        };
        Ok(result.inserted_id)
    }

    async fn replace_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome> {
        let collection = self.collection(namespace);
        let options = ReplaceOptions::builder().upsert(upsert).build();
        let result = match session {
            None => collection.replace_one(filter, replacement, options).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .replace_one_with_session(filter, replacement, options, &mut session)
                    .await?
            }
        };
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome> {
        let collection = self.collection(namespace);
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = match session {
            None => collection.update_one(filter, update, options).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .update_one_with_session(filter, update, options, &mut session)
                    .await?
            }
        };
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome> {
        let collection = self.collection(namespace);
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = match session {
            None => collection.update_many(filter, update, options).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .update_many_with_session(filter, update, options, &mut session)
                    .await?
            }
        };
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<u64> {
        let collection = self.collection(namespace);
        let result = match session {
            None => collection.delete_one(filter, None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .delete_one_with_session(filter, None, &mut session)
                    .await?
            }
        };
        Ok(result.deleted_count)
    }

    async fn delete_many(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<u64> {
        let collection = self.collection(namespace);
        let result = match session {
            None => collection.delete_many(filter, None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection
                    .delete_many_with_session(filter, None, &mut session)
                    .await?
            }
        };
        Ok(result.deleted_count)
    }

    async fn bulk_write(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        intents: Vec<WriteIntent>,
        ordered: bool,
    ) -> MongoResult<BulkWriteResult> {
        let mut result = BulkWriteResult::default();
        let mut failures = Vec::new();

        for group in group_intents(intents) {
            let command = write_command(&namespace.collection, &group, ordered);
            debug!(
                namespace = %namespace,
                kind = ?group.kind,
                count = group.entries.len(),
                ordered,
                "sending write command"
            );
            let response = self
                .run_command(session, &namespace.database, command)
                .await?;
            let failed = absorb_response(&group, &response, &mut result, &mut failures);
            if failed && ordered {
                break;
            }
        }

        if failures.is_empty() {
            Ok(result)
        } else {
            Err(MongoError::BulkWrite(BulkWriteFailure { result, failures }))
        }
    }

    async fn create_index(&self, namespace: &Namespace, keys: Document) -> MongoResult<String> {
        let model = IndexModel::builder().keys(keys).build();
        let result = self.collection(namespace).create_index(model, None).await?;
        Ok(result.index_name)
    }

    async fn drop_collection(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
    ) -> MongoResult<()> {
        let collection = self.collection(namespace);
        match session {
            None => collection.drop(None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                collection.drop_with_session(None, &mut session).await?
            }
        }
        Ok(())
    }

    async fn drop_database(&self, session: Option<SessionId>, database: &str) -> MongoResult<()> {
        let db = self.client.database(database);
        match session {
            None => db.drop(None).await?,
            Some(id) => {
                let handle = self.session(id)?;
                let mut session = handle.lock().await;
                db.drop_with_session(None, &mut session).await?
            }
        }
        Ok(())
    }
}

/// A run of consecutive intents sent as one write command.
#[derive(Debug, Clone, PartialEq)]
struct CommandGroup {
    /// Batch index of the first intent.
    start: usize,
    kind: WriteKind,
    entries: Vec<Document>,
}

/// Most operations a server accepts in one write command.
const MAX_WRITE_BATCH_SIZE: usize = 100_000;

/// Payload bound for one write command, leaving room for the command envelope.
const MAX_WRITE_BATCH_BYTES: usize = 16 * 1024 * 1024 - 16 * 1024;

/// Split a batch into runs of the same command family, preserving order.
///
/// A run is cut into several groups when it would exceed the server's
/// operation count or message size limits.
fn group_intents(intents: Vec<WriteIntent>) -> Vec<CommandGroup> {
    let mut groups: Vec<CommandGroup> = Vec::new();
    let mut bytes = 0usize;
    for (index, intent) in intents.into_iter().enumerate() {
        let kind = intent.kind();
        let entry = command_entry(intent);
        let size = entry_size(&entry);
        match groups.last_mut() {
            Some(group)
                if group.kind == kind
                    && group.entries.len() < MAX_WRITE_BATCH_SIZE
                    && bytes + size <= MAX_WRITE_BATCH_BYTES =>
            {
                bytes += size;
                group.entries.push(entry);
            }
            _ => {
                bytes = size;
                groups.push(CommandGroup {
                    start: index,
                    kind,
                    entries: vec![entry],
                });
            }
        }
    }
    groups
}

/// Encoded length of a command entry.
fn entry_size(entry: &Document) -> usize {
    bson::to_vec(entry).map(|bytes| bytes.len()).unwrap_or(0)
}

/// The command array element for one intent.
fn command_entry(intent: WriteIntent) -> Document {
    match intent {
        WriteIntent::Insert { document } => {
            if document.contains_key("_id") {
                document
            } else {
                let mut with_id = doc! { "_id": ObjectId::new() };
                with_id.extend(document);
                with_id
            }
        }
        WriteIntent::ReplaceById {
            id,
            replacement,
            upsert,
        } => doc! { "q": { "_id": id }, "u": replacement, "upsert": upsert, "multi": false },
        WriteIntent::UpdateById { id, update, upsert } => {
            doc! { "q": { "_id": id }, "u": update, "upsert": upsert, "multi": false }
        }
        WriteIntent::UpdateMany {
            filter,
            update,
            upsert,
        } => doc! { "q": filter, "u": update, "upsert": upsert, "multi": true },
        WriteIntent::DeleteMany { filter } => doc! { "q": filter, "limit": 0 },
        WriteIntent::DeleteById { id } => doc! { "q": { "_id": id }, "limit": 1 },
    }
}

fn write_command(collection: &str, group: &CommandGroup, ordered: bool) -> Document {
    let (verb, field) = match group.kind {
        WriteKind::Insert => ("insert", "documents"),
        WriteKind::Update => ("update", "updates"),
        WriteKind::Delete => ("delete", "deletes"),
    };
    let mut command = Document::new();
    command.insert(verb, collection);
    command.insert(field, group.entries.clone());
    command.insert("ordered", ordered);
    command
}

fn count_of(response: &Document, key: &str) -> u64 {
    match response.get(key) {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Double(n)) if *n >= 0.0 => *n as u64,
        _ => 0,
    }
}

fn index_of(entry: &Document) -> usize {
    usize::try_from(count_of(entry, "index")).unwrap_or(0)
}

/// Fold a write command response into the batch totals.
///
/// Returns whether the command reported any failure.
fn absorb_response(
    group: &CommandGroup,
    response: &Document,
    result: &mut BulkWriteResult,
    failures: &mut Vec<WriteFailure>,
) -> bool {
    let n = count_of(response, "n");
    match group.kind {
        WriteKind::Insert => result.inserted_count += n,
        WriteKind::Delete => result.deleted_count += n,
        WriteKind::Update => {
            let upserted = response.get_array("upserted").map(Vec::as_slice).unwrap_or(&[]);
            for entry in upserted.iter().filter_map(Bson::as_document) {
                if let Some(id) = entry.get("_id") {
                    result
                        .upserted_ids
                        .insert(group.start + index_of(entry), id.clone());
                }
            }
            let upserted_count = upserted.len() as u64;
            result.upserted_count += upserted_count;
            result.matched_count += n.saturating_sub(upserted_count);
            result.modified_count += count_of(response, "nModified");
        }
    }

    let before = failures.len();
    if let Ok(errors) = response.get_array("writeErrors") {
        for error in errors.iter().filter_map(Bson::as_document) {
            failures.push(WriteFailure {
                index: group.start + index_of(error),
                code: error.get_i32("code").ok(),
                message: error.get_str("errmsg").unwrap_or("write error").to_string(),
            });
        }
    }
    if let Ok(concern) = response.get_document("writeConcernError") {
        failures.push(WriteFailure {
            index: group.start,
            code: concern.get_i32("code").ok(),
            message: concern
                .get_str("errmsg")
                .unwrap_or("write concern error")
                .to_string(),
        });
    }
    failures.len() > before
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch() -> Vec<WriteIntent> {
        let id = ObjectId::new();
        vec![
            WriteIntent::Insert { document: doc! { "a": 1 } },
            WriteIntent::Insert { document: doc! { "_id": 7, "a": 2 } },
            WriteIntent::UpdateById {
                id,
                update: doc! { "$set": { "a": 3 } },
                upsert: true,
            },
            WriteIntent::DeleteMany { filter: doc! { "a": 0 } },
            WriteIntent::Insert { document: doc! { "_id": 8 } },
        ]
    }

    #[test]
    fn test_group_intents_keeps_runs() {
        let groups = group_intents(batch());
        let shape: Vec<(usize, WriteKind, usize)> = groups
            .iter()
            .map(|g| (g.start, g.kind, g.entries.len()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (0, WriteKind::Insert, 2),
                (2, WriteKind::Update, 1),
                (3, WriteKind::Delete, 1),
                (4, WriteKind::Insert, 1),
            ]
        );
        assert!(groups[0].entries[0].get_object_id("_id").is_ok());
        assert_eq!(groups[0].entries[1].get_i32("_id").unwrap(), 7);
    }

    #[test]
    fn test_group_intents_splits_oversized_runs() {
        let intents: Vec<WriteIntent> = (0..MAX_WRITE_BATCH_SIZE as i64 + 1)
            .map(|n| WriteIntent::Insert { document: doc! { "_id": n } })
            .collect();
        let groups = group_intents(intents);
        let shape: Vec<(usize, usize)> = groups.iter().map(|g| (g.start, g.entries.len())).collect();
        assert_eq!(shape, vec![(0, MAX_WRITE_BATCH_SIZE), (MAX_WRITE_BATCH_SIZE, 1)]);
        assert_eq!(groups[1].entries[0].get_i64("_id").unwrap(), MAX_WRITE_BATCH_SIZE as i64);
    }

    #[test]
    fn test_group_intents_splits_by_size() {
        let blob = "x".repeat(4 * 1024 * 1024);
        let intents: Vec<WriteIntent> = (0..5)
            .map(|n| WriteIntent::Insert { document: doc! { "_id": n, "blob": blob.as_str() } })
            .collect();
        let groups = group_intents(intents);
        let shape: Vec<(usize, usize)> = groups.iter().map(|g| (g.start, g.entries.len())).collect();
        assert_eq!(shape, vec![(0, 3), (3, 2)]);
        for group in &groups {
            let total: usize = group.entries.iter().map(entry_size).sum();
            assert!(total <= MAX_WRITE_BATCH_BYTES);
        }
    }

    #[test]
    fn test_command_entries() {
        let id = ObjectId::new();
        assert_eq!(
            command_entry(WriteIntent::DeleteById { id }),
            doc! { "q": { "_id": id }, "limit": 1 }
        );
        assert_eq!(
            command_entry(WriteIntent::UpdateMany {
                filter: doc! { "x": 1 },
                update: doc! { "$inc": { "x": 1 } },
                upsert: false,
            }),
            doc! { "q": { "x": 1 }, "u": { "$inc": { "x": 1 } }, "upsert": false, "multi": true }
        );
    }

    #[test]
    fn test_write_command_shape() {
        let groups = group_intents(batch());
        let command = write_command("users", &groups[2], false);
        assert_eq!(command.get_str("delete").unwrap(), "users");
        assert_eq!(command.get_array("deletes").unwrap().len(), 1);
        assert!(!command.get_bool("ordered").unwrap());
    }

    #[test]
    fn test_absorb_update_response() {
        let group = CommandGroup {
            start: 4,
            kind: WriteKind::Update,
            entries: vec![doc! {}, doc! {}, doc! {}],
        };
        let response = doc! {
            "n": 3,
            "nModified": 1,
            "upserted": [ { "index": 1, "_id": 99 } ],
            "writeErrors": [ { "index": 2, "code": 11000, "errmsg": "duplicate key" } ],
            "ok": 1.0,
        };
        let mut result = BulkWriteResult::default();
        let mut failures = Vec::new();
        assert!(absorb_response(&group, &response, &mut result, &mut failures));

        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.upserted_count, 1);
        assert_eq!(result.upserted_ids.get(&5), Some(&Bson::Int32(99)));
        assert_eq!(
            failures,
            vec![WriteFailure {
                index: 6,
                code: Some(11000),
                message: "duplicate key".into(),
            }]
        );
    }

    #[test]
    fn test_absorb_clean_insert_response() {
        let group = CommandGroup {
            start: 0,
            kind: WriteKind::Insert,
            entries: vec![doc! {}, doc! {}],
        };
        let mut result = BulkWriteResult::default();
        let mut failures = Vec::new();
        let failed = absorb_response(&group, &doc! { "n": 2, "ok": 1.0 }, &mut result, &mut failures);
        assert!(!failed);
        assert_eq!(result.inserted_count, 2);
        assert!(failures.is_empty());
    }
}
