//! In-process document store.
//!
//! [`MemoryStore`] keeps every database in a map behind a lock and evaluates
//! filters, updates and pipelines itself. Transactions work on a private copy
//! of the data taken when the transaction starts; committing publishes the
//! copy unless the shared data changed in the meantime.

mod aggregate;
mod compare;
mod expr;
mod matcher;
mod update;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MongoError, MongoResult};
use crate::store::{
    BulkWriteFailure, BulkWriteResult, CursorSource, DocumentStore, Namespace, SessionId,
    UpdateOutcome, WriteFailure, WriteIntent,
};

use aggregate::StageContext;
use compare::set_path;
use matcher::{Matcher, is_operator_document};

const DUPLICATE_KEY: i32 = 11000;

type Databases = BTreeMap<String, BTreeMap<String, CollectionData>>;

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    keys: Document,
}

#[derive(Debug, Clone, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

/// A refused write, with the store error code when there is one.
#[derive(Debug)]
struct WriteError {
    code: Option<i32>,
    message: String,
}

impl WriteError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl From<MongoError> for WriteError {
    fn from(err: MongoError) -> Self {
        match err {
            MongoError::Operation(message) => Self::new(message),
            other => Self::new(other.to_string()),
        }
    }
}

impl From<WriteError> for MongoError {
    fn from(err: WriteError) -> Self {
        MongoError::Operation(err.message)
    }
}

impl CollectionData {
    fn text_fields(&self) -> Option<Vec<String>> {
        let fields: Vec<String> = self
            .indexes
            .iter()
            .flat_map(|index| index.keys.iter())
            .filter(|(_, kind)| kind.as_str() == Some("text"))
            .map(|(field, _)| field.clone())
            .collect();
        (!fields.is_empty()).then_some(fields)
    }

    fn matching(&self, filter: &Document) -> MongoResult<Vec<usize>> {
        let text = self.text_fields();
        let matcher = Matcher::new(text.as_deref());
        let mut out = Vec::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if matcher.matches(doc, filter)? {
                out.push(i);
            }
        }
        Ok(out)
    }

    fn insert(&mut self, namespace: &Namespace, document: Document) -> Result<Bson, WriteError> {
        let document = if document.contains_key("_id") {
            document
        } else {
            let mut with_id = doc! { "_id": ObjectId::new() };
            with_id.extend(document);
            with_id
        };
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        if self
            .documents
            .iter()
            .any(|existing| existing.get("_id").is_some_and(|e| compare::values_equal(e, &id)))
        {
            return Err(WriteError {
                code: Some(DUPLICATE_KEY),
                message: format!(
                    "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                    namespace, id
                ),
            });
        }
        self.documents.push(document);
        Ok(id)
    }

    fn update(
        &mut self,
        namespace: &Namespace,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateOutcome, WriteError> {
        let operators = update::is_update_document(update);
        let mut targets = self.matching(filter)?;
        if !multi {
            targets.truncate(1);
        }

        let mut outcome = UpdateOutcome::default();
        let mut staged = Vec::with_capacity(targets.len());
        for i in targets {
            let current = &self.documents[i];
            let next = if operators {
                let mut next = current.clone();
                update::apply(&mut next, update, false)?;
                next
            } else {
                replacement(current.get("_id"), update)?
            };
            outcome.matched_count += 1;
            if &next != current {
                staged.push((i, next));
            }
        }
        // Nothing is written unless every matched document updated cleanly.
        outcome.modified_count = staged.len() as u64;
        for (i, next) in staged {
            self.documents[i] = next;
        }

        if outcome.matched_count == 0 && upsert {
            let seed = upsert_seed(filter)?;
            let document = if operators {
                let mut document = seed;
                update::apply(&mut document, update, true)?;
                document
            } else {
                replacement(seed.get("_id"), update)?
            };
            outcome.upserted_id = Some(self.insert(namespace, document)?);
        }
        Ok(outcome)
    }

    fn delete(&mut self, filter: &Document, multi: bool) -> Result<u64, WriteError> {
        let mut targets = self.matching(filter)?;
        if !multi {
            targets.truncate(1);
        }
        for &i in targets.iter().rev() {
            self.documents.remove(i);
        }
        Ok(targets.len() as u64)
    }
}

/// A replacement document keeping the existing identifier.
fn replacement(id: Option<&Bson>, document: &Document) -> Result<Document, WriteError> {
    let Some(id) = id else {
        return Ok(document.clone());
    };
    match document.get("_id") {
        Some(new_id) if !compare::values_equal(new_id, id) => Err(WriteError::new(
            "the (immutable) field '_id' was found to have been altered",
        )),
        _ => {
            let mut out = doc! { "_id": id.clone() };
            for (key, value) in document {
                if key != "_id" {
                    out.insert(key.clone(), value.clone());
                }
            }
            Ok(out)
        }
    }
}

/// The equality fields of a filter, which an upserted document starts from.
fn upsert_seed(filter: &Document) -> Result<Document, WriteError> {
    let mut seed = Document::new();
    for (key, condition) in filter {
        match key.as_str() {
            "$and" => {
                if let Bson::Array(clauses) = condition {
                    for clause in clauses.iter().filter_map(Bson::as_document) {
                        for (path, value) in upsert_seed(clause)? {
                            set_path(&mut seed, &path, value).map_err(WriteError::new)?;
                        }
                    }
                }
            }
            operator if operator.starts_with('$') => {}
            path => {
                let value = match condition {
                    Bson::Document(ops) if is_operator_document(ops) => match ops.get("$eq") {
                        Some(value) => value.clone(),
                        None => continue,
                    },
                    other => other.clone(),
                };
                set_path(&mut seed, path, value).map_err(WriteError::new)?;
            }
        }
    }
    Ok(seed)
}

fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, kind)| match kind {
            Bson::String(s) => format!("{}_{}", field, s),
            Bson::Int32(n) => format!("{}_{}", field, n),
            Bson::Int64(n) => format!("{}_{}", field, n),
            other => format!("{}_{}", field, other),
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug)]
struct Snapshot {
    base_version: u64,
    databases: Databases,
    /// Set once a write inside the transaction changes its copy.
    dirty: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    transaction: Option<Snapshot>,
}

#[derive(Debug, Default)]
struct State {
    databases: Databases,
    /// Bumped by every write that changes the shared data.
    version: u64,
    sessions: HashMap<SessionId, SessionState>,
}

/// A [`DocumentStore`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    next_session: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the data visible to `session`.
    ///
    /// `f` returns its value along with whether it changed the data.
    fn with_data<T>(
        &self,
        session: Option<SessionId>,
        f: impl FnOnce(&mut Databases) -> MongoResult<(T, bool)>,
    ) -> MongoResult<T> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(id) = session {
            let session = state
                .sessions
                .get_mut(&id)
                .ok_or_else(|| MongoError::operation(format!("{} has ended", id)))?;
            if let Some(snapshot) = session.transaction.as_mut() {
                let (value, changed) = f(&mut snapshot.databases)?;
                snapshot.dirty |= changed;
                return Ok(value);
            }
        }

        let (value, changed) = f(&mut state.databases)?;
        if changed {
            state.version += 1;
        }
        Ok(value)
    }

    /// Run `f` on one collection visible to `session`.
    ///
    /// A missing collection is only created when `f` reports a change.
    fn with_collection<T>(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        f: impl FnOnce(&mut CollectionData) -> MongoResult<(T, bool)>,
    ) -> MongoResult<T> {
        self.with_data(session, |databases| {
            let database = namespace.database.as_str();
            let name = namespace.collection.as_str();
            let existing = databases.get_mut(database).and_then(|db| db.remove(name));
            let existed = existing.is_some();
            let mut collection = existing.unwrap_or_default();
            let result = f(&mut collection);
            if existed || matches!(result, Ok((_, true))) {
                databases
                    .entry(database.to_string())
                    .or_default()
                    .insert(name.to_string(), collection);
            }
            result
        })
    }

    fn read<T>(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        f: impl FnOnce(Option<&CollectionData>, Option<&BTreeMap<String, CollectionData>>) -> MongoResult<T>,
    ) -> MongoResult<T> {
        self.with_data(session, |databases| {
            let database = databases.get(namespace.database.as_str());
            let collection = database.and_then(|db| db.get(namespace.collection.as_str()));
            f(collection, database).map(|value| (value, false))
        })
    }

    fn transaction_of<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&mut State, &mut Option<Snapshot>) -> MongoResult<T>,
    ) -> MongoResult<T> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut transaction = match state.sessions.get_mut(&session) {
            Some(entry) => entry.transaction.take(),
            None => return Err(MongoError::operation(format!("{} has ended", session))),
        };
        let result = f(state, &mut transaction);
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.transaction = transaction;
        }
        result
    }
}

/// A cursor over documents already materialized by the store.
#[derive(Debug)]
pub struct VecCursor {
    documents: std::vec::IntoIter<Document>,
    current: Option<Document>,
}

impl VecCursor {
    /// Stream the given documents in order.
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into_iter(),
            current: None,
        }
    }
}

#[async_trait]
impl CursorSource for VecCursor {
    async fn advance(&mut self) -> MongoResult<bool> {
        self.current = self.documents.next();
        Ok(self.current.is_some())
    }

    fn current(&self) -> MongoResult<Document> {
        self.current
            .clone()
            .ok_or_else(|| MongoError::usage("cursor is not positioned on a document"))
    }

    async fn close(&mut self) -> MongoResult<()> {
        self.documents = Vec::new().into_iter();
        self.current = None;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> MongoResult<()> {
        Ok(())
    }

    async fn start_session(&self) -> MongoResult<SessionId> {
        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
        self.state.lock().sessions.insert(id, SessionState::default());
        debug!(session = %id, "started in-memory session");
        Ok(id)
    }

    async fn start_transaction(&self, session: SessionId) -> MongoResult<()> {
        self.transaction_of(session, |state, transaction| {
            if transaction.is_some() {
                return Err(MongoError::operation(format!(
                    "transaction already in progress on {}",
                    session
                )));
            }
            *transaction = Some(Snapshot {
                base_version: state.version,
                databases: state.databases.clone(),
                dirty: false,
            });
            Ok(())
        })
    }

    async fn commit_transaction(&self, session: SessionId) -> MongoResult<()> {
        self.transaction_of(session, |state, transaction| {
            let snapshot = transaction
                .take()
                .ok_or_else(|| MongoError::operation(format!("no transaction started on {}", session)))?;
            if !snapshot.dirty {
                return Ok(());
            }
            if snapshot.base_version != state.version {
                return Err(MongoError::operation(format!(
                    "write conflict committing transaction on {}: data changed since it started",
                    session
                )));
            }
            state.databases = snapshot.databases;
            state.version += 1;
            Ok(())
        })
    }

    async fn abort_transaction(&self, session: SessionId) -> MongoResult<()> {
        self.transaction_of(session, |_, transaction| {
            transaction
                .take()
                .map(|_| ())
                .ok_or_else(|| MongoError::operation(format!("no transaction started on {}", session)))
        })
    }

    async fn end_session(&self, session: SessionId) -> MongoResult<()> {
        match self.state.lock().sessions.remove(&session) {
            Some(_) => {
                debug!(session = %session, "ended in-memory session");
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
        let documents = self.read(session, namespace, |collection, _| match collection {
            Some(collection) => Ok(collection
                .matching(&filter)?
                .into_iter()
                .map(|i| collection.documents[i].clone())
                .collect()),
            None => Ok(Vec::new()),
        })?;
        Ok(Box::new(VecCursor::new(documents)))
    }

    async fn find_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<Option<Document>> {
        self.read(session, namespace, |collection, _| match collection {
            Some(collection) => Ok(collection
                .matching(&filter)?
                .first()
                .map(|&i| collection.documents[i].clone())),
            None => Ok(None),
        })
    }

    async fn aggregate(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        pipeline: Vec<Document>,
    ) -> MongoResult<Box<dyn CursorSource>> {
        let documents = self.read(session, namespace, |collection, database| {
            let source = collection.map(|c| c.documents.clone()).unwrap_or_default();
            let text = collection.and_then(CollectionData::text_fields);
            let foreign = |name: &str| {
                database
                    .and_then(|db| db.get(name))
                    .map(|c| c.documents.clone())
                    .unwrap_or_default()
            };
            let ctx = StageContext {
                text_fields: text.as_deref(),
                foreign: &foreign,
            };
            aggregate::run(source, &pipeline, &ctx)
        })?;
        Ok(Box::new(VecCursor::new(documents)))
    }

    async fn insert_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        document: Document,
    ) -> MongoResult<Bson> {
        self.with_collection(session, namespace, |collection| {
            Ok((collection.insert(namespace, document)?, true))
        })
    }

    async fn replace_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> MongoResult<UpdateOutcome> {
        if update::is_update_document(&replacement) {
            return Err(MongoError::operation(
                "replacement document must not contain update operators",
            ));
        }
        self.with_collection(session, namespace, |collection| {
            let outcome = collection.update(namespace, &filter, &replacement, upsert, false)?;
            let changed = outcome.changed();
            Ok((outcome, changed))
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
        require_operators(&update)?;
        self.with_collection(session, namespace, |collection| {
            let outcome = collection.update(namespace, &filter, &update, upsert, false)?;
            let changed = outcome.changed();
            Ok((outcome, changed))
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
        require_operators(&update)?;
        self.with_collection(session, namespace, |collection| {
            let outcome = collection.update(namespace, &filter, &update, upsert, true)?;
            let changed = outcome.changed();
            Ok((outcome, changed))
        })
    }

    async fn delete_one(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<u64> {
        self.with_collection(session, namespace, |collection| {
            let deleted = collection.delete(&filter, false)?;
            Ok((deleted, deleted > 0))
        })
    }

    async fn delete_many(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        filter: Document,
    ) -> MongoResult<u64> {
        self.with_collection(session, namespace, |collection| {
            let deleted = collection.delete(&filter, true)?;
            Ok((deleted, deleted > 0))
        })
    }

    async fn bulk_write(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
        intents: Vec<WriteIntent>,
        ordered: bool,
    ) -> MongoResult<BulkWriteResult> {
        let (result, failures) = self.with_collection(session, namespace, |collection| {
            let mut result = BulkWriteResult::default();
            let mut failures = Vec::new();
            for (index, intent) in intents.into_iter().enumerate() {
                if let Err(err) = apply_intent(collection, namespace, index, intent, &mut result) {
                    failures.push(WriteFailure {
                        index,
                        code: err.code,
                        message: err.message,
                    });
                    if ordered {
                        break;
                    }
                }
            }
            let changed = result.inserted_count
                + result.modified_count
                + result.upserted_count
                + result.deleted_count
                > 0;
            Ok(((result, failures), changed))
        })?;

        if failures.is_empty() {
            Ok(result)
        } else {
            Err(MongoError::BulkWrite(BulkWriteFailure { result, failures }))
        }
    }

    async fn create_index(&self, namespace: &Namespace, keys: Document) -> MongoResult<String> {
        if keys.is_empty() {
            return Err(MongoError::operation("index key pattern must not be empty"));
        }
        let name = index_name(&keys);
        let is_text = keys.values().any(|kind| kind.as_str() == Some("text"));
        self.with_collection(None, namespace, |collection| {
            if let Some(existing) = collection.indexes.iter().find(|i| i.name == name) {
                if existing.keys != keys {
                    return Err(MongoError::operation(format!(
                        "an index named '{}' already exists with different keys",
                        name
                    )));
                }
                return Ok((name, false));
            }
            if is_text && collection.text_fields().is_some() {
                return Err(MongoError::operation(format!(
                    "{} already has a text index",
                    namespace
                )));
            }
            collection.indexes.push(IndexSpec {
                name: name.clone(),
                keys,
            });
            Ok((name, true))
        })
    }

    async fn drop_collection(
        &self,
        session: Option<SessionId>,
        namespace: &Namespace,
    ) -> MongoResult<()> {
        self.with_data(session, |databases| {
            let removed = databases
                .get_mut(namespace.database.as_str())
                .and_then(|database| database.remove(namespace.collection.as_str()));
            Ok(((), removed.is_some()))
        })
    }

    async fn drop_database(&self, session: Option<SessionId>, database: &str) -> MongoResult<()> {
        self.with_data(session, |databases| Ok(((), databases.remove(database).is_some())))
    }
}

fn require_operators(update: &Document) -> MongoResult<()> {
    if update::is_update_document(update) {
        Ok(())
    } else {
        Err(MongoError::operation("update document requires atomic operators"))
    }
}

fn apply_intent(
    collection: &mut CollectionData,
    namespace: &Namespace,
    index: usize,
    intent: WriteIntent,
    result: &mut BulkWriteResult,
) -> Result<(), WriteError> {
    let outcome = match intent {
        WriteIntent::Insert { document } => {
            collection.insert(namespace, document)?;
            result.inserted_count += 1;
            return Ok(());
        }
        WriteIntent::DeleteById { id } => {
            result.deleted_count += collection.delete(&doc! { "_id": id }, false)?;
            return Ok(());
        }
        WriteIntent::DeleteMany { filter } => {
            result.deleted_count += collection.delete(&filter, true)?;
            return Ok(());
        }
        WriteIntent::ReplaceById {
            id,
            replacement,
            upsert,
        } => {
            if update::is_update_document(&replacement) {
                return Err(WriteError::new(
                    "replacement document must not contain update operators",
                ));
            }
            collection.update(namespace, &doc! { "_id": id }, &replacement, upsert, false)?
        }
        WriteIntent::UpdateById { id, update, upsert } => {
            require_operators(&update)?;
            collection.update(namespace, &doc! { "_id": id }, &update, upsert, false)?
        }
        WriteIntent::UpdateMany {
            filter,
            update,
            upsert,
        } => {
            require_operators(&update)?;
            collection.update(namespace, &filter, &update, upsert, true)?
        }
    };

    result.matched_count += outcome.matched_count;
    result.modified_count += outcome.modified_count;
    if let Some(id) = outcome.upserted_id {
        result.upserted_count += 1;
        result.upserted_ids.insert(index, id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ns() -> Namespace {
        Namespace::new("app", "users")
    }

    async fn collect(mut cursor: Box<dyn CursorSource>) -> Vec<Document> {
        let mut out = Vec::new();
        while cursor.advance().await.unwrap() {
            out.push(cursor.current().unwrap());
        }
        cursor.close().await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let id = store.insert_one(None, &ns(), doc! { "name": "ann" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let err = store
            .insert_one(None, &ns(), doc! { "_id": id.clone(), "name": "again" })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("E11000"));

        let found = store.find_one(None, &ns(), doc! { "_id": id }).await.unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), "ann");
    }

    #[tokio::test]
    async fn test_update_and_upsert() {
        let store = MemoryStore::new();
        store.insert_one(None, &ns(), doc! { "_id": 1, "n": 1 }).await.unwrap();

        let outcome = store
            .update_one(None, &ns(), doc! { "_id": 1 }, doc! { "$inc": { "n": 2 } }, false)
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 1);
        assert_eq!(outcome.modified_count, 1);

        let outcome = store
            .update_one(
                None,
                &ns(),
                doc! { "email": "x@y.z" },
                doc! { "$set": { "n": 9 }, "$setOnInsert": { "fresh": true } },
                true,
            )
            .await
            .unwrap();
        assert!(outcome.upserted_id.is_some());
        let upserted = store
            .find_one(None, &ns(), doc! { "email": "x@y.z" })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(upserted.get_i32("n").unwrap(), 9);
        assert!(upserted.get_bool("fresh").unwrap());

        assert!(
            store
                .update_one(None, &ns(), doc! {}, doc! { "n": 1 }, false)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_replace_keeps_id() {
        let store = MemoryStore::new();
        let oid = ObjectId::new();
        let outcome = store
            .replace_one(None, &ns(), doc! { "_id": oid }, doc! { "v": 1 }, true)
            .await
            .unwrap();
        assert_eq!(outcome.upserted_id, Some(Bson::ObjectId(oid)));

        store
            .replace_one(None, &ns(), doc! { "_id": oid }, doc! { "v": 2 }, true)
            .await
            .unwrap();
        let docs = collect(store.find(None, &ns(), doc! {}).await.unwrap()).await;
        assert_eq!(docs, vec![doc! { "_id": oid, "v": 2 }]);
    }

    #[tokio::test]
    async fn test_delete_many_twice() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store.insert_one(None, &ns(), doc! { "n": n }).await.unwrap();
        }
        let filter = doc! { "n": { "$gte": 1 } };
        assert_eq!(store.delete_many(None, &ns(), filter.clone()).await.unwrap(), 2);
        assert_eq!(store.delete_many(None, &ns(), filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_isolation_and_abort() {
        let store = MemoryStore::new();
        let session = store.start_session().await.unwrap();
        store.start_transaction(session).await.unwrap();
        store
            .insert_one(Some(session), &ns(), doc! { "_id": 1 })
            .await
            .unwrap();

        assert!(store.find_one(None, &ns(), doc! { "_id": 1 }).await.unwrap().is_none());
        assert!(
            store
                .find_one(Some(session), &ns(), doc! { "_id": 1 })
                .await
                .unwrap()
                .is_some()
        );

        store.abort_transaction(session).await.unwrap();
        store.end_session(session).await.unwrap();
        assert!(store.find_one(None, &ns(), doc! { "_id": 1 }).await.unwrap().is_none());
        assert!(store.find_one(Some(session), &ns(), doc! {}).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_detects_conflicting_write() {
        let store = MemoryStore::new();
        let session = store.start_session().await.unwrap();
        store.start_transaction(session).await.unwrap();
        store
            .insert_one(Some(session), &ns(), doc! { "_id": 1 })
            .await
            .unwrap();
        store.insert_one(None, &ns(), doc! { "_id": 2 }).await.unwrap();

        let err = store.commit_transaction(session).await.unwrap_err();
        assert!(err.to_string().contains("write conflict"));
        assert!(store.find_one(None, &ns(), doc! { "_id": 1 }).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_noop_writes_do_not_conflict() {
        let store = MemoryStore::new();
        store.insert_one(None, &ns(), doc! { "_id": 1, "a": 1 }).await.unwrap();

        let session = store.start_session().await.unwrap();
        store.start_transaction(session).await.unwrap();
        store
            .insert_one(Some(session), &ns(), doc! { "_id": 5 })
            .await
            .unwrap();

        let other = Namespace::new("app", "missing");
        assert_eq!(store.delete_many(None, &other, doc! {}).await.unwrap(), 0);
        assert_eq!(store.delete_many(None, &ns(), doc! { "a": 99 }).await.unwrap(), 0);
        let outcome = store
            .update_many(None, &ns(), doc! { "_id": 1 }, doc! { "$set": { "a": 1 } }, false)
            .await
            .unwrap();
        assert_eq!((outcome.matched_count, outcome.modified_count), (1, 0));
        assert!(store.insert_one(None, &ns(), doc! { "_id": 1 }).await.is_err());
        assert!(
            store
                .update_one(None, &other, doc! { "_id": 1 }, doc! { "$set": { "a": 1 } }, false)
                .await
                .is_ok()
        );

        store.commit_transaction(session).await.unwrap();
        assert!(store.find_one(None, &ns(), doc! { "_id": 5 }).await.unwrap().is_some());
        assert!(!store.state.lock().databases["app"].contains_key("missing"));
    }

    #[tokio::test]
    async fn test_read_only_transaction_commits_after_outside_write() {
        let store = MemoryStore::new();
        let session = store.start_session().await.unwrap();
        store.start_transaction(session).await.unwrap();
        store.find_one(Some(session), &ns(), doc! {}).await.unwrap();
        store.insert_one(None, &ns(), doc! { "_id": 1 }).await.unwrap();

        store.commit_transaction(session).await.unwrap();
        assert!(store.find_one(None, &ns(), doc! { "_id": 1 }).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_update_many_writes_nothing() {
        let store = MemoryStore::new();
        store.insert_one(None, &ns(), doc! { "_id": 1, "a": 1 }).await.unwrap();
        store.insert_one(None, &ns(), doc! { "_id": 2, "a": "x" }).await.unwrap();

        let result = store
            .update_many(None, &ns(), doc! {}, doc! { "$inc": { "a": 1 } }, false)
            .await;
        assert!(result.is_err());
        let first = store.find_one(None, &ns(), doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(first.get_i32("a").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bulk_write_ordered_stops() {
        let store = MemoryStore::new();
        let intents = vec![
            WriteIntent::Insert { document: doc! { "_id": 1 } },
            WriteIntent::Insert { document: doc! { "_id": 1 } },
            WriteIntent::Insert { document: doc! { "_id": 2 } },
        ];
        let err = store.bulk_write(None, &ns(), intents.clone(), true).await.unwrap_err();
        let failure = err.bulk_failure().unwrap();
        assert_eq!(failure.result.inserted_count, 1);
        assert_eq!(failure.failures[0].index, 1);
        assert_eq!(failure.failures[0].code, Some(DUPLICATE_KEY));

        store.drop_collection(None, &ns()).await.unwrap();
        let err = store.bulk_write(None, &ns(), intents, false).await.unwrap_err();
        assert_eq!(err.bulk_failure().unwrap().result.inserted_count, 2);
    }

    #[tokio::test]
    async fn test_text_search_needs_index() {
        let store = MemoryStore::new();
        store
            .insert_one(None, &ns(), doc! { "bio": "Rust and coffee" })
            .await
            .unwrap();
        let filter = doc! { "$text": { "$search": "coffee" } };
        assert!(store.find(None, &ns(), filter.clone()).await.is_err());

        let name = store.create_index(&ns(), doc! { "bio": "text" }).await.unwrap();
        assert_eq!(name, "bio_text");
        let docs = collect(store.find(None, &ns(), filter).await.unwrap()).await;
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_lookup_across_collections() {
        let store = MemoryStore::new();
        let orders = Namespace::new("app", "orders");
        store.insert_one(None, &ns(), doc! { "_id": "u1" }).await.unwrap();
        store
            .insert_one(None, &orders, doc! { "_id": 1, "user": "u1" })
            .await
            .unwrap();
        let cursor = store
            .aggregate(
                None,
                &ns(),
                vec![doc! { "$lookup": { "from": "orders", "localField": "_id", "foreignField": "user", "as": "orders" } }],
            )
            .await
            .unwrap();
        let docs = collect(cursor).await;
        assert_eq!(
            docs,
            vec![doc! { "_id": "u1", "orders": [ { "_id": 1, "user": "u1" } ] }]
        );
    }
}
