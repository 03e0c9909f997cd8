use std::future::Future;
use std::sync::Arc;

use tess_engine::{
    EngineError, FetchRequest, MemoryStore, NativeFilter, PersistentStore, StoreOptions,
};
use tess_predicate::Predicate;
use tess_stream::Subscription;
use tess_types::{Changeset, RecordId, Snapshot};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};

type Reply<T> = oneshot::Sender<GateResult<T>>;

/// Requests understood by the gate worker.
enum Command {
    Initialize {
        name: String,
        in_memory: bool,
        reply: Reply<()>,
    },
    Attach {
        store: Arc<dyn PersistentStore>,
        reply: Reply<()>,
    },
    Fetch {
        entity: String,
        predicate: Predicate,
        limit: Option<usize>,
        reply: Reply<Vec<Snapshot>>,
    },
    Insert {
        entity: String,
        changeset: Changeset,
        reply: Reply<Snapshot>,
    },
    Update {
        id: RecordId,
        changeset: Changeset,
        reply: Reply<Snapshot>,
    },
    Delete {
        id: RecordId,
        reply: Reply<()>,
    },
    Handle {
        reply: Reply<Arc<dyn PersistentStore>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// AccessGate
// ---------------------------------------------------------------------------

/// The single path to a store.
///
/// Every CRUD operation is sent to one worker task that owns the store
/// handle and runs requests one at a time, each on a fresh short-lived
/// mutation context. Callers on any task may hold clones of the gate;
/// concurrent requests queue rather than fail.
#[derive(Clone)]
pub struct AccessGate {
    sender: mpsc::Sender<Command>,
}

impl AccessGate {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(config: GateConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.command_buffer.max(1));
        let worker = GateWorker {
            config,
            store: None,
            receiver,
        };
        tokio::spawn(worker.run());
        Self { sender }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> GateResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| GateError::Shutdown)?;
        response.await.map_err(|_| GateError::Shutdown)?
    }

    /// Open the store `name` from the configured model.
    ///
    /// A no-op once a store is in place; parameters of later calls are not
    /// examined.
    pub async fn initialize(&self, name: &str, in_memory: bool) -> GateResult<()> {
        self.request(|reply| Command::Initialize {
            name: name.to_string(),
            in_memory,
            reply,
        })
        .await
    }

    /// Use an already open store. Same idempotency as [`initialize`](Self::initialize).
    pub async fn initialize_with_handle(&self, store: Arc<dyn PersistentStore>) -> GateResult<()> {
        self.request(|reply| Command::Attach { store, reply }).await
    }

    /// Snapshots of every `entity` record matching `predicate`
    /// (all records when `None`), in engine order.
    pub async fn fetch(
        &self,
        entity: &str,
        predicate: Option<Predicate>,
    ) -> GateResult<Vec<Snapshot>> {
        self.request(|reply| Command::Fetch {
            entity: entity.to_string(),
            predicate: predicate.unwrap_or_else(Predicate::all),
            limit: None,
            reply,
        })
        .await
    }

    /// The first record matching `predicate`, if any.
    pub async fn exists(&self, entity: &str, predicate: Predicate) -> GateResult<Option<Snapshot>> {
        let matches = self
            .request(|reply| Command::Fetch {
                entity: entity.to_string(),
                predicate,
                limit: Some(1),
                reply,
            })
            .await?;
        Ok(matches.into_iter().next())
    }

    /// Create an `entity` record from `changeset`; returns the stored state,
    /// engine defaults and generated values included.
    pub async fn insert(&self, entity: &str, changeset: Changeset) -> GateResult<Snapshot> {
        self.request(|reply| Command::Insert {
            entity: entity.to_string(),
            changeset,
            reply,
        })
        .await
    }

    /// Merge `changeset` into the record `id`.
    pub async fn update(&self, id: &RecordId, changeset: Changeset) -> GateResult<Snapshot> {
        self.request(|reply| Command::Update {
            id: id.clone(),
            changeset,
            reply,
        })
        .await
    }

    /// Remove the record `id` and save.
    pub async fn delete(&self, id: &RecordId) -> GateResult<()> {
        self.request(|reply| Command::Delete {
            id: id.clone(),
            reply,
        })
        .await
    }

    /// The store handle the gate owns.
    pub async fn store(&self) -> GateResult<Arc<dyn PersistentStore>> {
        self.request(|reply| Command::Handle { reply }).await
    }

    /// A new change subscription on the gate's store.
    pub async fn observe_changes(&self) -> GateResult<Subscription> {
        Ok(Subscription::observe(self.store().await?))
    }

    /// Stop the worker once it has drained the requests queued before this
    /// one. Later calls fail with [`GateError::Shutdown`].
    pub async fn shutdown(&self) -> GateResult<()> {
        let (reply, done) = oneshot::channel();
        self.sender
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| GateError::Shutdown)?;
        done.await.map_err(|_| GateError::Shutdown)
    }

    /// True once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GateWorker
// ---------------------------------------------------------------------------

struct GateWorker {
    config: GateConfig,
    store: Option<Arc<dyn PersistentStore>>,
    receiver: mpsc::Receiver<Command>,
}

/// Run synchronous engine work on the blocking pool and wait for it.
async fn blocking<T, F>(op: F) -> GateResult<T>
where
    F: FnOnce() -> GateResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(GateError::Shutdown),
    }
}

impl GateWorker {
    async fn run(mut self) {
        debug!("gate worker started");
        // Each command is awaited to completion before the next is taken,
        // so engine work stays one operation at a time.
        while let Some(command) = self.receiver.recv().await {
            // A dropped reply means the caller gave up; the work still stands.
            match command {
                Command::Initialize {
                    name,
                    in_memory,
                    reply,
                } => {
                    let _ = reply.send(self.initialize(name, in_memory).await);
                }
                Command::Attach { store, reply } => {
                    let _ = reply.send(self.attach(store));
                }
                Command::Fetch {
                    entity,
                    predicate,
                    limit,
                    reply,
                } => {
                    let result = self
                        .with_store(move |store| fetch(store, &entity, &predicate, limit))
                        .await;
                    let _ = reply.send(result);
                }
                Command::Insert {
                    entity,
                    changeset,
                    reply,
                } => {
                    let result = self
                        .with_store(move |store| insert(store, &entity, &changeset))
                        .await;
                    let _ = reply.send(result);
                }
                Command::Update {
                    id,
                    changeset,
                    reply,
                } => {
                    let result = self
                        .with_store(move |store| update(store, &id, &changeset))
                        .await;
                    let _ = reply.send(result);
                }
                Command::Delete { id, reply } => {
                    let result = self.with_store(move |store| delete(store, &id)).await;
                    let _ = reply.send(result);
                }
                Command::Handle { reply } => {
                    let _ = reply.send(self.store());
                }
                Command::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("gate worker stopped");
    }

    fn store(&self) -> GateResult<Arc<dyn PersistentStore>> {
        self.store.clone().ok_or(GateError::ContainerNotFound)
    }

    /// Run `op` against the store off the async worker thread.
    fn with_store<T, F>(&self, op: F) -> impl Future<Output = GateResult<T>>
    where
        F: FnOnce(&dyn PersistentStore) -> GateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store();
        async move {
            let store = store?;
            blocking(move || op(&*store)).await
        }
    }

    async fn initialize(&mut self, name: String, in_memory: bool) -> GateResult<()> {
        if let Some(store) = &self.store {
            debug!(store = store.name(), "already initialized");
            return Ok(());
        }
        let options = StoreOptions {
            in_memory,
            directory: Some(self.config.directory.clone()),
            automatic_migration: self.config.automatic_migration,
        };
        let model = self.config.model.clone();
        let store = blocking(move || {
            MemoryStore::open(&name, model, options).map_err(GateError::from)
        })
        .await?;
        info!(store = store.name(), in_memory, "gate initialized");
        self.store = Some(Arc::new(store));
        Ok(())
    }

    fn attach(&mut self, store: Arc<dyn PersistentStore>) -> GateResult<()> {
        if let Some(current) = &self.store {
            debug!(store = current.name(), "already initialized");
            return Ok(());
        }
        info!(store = store.name(), "gate attached to store");
        self.store = Some(store);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine operations (run on the blocking pool)
// ---------------------------------------------------------------------------

fn fetch(
    store: &dyn PersistentStore,
    entity: &str,
    predicate: &Predicate,
    limit: Option<usize>,
) -> GateResult<Vec<Snapshot>> {
    let filter = NativeFilter::compile(predicate)
        .map_err(|e| GateError::FetchError(EngineError::Filter(e)))?;
    let request = FetchRequest {
        entity: entity.to_string(),
        filter,
        limit,
    };
    let context = store.new_context();
    let records = context.fetch(&request).map_err(GateError::FetchError)?;
    debug!(entity, matches = records.len(), "fetched");
    Ok(records.iter().map(Snapshot::capture).collect())
}

fn insert(store: &dyn PersistentStore, entity: &str, changeset: &Changeset) -> GateResult<Snapshot> {
    if store.entity(entity).is_none() {
        return Err(GateError::EntityNotFound(entity.to_string()));
    }
    let mut context = store.new_context();
    let record = context.insert(entity)?;
    changeset.apply(record)?;
    let id = record.id().clone();
    if context.has_changes() {
        context.save()?;
    }
    debug!(entity, record = %id, "inserted");
    Ok(Snapshot::capture(&*context.record(&id)?))
}

fn update(store: &dyn PersistentStore, id: &RecordId, changeset: &Changeset) -> GateResult<Snapshot> {
    let mut context = store.new_context();
    changeset.apply(context.record(id)?)?;
    if context.has_changes() {
        context.save()?;
    }
    debug!(record = %id, "updated");
    Ok(Snapshot::capture(&*context.record(id)?))
}

fn delete(store: &dyn PersistentStore, id: &RecordId) -> GateResult<()> {
    let mut context = store.new_context();
    context.delete(id)?;
    if context.has_changes() {
        context.save()?;
    }
    debug!(record = %id, "deleted");
    Ok(())
}
