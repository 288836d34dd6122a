//! Per-stage observable lifecycles.
//!
//! Every pipeline stage drives a `FullTask`: a one-shot start signal plus
//! a one-shot end signal that resolves ok or with the stage's error. The
//! pipeline as a whole drives an `EndTask`, where only completion matters.
//!
//! These are one-shot broadcasts, not replay channels: any number of
//! observers may attach before the event fires and all of them resolve
//! with the same payload, but an observer attached after the event already
//! fired never resolves. Observers cannot fire the signals themselves, so
//! they cannot alter pipeline control flow.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{EsflowError, Result, model::Node};

struct Waiters<T> {
    senders: Vec<oneshot::Sender<T>>,
    fired: bool,
}

impl<T> Waiters<T> {
    fn new() -> Self {
        Self {
            senders: Vec::new(),
            fired: false,
        }
    }
}

/// End-only lifecycle: a single completion signal carrying the outcome.
pub struct EndTask<T> {
    end: Mutex<Waiters<Result<T>>>,
}

impl<T: Clone + Send + 'static> EndTask<T> {
    pub fn new() -> Self {
        Self {
            end: Mutex::new(Waiters::new()),
        }
    }

    /// A single-fire future resolving with the outcome. Never resolves if
    /// the lifecycle already ended.
    pub fn on_end(&self) -> BoxFuture<'static, Result<T>> {
        let (tx, rx) = oneshot::channel();
        self.end.lock().unwrap().senders.push(tx);
        Box::pin(async move {
            match rx.await {
                Ok(res) => res,
                Err(_) => std::future::pending().await,
            }
        })
    }

    pub(crate) fn end_ok(
        &self,
        value: T,
    ) {
        self.fire(Ok(value));
    }

    pub(crate) fn end_err(
        &self,
        err: EsflowError,
    ) {
        self.fire(Err(err));
    }

    fn fire(
        &self,
        outcome: Result<T>,
    ) {
        let senders = {
            let mut end = self.end.lock().unwrap();
            if end.fired {
                return;
            }
            end.fired = true;
            std::mem::take(&mut end.senders)
        };
        for tx in senders {
            let _ = tx.send(outcome.clone());
        }
    }
}

impl<T: Clone + Send + 'static> Default for EndTask<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Full lifecycle: a start signal in addition to the end signal.
pub struct FullTask<T> {
    start: Mutex<Waiters<()>>,
    end: EndTask<T>,
}

impl<T: Clone + Send + 'static> FullTask<T> {
    pub fn new() -> Self {
        Self {
            start: Mutex::new(Waiters::new()),
            end: EndTask::new(),
        }
    }

    /// A single-fire future resolving when the stage starts. Never
    /// resolves if the stage already started.
    pub fn on_start(&self) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.start.lock().unwrap().senders.push(tx);
        Box::pin(async move {
            match rx.await {
                Ok(()) => {}
                Err(_) => std::future::pending().await,
            }
        })
    }

    /// See [`EndTask::on_end`].
    pub fn on_end(&self) -> BoxFuture<'static, Result<T>> {
        self.end.on_end()
    }

    /// Broadcast the start signal, then yield so every start observer
    /// registered so far gets scheduled before the stage's own work
    /// proceeds. Starting is a synchronization point, not fire-and-forget:
    /// an observer's logging runs before any "already started" state is
    /// visible.
    pub(crate) async fn started(&self) {
        let senders = {
            let mut start = self.start.lock().unwrap();
            if start.fired {
                return;
            }
            start.fired = true;
            std::mem::take(&mut start.senders)
        };
        for tx in senders {
            let _ = tx.send(());
        }
        tokio::task::yield_now().await;
    }

    pub(crate) fn end_ok(
        &self,
        value: T,
    ) {
        self.end.end_ok(value);
    }

    pub(crate) fn end_err(
        &self,
        err: EsflowError,
    ) {
        self.end.end_err(err);
    }

    /// Drive one stage: notify start, run the work, notify the outcome.
    /// The stage's error is returned so the pipeline can short-circuit.
    pub(crate) async fn run<F>(
        &self,
        work: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.started().await;
        match work.await {
            Ok(value) => {
                self.end_ok(value.clone());
                Ok(value)
            }
            Err(err) => {
                self.end_err(err.clone());
                Err(err)
            }
        }
    }
}

impl<T: Clone + Send + 'static> Default for FullTask<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle bundle handed out by the create pipeline.
#[derive(Clone)]
pub struct CreateTasks {
    pub node_create: Arc<FullTask<Node>>,
    pub elastic_ready: Arc<FullTask<()>>,
    pub kibana_ready: Arc<FullTask<()>>,
    pub sm_upload: Arc<FullTask<Vec<Value>>>,
    pub scripts_upload: Arc<FullTask<Vec<Value>>>,
    pub kso_upload: Arc<FullTask<Vec<Value>>>,
    pub main: Arc<EndTask<Node>>,
}

impl CreateTasks {
    pub(crate) fn new() -> Self {
        Self {
            node_create: Arc::new(FullTask::new()),
            elastic_ready: Arc::new(FullTask::new()),
            kibana_ready: Arc::new(FullTask::new()),
            sm_upload: Arc::new(FullTask::new()),
            scripts_upload: Arc::new(FullTask::new()),
            kso_upload: Arc::new(FullTask::new()),
            main: Arc::new(EndTask::new()),
        }
    }
}

/// Lifecycle bundle handed out by the update pipeline.
#[derive(Clone)]
pub struct UpdateTasks {
    pub node_update: Arc<FullTask<Node>>,
    pub elastic_ready: Arc<FullTask<()>>,
    pub kibana_ready: Arc<FullTask<()>>,
    pub scripts_upload: Arc<FullTask<Vec<Value>>>,
    pub sm_upload: Arc<FullTask<Vec<Value>>>,
    pub main: Arc<EndTask<Node>>,
}

impl UpdateTasks {
    pub(crate) fn new() -> Self {
        Self {
            node_update: Arc::new(FullTask::new()),
            elastic_ready: Arc::new(FullTask::new()),
            kibana_ready: Arc::new(FullTask::new()),
            scripts_upload: Arc::new(FullTask::new()),
            sm_upload: Arc::new(FullTask::new()),
            main: Arc::new(EndTask::new()),
        }
    }
}
