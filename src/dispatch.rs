//! Request Dispatcher
//!
//! Single loop that fans requests out to executors:
//!
//! ```text
//!   append ──► [append channel] ─┐
//!   search ──► [search channel] ─┼──► select! ──► write thread (one per append)
//!   cancel ──► [cancel channel] ─┘            └─► worker pool (searches)
//! ```
//!
//! Each request carries its own reply channel. After `cancel()` the loop
//! stops taking requests; `join()` then waits for everything it already
//! dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;

use crate::ctx::{AppendCtx, GetSnapshotCtx};
use crate::engine::Db;
use crate::error::{Result, TierError};
use crate::scheduler::Scheduler;
use crate::snapshot::Snapshot;

/// Scan run against a snapshot on a worker thread
pub type ScanFn = Box<dyn FnOnce(&Snapshot) -> Result<()> + Send + 'static>;

/// Receives the outcome of one request
pub type Reply = Receiver<Result<()>>;

struct AppendRequest {
    ctx: AppendCtx,
    reply: Sender<Result<()>>,
}

struct SearchRequest {
    ctx: GetSnapshotCtx,
    scan: ScanFn,
    reply: Sender<Result<()>>,
}

pub struct Dispatcher {
    append_tx: Sender<AppendRequest>,
    search_tx: Sender<SearchRequest>,
    cancel_tx: Sender<()>,
    cancelled: AtomicBool,
    handle: Mutex<Option<JoinHandle<WaitGroup>>>,
}

impl Dispatcher {
    /// Start the loop. `capacity` bounds each request channel.
    pub fn start(db: Arc<Db>, capacity: usize) -> Result<Self> {
        let (append_tx, append_rx) = channel::bounded(capacity.max(1));
        let (search_tx, search_rx) = channel::bounded(capacity.max(1));
        let (cancel_tx, cancel_rx) = channel::bounded(1);

        let handle = thread::Builder::new()
            .name("tierdb-dispatch".to_string())
            .spawn(move || run(db, append_rx, search_rx, cancel_rx))?;

        Ok(Self {
            append_tx,
            search_tx,
            cancel_tx,
            cancelled: AtomicBool::new(false),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue an append. The reply arrives once the rows are visible.
    pub fn append(&self, ctx: AppendCtx) -> Result<Reply> {
        self.check_running()?;
        let (reply, rx) = channel::bounded(1);
        self.append_tx
            .send(AppendRequest { ctx, reply })
            .map_err(|_| cancelled())?;
        Ok(rx)
    }

    /// Queue a search: take a snapshot per `ctx` and run `scan` over it
    pub fn search(&self, ctx: GetSnapshotCtx, scan: ScanFn) -> Result<Reply> {
        self.check_running()?;
        let (reply, rx) = channel::bounded(1);
        self.search_tx
            .send(SearchRequest { ctx, scan, reply })
            .map_err(|_| cancelled())?;
        Ok(rx)
    }

    /// Stop accepting requests. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            let _ = self.cancel_tx.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancel, then wait for the loop and every request it dispatched
    pub fn join(&self) -> Result<()> {
        self.cancel();
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        let inflight = handle
            .join()
            .map_err(|_| TierError::Storage("dispatch loop panicked".to_string()))?;
        inflight.wait();
        Ok(())
    }

    fn check_running(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(cancelled());
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn cancelled() -> TierError {
    TierError::Cancelled("dispatcher is cancelled".to_string())
}

fn run(
    db: Arc<Db>,
    append_rx: Receiver<AppendRequest>,
    search_rx: Receiver<SearchRequest>,
    cancel_rx: Receiver<()>,
) -> WaitGroup {
    let inflight = WaitGroup::new();
    loop {
        select! {
            recv(cancel_rx) -> _ => break,
            recv(append_rx) -> msg => match msg {
                Ok(req) => spawn_write(&db, req, inflight.clone()),
                Err(_) => break,
            },
            recv(search_rx) -> msg => match msg {
                Ok(req) => submit_search(&db, req, inflight.clone()),
                Err(_) => break,
            },
        }
    }
    tracing::debug!("Dispatch loop stopped");
    inflight
}

fn spawn_write(db: &Arc<Db>, req: AppendRequest, inflight: WaitGroup) {
    let AppendRequest { ctx, reply } = req;
    let db = Arc::clone(db);
    let reply_on_failure = reply.clone();
    let spawned = thread::Builder::new()
        .name("tierdb-write".to_string())
        .spawn(move || {
            let result = db
                .relation(&ctx.table_name)
                .and_then(|relation| relation.write(ctx))
                .map(|_| ());
            let _ = reply.send(result);
            drop(inflight);
        });
    if let Err(e) = spawned {
        let _ = reply_on_failure.send(Err(e.into()));
    }
}

fn submit_search(db: &Arc<Db>, req: SearchRequest, inflight: WaitGroup) {
    let SearchRequest { ctx, scan, reply } = req;
    let task_db = Arc::clone(db);
    let task_reply = reply.clone();
    let submitted = db.workers().submit(Box::new(move || {
        let result = task_db.get_snapshot(ctx).and_then(|snapshot| {
            let scanned = scan(&snapshot);
            snapshot.close();
            scanned
        });
        let _ = task_reply.send(result);
        drop(inflight);
        Ok(())
    }));
    if let Err(e) = submitted {
        let _ = reply.send(Err(e));
    }
}
