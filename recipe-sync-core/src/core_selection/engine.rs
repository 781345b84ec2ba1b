/*
   SyncEngine / SyncHandle

   The reconciliation actor owns SelectionState and is the only thing that
   mutates it. Everything else talks to it through a cloneable SyncHandle,
   which packages a SyncCommand, pushes it onto the actor's queue and awaits
   the reply on a oneshot.

   Startup:
     1. subscribe to the push channel
     2. read_all() the store; events that arrive meanwhile are buffered
     3. apply the seed, then replay the buffered events

   Main loop: wait for a command or a push event, drain whatever else is
   already queued (up to max_batch) and run one reconciliation pass over it.

   Store I/O never blocks the loop:
     - upserts are queued to a sequential worker task (fire-and-forget)
     - outcomes leave as SyncReports via try_send

    ┌──────────────┐  SyncCommand   ┌──────────────────┐  SelectionRecord  ┌───────────────┐
    │  SyncHandle  │───────────────►│   SyncEngine     │──────────────────►│ upsert worker │
    │  (clone me)  │◄───────────────│ (SelectionState) │                   └──────┬────────┘
    └──────▲───────┘   oneshot      └────────▲─────────┘                          │ upsert()
           │                                 │ ChangeEvent                        ▼
           │ SyncReport                      └────────────────────────── SelectionStore
           └───────────────────────────────────────────────────────────────(reports)
*/

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::errors::{MalformedEventError, SyncError, SyncResult};
use super::reconcile::{apply_seed, reconcile_pass, Input, InputOutcome, LocalIntent};
use super::state::{SelectionSnapshot, SelectionState};
use crate::config::SyncConfig;
use crate::core_catalog::{Catalog, ItemId, SubItemRef};
use crate::core_export::ExportSnapshot;
use crate::core_store::{ChangeEvent, ChangeOp, ChangeSubscription, SelectionRecord, SelectionStore, StoreError};
use crate::metrics::{
    record_counter, record_histogram, Timer, EVENTS_APPLIED, EVENTS_BUFFERED, EVENTS_DISCARDED,
    EVENTS_SUPERSEDED, PASS_SIZE, SEED_DURATION, UPSERTS_FAILED, UPSERTS_ISSUED,
};

/// Outcomes of store-boundary work, delivered through [`SyncHandle::next_report`]
#[derive(Debug, Clone)]
pub enum SyncReport {
    /// Startup read applied
    Seeded { records: usize },
    /// Startup read failed; the session continues with an empty selection
    SeedFailed(SyncError),
    /// Push channel is live
    Subscribed,
    /// Push channel could not be opened or was lost
    SubscriptionFailed(SyncError),
    UpsertAcknowledged { item: ItemId },
    /// The optimistic local value is kept
    UpsertFailed { item: ItemId, error: SyncError },
    EventApplied { item: ItemId, op: ChangeOp },
    EventDiscarded(MalformedEventError),
    /// A local intent for the same item won within one pass
    EventSuperseded { item: ItemId },
}

/// Commands sent to the engine
#[derive(Debug)]
enum SyncCommand {
    Intent {
        intent: LocalIntent,
        reply: oneshot::Sender<SyncResult<SelectionRecord>>,
    },
    Open {
        item: ItemId,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Close {
        reply: oneshot::Sender<SyncResult<Option<SelectionRecord>>>,
    },
    Snapshot {
        reply: oneshot::Sender<SelectionSnapshot>,
    },
    Export {
        reply: oneshot::Sender<ExportSnapshot>,
    },
    Resubscribe {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to interact with the sync engine
///
/// Clones share one report stream: each report is delivered to exactly one
/// reader. Read reports from a single task; a reader parked in
/// `next_report`/`wait_for_report` holds the stream until it returns.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    report_rx: Arc<Mutex<mpsc::Receiver<SyncReport>>>,
}

impl SyncHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SyncCommand,
    ) -> SyncResult<T> {
        let (reply, response_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        response_rx.await.map_err(|_| SyncError::EngineStopped)
    }

    async fn intent(&self, intent: LocalIntent) -> SyncResult<SelectionRecord> {
        self.request(|reply| SyncCommand::Intent { intent, reply })
            .await?
    }

    /// Check an item and select all of its sub-items.
    ///
    /// Returns the record queued for upsert; the upsert outcome arrives as a
    /// report.
    pub async fn check_item(&self, item: impl Into<ItemId>) -> SyncResult<SelectionRecord> {
        self.set_item_checked(item, true).await
    }

    /// Uncheck an item and drop its sub-items from the selection
    pub async fn uncheck_item(&self, item: impl Into<ItemId>) -> SyncResult<SelectionRecord> {
        self.set_item_checked(item, false).await
    }

    pub async fn set_item_checked(
        &self,
        item: impl Into<ItemId>,
        checked: bool,
    ) -> SyncResult<SelectionRecord> {
        self.intent(LocalIntent::SetChecked {
            item: item.into(),
            checked,
        })
        .await
    }

    /// Flip one sub-item of `item`. The item ends up checked either way.
    pub async fn toggle_sub_item(
        &self,
        item: impl Into<ItemId>,
        sub_item: SubItemRef,
    ) -> SyncResult<SelectionRecord> {
        self.intent(LocalIntent::ToggleSubItem {
            item: item.into(),
            sub_item,
        })
        .await
    }

    /// Replace `item`'s share of the selection with `sub_items`
    pub async fn select_sub_items(
        &self,
        item: impl Into<ItemId>,
        sub_items: Vec<SubItemRef>,
    ) -> SyncResult<SelectionRecord> {
        self.intent(LocalIntent::SelectSubItems {
            item: item.into(),
            sub_items,
        })
        .await
    }

    /// Mark `item` as the active (open) item
    pub async fn open_item(&self, item: impl Into<ItemId>) -> SyncResult<()> {
        let item = item.into();
        self.request(|reply| SyncCommand::Open { item, reply }).await?
    }

    /// Close the active item, re-upserting its current record.
    /// `None` when nothing was open.
    pub async fn close_item(&self) -> SyncResult<Option<SelectionRecord>> {
        self.request(|reply| SyncCommand::Close { reply }).await?
    }

    pub async fn snapshot(&self) -> SyncResult<SelectionSnapshot> {
        self.request(|reply| SyncCommand::Snapshot { reply }).await
    }

    /// Project the live selection onto the catalog
    pub async fn export(&self) -> SyncResult<ExportSnapshot> {
        self.request(|reply| SyncCommand::Export { reply }).await
    }

    /// Re-open the push channel. Does not re-seed.
    pub async fn resubscribe(&self) -> SyncResult<()> {
        self.request(|reply| SyncCommand::Resubscribe { reply })
            .await?
    }

    /// Receive the next report; `None` once the engine and its upsert worker
    /// are gone and every report has been read
    pub async fn next_report(&self) -> Option<SyncReport> {
        self.report_rx.lock().await.recv().await
    }

    /// Consume reports until one matches `pred`.
    ///
    /// Non-matching reports are dropped. Other readers on any clone wait until
    /// this returns.
    pub async fn wait_for_report<F>(&self, mut pred: F) -> Option<SyncReport>
    where
        F: FnMut(&SyncReport) -> bool,
    {
        let mut reports = self.report_rx.lock().await;
        while let Some(report) = reports.recv().await {
            if pred(&report) {
                return Some(report);
            }
        }
        None
    }

    /// Unsubscribe and stop the engine. Queued upserts still run.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| SyncCommand::Shutdown { reply }).await
    }
}

/// Where a pass outcome's answer goes
enum Pending {
    Intent(oneshot::Sender<SyncResult<SelectionRecord>>),
    Close(oneshot::Sender<SyncResult<Option<SelectionRecord>>>),
    Event,
}

/// Commands answered after the pass, against the post-pass state
enum Deferred {
    Snapshot(oneshot::Sender<SelectionSnapshot>),
    Export(oneshot::Sender<ExportSnapshot>),
    Resubscribe(oneshot::Sender<SyncResult<()>>),
    Shutdown(oneshot::Sender<()>),
}

enum Queued {
    Command(SyncCommand),
    Event(ChangeEvent),
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The reconciliation actor
pub struct SyncEngine {
    catalog: Arc<Catalog>,
    store: Arc<dyn SelectionStore>,
    max_batch: usize,
    state: SelectionState,
    active_item: Option<ItemId>,
    subscription: Option<ChangeSubscription>,
    command_rx: mpsc::Receiver<SyncCommand>,
    report_tx: mpsc::Sender<SyncReport>,
    upsert_tx: mpsc::UnboundedSender<SelectionRecord>,
    upsert_worker: JoinHandle<()>,
}

fn send_report(report_tx: &mpsc::Sender<SyncReport>, report: SyncReport) {
    if let Err(mpsc::error::TrySendError::Full(report)) = report_tx.try_send(report) {
        debug!(?report, "Report queue full, dropping report");
    }
}

async fn next_event(subscription: &mut Option<ChangeSubscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Issue upserts one at a time, in the order the engine queued them
async fn run_upsert_worker(
    store: Arc<dyn SelectionStore>,
    mut upsert_rx: mpsc::UnboundedReceiver<SelectionRecord>,
    report_tx: mpsc::Sender<SyncReport>,
) {
    while let Some(record) = upsert_rx.recv().await {
        let item = record.item_id.clone();
        match store.upsert(&record).await {
            Ok(_) => {
                debug!(item = %item, "Upsert acknowledged");
                send_report(&report_tx, SyncReport::UpsertAcknowledged { item });
            }
            Err(source) => {
                record_counter(UPSERTS_FAILED, 1);
                let error = SyncError::Upsert {
                    item: item.clone(),
                    source,
                };
                error!(item = %item, error = %error, "Upsert failed, keeping local value");
                send_report(&report_tx, SyncReport::UpsertFailed { item, error });
            }
        }
    }
    debug!("Upsert worker drained");
}

impl SyncEngine {
    /// Spawn the engine and its upsert worker. Must be called inside a tokio
    /// runtime. The engine stops on `shutdown()` or when every handle is
    /// dropped; the join handle resolves once queued upserts have finished.
    pub fn start(
        catalog: Arc<Catalog>,
        store: Arc<dyn SelectionStore>,
        config: &SyncConfig,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (report_tx, report_rx) = mpsc::channel(config.report_buffer.max(1));
        let (upsert_tx, upsert_rx) = mpsc::unbounded_channel();

        let upsert_worker = tokio::spawn(
            run_upsert_worker(store.clone(), upsert_rx, report_tx.clone())
                .instrument(info_span!("upsert_worker")),
        );

        let engine = SyncEngine {
            catalog,
            store,
            max_batch: config.max_batch.max(1),
            state: SelectionState::new(),
            active_item: None,
            subscription: None,
            command_rx,
            report_tx,
            upsert_tx,
            upsert_worker,
        };
        let join = tokio::spawn(engine.run().instrument(info_span!("sync_engine")));

        (
            SyncHandle {
                command_tx,
                report_rx: Arc::new(Mutex::new(report_rx)),
            },
            join,
        )
    }

    fn report(&self, report: SyncReport) {
        send_report(&self.report_tx, report);
    }

    async fn run(mut self) {
        let _ = self.subscribe().await;
        self.seed().await;

        loop {
            let first = tokio::select! {
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => Queued::Command(cmd),
                    None => {
                        info!("All handles dropped, stopping");
                        break;
                    }
                },
                event = next_event(&mut self.subscription) => match event {
                    Some(event) => Queued::Event(event),
                    None => {
                        self.subscription_lost();
                        continue;
                    }
                },
            };

            let batch = self.drain_batch(first);
            if self.run_pass(batch).await == Flow::Stop {
                break;
            }
        }

        let SyncEngine {
            subscription,
            upsert_tx,
            upsert_worker,
            ..
        } = self;
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        drop(upsert_tx);
        if let Err(e) = upsert_worker.await {
            error!(error = %e, "Upsert worker panicked");
        }
        info!("Sync engine stopped");
    }

    async fn subscribe(&mut self) -> SyncResult<()> {
        if let Some(old) = self.subscription.take() {
            old.unsubscribe();
        }

        match self.store.subscribe().await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                info!("Push channel subscribed");
                self.report(SyncReport::Subscribed);
                Ok(())
            }
            Err(source) => {
                let err = SyncError::Subscription(source);
                warn!(error = %err, "Live sync disabled");
                self.report(SyncReport::SubscriptionFailed(err.clone()));
                Err(err)
            }
        }
    }

    fn subscription_lost(&mut self) {
        self.subscription = None;
        let err = SyncError::Subscription(StoreError::Unavailable(
            "push channel closed".to_string(),
        ));
        warn!(error = %err, "Push channel lost, live sync disabled until resubscribed");
        self.report(SyncReport::SubscriptionFailed(err));
    }

    /// Seed from a full read; push events arriving meanwhile are held back
    /// and replayed afterwards so they win over the seed.
    async fn seed(&mut self) {
        let timer = Timer::new(SEED_DURATION);
        let store = self.store.clone();
        let read = store.read_all();
        tokio::pin!(read);

        let mut buffered = Vec::new();
        let result = loop {
            tokio::select! {
                result = &mut read => break result,
                event = next_event(&mut self.subscription) => match event {
                    Some(event) => {
                        record_counter(EVENTS_BUFFERED, 1);
                        buffered.push(Input::Remote(event));
                    }
                    None => self.subscription_lost(),
                },
            }
        };
        timer.stop();

        match result {
            Ok(records) => {
                let outcome = apply_seed(&mut self.state, &self.catalog, &records);
                for item in &outcome.ignored {
                    warn!(item = %item, "Ignoring stored selection for unknown item");
                }
                info!(records = records.len(), applied = outcome.applied, "Selection seeded");
                self.report(SyncReport::Seeded {
                    records: records.len(),
                });
            }
            Err(source) => {
                let err = SyncError::SeedRead(source);
                error!(error = %err, "Starting with an empty selection");
                self.report(SyncReport::SeedFailed(err));
            }
        }

        if !buffered.is_empty() {
            debug!(events = buffered.len(), "Replaying events buffered during seed");
            let outcomes = reconcile_pass(&mut self.state, &self.catalog, &buffered);
            for (input, outcome) in buffered.iter().zip(outcomes) {
                if let Input::Remote(event) = input {
                    self.report_event_outcome(event.op, outcome);
                }
            }
        }
    }

    fn drain_batch(&mut self, first: Queued) -> Vec<Queued> {
        let mut batch = vec![first];

        while batch.len() < self.max_batch {
            match self.command_rx.try_recv() {
                Ok(cmd) => batch.push(Queued::Command(cmd)),
                Err(_) => break,
            }
        }
        if let Some(subscription) = self.subscription.as_mut() {
            while batch.len() < self.max_batch {
                match subscription.try_recv() {
                    Some(event) => batch.push(Queued::Event(event)),
                    None => break,
                }
            }
        }

        batch
    }

    async fn run_pass(&mut self, batch: Vec<Queued>) -> Flow {
        let span = info_span!("reconcile_pass", inputs = batch.len());
        let deferred = span.in_scope(|| self.apply_batch(batch));

        let mut flow = Flow::Continue;
        for command in deferred {
            match command {
                Deferred::Snapshot(reply) => {
                    let _ = reply.send(self.state.snapshot());
                }
                Deferred::Export(reply) => {
                    let snapshot = ExportSnapshot::from_snapshot(&self.catalog, &self.state.snapshot());
                    let _ = reply.send(snapshot);
                }
                Deferred::Resubscribe(reply) => {
                    let result = self.subscribe().instrument(span.clone()).await;
                    let _ = reply.send(result);
                }
                Deferred::Shutdown(reply) => {
                    info!("Shutdown requested");
                    if let Some(subscription) = self.subscription.take() {
                        subscription.unsubscribe();
                    }
                    let _ = reply.send(());
                    flow = Flow::Stop;
                }
            }
        }
        flow
    }

    /// One reconciliation pass: local intents and push events go through
    /// `reconcile_pass`; reads and lifecycle commands are deferred.
    fn apply_batch(&mut self, batch: Vec<Queued>) -> Vec<Deferred> {
        let mut inputs = Vec::with_capacity(batch.len());
        let mut pending = Vec::with_capacity(batch.len());
        let mut deferred = Vec::new();

        for queued in batch {
            match queued {
                Queued::Event(event) => {
                    inputs.push(Input::Remote(event));
                    pending.push(Pending::Event);
                }
                Queued::Command(SyncCommand::Intent { intent, reply }) => {
                    inputs.push(Input::Local(intent));
                    pending.push(Pending::Intent(reply));
                }
                Queued::Command(SyncCommand::Open { item, reply }) => {
                    let result = if self.catalog.contains(item.as_str()) {
                        debug!(item = %item, "Item opened");
                        self.active_item = Some(item);
                        Ok(())
                    } else {
                        Err(SyncError::UnknownItem(item))
                    };
                    let _ = reply.send(result);
                }
                Queued::Command(SyncCommand::Close { reply }) => match self.active_item.take() {
                    Some(item) => {
                        debug!(item = %item, "Item closed, flushing");
                        inputs.push(Input::Local(LocalIntent::Flush { item }));
                        pending.push(Pending::Close(reply));
                    }
                    None => {
                        let _ = reply.send(Ok(None));
                    }
                },
                Queued::Command(SyncCommand::Snapshot { reply }) => {
                    deferred.push(Deferred::Snapshot(reply))
                }
                Queued::Command(SyncCommand::Export { reply }) => {
                    deferred.push(Deferred::Export(reply))
                }
                Queued::Command(SyncCommand::Resubscribe { reply }) => {
                    deferred.push(Deferred::Resubscribe(reply))
                }
                Queued::Command(SyncCommand::Shutdown { reply }) => {
                    deferred.push(Deferred::Shutdown(reply))
                }
            }
        }

        record_histogram(PASS_SIZE, inputs.len() as f64);
        let outcomes = reconcile_pass(&mut self.state, &self.catalog, &inputs);

        for ((input, slot), outcome) in inputs.iter().zip(pending).zip(outcomes) {
            match (slot, outcome) {
                (Pending::Intent(reply), InputOutcome::Upsert(record)) => {
                    self.queue_upsert(record.clone());
                    let _ = reply.send(Ok(record));
                }
                (Pending::Close(reply), InputOutcome::Upsert(record)) => {
                    self.queue_upsert(record.clone());
                    let _ = reply.send(Ok(Some(record)));
                }
                (Pending::Intent(reply), InputOutcome::Rejected(err)) => {
                    warn!(error = %err, "Local intent rejected");
                    let _ = reply.send(Err(err));
                }
                (Pending::Close(reply), InputOutcome::Rejected(err)) => {
                    let _ = reply.send(Err(err));
                }
                (_, outcome) => {
                    if let Input::Remote(event) = input {
                        self.report_event_outcome(event.op, outcome);
                    }
                }
            }
        }

        deferred
    }

    fn queue_upsert(&self, record: SelectionRecord) {
        record_counter(UPSERTS_ISSUED, 1);
        debug!(item = %record.item_id, checked = record.is_checked, "Queueing upsert");
        if self.upsert_tx.send(record).is_err() {
            error!("Upsert worker is gone, dropping upsert");
        }
    }

    fn report_event_outcome(&self, op: ChangeOp, outcome: InputOutcome) {
        match outcome {
            InputOutcome::Applied(item) => {
                record_counter(EVENTS_APPLIED, 1);
                debug!(item = %item, op = %op, "Push event applied");
                self.report(SyncReport::EventApplied { item, op });
            }
            InputOutcome::Discarded(err) => {
                record_counter(EVENTS_DISCARDED, 1);
                warn!(op = %op, error = %err, "Discarding push event");
                self.report(SyncReport::EventDiscarded(err));
            }
            InputOutcome::Superseded(item) => {
                record_counter(EVENTS_SUPERSEDED, 1);
                debug!(item = %item, op = %op, "Push event superseded by local intent");
                self.report(SyncReport::EventSuperseded { item });
            }
            InputOutcome::Upsert(_) | InputOutcome::Rejected(_) => {}
        }
    }
}
