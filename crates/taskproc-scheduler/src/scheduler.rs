//! Execution framework - matches offers to pending tasks and tracks them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use taskproc_core::{
    FrameworkId, FrameworkInfo, Offer, OfferId, SlaveId, StatusUpdate, TaskConfig, TaskEvent,
    TaskId, TaskInfo,
};

use crate::blacklist::SlaveBlacklist;
use crate::config::{SchedulerConfig, StopPolicy};
use crate::constraint::{PlacementConstraint, PoolConstraint};
use crate::driver::{Filters, MasterInfo, Operation, SchedulerDriver};
use crate::error::{DriverError, MatchError, SchedulerError};
use crate::metrics;
use crate::matcher::{Packing, ResourceMatcher};
use crate::queue::PendingQueue;
use crate::reconcile::ReconciliationGate;
use crate::registry::{Outcome, TaskRecord, TaskRegistry};
use crate::staging::StagingSupervisor;

/// Maps a manager status update onto the outward event.
pub type Translator = Arc<dyn Fn(&StatusUpdate) -> TaskEvent + Send + Sync>;

/// Observer invoked for every event of one task.
pub type StatusCallback = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// What one `resource_offers` call did with its offers.
#[derive(Debug, Clone, Default)]
pub struct OfferReport {
    /// Tasks launched, in launch order.
    pub launched: Vec<TaskId>,
    /// Offers handed back to the manager.
    pub declined: Vec<OfferId>,
    /// Tasks a dry run would have launched.
    pub would_launch: Vec<TaskInfo>,
}

/// Builder for [`ExecutionFramework`].
pub struct FrameworkBuilder {
    config: SchedulerConfig,
    driver: Arc<dyn SchedulerDriver>,
    constraint: Option<Arc<dyn PlacementConstraint>>,
    translator: Translator,
}

impl FrameworkBuilder {
    /// Replace the default pool constraint.
    pub fn constraint(mut self, constraint: Arc<dyn PlacementConstraint>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Replace the default status-to-event translation.
    pub fn translator(mut self, translator: Translator) -> Self {
        self.translator = translator;
        self
    }

    /// Build the framework and the receiving end of its event feed.
    pub fn build(self) -> (Arc<ExecutionFramework>, mpsc::Receiver<TaskEvent>) {
        let config = self.config;
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));

        let constraint = self
            .constraint
            .unwrap_or_else(|| Arc::new(PoolConstraint::new(config.pool.clone())));
        let registry = Arc::new(TaskRegistry::new(config.reap_terminal_tasks));
        let blacklist = SlaveBlacklist::new(config.blacklist_timeout);
        let staging = StagingSupervisor::new(
            config.staging_timeout,
            registry.clone(),
            blacklist.clone(),
            self.driver.clone(),
        );

        let framework = ExecutionFramework {
            queue: PendingQueue::new(config.queue_capacity),
            matcher: ResourceMatcher::new(constraint),
            gate: ReconciliationGate::new(config.reconcile_backoff),
            framework_info: config.framework_info(),
            config,
            driver: self.driver,
            translator: self.translator,
            events: events_tx,
            registry,
            blacklist,
            staging,
            offer_lock: Mutex::new(()),
            frozen: AtomicBool::new(false),
            framework_id: RwLock::new(None),
            observers: RwLock::new(HashMap::new()),
            launched_total: AtomicUsize::new(0),
        };

        (Arc::new(framework), events_rx)
    }
}

/// The scheduler registered with the cluster manager.
///
/// Every driver callback may arrive concurrently. Shared state is split
/// behind separate locks; when more than one is taken the order is
/// offer lock, then pending queue, then registry. The blacklist lock is
/// never nested with any of them.
pub struct ExecutionFramework {
    config: SchedulerConfig,
    framework_info: FrameworkInfo,
    driver: Arc<dyn SchedulerDriver>,
    translator: Translator,
    events: mpsc::Sender<TaskEvent>,

    queue: PendingQueue,
    matcher: ResourceMatcher,
    registry: Arc<TaskRegistry>,
    blacklist: SlaveBlacklist,
    staging: StagingSupervisor,
    gate: ReconciliationGate,

    /// Serializes offer batches, held across the accept/decline calls.
    offer_lock: Mutex<()>,
    frozen: AtomicBool,
    framework_id: RwLock<Option<FrameworkId>>,
    observers: RwLock<HashMap<TaskId, Vec<StatusCallback>>>,
    launched_total: AtomicUsize,
}

impl ExecutionFramework {
    /// Start building a framework that talks to the manager through `driver`.
    pub fn builder(config: SchedulerConfig, driver: Arc<dyn SchedulerDriver>) -> FrameworkBuilder {
        FrameworkBuilder {
            config,
            driver,
            constraint: None,
            translator: Arc::new(|update: &StatusUpdate| TaskEvent::from(update)),
        }
    }

    /// Build a framework with the default constraint and translation.
    pub fn new(
        config: SchedulerConfig,
        driver: Arc<dyn SchedulerDriver>,
    ) -> (Arc<Self>, mpsc::Receiver<TaskEvent>) {
        Self::builder(config, driver).build()
    }

    // ------------------------------------------------------------------
    // Driver callbacks
    // ------------------------------------------------------------------

    /// The framework registered with the manager.
    pub async fn registered(
        &self,
        framework_id: FrameworkId,
        master: &MasterInfo,
    ) -> Result<(), SchedulerError> {
        info!(
            framework_id = %framework_id,
            master = %master.hostname,
            "Registered with framework ID"
        );
        *self.framework_id.write().await = Some(framework_id);
        self.start_reconciliation().await
    }

    /// The framework re-registered after losing its connection.
    pub async fn reregistered(&self, master: &MasterInfo) -> Result<(), SchedulerError> {
        info!(master = %master.hostname, "Re-registered with master");
        self.start_reconciliation().await
    }

    /// The driver lost its connection to the manager.
    pub fn disconnected(&self) {
        warn!("Disconnected from master; waiting for re-registration");
    }

    async fn start_reconciliation(&self) -> Result<(), SchedulerError> {
        self.gate.start().await;
        self.driver.reconcile_tasks(&[]).await?;
        Ok(())
    }

    /// The manager offers resources.
    pub async fn resource_offers(&self, offers: Vec<Offer>) -> Result<OfferReport, SchedulerError> {
        let mut report = OfferReport::default();
        if self.is_frozen() {
            debug!(count = offers.len(), "Frozen, ignoring offers");
            return Ok(report);
        }

        if !self.gate.is_open().await {
            info!(
                count = offers.len(),
                "Declining all offers since we started reconciliation too recently"
            );
            for offer in &offers {
                self.decline(offer, None, &mut report).await?;
            }
            return Ok(report);
        }

        let mut usable = Vec::with_capacity(offers.len());
        for offer in offers {
            if self.blacklist.is_blacklisted(&offer.slave_id).await {
                warn!(
                    offer_id = %offer.id,
                    slave_id = %offer.slave_id,
                    "Ignoring offer from blacklisted slave"
                );
                self.decline(&offer, None, &mut report).await?;
            } else {
                usable.push(offer);
            }
        }

        for offer in &usable {
            self.launch_tasks_for_offer(offer, &mut report).await?;
        }
        Ok(report)
    }

    /// Fit pending tasks into one offer and launch them, or decline it.
    async fn launch_tasks_for_offer(
        &self,
        offer: &Offer,
        report: &mut OfferReport,
    ) -> Result<(), SchedulerError> {
        let _offer_guard = self.offer_lock.lock().await;
        debug!(
            offer_id = %offer.id,
            cpus = offer.resources.cpus,
            mem = offer.resources.mem,
            disk = offer.resources.disk,
            ports = offer.resources.port_count(),
            "Received offer"
        );

        if self.config.dry_run {
            let packing = {
                let pending = self.queue.lock().await;
                self.matcher.match_offer(offer, pending.iter())
            };
            match packing {
                Ok(packing) => {
                    for task in &packing.tasks {
                        info!(
                            task_id = %task.task_id,
                            slave_id = %task.slave_id,
                            "Would have launched"
                        );
                    }
                    report.would_launch.extend(packing.tasks);
                }
                Err(e) => info!(error = %e, "Would have declined offer"),
            }
            self.decline(offer, None, report).await?;
            self.driver.stop().await?;
            return Ok(());
        }

        if self.need_to_stop().await {
            self.decline(offer, None, report).await?;
            return Ok(());
        }

        let packing = {
            let mut pending = self.queue.lock().await;
            let packing = self.matcher.match_offer(offer, pending.iter());
            if let Ok(Packing { consumed, .. }) = &packing {
                pending.drain(..*consumed);
            }
            packing
        };

        match packing {
            Err(MatchError::ConstraintFailAllTasks { .. }) => {
                let refuse_seconds = self.config.decline_refuse_seconds;
                warn!(
                    offer_id = %offer.id,
                    refuse_seconds,
                    "Offer failed constraints for every task, rejecting"
                );
                self.decline(offer, Some(Filters { refuse_seconds }), report)
                    .await?;
            }
            Ok(packing) if packing.tasks.is_empty() => {
                debug!(offer_id = %offer.id, "No pending task fits offer");
                self.decline(offer, None, report).await?;
            }
            Ok(packing) => {
                for task in &packing.tasks {
                    self.staging.arm(&task.task_id, offer).await;
                }
                self.launched_total
                    .fetch_add(packing.tasks.len(), Ordering::SeqCst);

                let task_ids: Vec<_> = packing.tasks.iter().map(|t| t.task_id.clone()).collect();
                info!(
                    offer_id = %offer.id,
                    slave_id = %offer.slave_id,
                    count = task_ids.len(),
                    "Launching tasks"
                );

                let operation = Operation::Launch {
                    task_infos: packing.tasks,
                };
                self.driver
                    .accept_offers(std::slice::from_ref(&offer.id), vec![operation])
                    .await?;
                report.launched.extend(task_ids);
            }
        }
        Ok(())
    }

    async fn decline(
        &self,
        offer: &Offer,
        filters: Option<Filters>,
        report: &mut OfferReport,
    ) -> Result<(), SchedulerError> {
        self.driver.decline_offer(&offer.id, filters).await?;
        report.declined.push(offer.id.clone());
        Ok(())
    }

    /// The manager reports a task changed state.
    pub async fn status_update(&self, update: StatusUpdate) -> Result<(), SchedulerError> {
        let event = (self.translator)(&update);
        self.notify_observers(&event).await;
        if self.events.send(event).await.is_err() {
            debug!(task_id = %update.task_id, "Event receiver dropped");
        }

        if self.is_frozen() {
            return Ok(());
        }

        let previous = self.registry.apply_status(&update).await;
        debug!(
            task_id = %update.task_id,
            state = %update.state,
            previous = ?previous,
            "Task status updated"
        );

        self.driver.acknowledge_status_update(&update).await?;

        if self.need_to_stop().await {
            info!("All work finished, stopping driver");
            self.driver.stop().await?;
        }
        Ok(())
    }

    /// A host was lost. The affected tasks get their own status updates.
    pub fn slave_lost(&self, slave_id: &SlaveId) {
        error!(slave_id = %slave_id, "Slave lost");
    }

    /// The driver hit an unrecoverable error. Returned for the owner to
    /// tear the framework down.
    pub fn error(&self, message: &str) -> SchedulerError {
        error!(reason = message, "Driver error");
        DriverError::Rejected(message.to_string()).into()
    }

    /// Freeze the framework and kill every live task.
    ///
    /// Callbacks already in flight are not waited for. Every kill is
    /// attempted; the first driver failure is returned.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        info!("Freezing the scheduler. Further status updates and resource offers are ignored.");
        self.frozen.store(true, Ordering::SeqCst);

        info!("Killing any remaining live tasks.");
        let mut first_error = None;
        for task_id in self.registry.live_task_ids().await {
            if let Err(e) = self.kill_task(&task_id).await {
                error!(task_id = %task_id, error = %e, "Failed to kill task during shutdown");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------
    // Producer and consumer surface
    // ------------------------------------------------------------------

    /// Queue a task for the next offers. Fails when the queue is full or
    /// the framework is shut down.
    pub async fn enqueue(&self, task: TaskConfig) -> Result<(), SchedulerError> {
        if self.is_frozen() {
            return Err(SchedulerError::Frozen);
        }
        task.validate()?;
        debug!(name = %task.name, "Enqueueing task");
        self.queue.push(task).await
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait_for(&self, task_id: &TaskId) -> Outcome {
        // The sender only disappears with the registry itself.
        self.registry
            .wait(task_id)
            .await
            .await
            .unwrap_or(Outcome::Failure)
    }

    /// Call `callback` with every event of `task_id`, up to and including
    /// its terminal one.
    pub async fn on_status<F>(&self, task_id: &TaskId, callback: F)
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.observers
            .write()
            .await
            .entry(task_id.clone())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Call `callback` once if `task_id` finishes successfully.
    pub async fn on_success<F>(&self, task_id: &TaskId, callback: F)
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.on_status(task_id, move |event| {
            if event.success == Some(true) {
                callback(event);
            }
        })
        .await;
    }

    /// Call `callback` once if `task_id` ends in any other terminal state.
    pub async fn on_failure<F>(&self, task_id: &TaskId, callback: F)
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.on_status(task_id, move |event| {
            if event.success == Some(false) {
                callback(event);
            }
        })
        .await;
    }

    async fn notify_observers(&self, event: &TaskEvent) {
        let callbacks = if event.terminal {
            self.observers.write().await.remove(&event.task_id)
        } else {
            self.observers.read().await.get(&event.task_id).cloned()
        };
        for callback in callbacks.unwrap_or_default() {
            callback(event);
        }
    }

    /// Ask the manager to kill a task and mark it as killing.
    pub async fn kill_task(&self, task_id: &TaskId) -> Result<(), SchedulerError> {
        self.driver.kill_task(task_id).await?;
        self.registry.mark_killing(task_id).await;
        Ok(())
    }

    /// Drop a task's record on the next garbage collection.
    pub async fn reap(&self, task_id: &TaskId) -> bool {
        self.registry.mark_for_removal(task_id).await
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    async fn need_to_stop(&self) -> bool {
        match self.config.stop_policy {
            StopPolicy::Never => false,
            StopPolicy::WhenDrained => {
                self.launched_total.load(Ordering::SeqCst) > 0
                    && self.queue.is_empty().await
                    && self.registry.is_settled().await
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub async fn framework_id(&self) -> Option<FrameworkId> {
        self.framework_id.read().await.clone()
    }

    pub fn framework_info(&self) -> &FrameworkInfo {
        &self.framework_info
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn pending_len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn task(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.registry.get(task_id).await
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn blacklist(&self) -> &SlaveBlacklist {
        &self.blacklist
    }

    /// Current state in Prometheus text format.
    pub async fn metrics(&self) -> String {
        metrics::collect_metrics(self).await
    }

    /// Total number of tasks launched since construction.
    pub fn launched_total(&self) -> usize {
        self.launched_total.load(Ordering::SeqCst)
    }
}
