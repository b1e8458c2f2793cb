//! In-process cluster that drives the framework without a real manager.
//!
//! [`SimulatedDriver`] turns every framework call into a [`DriverCommand`];
//! [`SimulatedCluster`] replays them against a fixed set of hosts, offers
//! whatever is free on a timer, and reports task progress back through
//! `status_update`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use taskproc_core::{
    FrameworkId, Offer, OfferId, PortRange, Resources, SlaveId, StatusUpdate, TaskId, TaskInfo,
    TaskState,
};
use taskproc_scheduler::{
    DriverError, ExecutionFramework, Filters, MasterInfo, Operation, SchedulerDriver,
    SchedulerError,
};

/// Command a task runs to exit with `TASK_FAILED` in the simulation.
pub const FAILING_COMMAND: &str = "false";

/// A framework call, replayed by the cluster loop.
#[derive(Debug)]
pub enum DriverCommand {
    Accept {
        offer_ids: Vec<OfferId>,
        operations: Vec<Operation>,
    },
    Decline {
        offer_id: OfferId,
        filters: Option<Filters>,
    },
    Kill(TaskId),
    Stop,
}

/// Driver half of the simulation. Calls fail with `NotRunning` once the
/// cluster loop has exited.
pub struct SimulatedDriver {
    commands: mpsc::UnboundedSender<DriverCommand>,
}

impl SimulatedDriver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DriverCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }

    fn send(&self, command: DriverCommand) -> Result<(), DriverError> {
        self.commands
            .send(command)
            .map_err(|_| DriverError::NotRunning)
    }
}

#[async_trait]
impl SchedulerDriver for SimulatedDriver {
    async fn accept_offers(
        &self,
        offer_ids: &[OfferId],
        operations: Vec<Operation>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::Accept {
            offer_ids: offer_ids.to_vec(),
            operations,
        })
    }

    async fn decline_offer(
        &self,
        offer_id: &OfferId,
        filters: Option<Filters>,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::Decline {
            offer_id: offer_id.clone(),
            filters,
        })
    }

    async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError> {
        self.send(DriverCommand::Kill(task_id.clone()))
    }

    async fn acknowledge_status_update(&self, update: &StatusUpdate) -> Result<(), DriverError> {
        debug!(task_id = %update.task_id, state = %update.state, "Acknowledged");
        Ok(())
    }

    async fn reconcile_tasks(&self, task_ids: &[TaskId]) -> Result<(), DriverError> {
        // A fresh cluster has nothing to report back.
        debug!(count = task_ids.len(), "Reconciliation requested");
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        self.send(DriverCommand::Stop)
    }
}

/// Shape and pacing of the simulated cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub hosts: usize,
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub ports: PortRange,
    /// The first `stuck_hosts` hosts accept launches but never start them.
    pub stuck_hosts: usize,
    pub offer_interval: Duration,
    pub startup_delay: Duration,
    pub task_duration: Duration,
    pub max_runtime: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: 3,
            cpus: 4.0,
            mem: 8192.0,
            disk: 10240.0,
            ports: PortRange::new(31000, 31099),
            stuck_hosts: 0,
            offer_interval: Duration::from_millis(200),
            startup_delay: Duration::from_millis(100),
            task_duration: Duration::from_secs(1),
            max_runtime: Duration::from_secs(600),
        }
    }
}

/// How the cluster loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The framework stopped the driver.
    Stopped,
    /// `max_runtime` passed first; the framework was shut down.
    TimedOut,
}

struct Host {
    slave_id: SlaveId,
    hostname: String,
    cpus: f64,
    mem: f64,
    disk: f64,
    ports: BTreeSet<u16>,
    stuck: bool,
    offered: bool,
    refused_until: Option<Instant>,
}

impl Host {
    fn new(index: usize, config: &ClusterConfig) -> Self {
        Self {
            slave_id: SlaveId::new(format!("sim-slave-{index}")),
            hostname: format!("sim-host-{index}"),
            cpus: config.cpus,
            mem: config.mem,
            disk: config.disk,
            ports: Resources::new(0.0, 0.0, 0.0)
                .with_ports(config.ports)
                .port_set(),
            stuck: index < config.stuck_hosts,
            offered: false,
            refused_until: None,
        }
    }

    fn available(&self, now: Instant) -> bool {
        !self.offered && self.refused_until.map_or(true, |until| now >= until)
    }

    fn offer(&self, id: OfferId) -> Offer {
        let mut resources = Resources::new(self.cpus, self.mem, self.disk);
        resources.ports = port_ranges(&self.ports);
        Offer::new(id, self.slave_id.clone(), self.hostname.clone(), resources)
    }

    fn reserve(&mut self, task: &TaskInfo) {
        self.cpus -= task.resources.cpus;
        self.mem -= task.resources.mem;
        self.disk -= task.resources.disk;
        for port in &task.host_ports {
            self.ports.remove(port);
        }
    }

    fn release(&mut self, task: &TaskInfo) {
        self.cpus += task.resources.cpus;
        self.mem += task.resources.mem;
        self.disk += task.resources.disk;
        self.ports.extend(task.host_ports.iter().copied());
    }
}

/// Collapse a port set into contiguous inclusive ranges.
fn port_ranges(ports: &BTreeSet<u16>) -> Vec<PortRange> {
    let mut ranges: Vec<PortRange> = Vec::new();
    for &port in ports {
        match ranges.last_mut() {
            Some(range) if range.end.checked_add(1) == Some(port) => range.end = port,
            _ => ranges.push(PortRange::new(port, port)),
        }
    }
    ranges
}

/// Cluster half of the simulation.
pub struct SimulatedCluster {
    config: ClusterConfig,
    framework: Arc<ExecutionFramework>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    hosts: Vec<Host>,
    /// Outstanding offers, by host index.
    outstanding: HashMap<OfferId, usize>,
    /// Launched tasks that have not ended, with their host index.
    running: HashMap<TaskId, (usize, TaskInfo)>,
    progress_tx: mpsc::UnboundedSender<(TaskId, TaskState)>,
    progress_rx: mpsc::UnboundedReceiver<(TaskId, TaskState)>,
    next_offer: u64,
}

impl SimulatedCluster {
    pub fn new(
        config: ClusterConfig,
        framework: Arc<ExecutionFramework>,
        commands: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Self {
        let hosts = (0..config.hosts).map(|i| Host::new(i, &config)).collect();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            config,
            framework,
            commands,
            hosts,
            outstanding: HashMap::new(),
            running: HashMap::new(),
            progress_tx,
            progress_rx,
            next_offer: 0,
        }
    }

    /// Register the framework and run until it stops the driver.
    pub async fn run(mut self) -> Result<RunEnd, SchedulerError> {
        let master = MasterInfo {
            id: "sim-master".to_string(),
            hostname: "localhost".to_string(),
            port: 5050,
        };
        self.framework
            .registered(FrameworkId::new("sim-framework"), &master)
            .await?;

        let mut offer_tick = tokio::time::interval(self.config.offer_interval);
        let deadline = tokio::time::sleep(self.config.max_runtime);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                Some(command) = self.commands.recv() => {
                    if self.handle_command(command).await? {
                        info!("Driver stopped");
                        return Ok(RunEnd::Stopped);
                    }
                }

                Some((task_id, state)) = self.progress_rx.recv() => {
                    self.report_progress(task_id, state).await?;
                }

                _ = offer_tick.tick() => {
                    self.send_offers().await?;
                }

                _ = &mut deadline => {
                    warn!(
                        max_runtime_secs = self.config.max_runtime.as_secs(),
                        "Simulation ran out of time, shutting down"
                    );
                    self.framework.shutdown().await?;
                    return Ok(RunEnd::TimedOut);
                }
            }
        }
    }

    /// Apply one driver command. Returns true once the driver is stopped.
    async fn handle_command(&mut self, command: DriverCommand) -> Result<bool, SchedulerError> {
        match command {
            DriverCommand::Accept {
                offer_ids,
                operations,
            } => {
                for offer_id in &offer_ids {
                    if let Some(host) = self.outstanding.remove(offer_id) {
                        self.hosts[host].offered = false;
                    }
                }
                for Operation::Launch { task_infos } in operations {
                    for task in task_infos {
                        self.launch(task);
                    }
                }
            }
            DriverCommand::Decline { offer_id, filters } => {
                if let Some(host) = self.outstanding.remove(&offer_id) {
                    let host = &mut self.hosts[host];
                    host.offered = false;
                    host.refused_until = filters.map(|f| {
                        Instant::now() + Duration::from_secs_f64(f.refuse_seconds.max(0.0))
                    });
                }
            }
            DriverCommand::Kill(task_id) => {
                if let Some((host, task)) = self.running.remove(&task_id) {
                    self.hosts[host].release(&task);
                    let slave_id = task.slave_id.clone();
                    self.framework
                        .status_update(
                            StatusUpdate::new(task_id, TaskState::Killed).with_slave(slave_id),
                        )
                        .await?;
                }
            }
            DriverCommand::Stop => return Ok(true),
        }
        Ok(false)
    }

    fn launch(&mut self, task: TaskInfo) {
        let Some(host) = self.hosts.iter().position(|h| h.slave_id == task.slave_id) else {
            warn!(task_id = %task.task_id, slave_id = %task.slave_id, "Launch on unknown host");
            return;
        };
        self.hosts[host].reserve(&task);
        debug!(task_id = %task.task_id, host = %self.hosts[host].hostname, "Simulating task");

        if !self.hosts[host].stuck {
            let progress = self.progress_tx.clone();
            let task_id = task.task_id.clone();
            let startup = self.config.startup_delay;
            let duration = self.config.task_duration;
            let outcome = if task.command == FAILING_COMMAND {
                TaskState::Failed
            } else {
                TaskState::Finished
            };
            tokio::spawn(async move {
                tokio::time::sleep(startup).await;
                let _ = progress.send((task_id.clone(), TaskState::Running));
                tokio::time::sleep(duration).await;
                let _ = progress.send((task_id, outcome));
            });
        }
        self.running.insert(task.task_id.clone(), (host, task));
    }

    async fn report_progress(
        &mut self,
        task_id: TaskId,
        state: TaskState,
    ) -> Result<(), SchedulerError> {
        // Killed tasks keep their timers; drop whatever they report after.
        let Some((host, task)) = self.running.get(&task_id) else {
            return Ok(());
        };
        let (host, slave_id) = (*host, task.slave_id.clone());

        if state.is_terminal() {
            if let Some((_, task)) = self.running.remove(&task_id) {
                self.hosts[host].release(&task);
            }
        }
        self.framework
            .status_update(StatusUpdate::new(task_id, state).with_slave(slave_id))
            .await
    }

    async fn send_offers(&mut self) -> Result<(), SchedulerError> {
        let now = Instant::now();
        let mut offers = Vec::new();
        for (index, host) in self.hosts.iter_mut().enumerate() {
            if !host.available(now) {
                continue;
            }
            self.next_offer += 1;
            let id = OfferId::new(format!("sim-offer-{}", self.next_offer));
            host.offered = true;
            host.refused_until = None;
            self.outstanding.insert(id.clone(), index);
            offers.push(host.offer(id));
        }
        if offers.is_empty() {
            return Ok(());
        }

        let report = self.framework.resource_offers(offers).await?;
        if !report.launched.is_empty() {
            debug!(count = report.launched.len(), "Offers accepted");
        }
        for task in report.would_launch {
            println!("would launch {} on {}", task.task_id, task.slave_id);
        }
        Ok(())
    }
}
