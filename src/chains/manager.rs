use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info, warn};

use super::{ActiveTask, ChainEvent, ChainStats, TaskChain, TaskExecutor};
use crate::agents::{Task, TaskContext, TaskOutput, TaskStatus};
use crate::config::{ChainSettings, DevPilotConfig};
use crate::error::{AgentError, Result};

#[derive(Default)]
struct ChainStore {
    chains: HashMap<String, TaskChain>,
    /// Chain ids in creation order
    order: Vec<String>,
}

impl ChainStore {
    /// The chain, provided it is still the execution identified by `epoch`.
    fn current(&mut self, chain_id: &str, epoch: u64) -> Result<&mut TaskChain> {
        match self.chains.get_mut(chain_id) {
            Some(chain) if chain.epoch() == epoch => Ok(chain),
            Some(_) => Err(AgentError::Cancelled),
            None => Err(AgentError::NotFound(chain_id.to_string())),
        }
    }
}

/// Removes a task from the active registry when dropped, so the entry goes
/// away on success, failure, or if the execution future is dropped.
struct ActiveGuard<'a> {
    active: &'a StdMutex<HashMap<String, ActiveTask>>,
    task_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.task_id);
    }
}

/// Owns every task chain for the life of the process
pub struct TaskManager {
    store: RwLock<ChainStore>,
    active: StdMutex<HashMap<String, ActiveTask>>,
    events: broadcast::Sender<ChainEvent>,
    resumed: Notify,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_settings(&ChainSettings::default())
    }

    pub fn with_config(config: &DevPilotConfig) -> Self {
        Self::with_settings(&config.chains)
    }

    fn with_settings(settings: &ChainSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            store: RwLock::new(ChainStore::default()),
            active: StdMutex::new(HashMap::new()),
            events,
            resumed: Notify::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ChainEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Create a pending chain, one task per description with its type
    /// inferred from the text.
    pub async fn create_chain<S: AsRef<str>>(
        &self,
        name: &str,
        descriptions: &[S],
        initial_context: Option<TaskContext>,
    ) -> TaskChain {
        let context = initial_context.unwrap_or_default();
        let tasks = descriptions
            .iter()
            .map(|d| Task::from_description(d.as_ref(), context.clone()))
            .collect();

        let chain = TaskChain::new(name, tasks);
        {
            let mut store = self.store.write().await;
            store.order.push(chain.id.clone());
            store.chains.insert(chain.id.clone(), chain.clone());
        }

        info!("Created chain '{}' ({}) with {} task(s)", chain.name, chain.id, chain.tasks.len());
        self.emit(ChainEvent::ChainCreated { chain_id: chain.id.clone() });
        chain
    }

    /// Execute a pending chain's tasks strictly in order. The first failure
    /// marks the chain failed and is returned; later tasks stay pending.
    pub async fn execute(&self, chain_id: &str, executor: &dyn TaskExecutor) -> Result<Vec<TaskOutput>> {
        let (epoch, task_count) = {
            let mut store = self.store.write().await;
            let chain = store
                .chains
                .get_mut(chain_id)
                .ok_or_else(|| AgentError::NotFound(chain_id.to_string()))?;

            if chain.status != TaskStatus::Pending {
                return Err(AgentError::InvalidState {
                    id: chain_id.to_string(),
                    status: chain.status.to_string(),
                });
            }
            chain.status = TaskStatus::Running;
            (chain.epoch(), chain.tasks.len())
        };

        info!("Executing chain {} ({} task(s))", chain_id, task_count);
        self.emit(ChainEvent::ChainStarted { chain_id: chain_id.to_string() });

        let mut outputs = Vec::with_capacity(task_count);
        for index in 0..task_count {
            let task = self.start_task(chain_id, epoch, index).await?;

            let outcome = {
                let _guard = self.register_active(chain_id, &task.id);
                self.emit(ChainEvent::TaskStarted {
                    chain_id: chain_id.to_string(),
                    task_id: task.id.clone(),
                    index,
                });
                debug!("Chain {} task {}/{} ({}) started", chain_id, index + 1, task_count, task.task_type);
                executor.execute(&task).await
            };

            let mut store = self.store.write().await;
            let chain = match store.current(chain_id, epoch) {
                Ok(chain) => chain,
                Err(err) => {
                    debug!("Discarding result of task {} for stale chain {}", task.id, chain_id);
                    return Err(err);
                }
            };

            match outcome {
                Ok(output) => {
                    chain.tasks[index].complete(output.clone());
                    chain.results.push(output.clone());
                    outputs.push(output);
                    self.emit(ChainEvent::TaskCompleted {
                        chain_id: chain_id.to_string(),
                        task_id: task.id.clone(),
                        index,
                    });
                }
                Err(err) => {
                    chain.tasks[index].fail(&err);
                    chain.status = TaskStatus::Failed;
                    chain.completed_at = Some(Utc::now());
                    chain.paused = false;

                    warn!("Chain {} failed at task {}: {}", chain_id, index + 1, err);
                    self.emit(ChainEvent::TaskFailed {
                        chain_id: chain_id.to_string(),
                        task_id: task.id.clone(),
                        index,
                        error: err.to_string(),
                    });
                    self.emit(ChainEvent::ChainFailed {
                        chain_id: chain_id.to_string(),
                        error: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }

        let mut store = self.store.write().await;
        let chain = store.current(chain_id, epoch)?;
        chain.status = TaskStatus::Completed;
        chain.completed_at = Some(Utc::now());
        chain.paused = false;

        info!("Chain {} completed", chain_id);
        self.emit(ChainEvent::ChainCompleted { chain_id: chain_id.to_string() });
        Ok(outputs)
    }

    fn register_active(&self, chain_id: &str, task_id: &str) -> ActiveGuard<'_> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.insert(task_id.to_string(), ActiveTask {
            task_id: task_id.to_string(),
            chain_id: chain_id.to_string(),
            started_at: Utc::now(),
        });
        ActiveGuard {
            active: &self.active,
            task_id: task_id.to_string(),
        }
    }

    /// Mark task `index` running, first waiting at the boundary while the
    /// chain is paused. The pause check and the start happen under one lock.
    async fn start_task(&self, chain_id: &str, epoch: u64, index: usize) -> Result<Task> {
        loop {
            // Register interest before checking so a resume in between isn't lost
            let resumed = self.resumed.notified();
            {
                let mut store = self.store.write().await;
                let chain = store.current(chain_id, epoch)?;
                if !chain.paused {
                    let results = chain.results.clone();
                    let task = &mut chain.tasks[index];
                    task.context = task.context.with_previous_results(results);
                    task.start();
                    return Ok(task.clone());
                }
            }
            debug!("Chain {} paused, waiting", chain_id);
            resumed.await;
        }
    }

    /// Logical cancel of a running chain. In-flight provider calls are not
    /// interrupted; their results are dropped when they arrive.
    pub async fn cancel(&self, chain_id: &str) -> bool {
        {
            let mut store = self.store.write().await;
            let Some(chain) = store.chains.get_mut(chain_id) else {
                return false;
            };
            if chain.status != TaskStatus::Running {
                return false;
            }

            for task in chain.tasks.iter_mut().filter(|t| t.status == TaskStatus::Running) {
                task.fail(&AgentError::Cancelled);
            }
            chain.status = TaskStatus::Failed;
            chain.completed_at = Some(Utc::now());
            chain.paused = false;
            chain.bump_epoch();
        }

        info!("Cancelled chain {}", chain_id);
        self.emit(ChainEvent::ChainCancelled { chain_id: chain_id.to_string() });
        self.resumed.notify_waiters();
        true
    }

    /// Stop a running chain at the next task boundary.
    pub async fn pause(&self, chain_id: &str) -> bool {
        {
            let mut store = self.store.write().await;
            match store.chains.get_mut(chain_id) {
                Some(chain) if chain.status == TaskStatus::Running && !chain.paused => chain.paused = true,
                _ => return false,
            }
        }

        info!("Paused chain {}", chain_id);
        self.emit(ChainEvent::ChainPaused { chain_id: chain_id.to_string() });
        true
    }

    pub async fn resume(&self, chain_id: &str) -> bool {
        {
            let mut store = self.store.write().await;
            match store.chains.get_mut(chain_id) {
                Some(chain) if chain.status == TaskStatus::Running && chain.paused => chain.paused = false,
                _ => return false,
            }
        }

        info!("Resumed chain {}", chain_id);
        self.emit(ChainEvent::ChainResumed { chain_id: chain_id.to_string() });
        self.resumed.notify_waiters();
        true
    }

    pub async fn delete(&self, chain_id: &str) -> bool {
        let removed = {
            let mut store = self.store.write().await;
            store.order.retain(|id| id != chain_id);
            store.chains.remove(chain_id).is_some()
        };

        if removed {
            info!("Deleted chain {}", chain_id);
            self.emit(ChainEvent::ChainDeleted { chain_id: chain_id.to_string() });
            self.resumed.notify_waiters();
        }
        removed
    }

    pub async fn get(&self, chain_id: &str) -> Option<TaskChain> {
        self.store.read().await.chains.get(chain_id).cloned()
    }

    /// All chains, most recently created first.
    pub async fn list(&self) -> Vec<TaskChain> {
        let store = self.store.read().await;
        store
            .order
            .iter()
            .rev()
            .filter_map(|id| store.chains.get(id).cloned())
            .collect()
    }

    async fn list_with_status(&self, status: TaskStatus) -> Vec<TaskChain> {
        self.list()
            .await
            .into_iter()
            .filter(|chain| chain.status == status)
            .collect()
    }

    pub async fn list_active(&self) -> Vec<TaskChain> {
        self.list_with_status(TaskStatus::Running).await
    }

    pub async fn list_completed(&self) -> Vec<TaskChain> {
        self.list_with_status(TaskStatus::Completed).await
    }

    pub async fn stats(&self) -> ChainStats {
        let store = self.store.read().await;
        let mut stats = ChainStats {
            total: store.chains.len(),
            ..Default::default()
        };
        for chain in store.chains.values() {
            match chain.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub async fn progress(&self, chain_id: &str) -> Result<f64> {
        self.get(chain_id)
            .await
            .map(|chain| chain.progress())
            .ok_or_else(|| AgentError::NotFound(chain_id.to_string()))
    }

    /// Tasks currently handed to an executor.
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.values().cloned().collect()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
