//! QueueRegistry - 名前付き queue の置き場
//!
//! グローバルな singleton の代わりに、起動時に明示的に組み立てて持ち回ります。
//! `open` は config から queue を作り、dead-letter queue を名前で結線し、
//! index を用意します。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::config::{QueueConfig, SpoolConfig};
use crate::domain::QueueError;
use crate::ports::{Clock, MessageStore};
use crate::queue::Queue;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("queue '{0}' is already registered")]
    DuplicateQueue(String),

    #[error("queue '{queue}' names unknown dead-letter queue '{dead_letter}'")]
    UnknownDeadLetterQueue { queue: String, dead_letter: String },

    #[error("dead-letter queues form a cycle: {}", .0.join(" -> "))]
    DeadLetterCycle(Vec<String>),

    #[error("queue '{queue}': {source}")]
    Queue {
        queue: String,
        #[source]
        source: QueueError,
    },
}

/// Registry of queues (name -> handle).
///
/// Built during initialization, then shared read-only.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: HashMap<String, Arc<Queue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    pub fn register(&mut self, queue: Arc<Queue>) -> Result<(), RegistryError> {
        let name = queue.name().to_string();
        if self.queues.contains_key(&name) {
            return Err(RegistryError::DuplicateQueue(name));
        }
        self.queues.insert(name, queue);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.get(name).cloned()
    }

    /// Sorted for stable output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queues.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Build every queue in `config`, dead-letter targets first, then set up
    /// indexes. `store_for` supplies the collection behind each queue name.
    pub async fn open<F>(
        config: &SpoolConfig,
        clock: Arc<dyn Clock>,
        mut store_for: F,
    ) -> Result<Self, RegistryError>
    where
        F: FnMut(&str) -> Arc<dyn MessageStore>,
    {
        let mut wiring = Wiring {
            configs: &config.queues,
            clock,
            store_for: &mut store_for,
            registry: QueueRegistry::new(),
            path: Vec::new(),
        };
        for name in config.queues.keys() {
            wiring.build(name)?;
        }
        let registry = wiring.registry;

        for name in registry.names() {
            if let Some(queue) = registry.queues.get(name) {
                queue
                    .ensure_indexes()
                    .await
                    .map_err(|source| RegistryError::Queue {
                        queue: name.to_string(),
                        source,
                    })?;
            }
        }
        Ok(registry)
    }
}

/// Depth-first construction state for [`QueueRegistry::open`].
struct Wiring<'a, F> {
    configs: &'a BTreeMap<String, QueueConfig>,
    clock: Arc<dyn Clock>,
    store_for: &'a mut F,
    registry: QueueRegistry,
    /// Queues currently being built, outermost first.
    path: Vec<String>,
}

impl<F> Wiring<'_, F>
where
    F: FnMut(&str) -> Arc<dyn MessageStore>,
{
    fn build(&mut self, name: &str) -> Result<Arc<Queue>, RegistryError> {
        if let Some(queue) = self.registry.get(name) {
            return Ok(queue);
        }
        if let Some(start) = self.path.iter().position(|n| n == name) {
            let mut cycle = self.path[start..].to_vec();
            cycle.push(name.to_string());
            return Err(RegistryError::DeadLetterCycle(cycle));
        }
        let configs = self.configs;
        let Some(config) = configs.get(name) else {
            // 呼び出し元で存在確認済み
            return Err(RegistryError::UnknownDeadLetterQueue {
                queue: self.path.last().cloned().unwrap_or_default(),
                dead_letter: name.to_string(),
            });
        };

        self.path.push(name.to_string());
        let dead_letter = match &config.dead_letter_queue {
            Some(target) if !configs.contains_key(target) => {
                return Err(RegistryError::UnknownDeadLetterQueue {
                    queue: name.to_string(),
                    dead_letter: target.clone(),
                });
            }
            Some(target) => Some(self.build(target)?),
            None => None,
        };
        self.path.pop();

        let mut builder = Queue::builder(name, (self.store_for)(name))
            .clock(Arc::clone(&self.clock))
            .visibility(config.visibility())
            .delay(config.delay());
        if let Some(max_retries) = config.max_retries {
            builder = builder.max_retries(max_retries);
        }
        if let Some(target) = dead_letter {
            builder = builder.dead_letter_queue(target);
        }
        let queue = Arc::new(builder.build().map_err(|source| RegistryError::Queue {
            queue: name.to_string(),
            source,
        })?);

        self.registry.register(Arc::clone(&queue))?;
        Ok(queue)
    }
}
