//! Queue definitions: attempt budgets, backoff, and concurrency per queue.

use chrono::Duration;

use lerno_core::{defaults, QueueName};

/// Retry delay policy for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// The same delay before every redelivery.
    Fixed { delay_ms: i64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: i64, max_ms: i64 },
}

impl BackoffStrategy {
    /// Delay before the next delivery, given the number of attempts already
    /// made (1-based: after the first failed attempt, `attempts_made` is 1).
    pub fn delay(&self, attempts_made: i32) -> Duration {
        let ms = match *self {
            BackoffStrategy::Fixed { delay_ms } => delay_ms,
            BackoffStrategy::Exponential { base_ms, max_ms } => {
                let exponent = attempts_made.saturating_sub(1).clamp(0, 30) as u32;
                base_ms.saturating_mul(1_i64 << exponent).min(max_ms)
            }
        };
        Duration::milliseconds(ms.max(0))
    }
}

/// Static configuration for one queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueDefinition {
    pub name: QueueName,
    /// Total delivery attempts before the job is parked.
    pub max_attempts: i32,
    /// Jobs processed concurrently by this queue's worker pool.
    pub concurrency: usize,
    pub backoff: BackoffStrategy,
}

/// The full set of queue definitions.
///
/// Every [`QueueName`] has exactly one definition; lookups are total.
#[derive(Debug, Clone)]
pub struct QueueSet {
    definitions: [QueueDefinition; QueueName::ALL.len()],
}

impl Default for QueueSet {
    fn default() -> Self {
        Self {
            definitions: [
                QueueDefinition {
                    name: QueueName::Notifications,
                    max_attempts: 3,
                    concurrency: 5,
                    backoff: BackoffStrategy::Exponential {
                        base_ms: 1_000,
                        max_ms: defaults::BACKOFF_MAX_DELAY_MS,
                    },
                },
                QueueDefinition {
                    name: QueueName::PaymentSync,
                    max_attempts: 3,
                    concurrency: 3,
                    backoff: BackoffStrategy::Exponential {
                        base_ms: 5_000,
                        max_ms: defaults::BACKOFF_MAX_DELAY_MS,
                    },
                },
                QueueDefinition {
                    name: QueueName::Embeddings,
                    max_attempts: 2,
                    concurrency: 3,
                    backoff: BackoffStrategy::Exponential {
                        base_ms: 2_000,
                        max_ms: defaults::BACKOFF_MAX_DELAY_MS,
                    },
                },
                QueueDefinition {
                    name: QueueName::ChatPersistence,
                    max_attempts: 3,
                    concurrency: 10,
                    backoff: BackoffStrategy::Fixed { delay_ms: 500 },
                },
                QueueDefinition {
                    name: QueueName::Media,
                    max_attempts: 2,
                    concurrency: 2,
                    backoff: BackoffStrategy::Exponential {
                        base_ms: 2_000,
                        max_ms: defaults::BACKOFF_MAX_DELAY_MS,
                    },
                },
            ],
        }
    }
}

impl QueueSet {
    /// The definition for a queue.
    pub fn get(&self, name: QueueName) -> &QueueDefinition {
        self.definitions
            .iter()
            .find(|d| d.name == name)
            .unwrap_or(&self.definitions[0])
    }

    /// All definitions, in startup order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueDefinition> {
        self.definitions.iter()
    }

    /// Replace one queue's definition, keeping the rest.
    pub fn with_definition(mut self, definition: QueueDefinition) -> Self {
        if let Some(slot) = self
            .definitions
            .iter_mut()
            .find(|d| d.name == definition.name)
        {
            *slot = definition;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = BackoffStrategy::Fixed { delay_ms: 500 };
        assert_eq!(backoff.delay(1), Duration::milliseconds(500));
        assert_eq!(backoff.delay(5), Duration::milliseconds(500));
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = BackoffStrategy::Exponential {
            base_ms: 1_000,
            max_ms: 60_000,
        };
        assert_eq!(backoff.delay(1), Duration::milliseconds(1_000));
        assert_eq!(backoff.delay(2), Duration::milliseconds(2_000));
        assert_eq!(backoff.delay(3), Duration::milliseconds(4_000));
        assert_eq!(backoff.delay(4), Duration::milliseconds(8_000));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let backoff = BackoffStrategy::Exponential {
            base_ms: 1_000,
            max_ms: 60_000,
        };
        assert_eq!(backoff.delay(10), Duration::milliseconds(60_000));
        // Huge attempt counts must not overflow.
        assert_eq!(backoff.delay(i32::MAX), Duration::milliseconds(60_000));
    }

    #[test]
    fn test_zero_attempts_uses_base_delay() {
        let backoff = BackoffStrategy::Exponential {
            base_ms: 2_000,
            max_ms: 60_000,
        };
        assert_eq!(backoff.delay(0), Duration::milliseconds(2_000));
    }

    #[test]
    fn test_queue_set_covers_every_queue() {
        let queues = QueueSet::default();
        for name in QueueName::ALL {
            assert_eq!(queues.get(name).name, name);
        }
    }

    #[test]
    fn test_chat_persistence_has_widest_pool() {
        let queues = QueueSet::default();
        let chat = queues.get(QueueName::ChatPersistence);
        assert_eq!(chat.concurrency, 10);
        assert!(matches!(chat.backoff, BackoffStrategy::Fixed { .. }));
    }

    #[test]
    fn test_with_definition_overrides_one_queue() {
        let queues = QueueSet::default().with_definition(QueueDefinition {
            name: QueueName::Media,
            max_attempts: 7,
            concurrency: 1,
            backoff: BackoffStrategy::Fixed { delay_ms: 10 },
        });
        assert_eq!(queues.get(QueueName::Media).max_attempts, 7);
        assert_eq!(queues.get(QueueName::Notifications).max_attempts, 3);
    }

    #[test]
    fn test_default_attempt_and_concurrency_budgets() {
        let queues = QueueSet::default();

        let notifications = queues.get(QueueName::Notifications);
        assert_eq!(notifications.concurrency, 5);
        assert_eq!(notifications.max_attempts, 3);

        let embeddings = queues.get(QueueName::Embeddings);
        assert_eq!(embeddings.concurrency, 3);
        assert_eq!(embeddings.max_attempts, 2);

        // No queue retries more than three times.
        for definition in queues.iter() {
            assert!(definition.max_attempts <= 3);
        }
    }
}
