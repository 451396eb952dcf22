//! Queue topology configuration.
//!
//! Each logical event type gets one main queue, an optional retry policy
//! (a single fixed-TTL queue or an ordered ladder of increasing TTLs), and
//! an optional dead-letter queue. The event-type table is resolved at
//! startup; handlers are looked up once, not per message.

use std::time::Duration;

use crate::error::ConfigError;

/// One rung of a retry ladder.
#[derive(Debug, Clone)]
pub struct RetryRung {
    /// Name of the retry queue.
    pub queue: String,

    /// How long messages park in this rung before returning to the main
    /// queue.
    pub ttl: Duration,
}

/// Retry behavior for a queue.
///
/// Single-or-ladder exclusivity is carried by the type: a queue cannot
/// configure both.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// No retries; failed messages dead-letter or drop immediately.
    #[default]
    None,

    /// One retry queue with a fixed TTL and a bounded attempt count.
    Single {
        /// Name of the retry queue.
        queue: String,

        /// Parking time before a message returns to the main queue.
        ttl: Duration,

        /// Maximum retry attempts; `None` retries without bound.
        max_retries: Option<u32>,
    },

    /// An ordered ladder of retry queues, one rung per attempt.
    Ladder(Vec<RetryRung>),
}

/// Configuration for one logical queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name of the main queue.
    pub name: String,

    /// Retry behavior for failed handler invocations.
    pub retry: RetryPolicy,

    /// Terminal queue for messages that exhaust their retries.
    pub dead_letter_queue: Option<String>,
}

impl QueueConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first rule violated: empty names, a single retry queue
    /// without a positive TTL, an empty ladder, or a zero `max_retries`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName);
        }

        match &self.retry {
            RetryPolicy::None => {}
            RetryPolicy::Single {
                queue,
                ttl,
                max_retries,
            } => {
                if queue.trim().is_empty() {
                    return Err(ConfigError::EmptyQueueName);
                }
                if ttl.is_zero() {
                    return Err(ConfigError::ZeroTtl {
                        queue: queue.clone(),
                    });
                }
                if *max_retries == Some(0) {
                    return Err(ConfigError::ZeroMaxRetries {
                        queue: self.name.clone(),
                    });
                }
            }
            RetryPolicy::Ladder(rungs) => {
                if rungs.is_empty() {
                    return Err(ConfigError::EmptyLadder {
                        queue: self.name.clone(),
                    });
                }
                for rung in rungs {
                    if rung.queue.trim().is_empty() {
                        return Err(ConfigError::EmptyQueueName);
                    }
                    if rung.ttl.is_zero() {
                        return Err(ConfigError::ZeroTtl {
                            queue: rung.queue.clone(),
                        });
                    }
                }
            }
        }

        if let Some(dead) = &self.dead_letter_queue {
            if dead.trim().is_empty() {
                return Err(ConfigError::EmptyQueueName);
            }
        }

        Ok(())
    }
}

/// The logical event types this service consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Asynchronous usage commit messages.
    UsageCommit,
}

impl EventKind {
    /// The well-known main queue name for this event type.
    #[must_use]
    pub const fn queue_name(self) -> &'static str {
        match self {
            Self::UsageCommit => "usage_commits",
        }
    }

    /// The standard queue configuration for this event type.
    #[must_use]
    pub fn queue_config(self) -> QueueConfig {
        match self {
            Self::UsageCommit => QueueConfig {
                name: self.queue_name().to_string(),
                retry: RetryPolicy::Single {
                    queue: "usage_commits_retry".to_string(),
                    ttl: Duration::from_secs(30),
                    max_retries: Some(3),
                },
                dead_letter_queue: Some("usage_commits_dead".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_usage_commit_config_is_valid() {
        let config = EventKind::UsageCommit.queue_config();
        assert_eq!(config.name, "usage_commits");
        config.validate().unwrap();
    }

    #[test]
    fn single_retry_requires_ttl() {
        let config = QueueConfig {
            name: "events".into(),
            retry: RetryPolicy::Single {
                queue: "events_retry".into(),
                ttl: Duration::ZERO,
                max_retries: Some(3),
            },
            dead_letter_queue: None,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroTtl {
                queue: "events_retry".into()
            })
        );
    }

    #[test]
    fn ladder_must_be_non_empty() {
        let config = QueueConfig {
            name: "events".into(),
            retry: RetryPolicy::Ladder(vec![]),
            dead_letter_queue: None,
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyLadder {
                queue: "events".into()
            })
        );
    }

    #[test]
    fn zero_max_retries_rejected() {
        let config = QueueConfig {
            name: "events".into(),
            retry: RetryPolicy::Single {
                queue: "events_retry".into(),
                ttl: Duration::from_secs(30),
                max_retries: Some(0),
            },
            dead_letter_queue: None,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroMaxRetries { .. })
        ));
    }

    #[test]
    fn empty_names_rejected() {
        let config = QueueConfig {
            name: "  ".into(),
            retry: RetryPolicy::None,
            dead_letter_queue: None,
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueueName));

        let config = QueueConfig {
            name: "events".into(),
            retry: RetryPolicy::None,
            dead_letter_queue: Some(String::new()),
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueueName));
    }
}
