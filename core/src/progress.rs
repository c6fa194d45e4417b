//! Stage-change events for renderer acquisition.
//!
//! Acquisition reports its progress through a [`ProgressSink`]. Any number of
//! observers can [`subscribe`](ProgressSink::subscribe) and receive every
//! subsequent [`Stage`] on their own channel; dropping the receiver
//! unsubscribes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::candidate::SourceKind;
use crate::error::Failure;

/// Acquisition stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum Stage {
    /// Checking whether a renderer is already available.
    Checking,
    /// Running a discovery strategy.
    Locating {
        /// Strategy being tried.
        source: SourceKind,
    },
    /// Running an installer invocation.
    Installing {
        /// 1 for the primary installer, 2 for the alternative.
        attempt: u8,
    },
    /// A verified renderer is available.
    Ready {
        /// Adopted executable.
        path: PathBuf,
    },
    /// Acquisition failed.
    Error {
        /// Structured failure.
        failure: Failure,
    },
}

/// Receiving side of a progress subscription.
pub type ProgressReceiver = async_channel::Receiver<Stage>;

/// Fan-out point for [`Stage`] events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    subscribers: Arc<Mutex<Vec<async_channel::Sender<Stage>>>>,
}

impl ProgressSink {
    /// Creates a sink with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every stage emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> ProgressReceiver {
        let (tx, rx) = async_channel::unbounded();
        self.attach(tx);
        rx
    }

    /// Forwards every stage emitted from now on into an existing channel.
    pub fn attach(&self, sender: async_channel::Sender<Stage>) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
    }

    /// Delivers `stage` to all live subscribers, pruning closed ones.
    pub fn emit(&self, stage: Stage) {
        tracing::trace!(?stage, "acquisition stage");
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.try_send(stage.clone()).is_ok());
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_stage() {
        let sink = ProgressSink::new();
        let a = sink.subscribe();
        let b = sink.subscribe();

        sink.emit(Stage::Checking);
        sink.emit(Stage::Locating {
            source: SourceKind::Bundled,
        });

        for rx in [a, b] {
            assert_eq!(rx.try_recv().unwrap(), Stage::Checking);
            assert_eq!(
                rx.try_recv().unwrap(),
                Stage::Locating {
                    source: SourceKind::Bundled
                }
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let sink = ProgressSink::new();
        let kept = sink.subscribe();
        drop(sink.subscribe());

        sink.emit(Stage::Checking);
        assert_eq!(sink.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), Stage::Checking);
    }

    #[test]
    fn stage_serializes_with_tag() {
        let json = serde_json::to_value(Stage::Installing { attempt: 2 }).unwrap();
        assert_eq!(json["stage"], "installing");
        assert_eq!(json["attempt"], 2);
    }
}
