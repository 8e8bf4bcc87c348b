//! Outbound command queue
//!
//! Many callers enqueue, the write loop is the single consumer. A blocked
//! consumer wakes as soon as a command arrives.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;

use crate::structures::Stats;

/// FIFO of pending command lines (without delimiter)
pub struct CommandQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
    stats: Arc<Stats>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new(stats: Arc<Stats>) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, stats }
    }

    /// Handle for submitting commands
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Consumer end, handed to the write loop
    pub(crate) fn receiver(&self) -> Receiver<String> {
        self.rx.clone()
    }

    /// Number of commands waiting to be written
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if no commands are waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Non-owning submit handle held by each channel
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<String>,
    stats: Arc<Stats>,
}

impl CommandSender {
    /// Enqueue a complete command line
    pub fn push(&self, line: String) {
        if self.tx.send(line).is_err() {
            // Only possible once the owning queue is gone.
            warn!("Command queue closed, command discarded");
            return;
        }
        Stats::bump(&self.stats.commands_queued);
    }

    /// Enqueue `command` stamped with the channel index digit
    pub fn submit(&self, channel: usize, command: &str) {
        self.push(format!("{}{}", channel, command));
    }
}
