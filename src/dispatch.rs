//! Inbound line dispatcher
//!
//! A leading `0`-`3` selects the channel and is stripped. Lines without
//! that prefix belong to channel 0, since the adapter sends some replies
//! without channel context.

use std::sync::Arc;

use crate::channel::Inbound;
use crate::constants::SLCANX_CHANNEL_COUNT;
use crate::structures::Stats;

/// Split a raw line into its channel index and the remaining payload
pub fn route(line: &str) -> (usize, &str) {
    match line.as_bytes().first() {
        Some(&digit @ b'0'..=b'3') => ((digit - b'0') as usize, &line[1..]),
        _ => (0, line),
    }
}

/// Routes inbound lines to the receiving half of each channel
pub(crate) struct Dispatcher {
    channels: [Arc<Inbound>; SLCANX_CHANNEL_COUNT],
    stats: Arc<Stats>,
}

impl Dispatcher {
    pub(crate) fn new(channels: [Arc<Inbound>; SLCANX_CHANNEL_COUNT], stats: Arc<Stats>) -> Self {
        Self { channels, stats }
    }

    pub(crate) fn dispatch(&self, line: &str) {
        Stats::bump(&self.stats.lines_received);
        if line.is_empty() {
            return;
        }
        let (index, payload) = route(line);
        self.channels[index].deliver(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::queue::CommandQueue;
    use crate::CanFrame;

    #[test]
    fn test_route_prefixed() {
        assert_eq!(route("0t1230"), (0, "t1230"));
        assert_eq!(route("3T000001000"), (3, "T000001000"));
        assert_eq!(route("2"), (2, ""));
    }

    #[test]
    fn test_route_defaults_to_channel_zero() {
        assert_eq!(route("t1230"), (0, "t1230"));
        assert_eq!(route("4t1230"), (0, "4t1230"));
        assert_eq!(route("\u{7}"), (0, "\u{7}"));
        assert_eq!(route(""), (0, ""));
    }

    #[test]
    fn test_dispatch_to_owning_channel() {
        let stats = Arc::new(Stats::default());
        let queue = CommandQueue::new(Arc::clone(&stats));
        let channels: Vec<Channel> = (0..SLCANX_CHANNEL_COUNT)
            .map(|i| Channel::new(i, queue.sender(), Arc::clone(&stats)))
            .collect();
        let receivers: Vec<_> = channels.iter().map(|ch| ch.subscribe()).collect();
        let dispatcher = Dispatcher::new(
            std::array::from_fn(|i| channels[i].inbound()),
            Arc::clone(&stats),
        );

        dispatcher.dispatch("3t1001AA");
        dispatcher.dispatch("t2001BB");
        dispatcher.dispatch("1t30");
        dispatcher.dispatch("1t3001CC");
        dispatcher.dispatch("");

        assert_eq!(receivers[3].try_recv().unwrap(), CanFrame::new(0x100, &[0xAA]));
        assert_eq!(receivers[0].try_recv().unwrap(), CanFrame::new(0x200, &[0xBB]));
        assert_eq!(receivers[1].try_recv().unwrap(), CanFrame::new(0x300, &[0xCC]));
        assert!(receivers.iter().all(|rx| rx.try_recv().is_err()));

        let snap = stats.snapshot();
        assert_eq!(snap.lines_received, 5);
        assert_eq!(snap.frames_delivered, 3);
        assert_eq!(snap.lines_dropped, 1);
    }
}
