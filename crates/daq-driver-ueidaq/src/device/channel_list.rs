//! Ordered channel sets.

use std::collections::HashSet;

use ueidaq_core::ChannelListFault;

/// Strictly ascending, duplicate-free list of channel numbers.
///
/// Only [`ChannelList::validated`] builds a non-empty list, so a stored list
/// always satisfies the ordering invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelList {
    channels: Vec<u32>,
}

impl ChannelList {
    /// Check `channels` and copy them if every check passes.
    ///
    /// `accept` is the per-channel range predicate of the owning device.
    pub fn validated<F>(channels: &[u32], accept: F) -> Result<Self, Vec<ChannelListFault>>
    where
        F: Fn(u32) -> bool,
    {
        let faults = faults(channels, accept);
        if faults.is_empty() {
            Ok(Self {
                channels: channels.to_vec(),
            })
        } else {
            Err(faults)
        }
    }

    /// Channels in ascending order.
    pub fn as_slice(&self) -> &[u32] {
        &self.channels
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no list has been set.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Position of `channel` in the list.
    pub fn position(&self, channel: u32) -> Option<usize> {
        self.channels.binary_search(&channel).ok()
    }

    /// Channel at `index`.
    pub fn get(&self, index: usize) -> Option<u32> {
        self.channels.get(index).copied()
    }
}

/// Every reason `channels` is not a valid list.
///
/// All entries are inspected; nothing short-circuits.
pub fn faults<F>(channels: &[u32], accept: F) -> Vec<ChannelListFault>
where
    F: Fn(u32) -> bool,
{
    let mut faults = Vec::new();
    if channels.is_empty() {
        faults.push(ChannelListFault::Empty);
        return faults;
    }

    let mut seen = HashSet::with_capacity(channels.len());
    let mut previous: Option<u32> = None;
    for &channel in channels {
        if !seen.insert(channel) {
            faults.push(ChannelListFault::Duplicate { channel });
        } else if previous.is_some_and(|p| channel < p) {
            faults.push(ChannelListFault::NotAscending { channel });
        }
        if !accept(channel) {
            faults.push(ChannelListFault::Rejected { channel });
        }
        previous = Some(channel);
    }
    faults
}
