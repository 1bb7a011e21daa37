//! Subscription Table: the fixed set of inbound topics, each with a
//! `subscribed` flag the controller reconciles against the owning
//! feature's desired state every iteration.

use heapless::String as HString;

use crate::topics::MAX_TOPIC_LEN;

/// Index of a subscribable feature: 0 = config-update, 1 = command,
/// 2 = resource-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    ConfigUpdate = 0,
    Command = 1,
    ResourceUpdate = 2,
}

pub const FEATURE_COUNT: usize = 3;

/// One row of the subscription table: the topic and whether the broker has
/// confirmed a subscribe for it. The inbound handler itself is dispatched by
/// the session controller (it needs access to the registry and the resource
/// engine), so this table only tracks wire state.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub topic: HString<MAX_TOPIC_LEN>,
    pub subscribed: bool,
}

/// The fixed three-row subscription table.
pub struct SubscriptionTable {
    entries: [SubscriptionEntry; FEATURE_COUNT],
}

impl SubscriptionTable {
    pub fn new(cfg_topic: &str, cmd_topic: &str, rsc_topic: &str) -> Self {
        let mk = |t: &str| SubscriptionEntry {
            topic: HString::try_from(t).unwrap_or_default(),
            subscribed: false,
        };
        Self {
            entries: [mk(cfg_topic), mk(cmd_topic), mk(rsc_topic)],
        }
    }

    pub fn entry(&self, feature: Feature) -> &SubscriptionEntry {
        &self.entries[feature as usize]
    }

    pub fn entry_mut(&mut self, feature: Feature) -> &mut SubscriptionEntry {
        &mut self.entries[feature as usize]
    }

    /// Reset all subscribed flags, e.g. on reconnect.
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.subscribed = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, &SubscriptionEntry)> {
        [Feature::ConfigUpdate, Feature::Command, Feature::ResourceUpdate]
            .into_iter()
            .map(move |f| (f, self.entry(f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_all_subscribed_flags() {
        let mut table = SubscriptionTable::new("a", "b", "c");
        table.entry_mut(Feature::Command).subscribed = true;
        table.reset();
        assert!(!table.entry(Feature::Command).subscribed);
    }
}
