use std::sync::Arc;

use uuid::Uuid;

use crate::{Channel, LatestValue};

/// One [LatestValue] per [Channel], all created empty at process start.
pub struct ChannelCaches {
    caches: [Arc<LatestValue>; 3],
}

impl ChannelCaches {
    pub fn new(process_id: Uuid) -> Self {
        Self {
            caches: Channel::ALL.map(|channel| Arc::new(LatestValue::new(channel, process_id))),
        }
    }

    pub fn get(&self, channel: Channel) -> &Arc<LatestValue> {
        &self.caches[channel.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LatestValue>> {
        self.caches.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_channel_starts_empty() {
        let process = Uuid::new_v4();
        let caches = ChannelCaches::new(process);
        for channel in Channel::ALL {
            let snapshot = caches.get(channel).snapshot();
            assert_eq!(snapshot.channel, channel);
            assert_eq!(snapshot.origin_id, process);
            assert!(snapshot.is_empty());
        }
        assert_eq!(caches.iter().count(), 3);
    }
}
