use std::{sync::Arc, time::Duration};

use statusbus::{
    broker::MemoryBroker,
    gateway::{Gateway, MemorySessionStore},
    BusConfig, StatusBus,
};
use tokio::time::{sleep, timeout};

/// One simulated worker process.
pub struct Process {
    pub bus: StatusBus,
    pub sessions: Arc<MemorySessionStore>,
    pub gateway: Arc<Gateway>,
}

pub async fn spawn_process(broker: &Arc<MemoryBroker>) -> Process {
    let bus = StatusBus::new(BusConfig::default());
    let sessions = Arc::new(MemorySessionStore::default());
    let gateway = bus.init(broker.clone(), sessions.clone()).await;
    Process {
        bus,
        sessions,
        gateway,
    }
}

/// Poll `check` until it holds, failing the test after a second.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    timeout(Duration::from_secs(1), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Give background tasks a chance to do something they should not.
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}
