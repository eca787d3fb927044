//! One worker process. Run several on the same host and watch their site
//! status converge:
//!
//! ```text
//! STATUSBUS_WS_ADDR=0.0.0.0:4000 cargo run --example status_node
//! STATUSBUS_WS_ADDR=0.0.0.0:4001 cargo run --example status_node
//! ```

use std::{sync::Arc, time::Duration};

use rand::Rng;
use statusbus::{
    broker::MulticastBroker,
    gateway::{websocket, MemorySessionStore, Session},
    logging::init_tracing,
    transport::MulticastOptions,
    BusConfig, StatusBus,
};
use tokio::{net::TcpListener, time::interval};
use tracing::{error, info, Level};

/// Clients presenting `sid=demo` are let through the gateway.
const DEMO_SID: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(Level::INFO);

    let config = BusConfig::from_env()?;
    let broker = MulticastBroker::new(config.multicast_addr, MulticastOptions::default()).await?;
    let sessions = Arc::new(MemorySessionStore::default());
    sessions.insert(DEMO_SID, Session::authenticated("demo", None));

    let bus = StatusBus::new(config);
    let gateway = bus.init(Arc::new(broker), sessions).await;

    bus.subscribe_site(
        |envelope| {
            info!(id = %envelope.id, origin = %envelope.origin_id, "Site status {:?}", envelope.data);
            Ok(())
        },
        |e| error!("Site status failed: {e}"),
        || info!("Site status completed"),
    );

    let listener = TcpListener::bind(bus.config().ws_addr).await?;
    let server = tokio::spawn(websocket::serve(
        listener,
        gateway,
        bus.cancellation_token(),
    ));

    let mut ticks = interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticks.tick() => {
                let queue_length = rand::thread_rng().gen_range(0..20);
                bus.send_site("queueLength", queue_length)?;
            }
        }
    }

    bus.shutdown();
    server.await??;
    Ok(())
}
