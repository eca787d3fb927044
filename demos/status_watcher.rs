//! Print every site status envelope pushed by a running `status_node`.
//!
//! ```text
//! cargo run --example status_watcher -- ws://127.0.0.1:4000/status/site
//! ```

use futures::StreamExt;
use statusbus::{logging::init_tracing, Envelope};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(Level::INFO);

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:4000/status/site".to_string());
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert("cookie", HeaderValue::from_static("sid=demo"));

    let (mut ws, _) = connect_async(request).await?;
    info!(%url, "Connected");

    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => info!(
                    id = %envelope.id,
                    origin = %envelope.origin_id,
                    updated_at = %envelope.updated_at,
                    "{}",
                    serde_json::Value::Object(envelope.data)
                ),
                Err(e) => warn!("Unexpected message {text}: {e}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
