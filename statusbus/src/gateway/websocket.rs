//! WebSocket transport for the [Gateway].
//!
//! Clients connect to `ws://host{root_path}/{channel}`. The upgrade request's
//! path selects the namespace and its headers (cookies) are handed to the
//! session middleware. Envelopes are sent as JSON text frames, verbatim.
//! On bidirectional namespaces each client text frame is parsed as JSON,
//! passed to the request handler and answered with a [Reply].

use std::{io, net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        self,
        handshake::server::{ErrorResponse, Request, Response},
        Message,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    channel::NamespaceKind,
    gateway::{ClientConnection, Gateway, Handshake},
};

#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("websocket error: {0}")]
    Protocol(#[from] tungstenite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Answer to a client request on a bidirectional namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Response { result: Value },
    Error { message: String },
}

/// Accept connections until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    cancel: CancellationToken,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, root = gateway.root_path(), "Accepting websocket clients");
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        let gateway = Arc::clone(&gateway);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_socket(stream, peer, gateway, cancel).await {
                debug!(%peer, "Websocket connection ended with error: {e}");
            }
        });
    }
}

fn handshake_from(request: &Request) -> Handshake {
    request
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .fold(Handshake::new(request.uri().path()), |h, (name, value)| {
            h.with_header(name, value)
        })
}

async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Arc<Gateway>,
    cancel: CancellationToken,
) -> Result<(), WebSocketError> {
    let mut handshake = Handshake::default();
    let mut ws = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            handshake = handshake_from(request);
            Ok(response)
        },
    )
    .await?;

    let connection = match gateway.resolve(&handshake.path) {
        Ok(channel) => gateway.connect(channel, &handshake).await,
        Err(e) => Err(e),
    };
    let connection = match connection {
        Ok(connection) => connection,
        Err(e) => {
            warn!(%peer, path = %handshake.path, "Refusing websocket client: {e}");
            ws.close(None).await?;
            return Ok(());
        }
    };
    pump(ws, connection, cancel).await
}

async fn pump<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut connection: ClientConnection,
    cancel: CancellationToken,
) -> Result<(), WebSocketError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = ws.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                sink.send(Message::Close(None)).await?;
                break;
            }
            envelope = connection.recv() => match envelope {
                Some(envelope) => {
                    sink.send(Message::Text(serde_json::to_string(&*envelope)?)).await?;
                }
                None => break,
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(&connection, &text).await {
                        sink.send(Message::Text(serde_json::to_string(&reply)?)).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

async fn handle_text(connection: &ClientConnection, text: &str) -> Option<Reply> {
    if connection.channel().namespace_kind() != NamespaceKind::Bidirectional {
        trace!(channel = %connection.channel(), "Ignoring client message on broadcast namespace");
        return None;
    }
    let request = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return Some(Reply::Error {
                message: format!("invalid request: {e}"),
            })
        }
    };
    Some(match connection.request(request).await {
        Ok(result) => Reply::Response { result },
        Err(e) => Reply::Error {
            message: e.to_string(),
        },
    })
}
