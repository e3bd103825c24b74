//! Persistent WebSocket connection carrying framed requests in both directions
//!
//! Either side may send a [`StreamingRequest`] at any time. The peer answers with a
//! [`StreamingResponse`] carrying the same request id, which completes the waiting
//! sender. Inbound requests are handed to a [`RequestHandler`] on their own task so a
//! handler can itself send requests and await their responses while the receive loop
//! keeps running.

use std::{collections::HashMap, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{oneshot, watch, Mutex, RwLock},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::{
    codec::streaming::{Frame, StreamingCodec, StreamingRequest, StreamingResponse},
    protocol::error::SkillError,
};

type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
type WsSource = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Lifecycle of a physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket is open but inbound frames are not being read yet
    Connecting,
    /// Receive loop is running
    Listening,
    /// Socket closed; every pending and future request fails
    Closed,
}

/// Answers requests arriving from the peer
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn process_request(&self, request: StreamingRequest) -> StreamingResponse;
}

/// Sends a request to the peer and awaits the correlated response
#[async_trait]
pub trait StreamingSender: Send + Sync {
    async fn send_request(
        &self,
        request: StreamingRequest,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse, SkillError>;
}

struct Inner {
    sink: Mutex<WsSink>,
    source: Mutex<Option<WsSource>>,
    /// Response channels for pending requests
    pending: RwLock<HashMap<String, oneshot::Sender<StreamingResponse>>>,
    state: watch::Sender<ConnectionState>,
    codec: StreamingCodec,
}

impl Inner {
    async fn write_frame(&self, frame: &Frame) -> Result<(), SkillError> {
        let text = self.codec.encode_frame(frame)?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| SkillError::Transport(format!("WebSocket send failed: {}", e)))
    }

    async fn complete(&self, response: StreamingResponse) {
        let waiter = self.pending.write().await.remove(&response.request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(request_id = %response.request_id, "Dropping uncorrelated response"),
        }
    }

    async fn shut_down(&self) {
        self.state.send_replace(ConnectionState::Closed);
        // Dropping the senders wakes every waiter with a closed-channel error
        self.pending.write().await.clear();
    }
}

/// One end of a framed WebSocket connection
#[derive(Clone)]
pub struct StreamingConnection {
    inner: Arc<Inner>,
}

impl StreamingConnection {
    /// Wrap an established WebSocket
    ///
    /// The connection starts in [`ConnectionState::Connecting`]; call [`listen`](Self::listen)
    /// to start reading frames.
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        Self {
            inner: Arc::new(Inner {
                sink: Mutex::new(Box::pin(sink)),
                source: Mutex::new(Some(Box::pin(source))),
                pending: RwLock::new(HashMap::new()),
                state,
                codec: StreamingCodec::new(),
            }),
        }
    }

    /// Open a client connection to a skill's WebSocket endpoint
    pub async fn connect(url: &Url) -> Result<Self, SkillError> {
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SkillError::Transport(format!("WebSocket connection failed: {}", e)))?;
        Ok(Self::new(ws))
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Start the receive loop, dispatching inbound requests to `handler`
    pub async fn listen(&self, handler: Arc<dyn RequestHandler>) -> Result<(), SkillError> {
        let mut source = self
            .inner
            .source
            .lock()
            .await
            .take()
            .ok_or_else(|| SkillError::Transport("Connection is already listening".into()))?;

        self.inner.state.send_replace(ConnectionState::Listening);
        let inner = self.inner.clone();

        tokio::spawn(async move {
            while let Some(result) = source.next().await {
                match result {
                    Ok(Message::Text(text)) => match inner.codec.decode_frame(&text) {
                        Ok(Frame::Request(request)) => {
                            let inner = inner.clone();
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let request_id = request.request_id.clone();
                                let mut response = handler.process_request(request).await;
                                response.request_id = request_id;
                                if let Err(e) = inner.write_frame(&Frame::Response(response)).await
                                {
                                    warn!("Failed to answer WebSocket request: {}", e);
                                }
                            });
                        }
                        Ok(Frame::Response(response)) => inner.complete(response).await,
                        Err(e) => warn!("Ignoring malformed WebSocket frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        error!("WebSocket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            inner.shut_down().await;
            debug!("WebSocket receive loop finished");
        });

        Ok(())
    }

    /// Wait until the connection is closed
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Close the socket and fail every pending request
    pub async fn close(&self) -> Result<(), SkillError> {
        let result = self.inner.sink.lock().await.close().await;
        self.inner.shut_down().await;
        result.map_err(SkillError::from)
    }
}

#[async_trait]
impl StreamingSender for StreamingConnection {
    async fn send_request(
        &self,
        request: StreamingRequest,
        cancel: CancellationToken,
    ) -> Result<StreamingResponse, SkillError> {
        if self.state() == ConnectionState::Closed {
            return Err(SkillError::Transport("Connection is closed".into()));
        }

        let request_id = request.request_id.clone();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .write()
            .await
            .insert(request_id.clone(), tx);

        if let Err(e) = self.inner.write_frame(&Frame::Request(request)).await {
            self.inner.pending.write().await.remove(&request_id);
            return Err(e);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                self.inner.pending.write().await.remove(&request_id);
                Err(SkillError::Cancelled)
            }
            response = rx => response.map_err(|_| {
                SkillError::Transport("Connection closed before a response arrived".into())
            }),
        }
    }
}

impl std::fmt::Debug for StreamingConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingConnection")
            .field("state", &self.state())
            .finish()
    }
}
