//! HTTP/1 listener.
//!
//! Each accepted connection is served on its own task by hyper. When the
//! shutdown signal fires the listener stops accepting, every open connection
//! is asked to finish its in-flight request and close, and the server waits
//! up to the grace window before aborting whatever is left.

use crate::error::{ServerError, ServerResult};
use crate::shutdown::ShutdownSignal;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use wobbly_core::ExecutionContext;
use wobbly_middleware::{BoxedHandler, Handler, Response, ResponseExt};

/// Pause after an accept error that is not tied to a single connection, such
/// as running out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener serving one handler.
pub struct Server {
    name: &'static str,
    listener: TcpListener,
    handler: BoxedHandler,
    grace: Duration,
}

impl Server {
    /// Binds `addr`. `name` identifies the listener in logs and errors.
    pub async fn bind(
        name: &'static str,
        addr: SocketAddr,
        handler: BoxedHandler,
        grace: Duration,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                listener: name,
                addr,
                source,
            })?;

        Ok(Self {
            name,
            listener,
            handler,
            grace,
        })
    }

    /// Returns the address actually bound, useful after binding port 0.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` fires, then drains.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let Self {
            name,
            listener,
            handler,
            grace,
        } = self;
        let addr = listener.local_addr()?;
        tracing::info!(listener = name, %addr, "listening");

        let mut connections = JoinSet::new();
        let mut stop = shutdown.recv();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::trace!(listener = name, %peer, "accepted connection");
                        connections.spawn(serve_connection(
                            stream,
                            Arc::clone(&handler),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(listener = name, error = %e, "failed to accept connection");
                        if let Some(backoff) = accept_backoff(&e) {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                () = &mut stop => {
                    tracing::info!(
                        listener = name,
                        "shutdown signal received, no longer accepting connections"
                    );
                    break;
                }
            }
        }
        drop(listener);

        if !connections.is_empty() {
            tracing::info!(
                listener = name,
                active = connections.len(),
                "waiting for in-flight connections"
            );
        }

        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                listener = name,
                remaining = connections.len(),
                ?grace,
                "grace period elapsed, closing remaining connections"
            );
            connections.shutdown().await;
        }

        tracing::info!(listener = name, "stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("addr", &self.listener.local_addr().ok())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

/// Connection-level failures only affect the peer that caused them, so the
/// next accept can proceed at once. Anything else gets a short pause.
fn accept_backoff(error: &std::io::Error) -> Option<Duration> {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}

async fn serve_connection(stream: TcpStream, handler: BoxedHandler, shutdown: ShutdownSignal) {
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(dispatch(&*handler, request).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut stop = shutdown.recv();
    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(error = %e, "connection error");
            }
        }
        () = &mut stop => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "connection error while draining");
            }
        }
    }
}

/// Buffers the request body and runs the handler with a fresh context.
async fn dispatch(handler: &dyn Handler, request: hyper::Request<Incoming>) -> Response {
    let (parts, body) = request.into_parts();
    let body: Bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "could not read request body");
            return Response::empty(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let request = http::Request::from_parts(parts, Full::new(body));
    handler.call(ExecutionContext::new(), request).await
}
