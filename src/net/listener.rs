use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, info_span, warn, Instrument};

use crate::error::ServerError;
use crate::net::session::{Session, SessionContext};

/// Pause after a failed accept so a persistent error such as descriptor
/// exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listener {
    inner: TcpListener,
    ctx: Arc<SessionContext>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, ctx: Arc<SessionContext>) -> Result<Self, ServerError> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { inner, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves, running each one as
    /// its own session task. A failed accept is logged and retried.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, "listening for connections");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(%addr, "listener stopping");
                    return Ok(());
                }
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, peer)) => self.start_session(stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    fn start_session(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        info!(%peer, "client connected");
        let session = Session::new(stream, Arc::clone(&self.ctx));
        tokio::spawn(
            async move {
                match session.run().await {
                    Ok(()) => info!("client disconnected"),
                    Err(e) => warn!(error = %e, "session ended with error"),
                }
            }
            .instrument(info_span!("session", %peer)),
        );
    }
}
