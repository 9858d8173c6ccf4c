//! HTTP server setup.
//!
//! Listens on TCP and dispatches every request to [`crate::routes::handle`].

use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::Server;

use packer_core::config::PackerConfig;
use packer_runtime::{ImageRuntime, PackagingPipeline};

use crate::routes::{self, AppState};

/// Image packer HTTP server.
pub struct PackServer {
    state: AppState,
}

impl PackServer {
    /// Create a server packing images through `runtime`.
    pub fn new(config: Arc<PackerConfig>, runtime: Arc<dyn ImageRuntime>) -> Self {
        let pipeline = PackagingPipeline::new(runtime, config.clone());
        Self {
            state: AppState { config, pipeline },
        }
    }

    /// Bind `addr` and serve until SIGINT or SIGTERM.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(addr)?;
        self.serve_listener(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()>,
    {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let state = self.state;
        let make_service = make_service_fn(move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| routes::handle(state.clone(), req)))
            }
        });

        tracing::info!(addr = %local_addr, "Image packer listening");

        Server::from_tcp(listener)?
            .serve(make_service)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Image packer stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
