use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::routes::build_routes;
use crate::service::TokenService;

/// A bound but not yet serving token server. The bind/serve split lets
/// tests grab the ephemeral port before requests start flowing.
pub struct TokenServer {
    listener: TcpListener,
    service: Arc<TokenService>,
}

impl TokenServer {
    /// Binds `addr`. Use port 0 for an ephemeral port.
    pub async fn bind(addr: &str, service: Arc<TokenService>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until the process exits.
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("token service listening on {addr}");
        axum::serve(self.listener, build_routes(self.service)).await
    }
}
