//! The HTTP management endpoint.
//!
//! Two paths only: `/` serves a static overview page and `/quit` shuts the
//! broker down. Plain text over TCP; two fixed responses did not justify
//! an HTTP stack.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use mqtt3_protocol::Result;

use crate::server::Broker;

const OVERVIEW_RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/html; charset=utf-8\r\n\
    Connection: close\r\n\
    \r\n\
    <h1>mqtt3d</h1>\n";

const QUIT_RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/plain; charset=utf-8\r\n\
    Connection: close\r\n\
    \r\n\
    shutting down\n";

const NOT_FOUND_RESPONSE: &str = "HTTP/1.1 404 Not Found\r\n\
    Content-Type: text/plain; charset=utf-8\r\n\
    Connection: close\r\n\
    \r\n\
    not found\n";

pub struct ManagementServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    broker: Arc<Broker>,
}

impl ManagementServer {
    pub async fn bind(addr: &str, broker: Arc<Broker>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(ManagementServer {
            listener,
            local_addr,
            broker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves requests until the broker shuts down; `/quit` triggers that
    /// shutdown itself.
    pub async fn run(self) -> Result<()> {
        info!(addr = %self.local_addr, "management endpoint listening");
        let mut shutdown_rx = self.broker.subscribe_shutdown();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Err(err) = self.handle(stream).await {
                            debug!(error = %err, "management request failed");
                        }
                    }
                    Err(err) => warn!(error = %err, "management accept failed"),
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("management endpoint stopped");
        Ok(())
    }

    async fn handle(&self, mut stream: TcpStream) -> Result<()> {
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let path = request.split_whitespace().nth(1).unwrap_or("/");
        debug!(path, "management request");

        match path {
            "/quit" => {
                stream.write_all(QUIT_RESPONSE.as_bytes()).await?;
                info!("shutdown requested via management endpoint");
                self.broker.stop();
            }
            "/" => stream.write_all(OVERVIEW_RESPONSE.as_bytes()).await?,
            _ => stream.write_all(NOT_FOUND_RESPONSE.as_bytes()).await?,
        }
        stream.shutdown().await?;
        Ok(())
    }
}
