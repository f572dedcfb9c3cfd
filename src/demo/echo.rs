use crate::component::{Server, Shutdown, StopMode};
use crate::error::{ForemanError, Result};
use crate::registry::ServiceInfo;
use crate::reload::{socket_file_name, ExportListener, InheritedListener};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Line echo server whose listener survives reloads
pub struct EchoServer {
    name: String,
    listener: TcpListener,
    addr: SocketAddr,
    accepting: AtomicBool,
}

impl EchoServer {
    pub fn from_listener(name: impl Into<String>, listener: TcpListener) -> Result<Self> {
        let addr = listener.local_addr()?;
        Ok(Self {
            name: name.into(),
            listener,
            addr,
            accepting: AtomicBool::new(false),
        })
    }

    pub async fn bind(name: impl Into<String>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ForemanError::Other(format!("Failed to bind {}: {}", addr, e))
        })?;
        Self::from_listener(name, listener)
    }

    /// Reuse the listener handed down by a reload, or bind a fresh one
    ///
    /// The inherited listener whose name matches `addr` is preferred; otherwise
    /// the first TCP listener is taken.
    pub async fn bind_or_inherit(
        name: impl Into<String>,
        addr: &str,
        inherited: &mut Vec<InheritedListener>,
    ) -> Result<Self> {
        let wanted = socket_file_name("tcp", addr);
        let position = inherited
            .iter()
            .position(|l| l.name == wanted)
            .or_else(|| inherited.iter().position(|l| l.name.starts_with("tcp-")));

        match position {
            Some(index) => {
                let listener = inherited.remove(index);
                info!("Reusing inherited listener {}", listener.name);
                Self::from_listener(name, listener.into_tcp()?)
            }
            None => Self::bind(name, addr).await,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Server for EchoServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "echo"
    }

    fn info(&self) -> ServiceInfo {
        ServiceInfo::new(&self.name, "tcp", self.addr.to_string()).with_kind(self.kind())
    }

    async fn start(&self, shutdown: Shutdown) -> anyhow::Result<()> {
        let mut connections = JoinSet::new();
        self.accepting.store(true, Ordering::SeqCst);
        info!("Echo server listening on {}", self.addr);

        let mode = loop {
            tokio::select! {
                mode = shutdown.requested() => break mode,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        connections.spawn(serve(stream, shutdown.clone()));
                    }
                    Err(e) => warn!("Accept failed on {}: {}", self.addr, e),
                },
            }
        };
        self.accepting.store(false, Ordering::SeqCst);

        match mode {
            StopMode::Graceful => {
                info!("Draining {} echo connections", connections.len());
                while let Some(joined) = connections.join_next().await {
                    if let Ok(Err(e)) = joined {
                        debug!("Connection ended with error: {}", e);
                    }
                }
            }
            StopMode::Forced => connections.abort_all(),
        }

        Ok(())
    }

    fn health(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    fn reload_listener(&self) -> Option<&dyn ExportListener> {
        Some(&self.listener as &dyn ExportListener)
    }
}

/// Echo lines back until the peer closes or a stop is requested
async fn serve(stream: TcpStream, shutdown: Shutdown) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = shutdown.requested() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                None => break,
            },
        }
    }

    writer.shutdown().await
}
