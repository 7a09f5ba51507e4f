//! Streams worker logs back to the orchestrator's console.
//!
//! The orchestrator binds a [`LogRelay`] and passes its address to every
//! worker with `--remote-logger`. Workers [`dial`] it and log through a
//! [`PrefixWriter`], so lines from many tasks stay attributable.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// This machine's hostname, or `localhost` if it can't be read.
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Listener that copies every accepted connection to a local sink.
pub struct LogRelay {
    listener: TcpListener,
    addr: String,
}

impl LogRelay {
    /// Binds an ephemeral port on all interfaces.
    pub async fn bind() -> Result<Self> {
        Self::bind_to("0.0.0.0:0").await
    }

    pub async fn bind_to(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let addr = advertised(local);
        debug!("log relay listening on {local}, advertised as {addr}");
        Ok(Self { listener, addr })
    }

    /// Address workers should dial.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Copies every connection to standard error until the task is
    /// aborted.
    pub fn start(self) -> JoinHandle<()> {
        self.start_with(tokio::io::stderr)
    }

    /// Copies every connection to a fresh sink from `sink`.
    pub fn start_with<F, W>(self, sink: F) -> JoinHandle<()>
    where
        F: Fn() -> W + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                let (mut stream, peer) = match self.listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("log relay accept failed: {e}");
                        continue;
                    }
                };
                let mut out = sink();
                tokio::spawn(async move {
                    if let Err(e) = tokio::io::copy(&mut stream, &mut out).await {
                        warn!("log relay from {peer} ended: {e}");
                    }
                });
            }
        })
    }
}

fn advertised(local: SocketAddr) -> String {
    if local.ip().is_unspecified() {
        format!("{}:{}", hostname(), local.port())
    } else {
        local.to_string()
    }
}

/// Connects to a relay at `addr`, giving up after [`DIAL_TIMEOUT`].
///
/// The stream comes back in blocking mode, ready for a synchronous log
/// writer.
pub async fn dial(addr: &str) -> Result<TcpStream> {
    let stream = timeout(DIAL_TIMEOUT, tokio::net::TcpStream::connect(addr))
        .await
        .map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("dialing remote logger {addr} timed out"),
            ))
        })??;
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    Ok(stream)
}

/// Tag written ahead of each worker log write.
pub fn prefix(host: &str, stage: &str, step: usize) -> String {
    format!("[{host} {stage}:{step}] ")
}

/// Writes a fixed prefix ahead of every write.
///
/// The log subscriber formats each event into one buffer before writing,
/// so each event gets exactly one prefix.
pub struct PrefixWriter<W> {
    prefix: String,
    inner: W,
}

impl<W: Write> PrefixWriter<W> {
    pub fn new(prefix: String, inner: W) -> Self {
        Self { prefix, inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for PrefixWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut line = Vec::with_capacity(self.prefix.len() + buf.len());
        line.extend_from_slice(self.prefix.as_bytes());
        line.extend_from_slice(buf);
        self.inner.write_all(&line)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    #[test]
    fn prefixes_every_write() {
        let mut w = PrefixWriter::new(prefix("node-1", "mapper", 2), Vec::new());
        w.write_all(b"first\n").unwrap();
        w.write_all(b"second\n").unwrap();
        assert_eq!(
            String::from_utf8(w.into_inner()).unwrap(),
            "[node-1 mapper:2] first\n[node-1 mapper:2] second\n"
        );
    }

    #[tokio::test]
    async fn advertises_hostname_for_wildcard_bind() {
        let relay = LogRelay::bind().await.unwrap();
        let port = relay.listener.local_addr().unwrap().port();
        assert_eq!(relay.addr(), format!("{}:{port}", hostname()));

        let relay = LogRelay::bind_to("127.0.0.1:0").await.unwrap();
        assert!(relay.addr().starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn copies_connections_to_sink() {
        let relay = LogRelay::bind_to("127.0.0.1:0").await.unwrap();
        let addr = relay.addr().to_string();
        let (readers_tx, mut readers) = mpsc::unbounded_channel();
        let task = relay.start_with(move || {
            let (writer, reader) = tokio::io::duplex(1024);
            let _ = readers_tx.send(reader);
            writer
        });

        let mut conn = tokio::net::TcpStream::connect(&addr).await.unwrap();
        conn.write_all(b"[node-1 reducer:0] hello\n").await.unwrap();
        conn.shutdown().await.unwrap();
        drop(conn);

        let mut reader = readers.recv().await.unwrap();
        let mut got = String::new();
        reader.read_to_string(&mut got).await.unwrap();
        assert_eq!(got, "[node-1 reducer:0] hello\n");
        task.abort();
    }

    #[tokio::test]
    async fn dial_reaches_relay() {
        let relay = LogRelay::bind_to("127.0.0.1:0").await.unwrap();
        let addr = relay.addr().to_string();
        let stream = dial(&addr).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().to_string(), addr);
    }

    #[tokio::test]
    async fn dial_fails_without_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(dial(&addr).await, Err(Error::Io(_))));
    }
}
