// mock_operator_server: a mock operator event stream for testing the
// Mirror's connection lifecycle without a real cluster.
//
// Accepts POST connections on http://127.0.0.1:<port>, replies either with
// a 307 (when `redirect_next` is armed) or a 200 with chunked transfer
// encoding, then streams whatever is pushed via `send_frame`/`send_raw`
// length-prefixed onto the body until the connection is dropped.

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

/// A mock operator stream for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port. Only one
/// client connection is served meaningfully at a time — the second and
/// later connections each get their own frame channel, useful for
/// reconnect-loop tests.
pub struct MockOperatorServer {
    addr: SocketAddr,
    redirect_next: Arc<AtomicBool>,
    current_tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockOperatorServer {
    pub async fn start() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let redirect_next = Arc::new(AtomicBool::new(false));
        let current_tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>> = Arc::new(Mutex::new(None));

        let redirect_flag = redirect_next.clone();
        let tx_slot = current_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let redirect_flag = redirect_flag.clone();
                let tx_slot = tx_slot.clone();
                tokio::spawn(async move {
                    let _ = Self::handle_connection(stream, redirect_flag, tx_slot).await;
                });
            }
        });

        Ok(Self { addr, redirect_next, current_tx, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The next incoming SUBSCRIBE gets a 307 instead of a stream.
    pub fn redirect_next_connection(&self) {
        self.redirect_next.store(true, Ordering::SeqCst);
    }

    /// Sends one length-prefixed JSON frame down the currently open
    /// connection's body, if one is open. Silently drops if no client is
    /// connected yet (callers should await the connection first by polling
    /// `has_client`).
    pub async fn send_frame(&self, event: Value) {
        let payload = event.to_string();
        let framed = format!("{}\n{}", payload.len(), payload).into_bytes();
        if let Some(tx) = self.current_tx.lock().await.as_ref() {
            let _ = tx.send(framed).await;
        }
    }

    pub async fn has_client(&self) -> bool {
        self.current_tx.lock().await.is_some()
    }

    /// Drops the active connection, simulating transport death.
    pub async fn drop_connection(&self) {
        *self.current_tx.lock().await = None;
    }

    async fn handle_connection(
        mut stream: tokio::net::TcpStream,
        redirect_next: Arc<AtomicBool>,
        tx_slot: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    ) -> Result<(), std::io::Error> {
        let mut buf = vec![0u8; 8192];
        // Drain the request headers; we don't need to parse them for these tests.
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 || buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        if redirect_next.swap(false, Ordering::SeqCst) {
            stream
                .write_all(b"HTTP/1.1 307 Temporary Redirect\r\nLocation: /\r\nContent-Length: 0\r\n\r\n")
                .await?;
            return Ok(());
        }

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        *tx_slot.lock().await = Some(tx);

        while let Some(chunk) = rx.recv().await {
            let header = format!("{:x}\r\n", chunk.len());
            if stream.write_all(header.as_bytes()).await.is_err() {
                break;
            }
            if stream.write_all(&chunk).await.is_err() {
                break;
            }
            if stream.write_all(b"\r\n").await.is_err() {
                break;
            }
        }

        let _ = stream.write_all(b"0\r\n\r\n").await;
        *tx_slot.lock().await = None;
        Ok(())
    }
}
