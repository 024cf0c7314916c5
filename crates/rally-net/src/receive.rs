//! Per-connection read loop shared by the server and the client.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

/// Pause before retrying a read that reported no data yet.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Why a receive loop stopped.
#[derive(Debug)]
pub(crate) enum LoopExit {
    /// The peer closed its side of the stream.
    EndOfStream,
    /// The connection was closed locally.
    Closed,
    /// The owning server or client is shutting down.
    Shutdown,
    /// The transport failed.
    Failed(io::Error),
}

/// Read until the stream ends, fails, or either signal fires.
///
/// Each successful read of up to `buffer_size` bytes is handed to `on_data`
/// as one message. `on_data` must not block.
pub(crate) async fn receive_loop<R, F>(
    reader: &mut R,
    buffer_size: usize,
    shutdown_rx: &mut watch::Receiver<bool>,
    closed_rx: &mut watch::Receiver<bool>,
    mut on_data: F,
) -> LoopExit
where
    R: AsyncRead + Unpin,
    F: FnMut(Vec<u8>),
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        if *shutdown_rx.borrow() {
            return LoopExit::Shutdown;
        }
        if *closed_rx.borrow() {
            return LoopExit::Closed;
        }

        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => return LoopExit::EndOfStream,
                    Ok(n) => on_data(buf[..n].to_vec()),
                    Err(e) if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                    Err(e) => return LoopExit::Failed(e),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return LoopExit::Shutdown;
                }
            }
            changed = closed_rx.changed() => {
                if changed.is_err() || *closed_rx.borrow() {
                    return LoopExit::Closed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_delivers_data_then_end_of_stream() {
        let (mut server, mut client) = pair().await;
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (_closed_tx, mut closed_rx) = watch::channel(false);

        client.write_all(b"Player Connected").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        let exit = receive_loop(&mut server, 4096, &mut shutdown_rx, &mut closed_rx, |b| {
            received.extend_from_slice(&b)
        })
        .await;

        assert!(matches!(exit, LoopExit::EndOfStream));
        assert_eq!(received, b"Player Connected");
    }

    #[tokio::test]
    async fn test_reads_are_capped_at_buffer_size() {
        let (mut server, mut client) = pair().await;
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (_closed_tx, mut closed_rx) = watch::channel(false);

        client.write_all(&[7u8; 64]).await.unwrap();
        client.shutdown().await.unwrap();

        let mut chunks = Vec::new();
        receive_loop(&mut server, 8, &mut shutdown_rx, &mut closed_rx, |b| chunks.push(b)).await;

        assert!(chunks.iter().all(|c| c.len() <= 8));
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 64);
    }

    #[tokio::test]
    async fn test_close_signal_stops_loop() {
        let (mut server, _client) = pair().await;
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (closed_tx, mut closed_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closed_tx.send_replace(true);
            // Keep the sender alive past the signal.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let exit = receive_loop(&mut server, 64, &mut shutdown_rx, &mut closed_rx, |_| {}).await;
        assert!(matches!(exit, LoopExit::Closed));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_exits_immediately() {
        let (mut server, _client) = pair().await;
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(true);
        let (_closed_tx, mut closed_rx) = watch::channel(false);

        let exit = receive_loop(&mut server, 64, &mut shutdown_rx, &mut closed_rx, |_| {}).await;
        assert!(matches!(exit, LoopExit::Shutdown));
    }
}
