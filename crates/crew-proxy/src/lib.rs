//! Stdio↔SSE bridge.
//!
//! An MCP client runs this as a subprocess; we connect to a persistent
//! daemon's SSE endpoint and shuttle JSON-RPC frames both ways. Reader
//! (stdin → POST) and writer (SSE → stdout) are independent tasks: stdin
//! EOF ends only the reader, and a stdout write error ends only the
//! writer's output, never the other direction. Transient transport errors
//! drop the offending frame with one log line.

mod sse;

pub use sse::{SseEvent, SseEventParser};

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Bridge the process's own stdio to the daemon at `base_url`
/// (e.g. `http://127.0.0.1:8100`).
pub async fn run_proxy(base_url: &str) -> Result<()> {
    run_bridge(tokio::io::stdin(), tokio::io::stdout(), base_url).await
}

/// Transport-generic bridge core (tests drive it with pipes).
pub async fn run_bridge<R, W>(input: R, output: W, base_url: &str) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    // No global timeout: the SSE stream is expected to live indefinitely.
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let sse_url = format!("{}/sse", base_url.trim_end_matches('/'));
    let response = client
        .get(&sse_url)
        .header("accept", "text/event-stream")
        .send()
        .await
        .with_context(|| format!("failed to connect to {sse_url}"))?;
    if !response.status().is_success() {
        bail!("daemon refused SSE connection: {}", response.status());
    }

    let mut stream = response.bytes_stream();
    let mut parser = SseEventParser::default();

    // The first event names the per-session POST endpoint. Message events
    // sharing a chunk with it are kept for the writer.
    let mut pending: Vec<SseEvent> = Vec::new();
    let endpoint = 'endpoint: loop {
        let Some(chunk) = stream.next().await else {
            bail!("SSE stream ended before the endpoint event");
        };
        let chunk = chunk.context("failed to read SSE chunk")?;
        let mut events = parser.push(&String::from_utf8_lossy(&chunk)).into_iter();
        for event in events.by_ref() {
            if event.event == "endpoint" {
                let url = resolve_endpoint(base_url, &event.data);
                pending.extend(events);
                break 'endpoint url;
            }
            pending.push(event);
        }
    };
    info!(endpoint = %endpoint, "SSE session established");

    // Reader: stdin frames → POST. Ends at stdin EOF without touching the
    // SSE side.
    let post_client = client.clone();
    let post_url = endpoint.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let frame = line.trim().to_string();
                    if frame.is_empty() {
                        continue;
                    }
                    match post_client
                        .post(&post_url)
                        .header("content-type", "application/json")
                        .body(frame)
                        .send()
                        .await
                    {
                        Ok(response) if response.status().is_success() => {}
                        Ok(response) => {
                            warn!(status = %response.status(), "daemon rejected frame; dropping it");
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to forward frame; dropping it");
                        }
                    }
                }
                Ok(None) => {
                    debug!("stdin closed; reader task done (SSE side stays up)");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read error; reader task done");
                    break;
                }
            }
        }
    });

    // Writer: SSE message events → stdout. Output errors stop writing but
    // keep draining the stream so the reader side is unaffected.
    let mut output = output;
    let mut output_alive = true;
    for event in pending {
        emit(event, &mut output, &mut output_alive).await;
    }
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "SSE stream error; ending writer");
                break;
            }
        };
        for event in parser.push(&String::from_utf8_lossy(&chunk)) {
            emit(event, &mut output, &mut output_alive).await;
        }
    }

    info!("SSE stream ended; waiting for stdin to close");
    reader.await.context("reader task panicked")?;
    Ok(())
}

/// Forward one SSE event to the client, tolerating a dead output.
async fn emit<W: AsyncWrite + Unpin>(event: SseEvent, output: &mut W, output_alive: &mut bool) {
    if event.event != "message" {
        debug!(event = %event.event, "ignoring non-message SSE event");
        return;
    }
    if !*output_alive {
        return;
    }
    let mut frame = event.data;
    frame.push('\n');
    if let Err(e) = output.write_all(frame.as_bytes()).await {
        warn!(error = %e, "stdout write failed; dropping further output");
        *output_alive = false;
        return;
    }
    if let Err(e) = output.flush().await {
        warn!(error = %e, "stdout flush failed; dropping further output");
        *output_alive = false;
    }
}

/// The endpoint event's data may be absolute or server-relative.
fn resolve_endpoint(base_url: &str, data: &str) -> String {
    let data = data.trim();
    if data.starts_with("http://") || data.starts_with("https://") {
        data.to_string()
    } else if data.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), data)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_resolve_endpoint_variants() {
        let base = "http://127.0.0.1:8100";
        assert_eq!(
            resolve_endpoint(base, "/message?sessionId=1"),
            "http://127.0.0.1:8100/message?sessionId=1"
        );
        assert_eq!(
            resolve_endpoint(base, "message?sessionId=1"),
            "http://127.0.0.1:8100/message?sessionId=1"
        );
        assert_eq!(
            resolve_endpoint(base, "http://127.0.0.1:9000/m"),
            "http://127.0.0.1:9000/m"
        );
    }

    /// Minimal SSE server for one GET connection: sends the endpoint event
    /// and the given message frames, then optionally stays open.
    async fn serve_sse_once(
        listener: TcpListener,
        messages: Vec<String>,
        close_after: bool,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept SSE client");
            // Drain the request head.
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;

            let mut body = String::from(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n",
            );
            body.push_str("event: endpoint\ndata: /message?sessionId=t1\n\n");
            for message in &messages {
                body.push_str(&format!("event: message\ndata: {message}\n\n"));
            }
            socket.write_all(body.as_bytes()).await.expect("write SSE");
            socket.flush().await.expect("flush SSE");
            if close_after {
                drop(socket);
            } else {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_messages_flow_to_output_after_stdin_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let frames = vec![
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string(),
            r#"{"jsonrpc":"2.0","id":2,"result":{}}"#.to_string(),
        ];
        let server = serve_sse_once(listener, frames.clone(), true).await;

        // stdin closes immediately; the SSE side must still deliver.
        let (stdin_reader, stdin_writer) = tokio::io::duplex(1024);
        drop(stdin_writer);
        let (stdout_writer, mut stdout_reader) = pipe();

        let url = format!("http://127.0.0.1:{port}");
        let bridge = run_bridge(stdin_reader, stdout_writer, &url);
        tokio::time::timeout(std::time::Duration::from_secs(5), bridge)
            .await
            .expect("bridge timed out")
            .expect("bridge failed");

        let mut collected = String::new();
        stdout_reader
            .read_to_string(&mut collected)
            .await
            .expect("read bridged output");
        assert_eq!(
            collected,
            format!("{}\n{}\n", frames[0], frames[1]),
        );
        server.abort();
    }

    #[tokio::test]
    async fn test_stdin_frames_are_posted_to_the_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (body_tx, body_rx) = tokio::sync::oneshot::channel::<String>();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            // First connection: the SSE stream. Send the endpoint event and
            // hold the socket open until the POST has landed.
            let (mut sse_socket, _) = listener.accept().await.expect("accept SSE");
            let mut buf = [0u8; 2048];
            let _ = sse_socket.read(&mut buf).await;
            sse_socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n\
                      event: endpoint\ndata: /message?sessionId=t2\n\n",
                )
                .await
                .expect("write endpoint event");
            sse_socket.flush().await.expect("flush SSE");

            // Second connection: the POST carrying the stdin frame.
            let (mut post_socket, _) = listener.accept().await.expect("accept POST");
            let mut request = Vec::new();
            loop {
                let mut chunk = [0u8; 1024];
                let n = post_socket.read(&mut chunk).await.expect("read POST");
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        let body = text[header_end + 4..].to_string();
                        post_socket
                            .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n")
                            .await
                            .expect("write 202");
                        post_socket.flush().await.expect("flush 202");
                        let _ = body_tx.send(body);
                        break;
                    }
                }
            }

            // Let the bridge finish: close the SSE stream on request.
            let _ = close_rx.await;
            drop(sse_socket);
        });

        let (stdin_reader, mut stdin_writer) = tokio::io::duplex(1024);
        let (stdout_writer, _stdout_reader) = pipe();
        let base_url = format!("http://127.0.0.1:{port}");
        let bridge =
            tokio::spawn(async move { run_bridge(stdin_reader, stdout_writer, &base_url).await });

        let frame = r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#;
        stdin_writer
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
        stdin_writer.flush().await.unwrap();

        let body = tokio::time::timeout(std::time::Duration::from_secs(5), body_rx)
            .await
            .expect("POST never arrived")
            .expect("server dropped");
        assert_eq!(body, frame);

        drop(stdin_writer);
        let _ = close_tx.send(());
        tokio::time::timeout(std::time::Duration::from_secs(5), bridge)
            .await
            .expect("bridge timed out")
            .expect("bridge join failed")
            .expect("bridge failed");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_fails_cleanly_when_daemon_is_down() {
        // Grab a port and release it so nothing listens there.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (stdin_reader, _stdin_writer) = tokio::io::duplex(64);
        let (stdout_writer, _stdout_reader) = pipe();
        let err = run_bridge(
            stdin_reader,
            stdout_writer,
            &format!("http://127.0.0.1:{port}"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to connect"));
    }

    fn pipe() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
        tokio::io::duplex(64 * 1024)
    }
}
