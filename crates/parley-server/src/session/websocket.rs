//! WebSocket connection worker.
//!
//! Reads the upgrade request line by line, answers with `101 Switching
//! Protocols` or the chat page, then relays text frames until the peer
//! closes, misbehaves or goes quiet past the read deadline.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::Stream;
use parley_protocol::handshake::{html_response, switching_protocols_response};
use parley_protocol::{FrameCodec, HandshakeRequest, Message, Negotiation};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{Instrument, debug, info, info_span, warn};

use super::{CloseReason, SessionContext, leave, read_line, respond_and_close};
use crate::connection::{Connection, ConnectionKind, ConnectionState};
use crate::deadline::ReadDeadline;
use crate::errors::SessionError;
use crate::pages::CHAT_PAGE;
use crate::writer::spawn_writer;

/// Serve one connection accepted on the WebSocket port.
pub async fn serve<R, W>(reader: R, writer: W, peer: SocketAddr, ctx: SessionContext)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (conn, outbound) = ctx.connection(peer, ConnectionKind::WebSocket);
    let span = info_span!("websocket", conn_id = %conn.id, %peer);
    run(conn, outbound, reader, writer, ctx).instrument(span).await;
}

async fn run<R, W>(
    conn: Arc<Connection>,
    outbound: mpsc::Receiver<Arc<str>>,
    reader: R,
    mut writer: W,
    ctx: SessionContext,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let deadline = ctx.config.read_deadline();
    let _ = conn.transition(ConnectionState::Handshaking);
    let mut lines = FramedRead::new(
        reader,
        LinesCodec::new_with_max_length(ctx.config.max_line_length),
    );

    let request = tokio::select! {
        () = conn.closed() => {
            conn.finish();
            return;
        }
        request = read_request(&mut lines, deadline) => request,
    };
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "handshake aborted");
            conn.finish();
            return;
        }
    };

    let accept_key = match request.negotiate() {
        Negotiation::Upgrade { accept_key } => accept_key,
        Negotiation::PlainHttp { head_only } => {
            debug!(
                request = request.request_line(),
                head_only, "serving chat page"
            );
            let response = html_response(CHAT_PAGE, head_only);
            if let Err(e) = respond_and_close(&mut writer, &response).await {
                debug!(error = %e, "failed to send chat page");
            }
            conn.finish();
            return;
        }
    };

    if let Err(e) = send_upgrade(&mut writer, &accept_key).await {
        debug!(error = %e, "failed to send upgrade response");
        conn.finish();
        return;
    }
    if let Err(e) = conn.transition(ConnectionState::Open) {
        warn!(error = %e, "connection closed during upgrade");
        conn.finish();
        return;
    }

    // Bytes already buffered past the blank line belong to the first frame.
    let frames = lines.map_decoder(|_| FrameCodec::new());
    let writer = spawn_writer(
        Arc::clone(&conn),
        FramedWrite::new(writer, FrameCodec::new()),
        outbound,
    );
    if !ctx.registry.add(Arc::clone(&conn)).await {
        leave(&conn, writer, &ctx, CloseReason::ServerClosed).await;
        return;
    }
    let connections = ctx.registry.len().await;
    info!(connections, "websocket peer joined");

    let reason = relay(frames, &conn, &ctx, deadline).await;
    leave(&conn, writer, &ctx, reason).await;
}

/// Read the request line and, for `GET`/`HEAD`, every header up to the blank
/// line. Other methods return immediately so the fallback is served without
/// waiting on headers.
async fn read_request<S>(
    lines: &mut S,
    deadline: ReadDeadline,
) -> Result<HandshakeRequest, SessionError>
where
    S: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    let first = read_line(lines, deadline)
        .await?
        .ok_or(SessionError::ClosedDuringHandshake)?;
    let mut request = HandshakeRequest::new(first);
    if !request.method().is_http_read() {
        return Ok(request);
    }
    loop {
        let line = read_line(lines, deadline)
            .await?
            .ok_or(SessionError::ClosedDuringHandshake)?;
        if line.is_empty() {
            return Ok(request);
        }
        request.push_header_line(&line);
    }
}

async fn send_upgrade<W>(writer: &mut W, accept_key: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(switching_protocols_response(accept_key).as_bytes())
        .await?;
    writer.flush().await
}

async fn relay<R>(
    mut frames: FramedRead<R, FrameCodec>,
    conn: &Connection,
    ctx: &SessionContext,
    deadline: ReadDeadline,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            () = conn.closed() => return CloseReason::ServerClosed,
            next = deadline.next(&mut frames) => next,
        };
        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(None) => return CloseReason::PeerDisconnected,
            Ok(Some(Err(e))) => return failed(&SessionError::from(e)),
            Err(e) => return failed(&e),
        };
        match frame.into_message() {
            Message::Text(text) => {
                debug!(bytes = text.len(), "relaying message");
                let _ = ctx.broadcaster.broadcast(&text).await;
            }
            Message::Close => return CloseReason::PeerClosed,
        }
    }
}

fn failed(err: &SessionError) -> CloseReason {
    let reason = CloseReason::from(err);
    if reason == CloseReason::ProtocolViolation {
        warn!(error = %err, "closing connection on protocol violation");
    } else {
        debug!(error = %err, "read failed");
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::registry::Registry;
    use parley_protocol::mask::apply_mask;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn context(config: ServerConfig) -> SessionContext {
        SessionContext::new(Registry::spawn(), Arc::new(config))
    }

    fn start(ctx: &SessionContext) -> DuplexStream {
        start_with_buffer(ctx, 64 * 1024)
    }

    fn start_with_buffer(ctx: &SessionContext, buffer: usize) -> DuplexStream {
        let (client, server) = tokio::io::duplex(buffer);
        let (reader, writer) = tokio::io::split(server);
        let _ = tokio::spawn(serve(
            reader,
            writer,
            "127.0.0.1:53000".parse().unwrap(),
            ctx.clone(),
        ));
        client
    }

    fn masked_frame(first_byte: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() < 126);
        let mut body = payload.to_vec();
        apply_mask(&mut body, MASK);
        #[allow(clippy::cast_possible_truncation)]
        let mut frame = vec![first_byte, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&MASK);
        frame.extend_from_slice(&body);
        frame
    }

    async fn read_head(client: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(client.read_u8().await.unwrap());
        }
        String::from_utf8(head).unwrap()
    }

    async fn upgrade(client: &mut DuplexStream) -> String {
        let request = format!(
            "GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        client.write_all(request.as_bytes()).await.unwrap();
        read_head(client).await
    }

    async fn wait_for_len(registry: &Registry, expected: usize) {
        for _ in 0..400 {
            if registry.len().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry never reached {expected} connections");
    }

    #[tokio::test]
    async fn upgrade_registers_and_relays_to_sender() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);

        let head = upgrade(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        wait_for_len(&ctx.registry, 1).await;

        client.write_all(&masked_frame(0x81, b"hi")).await.unwrap();
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, [0x81, 0x02, b'h', b'i']);
    }

    /// Parse unmasked short text frames until end of stream.
    async fn read_texts_to_end(client: &mut DuplexStream) -> Vec<String> {
        let mut bytes = Vec::new();
        let _ = client.read_to_end(&mut bytes).await.unwrap();
        let mut texts = Vec::new();
        let mut rest = bytes.as_slice();
        while rest.len() >= 2 {
            assert_eq!(rest[0], 0x81);
            let len = usize::from(rest[1]);
            if rest.len() < 2 + len {
                break;
            }
            texts.push(String::from_utf8(rest[2..2 + len].to_vec()).unwrap());
            rest = &rest[2 + len..];
        }
        texts
    }

    #[tokio::test]
    async fn slow_peer_is_disconnected_instead_of_missing_messages() {
        let ctx = context(ServerConfig {
            max_send_queue: 4,
            ..ServerConfig::default()
        });
        let mut slow = start_with_buffer(&ctx, 64);
        let _ = upgrade(&mut slow).await;
        let mut fast = start(&ctx);
        let _ = upgrade(&mut fast).await;
        wait_for_len(&ctx.registry, 2).await;

        let sent: Vec<String> = (0..50).map(|i| format!("msg{i}")).collect();
        for text in &sent {
            fast.write_all(&masked_frame(0x81, text.as_bytes()))
                .await
                .unwrap();
        }

        for text in &sent {
            let mut head = [0u8; 2];
            fast.read_exact(&mut head).await.unwrap();
            let mut payload = vec![0u8; usize::from(head[1])];
            fast.read_exact(&mut payload).await.unwrap();
            assert_eq!(payload, text.as_bytes());
        }
        wait_for_len(&ctx.registry, 1).await;

        // Whatever reached the slow peer is an unbroken prefix.
        let received = read_texts_to_end(&mut slow).await;
        assert!(received.len() < sent.len());
        assert_eq!(received, sent[..received.len()]);
    }

    #[tokio::test]
    async fn failed_write_removes_only_that_peer() {
        let ctx = context(ServerConfig::default());

        // Separate pipes per direction so the outbound side can break while
        // the inbound side stays open.
        let (mut broken_in, server_in) = tokio::io::duplex(4096);
        let (server_out, mut broken_out) = tokio::io::duplex(4096);
        let _ = tokio::spawn(serve(
            server_in,
            server_out,
            "127.0.0.1:53001".parse().unwrap(),
            ctx.clone(),
        ));
        let request = format!("GET / HTTP/1.1\r\nSec-WebSocket-Key: {KEY}\r\n\r\n");
        broken_in.write_all(request.as_bytes()).await.unwrap();
        let _ = read_head(&mut broken_out).await;
        drop(broken_out);

        let mut healthy = start(&ctx);
        let _ = upgrade(&mut healthy).await;
        wait_for_len(&ctx.registry, 2).await;

        healthy.write_all(&masked_frame(0x81, b"ping")).await.unwrap();
        let mut echoed = [0u8; 6];
        healthy.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed[2..], b"ping");
        wait_for_len(&ctx.registry, 1).await;

        healthy.write_all(&masked_frame(0x81, b"again")).await.unwrap();
        let mut echoed = [0u8; 7];
        healthy.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed[2..], b"again");
        assert_eq!(ctx.registry.len().await, 1);
    }

    #[tokio::test]
    async fn frame_sent_with_handshake_is_not_lost() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);

        let mut bytes = format!(
            "GET / HTTP/1.1\r\nSec-WebSocket-Key: {KEY}\r\n\r\n"
        )
        .into_bytes();
        bytes.extend_from_slice(&masked_frame(0x81, b"early"));
        client.write_all(&bytes).await.unwrap();

        let _ = read_head(&mut client).await;
        let mut echoed = [0u8; 7];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed[..2], &[0x81, 0x05]);
        assert_eq!(&echoed[2..], b"early");
    }

    #[tokio::test]
    async fn plain_get_serves_chat_page_without_registering() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        let _ = client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with(CHAT_PAGE));
        assert_eq!(ctx.registry.len().await, 0);
    }

    #[tokio::test]
    async fn head_request_gets_headers_only() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);

        client.write_all(b"HEAD / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = String::new();
        let _ = client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(&format!("Content-Length: {}\r\n", CHAT_PAGE.len())));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn other_methods_get_page_before_headers_arrive() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);

        client.write_all(b"POST /submit HTTP/1.1\r\n").await.unwrap();
        let mut response = String::new();
        let _ = client.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(CHAT_PAGE));
    }

    #[tokio::test]
    async fn close_frame_deregisters_without_broadcast() {
        let ctx = context(ServerConfig::default());
        let (bystander, mut bystander_rx) = Connection::new(
            "127.0.0.1:53001".parse().unwrap(),
            ConnectionKind::WebSocket,
            8,
        );
        let _ = bystander.transition(ConnectionState::Handshaking).unwrap();
        let _ = bystander.transition(ConnectionState::Open).unwrap();
        assert!(ctx.registry.add(Arc::clone(&bystander)).await);

        let mut client = start(&ctx);
        let _ = upgrade(&mut client).await;
        wait_for_len(&ctx.registry, 2).await;

        client.write_all(&masked_frame(0x88, b"")).await.unwrap();
        wait_for_len(&ctx.registry, 1).await;

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsupported_length_closes_connection() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);
        let _ = upgrade(&mut client).await;
        wait_for_len(&ctx.registry, 1).await;

        client.write_all(&[0x81, 0xFF]).await.unwrap();
        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        wait_for_len(&ctx.registry, 0).await;
    }

    #[tokio::test]
    async fn truncated_handshake_is_not_registered() {
        let ctx = context(ServerConfig::default());
        let mut client = start(&ctx);
        client
            .write_all(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(ctx.registry.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_hits_read_deadline() {
        let ctx = context(ServerConfig {
            read_timeout: Some(Duration::from_secs(2)),
            ..ServerConfig::default()
        });
        let mut client = start(&ctx);
        let _ = upgrade(&mut client).await;

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        wait_for_len(&ctx.registry, 0).await;
    }

    #[tokio::test]
    async fn oversized_header_line_aborts_handshake() {
        let ctx = context(ServerConfig {
            max_line_length: 32,
            ..ServerConfig::default()
        });
        let mut client = start(&ctx);
        let long = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        client.write_all(long.as_bytes()).await.unwrap();

        let mut rest = Vec::new();
        let _ = client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(ctx.registry.len().await, 0);
    }
}
