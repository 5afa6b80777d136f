//! Line relay worker.
//!
//! Every non-blank line a peer sends reaches every peer as `Client: <line>`.
//! A connection whose first line starts with `GET` or `HEAD` is treated as a
//! browser: it gets a small status page and is never registered.
//!
//! Input is decoded as UTF-8 with invalid bytes replaced, so stray binary
//! never disconnects a peer. Lines longer than the configured maximum do.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parley_protocol::Method;
use parley_protocol::handshake::html_response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead, FramedWrite, LinesCodec};
use tracing::{Instrument, debug, info, info_span, warn};

use super::{CloseReason, SessionContext, leave, read_line, respond_and_close};
use crate::connection::{Connection, ConnectionKind, ConnectionState};
use crate::deadline::ReadDeadline;
use crate::pages::line_info_page;
use crate::writer::spawn_writer;

/// Prefix added to every relayed line.
pub const RELAY_PREFIX: &str = "Client: ";

/// Serve one connection accepted on the line port. `local` is the listener
/// address shown on the status page.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    peer: SocketAddr,
    local: SocketAddr,
    ctx: SessionContext,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (conn, outbound) = ctx.connection(peer, ConnectionKind::Line);
    let span = info_span!("line", conn_id = %conn.id, %peer);
    run(conn, outbound, reader, writer, local, ctx)
        .instrument(span)
        .await;
}

/// The greeting queued for a newly registered line peer.
pub fn welcome_message(connected: usize) -> String {
    format!("Welcome to parley! Connected users: {connected}")
}

async fn run<R, W>(
    conn: Arc<Connection>,
    outbound: mpsc::Receiver<Arc<str>>,
    reader: R,
    mut writer: W,
    local: SocketAddr,
    ctx: SessionContext,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let deadline = ctx.config.read_deadline();
    let _ = conn.transition(ConnectionState::Handshaking);
    let mut lines = lossy_lines(reader, ctx.config.max_line_length);

    let first = tokio::select! {
        () = conn.closed() => {
            conn.finish();
            return;
        }
        first = read_line(&mut lines, deadline) => first,
    };
    let first = match first {
        Ok(Some(line)) => line,
        Ok(None) => {
            debug!("peer left before sending anything");
            conn.finish();
            return;
        }
        Err(e) => {
            debug!(error = %e, "failed to read first line");
            conn.finish();
            return;
        }
    };

    let method = Method::from_request_line(&first);
    if method.is_http_read() {
        debug!(request = %first, "serving line relay status page");
        drain_headers(&mut lines, deadline).await;
        let page = line_info_page(ctx.registry.len().await, &local.to_string());
        let response = html_response(&page, method == Method::Head);
        if let Err(e) = respond_and_close(&mut writer, &response).await {
            debug!(error = %e, "failed to send status page");
        }
        conn.finish();
        return;
    }

    if let Err(e) = conn.transition(ConnectionState::Open) {
        warn!(error = %e, "connection closed before joining");
        conn.finish();
        return;
    }
    let writer = spawn_writer(
        Arc::clone(&conn),
        FramedWrite::new(writer, LinesCodec::new()),
        outbound,
    );
    if !ctx.registry.add(Arc::clone(&conn)).await {
        leave(&conn, writer, &ctx, CloseReason::ServerClosed).await;
        return;
    }
    let connected = ctx.registry.len().await;
    info!(connections = connected, "line peer joined");
    let _ = conn.send(Arc::from(welcome_message(connected)));

    relay_line(&first, &ctx).await;
    let reason = relay(lines, &conn, &ctx, deadline).await;
    leave(&conn, writer, &ctx, reason).await;
}

/// Split `reader` on `\n` and decode each line lossily, dropping a trailing
/// `\r`.
fn lossy_lines<R>(
    reader: R,
    max_length: usize,
) -> impl Stream<Item = Result<String, AnyDelimiterCodecError>> + Unpin
where
    R: AsyncRead + Unpin,
{
    let codec =
        AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_length);
    FramedRead::new(reader, codec).map(|chunk| chunk.map(|raw| decode_line(&raw)))
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Skip request headers up to the blank line. Errors end the drain; the
/// status page is sent regardless.
async fn drain_headers<S>(lines: &mut S, deadline: ReadDeadline)
where
    S: Stream<Item = Result<String, AnyDelimiterCodecError>> + Unpin,
{
    while let Ok(Some(line)) = read_line(lines, deadline).await {
        if line.is_empty() {
            break;
        }
    }
}

async fn relay_line(line: &str, ctx: &SessionContext) {
    if line.trim().is_empty() {
        return;
    }
    debug!(bytes = line.len(), "relaying line");
    let _ = ctx
        .broadcaster
        .broadcast(&format!("{RELAY_PREFIX}{line}"))
        .await;
}

async fn relay<S>(
    mut lines: S,
    conn: &Connection,
    ctx: &SessionContext,
    deadline: ReadDeadline,
) -> CloseReason
where
    S: Stream<Item = Result<String, AnyDelimiterCodecError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = conn.closed() => return CloseReason::ServerClosed,
            next = read_line(&mut lines, deadline) => next,
        };
        match next {
            Ok(Some(line)) => relay_line(&line, ctx).await,
            Ok(None) => return CloseReason::PeerDisconnected,
            Err(e) => {
                debug!(error = %e, "read failed");
                return CloseReason::from(&e);
            }
        }
    }
}
