//! Terminal client for the line relay.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::debug;

use crate::cli::ChatArgs;

/// Printed once the relay hangs up.
const DISCONNECTED: &str = "disconnected from server";

/// Connect to a line relay and chat over stdin/stdout.
pub async fn run(args: &ChatArgs) -> Result<()> {
    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, writer) = stream.into_split();
    chat(reader, writer, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Pump lines between the relay and the terminal.
///
/// Incoming lines print as `peer: <line>`. Non-empty input lines are sent and
/// echoed as `me: <line>`. Returns when the relay disconnects or input ends.
pub async fn chat<R, W, I, O>(reader: R, writer: W, input: I, output: O) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut incoming = FramedRead::new(reader, LinesCodec::new());
    let mut outgoing = FramedWrite::new(writer, LinesCodec::new());
    let mut input = FramedRead::new(input, LinesCodec::new());
    let mut output = FramedWrite::new(output, LinesCodec::new());

    loop {
        tokio::select! {
            line = incoming.next() => match line {
                Some(Ok(line)) => output.send(format!("peer: {line}")).await?,
                Some(Err(e)) => {
                    debug!(error = %e, "relay read failed");
                    break;
                }
                None => break,
            },
            line = input.next() => match line {
                Some(Ok(line)) if line.is_empty() => {}
                Some(Ok(line)) => {
                    if let Err(e) = outgoing.send(&line).await {
                        debug!(error = %e, "relay write failed");
                        break;
                    }
                    output.send(format!("me: {line}")).await?;
                }
                Some(Err(e)) => return Err(e).context("failed to read input"),
                None => return Ok(()),
            },
        }
    }

    output.send(DISCONNECTED).await?;
    Ok(())
}
