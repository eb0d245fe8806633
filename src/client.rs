//! Echo clients used to exercise the byte and line servers by hand.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info, info_span, Instrument};

use crate::config::{Config, ProtocolType};
use crate::error::{ConfigError, SessionError};
use crate::pipeline::Pipeline;

/// Sent when no `--message` is given.
pub const DEFAULT_MESSAGE: &str = "QUERY SEND TO SERVER";

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connect, run one exchange, disconnect.
///
/// Connection and transport failures are logged, not returned; only asking
/// for a protocol without a client is an error.
pub async fn run(config: &Config) -> Result<(), ConfigError> {
    let line_mode = match config.protocol {
        ProtocolType::Echo => false,
        ProtocolType::Line => true,
        other => return Err(ConfigError::NoClient(other)),
    };

    let message = config
        .message
        .clone()
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());
    let address = config.address();
    let span = info_span!("client", server = %address, protocol = ?config.protocol);

    let exchange = async {
        let stream = TcpStream::connect(&address).await?;
        stream.set_nodelay(true)?;
        info!("Connected");

        if line_mode {
            let line = line_exchange(stream, &message, config.max_line_length).await?;
            info!(line = %line, "Echo received, disconnecting");
        } else {
            let received = byte_exchange(stream, message.as_bytes()).await?;
            info!(bytes = received.len(), "Server closed connection");
        }
        Ok::<_, SessionError>(())
    };

    if let Err(e) = exchange.instrument(span.clone()).await {
        error!(parent: &span, error = %e, "Client failed");
    }
    Ok(())
}

/// Send `message`, then log and collect everything until the server closes.
pub async fn byte_exchange<S>(mut stream: S, message: &[u8]) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(message).await?;
    stream.flush().await?;

    let mut received = Vec::new();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.clear();
        buf.reserve(READ_BUFFER_SIZE);
        if stream.read_buf(&mut buf).await? == 0 {
            break;
        }
        info!(data = %String::from_utf8_lossy(&buf), "Client received");
        received.extend_from_slice(&buf);
    }

    Ok(received)
}

/// Send `message` as one line and return the first complete line read back.
pub async fn line_exchange<S>(
    mut stream: S,
    message: &str,
    max_line_length: usize,
) -> Result<String, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pipeline = Pipeline::line_based(max_line_length);

    let out = pipeline.outbound(BytesMut::from(message.as_bytes()))?;
    stream.write_all(&out).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        buf.reserve(READ_BUFFER_SIZE);
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(SessionError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed before echoing a line",
            )));
        }

        let inbound = pipeline.inbound(buf.split());
        if let Some(line) = inbound.messages.into_iter().next() {
            let line = String::from_utf8_lossy(&line).into_owned();
            info!(line = %line, "Client received");
            let _ = stream.shutdown().await;
            return Ok(line);
        }
        if let Some(e) = inbound.error {
            return Err(e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliArgs, TomlConfig};
    use clap::Parser;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_byte_exchange_collects_until_eof() {
        let mock = Builder::new()
            .write(b"QUERY SEND TO SERVER")
            .read(b"QUERY SEND ")
            .read(b"TO SERVER")
            .build();

        let received = byte_exchange(mock, DEFAULT_MESSAGE.as_bytes())
            .await
            .unwrap();
        assert_eq!(received, b"QUERY SEND TO SERVER");
    }

    #[tokio::test]
    async fn test_line_exchange_returns_first_line() {
        let mock = Builder::new()
            .write(b"hello\n")
            .read(b"hel")
            .read(b"lo\r\nextra\n")
            .build();

        let line = line_exchange(mock, "hello", 2048).await.unwrap();
        assert_eq!(line, "hello");
    }

    #[tokio::test]
    async fn test_line_exchange_eof_before_echo() {
        let mock = Builder::new().write(b"hello\n").read(b"hel").build();
        assert!(matches!(
            line_exchange(mock, "hello", 2048).await,
            Err(SessionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_line_exchange_oversized_reply() {
        let mock = Builder::new()
            .write(b"hello\n")
            .read(b"0123456789abcdefXYZ")
            .build();
        assert!(matches!(
            line_exchange(mock, "hello", 16).await,
            Err(SessionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_no_client_for_file_protocol() {
        let cli = CliArgs::parse_from(["wirelab", "-p", "file", "--client"]);
        let config = Config::merge(cli, TomlConfig::default());
        assert!(matches!(
            run(&config).await,
            Err(ConfigError::NoClient(ProtocolType::File))
        ));
    }
}
