//! TCP acceptor shared by every service.
//!
//! Binds with an explicit backlog, hands each accepted connection to its
//! own task and tracks it in the connection registry. On shutdown the
//! listening socket is dropped first, then live connections are given
//! `shutdown_timeout` to finish.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::{Config, ProtocolType};
use crate::error::ConfigError;
use crate::protocols::echo::{EchoMode, Session, SessionConfig};
use crate::protocols::http::{self, FileResponder};
use crate::runtime::{ConnectionEntry, ConnectionRegistry, ShutdownSignal};
use crate::tls::TlsServerAcceptor;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bound, listening socket.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Resolve `addr` and listen on it with the given backlog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(addr: &str, backlog: u32) -> Result<Self, ConfigError> {
        let socket_addr = addr
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string()))?;

        let bind_error = |source| ConfigError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = create_listener(socket_addr, backlog).map_err(bind_error)?;
        let inner = TcpListener::from_std(listener).map_err(bind_error)?;

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

fn create_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

/// What runs on an accepted connection.
#[derive(Clone)]
pub enum Service {
    Echo(Arc<SessionConfig>),
    TlsEcho {
        session: Arc<SessionConfig>,
        acceptor: TlsServerAcceptor,
    },
    Files(Arc<FileResponder>),
}

impl Service {
    /// Build the service for `config.protocol`.
    ///
    /// TLS material is loaded here so a bad certificate fails startup.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let session = |mode| {
            Arc::new(SessionConfig {
                mode,
                greeting: config.greeting.clone().map(Bytes::from),
                max_line_length: config.max_line_length,
                read_buffer_size: config.read_buffer_size,
            })
        };

        let service = match config.protocol {
            ProtocolType::Echo => Service::Echo(session(EchoMode::Bytes)),
            ProtocolType::Line => Service::Echo(session(EchoMode::Lines {
                close_after_reply: false,
            })),
            ProtocolType::TlsLine => Service::TlsEcho {
                session: session(EchoMode::Lines {
                    close_after_reply: true,
                }),
                acceptor: TlsServerAcceptor::from_pem_files(&config.cert, &config.key)?,
            },
            ProtocolType::File => Service::Files(Arc::new(FileResponder::new(
                config.prefix.clone(),
                config.root.clone(),
                config.chunk_size,
            ))),
        };
        Ok(service)
    }

    async fn serve(self, stream: TcpStream, shutdown: ShutdownSignal, span: Span) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(parent: &span, error = %e, "Failed to set TCP_NODELAY");
        }

        match self {
            Service::Echo(config) => {
                // Errors are logged by the session itself.
                let _ = Session::new(stream, config, shutdown, span).run().await;
            }
            Service::TlsEcho { session, acceptor } => {
                let tls = match acceptor.accept(stream).instrument(span.clone()).await {
                    Ok(tls) => tls,
                    Err(e) => {
                        warn!(parent: &span, error = %e, "Dropping connection");
                        return;
                    }
                };
                debug!(parent: &span, "TLS session established");
                let _ = Session::new(tls, session, shutdown, span).run().await;
            }
            Service::Files(responder) => {
                http::serve_connection(stream, responder, shutdown, span).await;
            }
        }
    }
}

/// Accept loop plus drain.
pub struct Server {
    listener: Listener,
    service: Service,
    protocol: ProtocolType,
    registry: Arc<ConnectionRegistry>,
    connection_limit: Arc<Semaphore>,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn new(listener: Listener, service: Service, config: &Config) -> Self {
        Self {
            listener,
            service,
            protocol: config.protocol,
            registry: ConnectionRegistry::new(),
            connection_limit: Arc::new(Semaphore::new(config.max_connections.max(1))),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then drain.
    ///
    /// Returns the number of connections still open when the drain
    /// timeout expired.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> usize {
        let Server {
            listener,
            service,
            protocol,
            registry,
            connection_limit,
            shutdown_timeout,
        } = self;

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                permit = Arc::clone(&connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                accepted = listener.inner.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                },
            };

            let guard = registry.register(ConnectionEntry::new(peer, protocol));
            let span = info_span!("conn", id = guard.id(), peer = %peer, protocol = ?protocol);
            debug!(parent: &span, "Accepted");

            let service = service.clone();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                service.serve(stream, signal, span).await;
                drop(guard);
                drop(permit);
            });
        }

        drop(listener);
        info!(
            open = registry.len(),
            timeout_secs = shutdown_timeout.as_secs(),
            "Stopped accepting, draining connections"
        );

        let remaining = registry.drain(shutdown_timeout).await;
        if remaining == 0 {
            info!("All connections closed");
        } else {
            for (id, entry) in registry.snapshot() {
                warn!(
                    id,
                    peer = %entry.peer,
                    age_ms = entry.age().num_milliseconds(),
                    "Connection still open after drain timeout"
                );
            }
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliArgs, TomlConfig, DEFAULT_ECHO_GREETING};
    use crate::runtime::Shutdown;
    use clap::Parser;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::task::JoinHandle;

    fn config(protocol: &str) -> Config {
        let cli = CliArgs::parse_from(["wirelab", "-p", protocol, "--port", "0"]);
        let mut config = Config::merge(cli, TomlConfig::default());
        config.shutdown_timeout = Duration::from_secs(2);
        config
    }

    fn start(config: &Config, service: Service) -> (SocketAddr, Shutdown, JoinHandle<usize>) {
        let listener = Listener::bind("127.0.0.1:0", config.backlog).unwrap();
        let server = Server::new(listener, service, config);
        let addr = server.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(server.run(shutdown.subscribe()));
        (addr, shutdown, handle)
    }

    #[test]
    fn test_accept_error_backoff_is_short_but_nonzero() {
        assert!(ACCEPT_ERROR_BACKOFF >= Duration::from_millis(10));
        assert!(ACCEPT_ERROR_BACKOFF <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert!(matches!(
            Listener::bind("not an address", 16),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_byte_echo_with_greeting() {
        let mut config = config("echo");
        config.greeting = Some("HELLO".to_string());
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 5];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"HELLO");

        client.write_all(b"ping").await.unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"ping");

        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_byte_echo_default_greeting() {
        let config = Config::merge(
            CliArgs::parse_from(["wirelab", "-p", "echo"]),
            TomlConfig::default(),
        );
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut greeting = vec![0u8; DEFAULT_ECHO_GREETING.len()];
        tokio::time::timeout(Duration::from_millis(300), client.read_exact(&mut greeting))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(greeting, DEFAULT_ECHO_GREETING.as_bytes());

        client.write_all(b"ping").await.unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"ping");

        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_line_echo_round_trip() {
        let config = config("line");
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello\r\nwor").await.unwrap();
        client.write_all(b"ld\n").await.unwrap();

        let mut echoed = [0u8; 12];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello\nworld\n");

        drop(client);
        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_server_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("file");
        config.root = dir.path().to_path_buf();
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        for (request, status) in [
            ("GET /missing.txt HTTP/1.1\r\nConnection: close\r\n\r\n", "404"),
            ("POST / HTTP/1.1\r\nConnection: close\r\n\r\n", "405"),
        ] {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(request.as_bytes()).await.unwrap();
            let mut response = String::new();
            client.read_to_string(&mut response).await.unwrap();
            assert!(
                response.starts_with(&format!("HTTP/1.1 {status} ")),
                "{response}"
            );
        }

        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_idle_sessions_and_stops_accepting() {
        let config = config("line");
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"one\n").await.unwrap();
        let mut echoed = [0u8; 4];
        idle.read_exact(&mut echoed).await.unwrap();

        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);

        let mut rest = Vec::new();
        idle.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_plaintext_client_on_tls_listener_is_dropped() {
        let cert = crate::tls::tests::pem_file(crate::tls::tests::TEST_CERT);
        let key = crate::tls::tests::pem_file(crate::tls::tests::TEST_KEY);
        let mut config = config("tls-line");
        config.cert = cert.path().to_path_buf();
        config.key = key.path().to_path_buf();
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"not a handshake\n").await.unwrap();
        let mut rest = Vec::new();
        let closed =
            tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut rest)).await;
        assert!(closed.is_ok());

        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tls_line_echo_round_trip() {
        use crate::tls::tests::{pem_file, TEST_CA, TEST_CERT, TEST_KEY};
        use rustls::pki_types::ServerName;
        use rustls::{ClientConfig, RootCertStore};
        use tokio_rustls::TlsConnector;

        let cert = pem_file(TEST_CERT);
        let key = pem_file(TEST_KEY);
        let mut config = config("tls-line");
        config.cert = cert.path().to_path_buf();
        config.key = key.path().to_path_buf();
        let service = Service::from_config(&config).unwrap();
        let (addr, shutdown, handle) = start(&config, service);

        let mut roots = RootCertStore::empty();
        for ca in rustls_pemfile::certs(&mut TEST_CA.as_bytes()) {
            roots.add(ca.unwrap()).unwrap();
        }
        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut tls = connector
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap();

        tls.write_all(b"hi\n").await.unwrap();
        tls.flush().await.unwrap();

        let mut echoed = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), tls.read_to_end(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, b"hi\n");

        shutdown.trigger();
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_tls_material_fails_startup() {
        let mut config = config("tls-line");
        config.cert = "/nonexistent/cert.pem".into();
        assert!(matches!(
            Service::from_config(&config),
            Err(ConfigError::Tls(_))
        ));
    }
}
