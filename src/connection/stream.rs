//! Transport: TCP, TLS-upgraded TCP, and Unix-domain sockets.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tokio_native_tls::TlsStream;

use crate::config::{ConnectionOptions, HostType};
use crate::error::{ConnectionError, Error, Result};
use crate::protocol::backend::Frame;
use crate::protocol::frontend::write_ssl_request;

/// A connected transport, buffered on the read side.
pub enum Stream {
    Tcp(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
    Unix(BufReader<UnixStream>),
}

/// Socket file path used by PostgreSQL inside a socket directory.
fn socket_path(directory: &str, port: u16) -> String {
    format!("{directory}/.s.PGSQL.{port}")
}

impl Stream {
    /// Open a transport per the configuration, performing the SSLRequest
    /// negotiation for TCP when TLS is enabled.
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        match options.host_type {
            HostType::Socket => {
                let path = socket_path(&options.hostname, options.port);
                let unix = UnixStream::connect(&path).await?;
                Ok(Stream::Unix(BufReader::new(unix)))
            }
            HostType::Tcp => {
                let tcp = Self::open_tcp(options).await?;
                if !options.tls.enabled {
                    return Ok(Stream::Tcp(BufReader::new(tcp)));
                }
                match Self::negotiate_tls(tcp, options).await {
                    Ok(stream) => Ok(stream),
                    // a refused handshake falls back to plain TCP unless
                    // TLS is enforced
                    Err(error) if !options.tls.enforce => {
                        if matches!(error, Error::Connection(ConnectionError::BadTlsAvailability(_))) {
                            return Err(error);
                        }
                        tracing::warn!(%error, "TLS unavailable, retrying unencrypted");
                        let tcp = Self::open_tcp(options).await?;
                        Ok(Stream::Tcp(BufReader::new(tcp)))
                    }
                    Err(error) => Err(error),
                }
            }
        }
    }

    async fn open_tcp(options: &ConnectionOptions) -> Result<TcpStream> {
        let address = format!("{}:{}", options.hostname, options.port);
        let tcp = TcpStream::connect(&address).await?;
        tcp.set_nodelay(true)?;
        Ok(tcp)
    }

    /// Send the 8-byte SSLRequest and act on the single-byte reply.
    async fn negotiate_tls(mut tcp: TcpStream, options: &ConnectionOptions) -> Result<Self> {
        let mut request = Vec::with_capacity(8);
        write_ssl_request(&mut request);
        tcp.write_all(&request).await?;
        tcp.flush().await?;

        let mut reply = [0u8; 1];
        tcp.read_exact(&mut reply).await?;
        match reply[0] {
            b'S' => {
                let mut builder = native_tls::TlsConnector::builder();
                for pem in &options.tls.ca_certificates {
                    let certificate =
                        native_tls::Certificate::from_pem(pem.as_bytes())?;
                    builder.add_root_certificate(certificate);
                }
                let connector = tokio_native_tls::TlsConnector::from(builder.build()?);
                let tls = connector
                    .connect(&options.hostname, tcp)
                    .await
                    .map_err(|e| {
                        if options.tls.enforce {
                            Error::Connection(ConnectionError::CertificateRejected(
                                e.to_string(),
                            ))
                        } else {
                            Error::Tls(e)
                        }
                    })?;
                Ok(Stream::Tls(BufReader::new(tls)))
            }
            b'N' => {
                if options.tls.enforce {
                    Err(ConnectionError::TlsNotSupportedServer.into())
                } else {
                    Ok(Stream::Tcp(BufReader::new(tcp)))
                }
            }
            other => Err(ConnectionError::BadTlsAvailability(other).into()),
        }
    }

    /// Whether the session is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }

    /// Read one backend frame into the reusable `frame`.
    pub async fn read_frame(&mut self, frame: &mut Frame) -> std::io::Result<()> {
        frame.kind = self.read_u8().await?;

        let mut length = [0u8; 4];
        self.read_exact(&mut length).await?;
        let length = u32::from_be_bytes(length) as usize;

        frame.payload.clear();
        frame.payload.resize(length.saturating_sub(4), 0);
        self.read_exact(&mut frame.payload).await
    }

    async fn read_u8(&mut self) -> std::io::Result<u8> {
        match self {
            Stream::Tcp(r) => r.read_u8().await,
            Stream::Tls(r) => r.read_u8().await,
            Stream::Unix(r) => r.read_u8().await,
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf).await.map(|_| ()),
            Stream::Tls(r) => r.read_exact(buf).await.map(|_| ()),
            Stream::Unix(r) => r.read_exact(buf).await.map(|_| ()),
        }
    }

    /// Write and flush a buffered frontend message batch.
    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf).await,
            Stream::Tls(r) => r.get_mut().write_all(buf).await,
            Stream::Unix(r) => r.get_mut().write_all(buf).await,
        }
    }

    /// Flush pending bytes to the peer.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush().await,
            Stream::Tls(r) => r.get_mut().flush().await,
            Stream::Unix(r) => r.get_mut().flush().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_derivation() {
        assert_eq!(socket_path("/tmp", 5432), "/tmp/.s.PGSQL.5432");
        assert_eq!(
            socket_path("/var/run/postgresql", 6000),
            "/var/run/postgresql/.s.PGSQL.6000"
        );
    }
}
