//! Server discovery and the transport pump.

use std::io;
use std::net::SocketAddr;

use hickory_resolver::{IntoName, TokioAsyncResolver};
use tokio::net::TcpStream;

use crate::error::Error;

pub(crate) mod transport;

/// How to find the server for a connection.
#[derive(Clone, Debug)]
pub enum ServerConfig {
    /// Use SRV records to find the server host.
    UseSrv {
        /// Domain to resolve.
        host: String,
        /// Service label, e.g. `_xmpp-client._tcp`.
        srv: String,
        /// Port to use when SRV resolution fails.
        fallback_port: u16,
    },

    /// Manually defined server host and port.
    NoSrv {
        /// Server host name.
        host: String,
        /// Server port.
        port: u16,
    },

    /// Manually defined `ip:port`.
    Addr {
        /// IP:port
        addr: String,
    },
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseSrv { host, .. } => write!(f, "{}", host),
            Self::NoSrv { host, port } => write!(f, "{}:{}", host, port),
            Self::Addr { addr } => write!(f, "{}", addr),
        }
    }
}

impl ServerConfig {
    /// The default SRV resolution strategy for clients.
    pub fn srv_default_client(host: &str) -> Self {
        Self::UseSrv {
            host: host.to_owned(),
            srv: "_xmpp-client._tcp".to_owned(),
            fallback_port: 5222,
        }
    }

    /// Resolve this config to a connected [`TcpStream`].
    pub(crate) async fn resolve(&self) -> Result<TcpStream, Error> {
        match self {
            Self::UseSrv {
                host,
                srv,
                fallback_port,
            } => Self::dial_srv(host, srv, *fallback_port).await,
            Self::NoSrv { host, port } => {
                let domain = idna::domain_to_ascii(host)?;
                Ok(TcpStream::connect((domain.as_str(), *port)).await?)
            }
            Self::Addr { addr } => {
                let addr: SocketAddr = addr.parse()?;
                Ok(TcpStream::connect(&addr).await?)
            }
        }
    }

    /// Look up the SRV record set for `host` and dial its targets one by
    /// one. A domain with no SRV records (or an IP literal) is dialed
    /// directly on `fallback_port`.
    async fn dial_srv(host: &str, srv: &str, fallback_port: u16) -> Result<TcpStream, Error> {
        let domain = idna::domain_to_ascii(host)?;

        // An IP literal has no SRV records by definition.
        if let Ok(ip) = domain.parse() {
            return Ok(TcpStream::connect(&SocketAddr::new(ip, fallback_port)).await?);
        }

        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        let service = format!("{}.{}.", srv, domain).into_name()?;
        let records = match resolver.srv_lookup(service).await {
            Ok(records) => records,
            Err(e) => {
                log::debug!("no SRV for {}: {}; dialing {}:{}", host, e, host, fallback_port);
                return Ok(TcpStream::connect((domain.as_str(), fallback_port)).await?);
            }
        };

        let mut failure = None;
        for record in records.iter() {
            let target = record.target().to_ascii();
            let port = record.port();
            match TcpStream::connect((target.as_str(), port)).await {
                Ok(stream) => {
                    log::debug!("dialed {}:{} for {}", target, port, host);
                    return Ok(stream);
                }
                Err(e) => {
                    log::debug!("{}:{} did not answer: {}", target, port, e);
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            // An SRV answer with zero usable records.
            None => Err(Error::Transport(io::Error::new(
                io::ErrorKind::NotFound,
                "SRV record set is empty",
            ))),
        }
    }
}
