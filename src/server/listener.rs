//! PCAP-over-IP subscriber listener
//!
//! Accepts TCP connections, writes the stream header to each one and hands
//! the initialized subscriber to the distributor.

use std::io::ErrorKind;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::StreamHeader;
use crate::error::{Error, Result};
use crate::registry::{Subscriber, SubscriberId};
use crate::server::config::ServerConfig;
use crate::server::lookup::reverse_lookup;

/// Accept loop for subscriber connections
pub struct SubscriberAcceptor {
    config: ServerConfig,
    listener: TcpListener,
    header: Bytes,
    subscribers: mpsc::Sender<Subscriber<TcpStream>>,
    next_subscriber_id: u64,
}

impl SubscriberAcceptor {
    /// Bind the listen address
    ///
    /// `header` is the outbound stream header every subscriber receives
    /// first. Initialized subscribers are sent on `subscribers`.
    pub async fn bind(
        config: ServerConfig,
        header: &StreamHeader,
        subscribers: mpsc::Sender<Subscriber<TcpStream>>,
    ) -> Result<Self> {
        let header = header.encode()?;
        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|source| Error::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;

        Ok(Self {
            config,
            listener,
            header,
            subscribers,
            next_subscriber_id: 1,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires
    ///
    /// A fatal accept error cancels the token and is returned; errors that
    /// only concern the connection being accepted are logged and skipped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(_) if cancel.is_cancelled() => break,
                Err(e) if is_connection_error(&e) => {
                    tracing::debug!(error = %e, "Connection aborted before accept");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    cancel.cancel();
                    return Err(Error::Accept(e));
                }
            }
        }

        tracing::debug!("Acceptor stopped");
        Ok(())
    }

    fn handle_connection(&mut self, socket: TcpStream, peer_addr: SocketAddr) {
        let id = SubscriberId(self.next_subscriber_id);
        self.next_subscriber_id += 1;

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(subscriber = %id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        tokio::spawn(log_connection(
            id,
            peer_addr,
            self.config.reverse_lookup,
            self.config.lookup_timeout,
        ));

        let header = self.header.clone();
        let write_timeout = self.config.write_timeout;
        let subscribers = self.subscribers.clone();

        tokio::spawn(async move {
            let mut subscriber = Subscriber::new(id, peer_addr, socket);

            if let Err(e) = subscriber.send_header(&header, write_timeout).await {
                tracing::warn!(
                    subscriber = %id,
                    peer = %peer_addr,
                    error = %e,
                    "Failed to send stream header"
                );
                subscriber.close(write_timeout).await;
                return;
            }

            if let Err(mpsc::error::SendError(mut subscriber)) = subscribers.send(subscriber).await
            {
                tracing::debug!(subscriber = %id, "Distributor gone, closing connection");
                subscriber.close(write_timeout).await;
            }
        });
    }
}

async fn log_connection(
    id: SubscriberId,
    peer_addr: SocketAddr,
    lookup: bool,
    timeout: std::time::Duration,
) {
    let hostname = if lookup {
        reverse_lookup(peer_addr.ip(), timeout).await
    } else {
        None
    };

    match hostname {
        Some(hostname) => tracing::info!(
            subscriber = %id,
            peer = %peer_addr,
            hostname = %hostname,
            "PCAP-over-IP connection from {} ({})",
            peer_addr,
            hostname
        ),
        None => tracing::info!(
            subscriber = %id,
            peer = %peer_addr,
            "PCAP-over-IP connection from {}",
            peer_addr
        ),
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::capture::LinkType;
    use crate::registry::SubscriberState;

    fn test_config() -> ServerConfig {
        ServerConfig::with_addr("127.0.0.1:0").disable_reverse_lookup()
    }

    #[tokio::test]
    async fn test_accept_sends_header_then_registers() {
        let header = StreamHeader::outbound(LinkType::ETHERNET, 65535);
        let (tx, mut rx) = mpsc::channel(4);

        let acceptor = SubscriberAcceptor::bind(test_config(), &header, tx)
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(acceptor.run(cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut received = [0u8; 24];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..], &header.encode().unwrap()[..]);

        let subscriber = rx.recv().await.unwrap();
        assert_eq!(subscriber.id(), SubscriberId(1));
        assert_eq!(subscriber.state(), SubscriberState::Active);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_ids_are_unique() {
        let header = StreamHeader::outbound(LinkType::ETHERNET, 65535);
        let (tx, mut rx) = mpsc::channel(4);

        let acceptor = SubscriberAcceptor::bind(test_config(), &header, tx)
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(acceptor.run(cancel.clone()));

        let _a = TcpStream::connect(addr).await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();

        let first = rx.recv().await.unwrap().id();
        let second = rx.recv().await.unwrap().id();
        assert_ne!(first, second);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_reports_address() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap().to_string();

        let header = StreamHeader::outbound(LinkType::ETHERNET, 65535);
        let (tx, _rx) = mpsc::channel(1);
        let config = ServerConfig::with_addr(addr.clone());
        let result = SubscriberAcceptor::bind(config, &header, tx).await;

        match result {
            Err(Error::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_accepting() {
        let header = StreamHeader::outbound(LinkType::ETHERNET, 65535);
        let (tx, _rx) = mpsc::channel(1);
        let acceptor = SubscriberAcceptor::bind(test_config(), &header, tx)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            acceptor.run(cancel),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
