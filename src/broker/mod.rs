//! Broker orchestration
//!
//! Wires the capture process, the distributor and the subscriber acceptor
//! together under one cancellation token:
//!
//! ```text
//!   capture process ──stdout──► Distributor ──frames──► subscribers
//!         │                         ▲
//!     supervisor            mpsc<Subscriber>
//!                                   │
//!                               Acceptor ◄── TCP connect
//! ```
//!
//! Whichever of them stops first (process exit, stream EOF, decode error,
//! fatal accept error, external interrupt) cancels the token, and the rest
//! follow.

pub mod distributor;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    CaptureDecoder, CaptureError, CaptureExit, CaptureProcess, StreamHeader, EXIT_GRACE,
    OUTBOUND_SNAPLEN,
};
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::server::SubscriberAcceptor;
use crate::stats::BrokerStats;

pub use distributor::Distributor;

/// Final outcome of a broker run
#[derive(Debug, Clone)]
pub struct BrokerReport {
    /// How the capture process ended
    pub capture_exit: CaptureExit,
    /// Counters collected by the distributor
    pub stats: BrokerStats,
}

impl BrokerReport {
    /// Process exit code for this outcome: 0, or 2 if the capture failed
    pub fn exit_code(&self) -> u8 {
        if self.capture_exit.is_success() {
            0
        } else {
            2
        }
    }
}

/// PCAP-over-IP broker
pub struct Broker {
    config: BrokerConfig,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    /// Run until the capture ends or `shutdown` completes
    pub async fn run<F>(self, shutdown: F) -> Result<BrokerReport>
    where
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();

        let broker = async {
            let running = self.start(cancel.clone()).await?;
            running.wait().await
        };
        tokio::pin!(broker);
        tokio::pin!(shutdown);

        tokio::select! {
            result = &mut broker => return result,
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        }

        broker.await
    }

    /// Start the capture process and begin serving subscribers
    ///
    /// Returns once the capture header has been read and the listener is
    /// bound. Any failure up to that point kills the capture process.
    pub async fn start(self, cancel: CancellationToken) -> Result<RunningBroker> {
        self.config.validate()?;

        let (mut process, stdout) = CaptureProcess::spawn(&self.config.capture_command)?;

        let decoder = match open_capture(&mut process, stdout, &cancel).await {
            Ok(decoder) => decoder,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        let capture_header = *decoder.header();
        let outbound = StreamHeader::outbound(capture_header.link_type, OUTBOUND_SNAPLEN);

        tracing::info!(
            link_type = %capture_header.link_type,
            snaplen = capture_header.snaplen,
            precision = ?capture_header.precision,
            "Capture stream opened"
        );

        let (subscriber_tx, subscriber_rx) = mpsc::channel(self.config.server.subscriber_queue);

        let bound = SubscriberAcceptor::bind(self.config.server.clone(), &outbound, subscriber_tx)
            .await
            .and_then(|acceptor| {
                let addr = acceptor.local_addr()?;
                Ok((acceptor, addr))
            });
        let (acceptor, local_addr) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                cancel.cancel();
                if let Err(kill_error) = process.terminate().await {
                    tracing::warn!(error = %kill_error, "Failed to stop capture process");
                }
                return Err(e);
            }
        };

        tracing::info!(
            listen = %local_addr,
            link_type = %outbound.link_type,
            capture_pid = ?process.pid(),
            "PCAP-over-IP server listening"
        );

        let supervisor = tokio::spawn(process.supervise(cancel.clone()));

        let distributor = Distributor::new(
            decoder,
            outbound,
            self.config.server.write_timeout,
            subscriber_rx,
        );
        let distributor = tokio::spawn(distributor.run(cancel.clone()));

        let acceptor = tokio::spawn(acceptor.run(cancel.clone()));

        Ok(RunningBroker {
            cancel,
            local_addr,
            capture_header,
            outbound,
            shutdown_timeout: self.config.shutdown_timeout,
            supervisor,
            distributor,
            acceptor,
        })
    }
}

/// Read the capture header, or explain why there is none
async fn open_capture(
    process: &mut CaptureProcess,
    stdout: ChildStdout,
    cancel: &CancellationToken,
) -> Result<CaptureDecoder<ChildStdout>> {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        opened = CaptureDecoder::open(stdout) => Some(opened),
    };

    let error = match opened {
        Some(Ok(decoder)) => return Ok(decoder),
        Some(Err(e)) => e,
        None => {
            process.terminate().await?;
            return Err(Error::Interrupted);
        }
    };

    let exit = process.stop(EXIT_GRACE).await?;
    match (error, exit) {
        // Nothing at all on stdout: the process never got going
        (CaptureError::TruncatedHeader { got: 0, .. }, CaptureExit::Exited(status)) => {
            tracing::error!(
                program = %process.program(),
                status = %status,
                "Capture process exited early"
            );
            Err(Error::EarlyExit(status))
        }
        (error, _) => {
            tracing::error!(error = %error, "Invalid capture stream header");
            Err(error.into())
        }
    }
}

/// Handle to a started broker
pub struct RunningBroker {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    capture_header: StreamHeader,
    outbound: StreamHeader,
    shutdown_timeout: Duration,
    supervisor: JoinHandle<Result<CaptureExit>>,
    distributor: JoinHandle<std::result::Result<BrokerStats, CaptureError>>,
    acceptor: JoinHandle<Result<()>>,
}

impl RunningBroker {
    /// Address the subscriber listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Header read from the capture process
    pub fn capture_header(&self) -> &StreamHeader {
        &self.capture_header
    }

    /// Header sent to every subscriber
    pub fn stream_header(&self) -> &StreamHeader {
        &self.outbound
    }

    /// Request shutdown; safe to call more than once
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the broker to stop and collect its outcome
    ///
    /// Tasks that have not finished within the shutdown timeout after
    /// cancellation are aborted.
    pub async fn wait(self) -> Result<BrokerReport> {
        self.cancel.cancelled().await;
        tracing::debug!("Broker shutting down");

        let deadline = Instant::now() + self.shutdown_timeout;
        let distributor = join_by(self.distributor, deadline, "distributor").await;
        let acceptor = join_by(self.acceptor, deadline, "acceptor").await;
        let supervisor = join_by(self.supervisor, deadline, "capture supervisor").await;

        tracing::info!("PCAP-over-IP server exiting");

        let stats = distributor?.map_err(Error::from)?;
        acceptor??;
        let capture_exit = supervisor??;

        Ok(BrokerReport {
            capture_exit,
            stats,
        })
    }
}

async fn join_by<T>(mut handle: JoinHandle<T>, deadline: Instant, task: &str) -> Result<T> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!(task, error = %e, "Broker task failed");
            Err(Error::Task(format!("{} task failed: {}", task, e)))
        }
        Err(_) => {
            handle.abort();
            tracing::warn!(task, "Broker task did not stop in time, aborted");
            Err(Error::Task(format!("{} task did not stop in time", task)))
        }
    }
}
