//! Best-effort reverse DNS for subscriber log lines

use std::net::IpAddr;
use std::time::Duration;

/// Resolve `ip` to a hostname, giving up after `timeout`
///
/// Returns `None` on any failure. The resolver call runs on the blocking
/// pool; if it outlives the timeout its result is simply discarded.
pub async fn reverse_lookup(ip: IpAddr, timeout: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));

    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Ok(name))) => {
            let name = name.trim_end_matches('.');
            if name.is_empty() || name == ip.to_string() {
                None
            } else {
                Some(name.to_string())
            }
        }
        Ok(Ok(Err(e))) => {
            tracing::trace!(ip = %ip, error = %e, "Reverse lookup failed");
            None
        }
        Ok(Err(e)) => {
            tracing::trace!(ip = %ip, error = %e, "Reverse lookup task failed");
            None
        }
        Err(_) => {
            tracing::trace!(
                ip = %ip,
                timeout_ms = timeout.as_millis() as u64,
                "Reverse lookup timed out"
            );
            None
        }
    }
}
