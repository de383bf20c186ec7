//! Shared outbound HTTP client.
//!
//! One process-wide [`reqwest::Client`], built once and reused for every
//! upstream call. Deliberately has no total-request timeout: a streamed
//! response may legitimately run for minutes, and the dispatcher itself is
//! the one place that decides when a candidate has failed. Connection
//! pooling keeps idle sockets around briefly so a burst of requests to the
//! same provider isn't paying for a fresh TLS handshake each time.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

pub static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(100)
        .build()
        .expect("failed to build shared HTTP client")
});
