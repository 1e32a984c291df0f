#![allow(dead_code)]

pub mod range_server;

use rangeio::{Client, Fetcher};

/// A fetcher bypassing any system proxy, the test server only listens on the loopback.
pub fn fetcher() -> Fetcher {
    Fetcher::new().with_client(Client::builder().no_proxy().build().unwrap())
}

/// Deterministic, non-periodic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len as u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 24) as u8).collect()
}
