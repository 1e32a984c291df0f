//! Minimal HTTP/1.1 server answering HEAD and ranged GET requests for integration tests.
//!
//! Serves a single static body. HEAD answers carry `Content-Length`, ranged GET answers are `206 Partial Content` with the range
//! clipped to the body, or `416 Range Not Satisfiable` past its end. Every connection is closed after one answer.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Status answered instead of the content of the range starting at the given offset.
    pub fail: HashMap<u64, u16>,
    /// Delay before answering the range starting at the given offset.
    pub delays: HashMap<u64, Duration>,
    /// Omit `Content-Length` from HEAD answers.
    pub hide_length: bool,
    /// Ignore `Range` headers and always answer `200 OK` with the whole body.
    pub ignore_ranges: bool,
    /// Answer `200 OK` with the whole body to the range starting at the given offset.
    pub whole_body: HashSet<u64>,
    /// Answer `403 Forbidden` to requests missing this header.
    pub require_header: Option<(&'static str, &'static str)>,
}

#[derive(Debug, Default)]
struct Stats {
    ranges: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts a ranged request as in flight until it is answered.
struct InFlight<'a>(&'a Stats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a Stats) -> Self {
        let current = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(current, Ordering::SeqCst);

        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct RangeServer {
    addr: SocketAddr,
    stats: Arc<Stats>,
}

impl RangeServer {
    pub async fn start(body: Vec<u8>) -> Self {
        Self::start_with(body, Behavior::default()).await
    }

    pub async fn start_with(body: Vec<u8>, behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let body = Arc::new(body);
        let behavior = Arc::new(behavior);
        let stats = Arc::new(Stats::default());

        tokio::spawn({
            let stats = Arc::clone(&stats);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let body = Arc::clone(&body);
                    let behavior = Arc::clone(&behavior);
                    let stats = Arc::clone(&stats);

                    tokio::spawn(async move {
                        let _ = handle(stream, &body, &behavior, &stats).await;
                    });
                }
            }
        });

        Self { addr, stats }
    }

    pub fn url(&self) -> String {
        format!("http://{}/assets/file.bin", self.addr)
    }

    /// `Range` header values received so far, sorted.
    pub fn ranges(&self) -> Vec<String> {
        let mut ranges = self.stats.ranges.lock().unwrap().clone();
        ranges.sort();
        ranges
    }

    /// Highest number of ranged requests received but not answered yet at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }
}

async fn handle(mut stream: TcpStream, body: &[u8], behavior: &Behavior, stats: &Stats) -> std::io::Result<()> {
    let mut request = vec![];
    let mut buf = [0; 4096];

    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let request = String::from_utf8_lossy(&request);
    let mut lines = request.lines();

    let method = lines.next().and_then(|line| line.split_whitespace().next()).unwrap_or_default().to_owned();
    let headers: HashMap<String, String> = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect();

    if let Some((name, value)) = behavior.require_header {
        if headers.get(&name.to_ascii_lowercase()).map(String::as_str) != Some(value) {
            return respond(&mut stream, "403 Forbidden", &["Content-Length: 0".into()], &[]).await;
        }
    }

    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        let length = if behavior.hide_length {
            vec![]
        } else {
            vec![format!("Content-Length: {total}")]
        };
        return respond(&mut stream, "200 OK", &length, &[]).await;
    }

    let range = headers.get("range").and_then(|value| parse_range(value));

    if let Some(value) = headers.get("range") {
        stats.ranges.lock().unwrap().push(value.clone());
    }

    let in_flight = range.map(|_| InFlight::enter(stats));

    if let Some(delay) = range.and_then(|(start, _)| behavior.delays.get(&start)) {
        tokio::time::sleep(*delay).await;
    }

    // answered from here on
    drop(in_flight);

    if let Some(status) = range.and_then(|(start, _)| behavior.fail.get(&start)) {
        return respond(&mut stream, &format!("{status} Injected Failure"), &["Content-Length: 0".into()], &[]).await;
    }

    match range {
        Some((start, end)) if !behavior.ignore_ranges && !behavior.whole_body.contains(&start) => {
            if start >= total {
                let headers = [format!("Content-Range: bytes */{total}"), "Content-Length: 0".into()];
                return respond(&mut stream, "416 Range Not Satisfiable", &headers, &[]).await;
            }

            let end = end.min(total - 1);
            let slice = &body[start as usize..=end as usize];
            let headers = [format!("Content-Range: bytes {start}-{end}/{total}"), format!("Content-Length: {}", slice.len())];

            respond(&mut stream, "206 Partial Content", &headers, slice).await
        }
        _ => respond(&mut stream, "200 OK", &[format!("Content-Length: {total}")], body).await,
    }
}

async fn respond(stream: &mut TcpStream, status: &str, headers: &[String], payload: &[u8]) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {status}\r\n");
    for header in headers {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("Connection: close\r\n\r\n");

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(payload).await?;
    stream.shutdown().await
}

/// `bytes=<start>-<end>`, both inclusive.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;

    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
