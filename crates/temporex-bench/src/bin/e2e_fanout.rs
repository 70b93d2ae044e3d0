//! End-to-end fan-out benchmark for temporex.
//!
//! Every client joins one session and one group, then publishes to that group
//! as fast as it can while counting the deliveries it receives.

use bytes::BytesMut;
use futures_util::{SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use temporex_protocol::{codec, Frame, PROTOCOL_VERSION};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const SESSION: &str = "benchmark";
const GROUP: &str = "all";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);

    println!("temporex end-to-end fan-out benchmark");
    println!("Make sure the server is running with players_per_match >= {num_clients} (or 0)");
    println!();

    run_fanout_benchmark(num_clients).await;
}

async fn run_fanout_benchmark(num_clients: usize) {
    println!("Clients: {num_clients}, warmup: {WARMUP_SECS}s, measurement: {BENCH_SECS}s");

    let delivered = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let delivered = Arc::clone(&delivered);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                if let Err(e) = run_client(client_id, delivered, barrier).await {
                    eprintln!("Client {client_id} error: {e}");
                }
            })
        })
        .collect();

    barrier.wait().await;
    println!("All {num_clients} clients joined {SESSION}/{GROUP}");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    delivered.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = delivered.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Duration:        {:>12.2}s", elapsed.as_secs_f64());
    println!("Deliveries:      {:>12}", total);
    println!("Throughput:      {:>12.0} deliveries/s", per_sec);
    println!("Per client:      {:>12.0} deliveries/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

/// Read frames until one that is not a Deliver arrives.
async fn await_reply<S>(receiver: &mut S, buf: &mut BytesMut) -> Result<Frame, BoxError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        while let Some(frame) = codec::decode_from(buf)? {
            if !matches!(frame, Frame::Deliver { .. }) {
                return Ok(frame);
            }
        }
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err("server closed the connection".into()),
        }
    }
}

async fn run_client(
    client_id: usize,
    delivered: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();
    let mut buf = BytesMut::with_capacity(65536);

    let handshake = [
        Frame::connect(PROTOCOL_VERSION, format!("bench-{client_id}")),
        Frame::join(1, SESSION),
        Frame::assign(2, SESSION, GROUP),
    ];
    for frame in handshake {
        sender
            .send(Message::Binary(codec::encode(&frame)?.to_vec()))
            .await?;
        if let Frame::Error { message, .. } = await_reply(&mut receiver, &mut buf).await? {
            return Err(message.into());
        }
    }

    barrier.wait().await;

    let publish = codec::encode(&Frame::publish(SESSION, GROUP, vec![0u8; 64]))?;
    let publish_msg = Message::Binary(publish.to_vec());

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Binary(data) = message {
                buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from(&mut buf) {
                    if matches!(frame, Frame::Deliver { .. }) {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    loop {
        if sender.send(publish_msg.clone()).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
