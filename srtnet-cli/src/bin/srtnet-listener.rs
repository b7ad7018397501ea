//! Echo listener.
//!
//! Accepts any number of callers and echoes every received message back
//! on the socket it arrived on.

use clap::Parser;
use srtnet::{MsgCtrl, NetworkConnection, ServerConfig, SrtNet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "srtnet-listener")]
#[command(about = "SRT echo listener", long_about = None)]
struct Args {
    /// Listen host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port (0 picks a free one)
    #[arg(short, long, default_value = "8009")]
    port: u16,

    /// Latency budget in milliseconds
    #[arg(long, default_value = "120")]
    latency: u16,

    /// Pre-shared key (empty disables encryption)
    #[arg(long, default_value = "")]
    psk: String,

    /// Accept a single client at a time
    #[arg(long)]
    single_client: bool,

    /// Statistics interval in seconds
    #[arg(long, default_value = "5")]
    stats: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let server = Arc::new(SrtNet::with_log_prefix("[listener] "));
    let connection_counter = Arc::new(AtomicU64::new(0));

    let counter = connection_counter.clone();
    server.set_client_connected_callback(move |peer, socket, _server_ctx, info| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(
            "peer {} connected (socket {}, version {}, latency {} ms, stream id {:?})",
            peer,
            socket.id(),
            info.peer_srt_version,
            info.negotiated_latency_ms,
            socket.stream_id()
        );
        Some(Arc::new(NetworkConnection::new(n)))
    });

    let echo = server.clone();
    server.set_received_data_callback(move |data, _ctrl, _ctx, socket| {
        let mut ctrl = MsgCtrl::default();
        if let Err(e) = echo.send_data(&data, &mut ctrl, Some(socket)) {
            tracing::warn!("echo to socket {} failed: {}", socket.id(), e);
        }
    });

    server.set_client_disconnected_callback(|ctx, socket| {
        let number = ctx.and_then(|c| c.downcast_ref::<u64>().copied());
        tracing::info!("peer on socket {} disconnected (connection #{number:?})", socket.id());
    });

    server
        .start_server(
            ServerConfig {
                local_host: args.host,
                local_port: args.port,
                latency_ms: args.latency,
                psk: args.psk,
                single_client: args.single_client,
                ..ServerConfig::default()
            },
            None,
        )
        .map_err(|e| anyhow::anyhow!("failed to start listener: {e}"))?;

    tracing::info!("listening on port {}", server.locally_bound_port());

    loop {
        std::thread::sleep(Duration::from_secs(args.stats));
        for (socket, _ctx) in server.active_clients() {
            if let Some(stats) = server.statistics(false, true, Some(&socket)) {
                tracing::info!(
                    "socket {}: {} pkts in / {} pkts out, {:.2} Mbps in",
                    socket.id(),
                    stats.pkt_recv_total,
                    stats.pkt_sent_total,
                    stats.mbps_recv_rate
                );
            }
        }
    }
}
