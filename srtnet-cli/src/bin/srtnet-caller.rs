//! Send/receive caller.
//!
//! Connects to a listener, sends a payload on a fixed cadence and prints
//! whatever comes back. Reconnects automatically if the link drops.

use clap::Parser;
use srtnet::{ClientConfig, MsgCtrl, NetworkConnection, SrtNet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "srtnet-caller")]
#[command(about = "SRT send/receive caller", long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "8009")]
    port: u16,

    /// Latency budget in milliseconds
    #[arg(long, default_value = "120")]
    latency: u16,

    /// Pre-shared key (empty disables encryption)
    #[arg(long, default_value = "")]
    psk: String,

    /// Stream id sent during the handshake
    #[arg(long, default_value = "")]
    stream_id: String,

    /// Payload size in bytes
    #[arg(long, default_value = "1000")]
    size: usize,

    /// Messages to send; 0 keeps sending until interrupted
    #[arg(short, long, default_value = "0")]
    count: u64,

    /// Send interval in milliseconds
    #[arg(long, default_value = "100")]
    interval: u64,

    /// Fail instead of retrying when the server is unreachable
    #[arg(long)]
    fail_on_connect_error: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client = SrtNet::with_log_prefix("[caller] ");

    client.set_connected_to_server_callback(|_ctx, socket, info| {
        tracing::info!(
            "connected to {} (version {}, latency {} ms)",
            socket.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
            info.peer_srt_version,
            info.negotiated_latency_ms
        );
    });

    client.set_received_data_no_copy_callback(|data, ctrl, _ctx, _socket| {
        tracing::info!("received {} bytes (msg #{})", data.len(), ctrl.msg_number);
    });

    client.set_client_disconnected_callback(|_ctx, _socket| {
        tracing::warn!("link to server lost, reconnecting");
    });

    client
        .start_client(
            ClientConfig {
                remote_host: args.host,
                remote_port: args.port,
                latency_ms: args.latency,
                psk: args.psk,
                stream_id: args.stream_id,
                fail_on_connection_error: args.fail_on_connect_error,
                ..ClientConfig::default()
            },
            Some(Arc::new(NetworkConnection::new("caller"))),
        )
        .map_err(|e| anyhow::anyhow!("failed to start caller: {e}"))?;

    let payload = vec![0x01u8; args.size];
    let mut sent = 0u64;

    loop {
        std::thread::sleep(Duration::from_millis(args.interval));
        if !client.is_connected_to_server() {
            continue;
        }

        let mut ctrl = MsgCtrl::default();
        match client.send_data(&payload, &mut ctrl, None) {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!("send failed: {e}"),
        }

        if args.count != 0 && sent >= args.count {
            break;
        }
    }

    if let Some(stats) = client.statistics(false, false, None) {
        tracing::info!(
            "sent {} packets / received {} packets ({:.2} Mbps out)",
            stats.pkt_sent_total,
            stats.pkt_recv_total,
            stats.mbps_send_rate
        );
    }

    client.stop();
    Ok(())
}
