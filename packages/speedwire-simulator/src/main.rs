//! speedwire-sim: emulated Speedwire peer for development.
//!
//! Runs one of two roles on port 9522:
//!   - inverter (default): answers identification probes, accepts user
//!     logins and serves a small subset of the value catalog (name,
//!     class, AC power, total energy)
//!   - meter (`--meter`): broadcasts one meter frame per interval to
//!     the multicast group
//!
//! Send errors are logged and never terminate the simulator.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use speedwire_proto::{
    DeviceData, DeviceId, MeasuredData, MeterFrame, Net2Content, ObisId, Packet, RawValue,
    ResponseValue,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "speedwire-sim", about = "Speedwire device simulator")]
struct Args {
    /// Local address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
    /// Device name served to clients
    #[arg(long, default_value = "STP 6.0-SIM")]
    name: String,
    /// Serial number of the simulated device
    #[arg(long, default_value_t = 63_000_001)]
    serial: u32,
    /// Password accepted for user logins
    #[arg(long, default_value = "0000")]
    password: String,
    /// Simulate an energy meter instead of an inverter
    #[arg(long)]
    meter: bool,
    /// Broadcast interval for meter frames
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Destination of meter broadcasts
    #[arg(long, default_value = "239.12.255.254:9522")]
    target: String,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "speedwire_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    let addr = format!("{}:9522", args.bind);
    let socket = UdpSocket::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "simulated {} (serial {}) on {addr}",
        if args.meter { "meter" } else { "inverter" },
        args.serial
    );

    if args.meter {
        run_meter(&socket, &args).await
    } else {
        run_inverter(&socket, &args).await
    }
}

// ── Meter role ────────────────────────────────────────────────────────────────

async fn run_meter(socket: &UdpSocket, args: &Args) -> Result<()> {
    let identity = DeviceId {
        susy_id: 349,
        serial: args.serial,
    };
    let started = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut energy_ws: u64 = 0;

    loop {
        interval.tick().await;

        let power_dw = ramp(started.elapsed(), 42_000); // deciwatt
        energy_ws += (power_dw / 10) as u64 * args.interval_ms / 1000;

        let frame = MeterFrame {
            device: identity,
            ticker_ms: started.elapsed().as_millis() as u32,
            values: vec![
                MeasuredData {
                    obis: ObisId {
                        channel: 0,
                        value_index: 1,
                        kind: 4,
                        tariff: 0,
                    },
                    value: RawValue::U32(power_dw),
                },
                MeasuredData {
                    obis: ObisId {
                        channel: 0,
                        value_index: 1,
                        kind: 8,
                        tariff: 0,
                    },
                    value: RawValue::U64(energy_ws),
                },
                MeasuredData {
                    obis: ObisId {
                        channel: 0,
                        value_index: 14,
                        kind: 4,
                        tariff: 0,
                    },
                    value: RawValue::U32(50_012), // 50.012 Hz
                },
            ],
        };

        let bytes = Packet::session(Net2Content::MeterFrame(frame)).bytes();
        if let Err(e) = socket.send_to(&bytes, &args.target).await {
            warn!("broadcast to {} failed: {e}", args.target);
        }
    }
}

/// Deterministic triangle wave in [0, peak].
fn ramp(elapsed: Duration, peak: u32) -> u32 {
    let phase = (elapsed.as_secs() % 120) as u32;
    if phase < 60 {
        peak * phase / 60
    } else {
        peak * (120 - phase) / 60
    }
}

// ── Inverter role ─────────────────────────────────────────────────────────────

async fn run_inverter(socket: &UdpSocket, args: &Args) -> Result<()> {
    let identity = DeviceId {
        susy_id: 0x017A,
        serial: args.serial,
    };
    let expected_password = obfuscate_password(&args.password);
    let started = Instant::now();
    let mut buf = vec![0u8; 2048];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("receive failed: {e}");
                continue;
            }
        };

        let packet = match Packet::read(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("ignoring malformed frame from {from}: {e}");
                continue;
            }
        };
        let Some(request) = packet.device_data() else {
            continue;
        };

        let mut reply = DeviceData {
            control: 0xD0,
            destination: request.source,
            job_number: request.job_number,
            source: identity,
            packet_id: request.packet_id,
            command: request.command,
            object: request.object,
            // Devices echo the request selector.
            parameters: request.parameters.clone(),
            ..Default::default()
        };

        match (request.command, request.object) {
            (0x0E, 0xFFFD) => {
                debug!("logout from {from}");
                continue;
            }
            (0x0C, 0xFFFD) => {
                if request.data != expected_password {
                    info!("rejecting login from {from}");
                    reply.status = 0x0100;
                }
            }
            (0x00, 0x0000) => {
                debug!("probe from {from}");
            }
            (0x00, object) => {
                let power = ramp(started.elapsed(), 4200);
                let records = records_for(object, &args.name, power, started.elapsed());
                if records.is_empty() {
                    reply.status = 0x15;
                } else {
                    reply.command = 0x01;
                    for record in &records {
                        record.write(object, &mut reply.data);
                    }
                }
            }
            _ => continue,
        }

        let bytes = Packet::session(Net2Content::DeviceData(reply)).bytes();
        if let Err(e) = socket.send_to(&bytes, from).await {
            warn!("reply to {from} failed: {e}");
        }
    }
}

fn records_for(object: u16, name: &str, power: u32, uptime: Duration) -> Vec<ResponseValue> {
    let timestamp = uptime.as_secs() as u32;
    match object {
        // Identity strings and attribute lists.
        0x5800 => vec![
            ResponseValue {
                class: 0x00,
                code: 0x821E,
                kind: 0x10,
                timestamp,
                values: vec![RawValue::Text(name.to_string())],
            },
            ResponseValue {
                class: 0x00,
                code: 0x821F,
                kind: 0x08,
                timestamp,
                values: vec![RawValue::U32(8001)],
            },
            ResponseValue {
                class: 0x00,
                code: 0x8220,
                kind: 0x08,
                timestamp,
                values: vec![RawValue::U32(9074)],
            },
        ],
        // AC power.
        0x5100 => vec![ResponseValue {
            class: 0x00,
            code: 0x263F,
            kind: 0x00,
            timestamp,
            values: vec![RawValue::U32(power)],
        }],
        // Total energy counter (Wh on the wire).
        0x5400 => vec![ResponseValue {
            class: 0x00,
            code: 0x2601,
            kind: 0x00,
            timestamp,
            values: vec![RawValue::U64(1_234_567)],
        }],
        _ => Vec::new(),
    }
}

// User password field: each byte shifted by 0x88, padded to 12 bytes.
fn obfuscate_password(password: &str) -> Vec<u8> {
    let mut field = vec![0x88u8; 12];
    for (slot, byte) in field.iter_mut().zip(password.bytes()) {
        *slot = byte.wrapping_add(0x88);
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_is_bounded() {
        for secs in [0u64, 30, 60, 90, 119, 120, 500] {
            let value = ramp(Duration::from_secs(secs), 4200);
            assert!(value <= 4200);
        }
        assert_eq!(ramp(Duration::from_secs(60), 4200), 4200);
        assert_eq!(ramp(Duration::from_secs(0), 4200), 0);
    }

    #[test]
    fn served_records_align_to_words() {
        for object in [0x5800u16, 0x5100, 0x5400] {
            let mut data = Vec::new();
            for record in records_for(object, "SIM", 1000, Duration::from_secs(5)) {
                record.write(object, &mut data);
            }
            assert!(!data.is_empty());
            assert_eq!(data.len() % 4, 0);
        }
    }
}
