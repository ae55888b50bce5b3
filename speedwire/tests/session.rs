//! End-to-end tests against stub peers on the loopback.
//!
//! The station binds the wildcard address; every stub binds its own
//! 127.0.0.x:9522 with SO_REUSEADDR so datagrams addressed to the stub
//! reach the stub and replies reach the station, which then demuxes by
//! the stub's source IP.
//!
//! Stations are deduplicated process-wide, so all tests run on one
//! shared runtime; the receive loop must not die with the first test's
//! runtime.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::sync::CancellationToken;

use speedwire::{Device, Error, Station, Value, ValueId};
use speedwire_proto::{
    DeviceData, DeviceId, MeasuredData, MeterFrame, Net2Content, ObisId, Packet, RawValue,
    ResponseValue,
};

const PORT: u16 = 9522;

fn runtime() -> &'static tokio::runtime::Runtime {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap()
    })
}

fn bind_stub(ip: &str) -> std::net::UdpSocket {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
    socket.set_reuse_address(true).unwrap();
    let addr: SocketAddr = format!("{ip}:{PORT}").parse().unwrap();
    socket.bind(&addr.into()).unwrap();
    socket.into()
}

struct StubInverter {
    ip: &'static str,
    serial: u32,
    name: &'static str,
    /// Reply to each value request once with a foreign packet ID first.
    wrong_id_first: bool,
}

impl StubInverter {
    fn spawn(self) {
        let socket = bind_stub(self.ip);
        thread::spawn(move || self.run(socket));
    }

    fn run(&self, socket: std::net::UdpSocket) {
        let identity = DeviceId {
            susy_id: 0x017A,
            serial: self.serial,
        };
        let mut buf = [0u8; 2048];

        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf) else {
                return;
            };
            let Ok(packet) = Packet::read(&buf[..len]) else {
                continue;
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
                // Logout: silence.
                (0x0E, 0xFFFD) => continue,
                // Login: any password is fine here.
                (0x0C, 0xFFFD) => {}
                // Identification probe: a plain echo is enough.
                (0x00, 0x0000) => {}
                // Value request.
                (0x00, object) => {
                    let records = self.records_for(object);
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

            if self.wrong_id_first && reply.command == 0x01 {
                let mut decoy = reply.clone();
                decoy.packet_id = (reply.packet_id + 1) & 0xFF;
                let envelope = Packet::session(Net2Content::DeviceData(decoy));
                let _ = socket.send_to(&envelope.bytes(), from);
            }

            let envelope = Packet::session(Net2Content::DeviceData(reply));
            let _ = socket.send_to(&envelope.bytes(), from);
        }
    }

    fn records_for(&self, object: u16) -> Vec<ResponseValue> {
        match object {
            0x5800 => vec![
                ResponseValue {
                    class: 0x00,
                    code: 0x821E,
                    kind: 0x10,
                    timestamp: 1,
                    values: vec![RawValue::Text(self.name.to_string())],
                },
                ResponseValue {
                    class: 0x00,
                    code: 0x821F,
                    kind: 0x08,
                    timestamp: 1,
                    values: vec![RawValue::U32(8001)],
                },
            ],
            0x5100 => vec![ResponseValue {
                class: 0x00,
                code: 0x263F,
                kind: 0x00,
                timestamp: 1,
                values: vec![RawValue::U32(4200)],
            }],
            0x5400 => vec![ResponseValue {
                class: 0x00,
                code: 0x2601,
                kind: 0x00,
                timestamp: 1,
                values: vec![RawValue::U64(3600)],
            }],
            _ => Vec::new(),
        }
    }
}

/// Meter stub pushing one broadcast every 150 ms at the station.
fn spawn_meter(ip: &'static str, serial: u32) {
    let socket = bind_stub(ip);
    thread::spawn(move || {
        let frame = MeterFrame {
            device: DeviceId {
                susy_id: 349,
                serial,
            },
            ticker_ms: 0,
            values: vec![
                MeasuredData {
                    obis: ObisId {
                        channel: 0,
                        value_index: 1,
                        kind: 4,
                        tariff: 0,
                    },
                    value: RawValue::U32(1000),
                },
                MeasuredData {
                    obis: ObisId {
                        channel: 0,
                        value_index: 1,
                        kind: 8,
                        tariff: 0,
                    },
                    value: RawValue::U64(987_654_321),
                },
            ],
        };
        let bytes = Packet::session(Net2Content::MeterFrame(frame)).bytes();

        loop {
            let _ = socket.send_to(&bytes, format!("127.0.0.1:{PORT}"));
            thread::sleep(Duration::from_millis(150));
        }
    });
}

#[test]
fn inverter_login_and_read() {
    runtime().block_on(async {
        StubInverter {
            ip: "127.0.0.2",
            serial: 63_012_345,
            name: "STP 6.0",
            wrong_id_first: false,
        }
        .spawn();

        let station = Station::open("").await.unwrap();
        let cancel = CancellationToken::new();

        let device = Device::open(&station, "127.0.0.2", "0000", &cancel)
            .await
            .unwrap();
        assert!(!device.is_meter());
        assert_eq!(device.serial(), 63_012_345);
        assert_eq!(device.susy_id(), 0x017A);

        let name = device.name(Duration::from_secs(5), &cancel).await.unwrap();
        assert_eq!(name, "STP 6.0");

        let class = device
            .device_class(Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert_eq!(class, 8001);

        let values = device.values(Duration::from_secs(10), &cancel).await.unwrap();
        assert_eq!(
            values.get(&ValueId::DeviceName),
            Some(&Value::Text("STP 6.0".to_string()))
        );
        assert_eq!(values.get(&ValueId::ActivePowerPlus), Some(&Value::U32(4200)));
        // Energy counter scaled from Wh to Ws by the catalog.
        assert_eq!(
            values.get(&ValueId::ActiveEnergyPlus),
            Some(&Value::F64(3600.0 * 3600.0))
        );
    });
}

#[test]
fn meter_session_reads_broadcasts() {
    runtime().block_on(async {
        spawn_meter("127.0.0.3", 3_001_234_567);

        let station = Station::open("").await.unwrap();
        let cancel = CancellationToken::new();

        let device = Device::open(&station, "127.0.0.3", "", &cancel)
            .await
            .unwrap();
        assert!(device.is_meter());
        assert_eq!(device.serial(), 3_001_234_567);
        assert_eq!(
            device.name(Duration::from_secs(1), &cancel).await.unwrap(),
            "Energy Meter"
        );
        assert_eq!(
            device
                .device_class(Duration::from_secs(1), &cancel)
                .await
                .unwrap(),
            1
        );

        let values = device.values(Duration::from_secs(3), &cancel).await.unwrap();
        assert_eq!(values.get(&ValueId::ActivePowerPlus), Some(&Value::F64(100.0)));
        assert_eq!(
            values.get(&ValueId::ActiveEnergyPlus),
            Some(&Value::U64(987_654_321))
        );

        let power = device
            .value(ValueId::ActivePowerPlus, Duration::from_secs(3), &cancel)
            .await
            .unwrap();
        assert_eq!(power, Some(Value::F64(100.0)));
    });
}

#[test]
fn responses_are_matched_by_packet_id() {
    runtime().block_on(async {
        StubInverter {
            ip: "127.0.0.6",
            serial: 63_099_999,
            name: "STP 8.0",
            wrong_id_first: true,
        }
        .spawn();

        let station = Station::open("").await.unwrap();
        let cancel = CancellationToken::new();

        let device = Device::open(&station, "127.0.0.6", "0000", &cancel)
            .await
            .unwrap();

        // The decoy reply with the foreign packet ID must be skipped.
        let name = device.name(Duration::from_secs(5), &cancel).await.unwrap();
        assert_eq!(name, "STP 8.0");
    });
}

#[test]
fn demux_never_crosses_source_ips() {
    runtime().block_on(async {
        let station = Station::open("").await.unwrap();

        let mut for_four = station.subscribe("127.0.0.4".parse().unwrap());

        // A frame from .5 must not show up in .4's queue.
        let five = bind_stub("127.0.0.5");
        five.send_to(
            &Packet::discovery_request().bytes(),
            format!("127.0.0.1:{PORT}"),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(100), for_four.recv())
                .await
                .is_err(),
            "frame from 127.0.0.5 leaked into the 127.0.0.4 queue"
        );

        // A frame from .4 does.
        let four = bind_stub("127.0.0.4");
        four.send_to(
            &Packet::discovery_request().bytes(),
            format!("127.0.0.1:{PORT}"),
        )
        .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), for_four.recv())
            .await
            .expect("frame from 127.0.0.4 never arrived")
            .unwrap();
        assert!(received.entry(0x0020).is_some());
    });
}

#[test]
fn discovery_finds_broadcasting_peers() {
    runtime().block_on(async {
        spawn_meter("127.0.0.7", 3_009_999_999);

        let station = Station::open("").await.unwrap();
        let devices = station.discover_for(Duration::from_secs(2), "0000").await;

        // Other tests' stubs share the bus, so only look for ours.
        let meter = devices
            .iter()
            .find(|d| d.serial() == 3_009_999_999)
            .expect("broadcasting meter was not discovered");
        assert!(meter.is_meter());
    });
}

#[test]
fn cancellation_wins_over_waiting() {
    runtime().block_on(async {
        let station = Station::open("").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        // 127.0.0.9 is silent; the cancelled token must end the open
        // before its three second identification deadline.
        let result = Device::open(&station, "127.0.0.9", "0000", &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    });
}

#[test]
fn silent_peer_is_no_response() {
    runtime().block_on(async {
        let station = Station::open("").await.unwrap();
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let result = Device::open(&station, "127.0.0.10", "0000", &cancel).await;
        assert!(matches!(result, Err(Error::NoResponse)));
        assert!(started.elapsed() >= Duration::from_secs(3));
    });
}

#[test]
fn unresolvable_host_is_invalid_address() {
    runtime().block_on(async {
        let station = Station::open("").await.unwrap();
        let cancel = CancellationToken::new();

        let result = Device::open(&station, "host.invalid", "0000", &cancel).await;
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
    });
}
