//! The multicast station: one socket, one receive loop, many consumers.
//!
//! A [`Station`] owns the UDP socket bound to the Speedwire multicast
//! group and runs a single receiver task. Every decoded envelope is
//! fanned out twice:
//!   - to the per-IP subscriber queues of device sessions, and
//!   - to the discovery observers, which only see the source IP.
//!
//! All queues are bounded and published to with non-blocking sends, so a
//! stalled consumer loses its own frames and nothing else. Stations are
//! deduplicated per interface name: two `open("eth0")` calls share the
//! socket and the receive loop.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use speedwire_proto::Packet;

use crate::error::{Error, Result};

/// Multicast group of the Speedwire bus.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 12, 255, 254);
/// Port used by all Speedwire traffic.
pub const PORT: u16 = 9522;

const RECV_BUFFER_SIZE: usize = 2048;
const SUBSCRIPTION_DEPTH: usize = 5;
const OBSERVER_DEPTH: usize = 16;

// Stations deduplicated per interface name.
static REGISTRY: OnceLock<Mutex<HashMap<String, Station>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Station>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Packet>,
}

struct Observer {
    id: u64,
    tx: mpsc::Sender<IpAddr>,
}

struct Shared {
    interface: String,
    socket: UdpSocket,
    subscribers: RwLock<HashMap<IpAddr, Vec<Subscriber>>>,
    observers: RwLock<Vec<Observer>>,
    next_id: AtomicU64,
}

impl Shared {
    fn publish(&self, source: IpAddr, packet: Packet) {
        {
            let observers = self.observers.read().unwrap();
            for observer in observers.iter() {
                if observer.tx.try_send(source).is_err() {
                    debug!("discovery observer full, dropping {source}");
                }
            }
        }

        let subscribers = self.subscribers.read().unwrap();
        if let Some(queues) = subscribers.get(&source) {
            for subscriber in queues {
                if subscriber.tx.try_send(packet.clone()).is_err() {
                    debug!("subscriber queue for {source} full, dropping frame");
                }
            }
        }
    }
}

/// Handle to the shared multicast socket of one network interface.
#[derive(Clone)]
pub struct Station {
    shared: Arc<Shared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Station {
    /// Station for the given interface name (`""` = all interfaces),
    /// creating socket and receive loop on first use.
    pub async fn open(interface: &str) -> Result<Station> {
        let mut registry = registry().lock().unwrap();
        if let Some(station) = registry.get(interface) {
            return Ok(station.clone());
        }

        let station = Station::bind(interface)?;
        registry.insert(interface.to_string(), station.clone());
        Ok(station)
    }

    fn bind(interface: &str) -> Result<Station> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(Error::SocketUnavailable)?;
        socket
            .set_reuse_address(true)
            .map_err(Error::SocketUnavailable)?;
        socket
            .set_recv_buffer_size(RECV_BUFFER_SIZE)
            .map_err(Error::SocketUnavailable)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, PORT));
        socket
            .bind(&bind_addr.into())
            .map_err(Error::SocketUnavailable)?;
        socket
            .set_nonblocking(true)
            .map_err(Error::SocketUnavailable)?;

        let socket =
            UdpSocket::from_std(socket.into()).map_err(Error::SocketUnavailable)?;

        // Membership is only needed for unsolicited meter broadcasts;
        // unicast request/response works without it, so a failed join
        // degrades the station instead of failing it.
        let local_ip = interface_ipv4(interface);
        if let Err(e) = socket.join_multicast_v4(MULTICAST_GROUP, local_ip) {
            warn!("could not join {MULTICAST_GROUP} on interface {interface:?}: {e}");
        }

        info!("speedwire station listening on {bind_addr} (interface {interface:?})");

        let shared = Arc::new(Shared {
            interface: interface.to_string(),
            socket,
            subscribers: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });

        let task = tokio::spawn(receive_loop(shared.clone()));
        Ok(Station {
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    /// Name of the interface this station is bound to.
    pub fn interface(&self) -> &str {
        &self.shared.interface
    }

    /// Address discovery requests are broadcast to.
    pub fn multicast_addr() -> SocketAddr {
        SocketAddr::from((MULTICAST_GROUP, PORT))
    }

    /// Queue receiving every decoded envelope whose source is `ip`.
    pub fn subscribe(&self, ip: IpAddr) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_DEPTH);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.shared.subscribers.write().unwrap();
        subscribers
            .entry(ip)
            .or_default()
            .push(Subscriber { id, tx });

        Subscription {
            shared: self.shared.clone(),
            ip,
            id,
            rx,
        }
    }

    /// Stream of source IPs of every decoded envelope, for discovery.
    pub fn observe_ips(&self) -> IpObservation {
        let (tx, rx) = mpsc::channel(OBSERVER_DEPTH);
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        let mut observers = self.shared.observers.write().unwrap();
        observers.push(Observer { id, tx });

        IpObservation {
            shared: self.shared.clone(),
            id,
            rx,
        }
    }

    /// Serialize and write one envelope to `addr`.
    pub async fn send(&self, addr: SocketAddr, packet: &Packet) -> Result<()> {
        self.shared
            .socket
            .send_to(&packet.bytes(), addr)
            .await
            .map_err(Error::SendFailed)?;
        Ok(())
    }

    /// Stop the receive loop and drop the station from the registry.
    ///
    /// Existing subscriptions stay alive but go quiet.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }

        let mut registry = registry().lock().unwrap();
        if let Some(existing) = registry.get(&self.shared.interface) {
            if Arc::ptr_eq(&existing.shared, &self.shared) {
                registry.remove(&self.shared.interface);
            }
        }
    }
}

async fn receive_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, source) = match shared.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("receive failed: {e}");
                continue;
            }
        };

        // Decode failures are never fatal to the loop.
        match Packet::read(&buf[..len]) {
            Ok(packet) => shared.publish(source.ip(), packet),
            Err(e) => debug!("dropping malformed frame from {source}: {e}"),
        }
    }
}

/// Receiving end of a per-IP subscription; unregisters itself on drop.
pub struct Subscription {
    shared: Arc<Shared>,
    ip: IpAddr,
    id: u64,
    rx: mpsc::Receiver<Packet>,
}

impl Subscription {
    /// Next envelope from the subscribed peer.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Throw away everything already queued.
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.shared.subscribers.write().unwrap();
        if let Some(queues) = subscribers.get_mut(&self.ip) {
            queues.retain(|s| s.id != self.id);
            if queues.is_empty() {
                subscribers.remove(&self.ip);
            }
        }
    }
}

/// Receiving end of the discovery IP stream; unregisters itself on drop.
pub struct IpObservation {
    shared: Arc<Shared>,
    id: u64,
    rx: mpsc::Receiver<IpAddr>,
}

impl IpObservation {
    /// Source IP of the next decoded envelope, whoever sent it.
    pub async fn recv(&mut self) -> Option<IpAddr> {
        self.rx.recv().await
    }
}

impl Drop for IpObservation {
    fn drop(&mut self) {
        let mut observers = self.shared.observers.write().unwrap();
        observers.retain(|o| o.id != self.id);
    }
}

fn interface_ipv4(interface: &str) -> Ipv4Addr {
    if interface.is_empty() {
        return Ipv4Addr::UNSPECIFIED;
    }

    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("could not enumerate interfaces: {e}");
            return Ipv4Addr::UNSPECIFIED;
        }
    };

    for candidate in interfaces {
        if candidate.name != interface {
            continue;
        }
        for addr in &candidate.addr {
            if let IpAddr::V4(ip) = addr.ip() {
                return ip;
            }
        }
    }

    warn!("interface {interface:?} has no IPv4 address, using any");
    Ipv4Addr::UNSPECIFIED
}
