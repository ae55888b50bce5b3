//! Discovery: find devices by shouting at the multicast group.
//!
//! Every 500 ms a discovery request is broadcast; any envelope seen on
//! the bus reveals its sender's IP through the station's observation
//! stream. Each new IP gets one identification attempt in a background
//! task; peers that identify become [`Device`]s on the caller's sink,
//! everything else is logged and forgotten.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use speedwire_proto::Packet;

use crate::device::Device;
use crate::station::Station;

const DISCOVERY_INTERVAL: Duration = Duration::from_millis(500);

impl Station {
    /// Discover devices until `cancel` fires, publishing each one to
    /// `sink`. Peers are deduplicated by source IP for the lifetime of
    /// the call.
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
        sink: mpsc::Sender<Device>,
        password: &str,
    ) {
        let mut observed = self.observe_ips();
        let mut known: HashSet<IpAddr> = HashSet::new();
        let mut ticker = interval(DISCOVERY_INTERVAL);
        let mut openings: JoinSet<Option<Device>> = JoinSet::new();
        let request = Packet::discovery_request();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    if let Err(e) = self.send(Station::multicast_addr(), &request).await {
                        debug!("discovery send failed: {e}");
                    }
                }

                ip = observed.recv() => {
                    let Some(ip) = ip else { break };
                    if !known.insert(ip) {
                        continue;
                    }

                    let station = self.clone();
                    let password = password.to_string();
                    let cancel = cancel.clone();
                    openings.spawn(async move {
                        match Device::open(&station, &ip.to_string(), &password, &cancel).await {
                            Ok(device) => {
                                info!("found device {} at {ip}", device.serial());
                                Some(device)
                            }
                            Err(e) => {
                                debug!("discovery skipping {ip}: {e}");
                                None
                            }
                        }
                    });
                }

                Some(opened) = openings.join_next(), if !openings.is_empty() => {
                    if let Ok(Some(device)) = opened {
                        if sink.send(device).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        // Let in-flight identification attempts settle.
        while let Some(opened) = openings.join_next().await {
            if let Ok(Some(device)) = opened {
                if sink.send(device).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Simple variant: collect for a fixed duration and return the list.
    pub async fn discover_for(&self, duration: Duration, password: &str) -> Vec<Device> {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);

        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            timer.cancel();
        });

        let run = self.discover(&cancel, tx, password);
        tokio::pin!(run);

        let mut devices = Vec::new();
        loop {
            tokio::select! {
                _ = &mut run => break,
                Some(device) = rx.recv() => devices.push(device),
            }
        }
        while let Ok(device) = rx.try_recv() {
            devices.push(device);
        }
        devices
    }
}
