//! Device sessions: one per remote peer.
//!
//! A session is created by probing the peer until it identifies itself
//! as an inverter (it answers the probe) or an energy meter (its
//! broadcast shows up first). Inverter reads then follow the cycle
//! login → request per descriptor → logout, with packet-ID-matched
//! responses and resend on silence. Meter reads just wait for the next
//! broadcast.
//!
//! At most one request is in flight per session: every read path locks
//! the receive subscription for the whole cycle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use speedwire_proto::device_data::STATUS_NO_DATA;
use speedwire_proto::{DeviceData, DeviceId, Net2Content, Packet};

use crate::error::{Error, Result};
use crate::station::{Station, Subscription, PORT};
use crate::values::{self, RequestDescriptor, Value, ValueId, ValueInfo};

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_INTERVAL: Duration = Duration::from_millis(500);
const RESEND_INTERVAL: Duration = Duration::from_millis(500);
const LOGIN_ATTEMPTS: u32 = 3;

const CONTROL_REQUEST: u8 = 0xA0;
const COMMAND_LOGIN: u8 = 0x0C;
const COMMAND_LOGOUT: u8 = 0x0E;
const OBJECT_AUTH: u16 = 0xFFFD;
const JOB_LOGIN: u8 = 0x01;
const JOB_LOGOUT: u8 = 0x03;

// User-level login. The installer mode (key 0xBB, parameter 10) exists
// on the wire but is not spoken here.
const LOGIN_USER_PARAM: u32 = 7;
const LOGIN_KEY_USER: u8 = 0x88;
const PASSWORD_FIELD_LEN: usize = 12;

/// Session with one inverter or energy meter.
pub struct Device {
    station: Station,
    address: SocketAddr,
    password: String,
    id: DeviceId,
    meter: bool,
    subscription: Mutex<Subscription>,
}

impl Device {
    /// Open a session with the peer at `address` (host name or IP,
    /// without port).
    ///
    /// Probes the peer for up to three seconds; whichever Net2 payload
    /// arrives first decides whether this is an inverter or a meter.
    pub async fn open(
        station: &Station,
        address: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<Device> {
        let target = format!("{address}:{PORT}");
        let resolved = tokio::net::lookup_host(&target)
            .await
            .ok()
            .and_then(|mut addrs| addrs.find(|a| a.is_ipv4()))
            .ok_or_else(|| Error::InvalidAddress(target))?;

        let mut subscription = station.subscribe(resolved.ip());
        subscription.drain();

        let mut probe = DeviceData::request(CONTROL_REQUEST);
        probe.destination = DeviceId::BROADCAST;
        probe.parameters = vec![0, 0];

        let deadline = Instant::now() + IDENTIFY_TIMEOUT;
        let (id, meter) = 'identify: loop {
            if Instant::now() >= deadline {
                return Err(Error::NoResponse);
            }

            station
                .send(resolved, &Packet::session(Net2Content::DeviceData(probe.clone())))
                .await?;

            let attempt_end = (Instant::now() + PROBE_INTERVAL).min(deadline);
            loop {
                match read_net2_until(&mut subscription, attempt_end, cancel).await? {
                    Some(Net2Content::MeterFrame(frame)) => break 'identify (frame.device, true),
                    Some(Net2Content::DeviceData(data)) => break 'identify (data.source, false),
                    // Unrelated traffic: keep waiting out this attempt.
                    Some(_) => continue,
                    // Silence: probe again.
                    None => break,
                }
            }
        };

        debug!(
            "identified {} at {resolved}: serial {}, meter {meter}",
            if meter { "meter" } else { "inverter" },
            id.serial
        );

        Ok(Device {
            station: station.clone(),
            address: resolved,
            password: password.to_string(),
            id,
            meter,
            subscription: Mutex::new(subscription),
        })
    }

    /// Serial number reported during identification.
    pub fn serial(&self) -> u32 {
        self.id.serial
    }

    /// SusyID reported during identification.
    pub fn susy_id(&self) -> u16 {
        self.id.susy_id
    }

    /// Full identity of the peer.
    pub fn device_id(&self) -> DeviceId {
        self.id
    }

    /// Resolved UDP address of the peer.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// True for energy meters, false for inverters.
    pub fn is_meter(&self) -> bool {
        self.meter
    }

    /// Catalog metadata for a value ID.
    pub fn value_info(&self, id: ValueId) -> ValueInfo {
        values::info(id)
    }

    /// Human readable device name.
    pub async fn name(&self, timeout: Duration, cancel: &CancellationToken) -> Result<String> {
        if self.meter {
            return Ok("Energy Meter".to_string());
        }
        match self.value(ValueId::DeviceName, timeout, cancel).await? {
            Some(Value::Text(name)) => Ok(name),
            _ => Ok(String::new()),
        }
    }

    /// Numeric device class; meters report the fixed class `1`.
    pub async fn device_class(&self, timeout: Duration, cancel: &CancellationToken) -> Result<u32> {
        if self.meter {
            return Ok(1);
        }
        match self.value(ValueId::DeviceClass, timeout, cancel).await? {
            Some(Value::U32(class)) => Ok(class),
            _ => Ok(0),
        }
    }

    /// Read a single value.
    ///
    /// Inverters: one login/request/logout cycle for the descriptor the
    /// value belongs to. Meters: decoded from the next broadcast.
    /// `Ok(None)` means the device answered but does not provide the
    /// value.
    pub async fn value(
        &self,
        id: ValueId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let deadline = Instant::now() + timeout;

        if self.meter {
            let mut all = self.meter_values(deadline, cancel).await?;
            return Ok(all.remove(&id));
        }

        let Some(descriptor) = values::request_for(id) else {
            return Ok(None);
        };

        let mut subscription = self.subscription.lock().await;
        subscription.drain();

        self.login(&mut subscription, deadline, cancel).await?;
        let result = self
            .request_values(&mut subscription, descriptor, deadline, cancel)
            .await;
        self.logout().await;

        Ok(result?.remove(&id))
    }

    /// Read everything the device offers.
    pub async fn values(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<HashMap<ValueId, Value>> {
        let deadline = Instant::now() + timeout;

        if self.meter {
            return self.meter_values(deadline, cancel).await;
        }

        let mut subscription = self.subscription.lock().await;
        subscription.drain();

        self.login(&mut subscription, deadline, cancel).await?;

        let mut all = HashMap::new();
        let mut failure = None;
        for descriptor in values::all_request_descriptors() {
            match self
                .request_values(&mut subscription, *descriptor, deadline, cancel)
                .await
            {
                Ok(decoded) => all.extend(decoded),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.logout().await;

        match failure {
            Some(e) => Err(e),
            None => Ok(all),
        }
    }

    /// Wait for the next broadcast and decode it. Stale frames are
    /// drained first so the result is at most one broadcast old.
    async fn meter_values(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<HashMap<ValueId, Value>> {
        let mut subscription = self.subscription.lock().await;
        subscription.drain();

        loop {
            match read_net2_until(&mut subscription, deadline, cancel).await? {
                Some(Net2Content::MeterFrame(frame)) => {
                    return Ok(values::convert_meter_frame(&frame))
                }
                Some(_) => continue,
                None => return Err(Error::Timeout),
            }
        }
    }

    async fn login(
        &self,
        subscription: &mut Subscription,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut request = DeviceData::request(CONTROL_REQUEST);
        request.command = COMMAND_LOGIN;
        request.object = OBJECT_AUTH;
        request.job_number = JOB_LOGIN;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        request.parameters = vec![LOGIN_USER_PARAM, 0x0384, now, 0];
        request.data = obfuscate_password(&self.password);

        let response = self
            .send_await_response(subscription, &request, LOGIN_ATTEMPTS, deadline, cancel)
            .await?;

        if response.status != 0 {
            warn!(
                "login rejected by {} (status {:#06x})",
                self.address, response.status
            );
            return Err(Error::AuthFailed);
        }
        Ok(())
    }

    /// Best effort; the session is usable again either way.
    async fn logout(&self) {
        let mut request = DeviceData::request(CONTROL_REQUEST);
        request.command = COMMAND_LOGOUT;
        request.object = OBJECT_AUTH;
        request.job_number = JOB_LOGOUT;
        request.parameters = vec![0xFFFF_FFFF];

        if let Err(e) = self.send_device_data(&request).await {
            debug!("logout for {} failed: {e}", self.address);
        }
    }

    async fn request_values(
        &self,
        subscription: &mut Subscription,
        descriptor: RequestDescriptor,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<HashMap<ValueId, Value>> {
        let mut request = DeviceData::request(CONTROL_REQUEST);
        request.object = descriptor.object;
        request.parameters = vec![descriptor.start, descriptor.end];

        let response = self
            .send_await_response(subscription, &request, u32::MAX, deadline, cancel)
            .await?;

        if response.status == STATUS_NO_DATA {
            // The selector exists but this device has nothing behind it.
            return Ok(HashMap::new());
        }
        if response.status != 0 {
            return Err(Error::RequestFailed {
                status: response.status,
            });
        }
        Ok(values::parse_inverter_values(&response.response_values))
    }

    /// Send `request` and wait for the DeviceData echoing its packet ID,
    /// resending on silence. Frames with other packet IDs or other Net2
    /// content are discarded.
    async fn send_await_response(
        &self,
        subscription: &mut Subscription,
        request: &DeviceData,
        max_sends: u32,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<DeviceData> {
        let mut sends = 0;
        while sends < max_sends && Instant::now() < deadline {
            self.send_device_data(request).await?;
            sends += 1;

            let resend_at = (Instant::now() + RESEND_INTERVAL).min(deadline);
            loop {
                match read_net2_until(subscription, resend_at, cancel).await? {
                    Some(Net2Content::DeviceData(data))
                        if data.packet_id == request.packet_id =>
                    {
                        return Ok(data)
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
        }
        Err(Error::Timeout)
    }

    /// Wrap in a session envelope and send. The destination falls back
    /// to broadcast while the peer identity is still unknown.
    async fn send_device_data(&self, data: &DeviceData) -> Result<()> {
        let mut data = data.clone();
        data.destination = if self.id.is_unknown() {
            DeviceId::BROADCAST
        } else {
            self.id
        };

        self.station
            .send(self.address, &Packet::session(Net2Content::DeviceData(data)))
            .await
    }
}

/// Next Net2 payload from the queue, or `None` once `until` is reached.
async fn read_net2_until(
    subscription: &mut Subscription,
    until: Instant,
    cancel: &CancellationToken,
) -> Result<Option<Net2Content>> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep_until(until) => return Ok(None),
            packet = subscription.recv() => {
                let Some(packet) = packet else {
                    return Err(Error::NoResponse);
                };
                match packet.net2() {
                    Some(content) => return Ok(Some(content.clone())),
                    // Envelope without a Net2 entry, e.g. a discovery reply.
                    None => continue,
                }
            }
        }
    }
}

fn obfuscate_password(password: &str) -> Vec<u8> {
    let mut field = vec![LOGIN_KEY_USER; PASSWORD_FIELD_LEN];
    for (slot, byte) in field.iter_mut().zip(password.bytes()) {
        *slot = byte.wrapping_add(LOGIN_KEY_USER);
    }
    field
}
