use std::collections::BTreeSet;
use std::time::Duration;

use mtc_core::{
    Condition, DataItem, DataItemClass, DataItemDescriptor, DataSet, Message, Observation, Table,
    TimeSeries, Timestamp,
};
use mtc_shdr::{
    Command, FramingError, PING_LINE, ParseError, ShdrLine, ShdrReader, ShdrRecord,
    decode_observations, write_lines,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AdapterConfig;
use crate::sink::{AgentSink, DeviceLookup, ObservationOptions};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("adapter silent for {0:?}")]
    Timeout(Duration),
}

/// What happened on an adapter connection, for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected { addr: String },
    Disconnected { addr: String },
    /// A key on an observation line matched no data item of its device.
    InvalidObservation { device: String, key: String },
    ParseError { message: String },
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub addr: String,
    pub device: String,
    pub heartbeat: Duration,
    pub legacy_timeout: Duration,
    pub reconnect_interval: Duration,
    pub options: ObservationOptions,
}

impl From<&AdapterConfig> for ClientSettings {
    fn from(config: &AdapterConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            device: config.device.clone(),
            heartbeat: config.heartbeat(),
            legacy_timeout: config.legacy_timeout(),
            reconnect_interval: config.reconnect_interval(),
            options: ObservationOptions {
                ignore_timestamp: config.ignore_timestamps,
                convert_units: config.convert_units,
                ignore_case: config.ignore_case,
            },
        }
    }
}

/// Per-connection state.
struct Session {
    /// Device that unqualified keys resolve against; `* device:` moves it.
    device: String,
    /// Set once the adapter answers PING.
    heartbeat: Option<Duration>,
    /// Devices that go UNAVAILABLE when the connection drops.
    devices: BTreeSet<String>,
}

/// Receives SHDR from one adapter and feeds the agent.
pub struct AdapterClient<A> {
    settings: ClientSettings,
    agent: A,
    events: broadcast::Sender<ClientEvent>,
}

impl<A> AdapterClient<A>
where
    A: DeviceLookup + AgentSink,
{
    pub fn new(settings: ClientSettings, agent: A) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            agent,
            events,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Connects, streams until the connection ends, and reconnects after
    /// `reconnect_interval` until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let addr = self.settings.addr.as_str();

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                connected = TcpStream::connect(addr) => connected,
            };

            match connected {
                Ok(stream) => {
                    info!(%addr, device = %self.settings.device, "connected to adapter");
                    match self.handle_connection(stream, cancel.clone()).await {
                        Ok(()) => info!(%addr, "adapter connection closed"),
                        Err(e) => warn!(%addr, error = %e, "adapter connection failed"),
                    }
                }
                Err(e) => warn!(%addr, error = %e, "failed to connect to adapter"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
            }
        }

        debug!(%addr, "adapter client stopped");
    }

    /// Streams one connection to completion. Every device the connection
    /// reported for is marked UNAVAILABLE before this returns.
    pub async fn handle_connection<S>(
        &self,
        stream: S,
        cancel: CancellationToken,
    ) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = ShdrReader::new(read_half);

        let mut session = Session {
            device: self.settings.device.clone(),
            heartbeat: None,
            devices: BTreeSet::new(),
        };
        match self.agent.device_uuid(&session.device) {
            Some(uuid) => {
                session.devices.insert(uuid);
            }
            None => warn!(device = %session.device, "adapter device is not in the device model"),
        }

        self.emit(ClientEvent::Connected {
            addr: self.settings.addr.clone(),
        });

        let result = self
            .stream(&mut reader, &mut write_half, &mut session, &cancel)
            .await;

        self.set_unavailable(&session).await;
        self.emit(ClientEvent::Disconnected {
            addr: self.settings.addr.clone(),
        });

        result
    }

    async fn stream<R, W>(
        &self,
        reader: &mut ShdrReader<R>,
        writer: &mut W,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let ping_line = [PING_LINE.to_owned()];
        write_lines(writer, &ping_line).await?;

        let mut ping = ping_interval(self.settings.heartbeat);
        let mut read_timeout = self.settings.legacy_timeout;
        let mut deadline = Instant::now() + read_timeout;

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ping.tick() => {
                    write_lines(writer, &ping_line).await?;
                    continue;
                }
                read = tokio::time::timeout_at(deadline, reader.next_record()) => read,
            };

            let record = match read {
                Err(_) => return Err(ClientError::Timeout(read_timeout)),
                Ok(record) => match record? {
                    Some(record) => record,
                    None => return Ok(()),
                },
            };

            match record {
                Ok(ShdrRecord::Line(ShdrLine::Command(Command::Pong { heartbeat }))) => {
                    if session.heartbeat != Some(heartbeat) {
                        info!(heartbeat_ms = heartbeat.as_millis() as u64, "adapter supports heartbeats");
                        session.heartbeat = Some(heartbeat);
                        ping = ping_interval(heartbeat);
                        read_timeout = heartbeat * 2;
                    }
                }
                Ok(record) => self.apply(record, session).await,
                Err(e) => {
                    warn!(error = %e, "failed to parse adapter line");
                    self.emit(ClientEvent::ParseError {
                        message: e.to_string(),
                    });
                }
            }

            deadline = Instant::now() + read_timeout;
        }
    }

    async fn apply(&self, record: ShdrRecord, session: &mut Session) {
        match record {
            ShdrRecord::Line(line) => self.apply_line(line, session).await,
            ShdrRecord::Asset(asset) => {
                let Some(uuid) = self.session_uuid(session) else {
                    return;
                };
                let asset_id = asset.asset_id.clone();
                match self
                    .agent
                    .add_asset(&uuid, asset, self.settings.options.ignore_timestamp)
                    .await
                {
                    Ok(_) => debug!(%asset_id, device = %uuid, "asset received"),
                    Err(e) => warn!(%asset_id, error = %e, "failed to add asset"),
                }
            }
            ShdrRecord::Device(device) => {
                let uuid = device.uuid.clone();
                match self.agent.add_device(device).await {
                    Ok(()) => debug!(%uuid, "device received"),
                    Err(e) => warn!(%uuid, error = %e, "failed to add device"),
                }
            }
        }
    }

    async fn apply_line(&self, line: ShdrLine, session: &mut Session) {
        match line {
            ShdrLine::Observations { timestamp, fields } => {
                self.apply_observations(timestamp, &fields, session).await
            }
            ShdrLine::Command(Command::Set { name, value }) => {
                if name.eq_ignore_ascii_case("device") {
                    self.retarget(&value, session);
                } else {
                    debug!(%name, %value, "adapter command");
                }
            }
            ShdrLine::Command(command) => debug!(?command, "ignoring adapter command"),
            ShdrLine::RemoveAsset {
                timestamp,
                asset_id,
            } => {
                let Some(uuid) = self.session_uuid(session) else {
                    return;
                };
                if let Err(e) = self.agent.remove_asset(&uuid, &asset_id, timestamp).await {
                    warn!(%asset_id, error = %e, "failed to remove asset");
                }
            }
            ShdrLine::RemoveAllAssets {
                timestamp,
                asset_type,
            } => {
                let Some(uuid) = self.session_uuid(session) else {
                    return;
                };
                if let Err(e) = self
                    .agent
                    .remove_all_assets(&uuid, asset_type.as_deref(), timestamp)
                    .await
                {
                    warn!(error = %e, "failed to remove assets");
                }
            }
            ShdrLine::RemoveDevice { timestamp, uuid } => {
                if let Err(e) = self.agent.remove_device(&uuid, timestamp).await {
                    warn!(%uuid, error = %e, "failed to remove device");
                }
            }
            ShdrLine::RemoveAllDevices { timestamp } => {
                if let Err(e) = self.agent.remove_all_devices(timestamp).await {
                    warn!(error = %e, "failed to remove devices");
                }
            }
            // The reader assembles these into records.
            ShdrLine::Asset { .. } | ShdrLine::Device { .. } => {}
        }
    }

    async fn apply_observations(&self, timestamp: Timestamp, fields: &[String], session: &mut Session) {
        let default = session.device.as_str();
        let decoded = decode_observations(timestamp, fields, |device, key| {
            self.agent
                .data_item(device.unwrap_or(default), key)
                .map(|item| item.class())
        });

        for result in decoded {
            match result {
                Ok(observation) => {
                    let device = observation.device_key().unwrap_or(default);
                    let Some(uuid) = self.agent.device_uuid(device) else {
                        continue;
                    };
                    session.devices.insert(uuid.clone());

                    if let Err(e) = self
                        .agent
                        .add_observation(&uuid, observation, self.settings.options)
                        .await
                    {
                        warn!(device = %uuid, error = %e, "failed to add observation");
                    }
                }
                Err(ParseError::UnknownDataItem { device, key }) => {
                    let device = device.unwrap_or_else(|| default.to_owned());
                    warn!(%device, %key, "invalid observation: unknown data item");
                    self.emit(ClientEvent::InvalidObservation { device, key });
                }
                Err(e) => {
                    warn!(error = %e, "failed to decode observation");
                    self.emit(ClientEvent::ParseError {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn retarget(&self, device: &str, session: &mut Session) {
        match self.agent.device_uuid(device) {
            Some(uuid) => {
                info!(%device, "adapter switched device");
                session.device = device.to_owned();
                session.devices.insert(uuid);
            }
            None => warn!(%device, "adapter named an unknown device"),
        }
    }

    fn session_uuid(&self, session: &Session) -> Option<String> {
        let uuid = self.agent.device_uuid(&session.device);
        if uuid.is_none() {
            warn!(device = %session.device, "dropping update for unknown device");
        }
        uuid
    }

    /// Reports every data item of the session's devices as UNAVAILABLE so
    /// nothing keeps a stale value after the adapter goes away.
    async fn set_unavailable(&self, session: &Session) {
        let timestamp = Timestamp::now();
        let options = ObservationOptions {
            ignore_timestamp: false,
            ..self.settings.options
        };

        for uuid in &session.devices {
            let items = self.agent.device_data_items(uuid);
            info!(device = %uuid, count = items.len(), "marking device unavailable");

            for item in &items {
                let observation = unavailable(item).with_timestamp(timestamp);
                if let Err(e) = self.agent.add_observation(uuid, observation, options).await {
                    warn!(device = %uuid, data_item = %item.id, error = %e, "failed to mark unavailable");
                }
            }
        }
    }
}

fn ping_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn unavailable(item: &DataItemDescriptor) -> Observation {
    let key = item.id.as_str();
    match item.class() {
        DataItemClass::Value => DataItem::unavailable(key).into(),
        DataItemClass::Message => Message::unavailable(key).into(),
        DataItemClass::Condition => Condition::unavailable(key).into(),
        DataItemClass::TimeSeries => TimeSeries::unavailable(key).into(),
        DataItemClass::DataSet => DataSet::unavailable(key).into(),
        DataItemClass::Table => Table::unavailable(key).into(),
    }
}
