use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mtc_core::{
    Asset, Condition, DataItem, DataSet, Device, EntityKind, FaultState, Message, Observation,
    Table, TimeSeries, Timestamp,
};
use mtc_shdr::{
    SHDR_VERSION, command_line, encode_asset, encode_device, encode_observations,
    encode_remove_all_assets, encode_remove_all_devices, encode_remove_asset,
    encode_remove_device,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clients::{BoxedWriter, ClientRegistry, ClientWriteError, SendError};
use crate::config::{AdapterMode, Config};
use crate::events::{AdapterEvent, ClientId, EventBus};
use crate::heartbeat::{HeartbeatConfig, run_heartbeat};
use crate::queue::{DEFAULT_BUFFER_LIMIT, ObservationQueue};
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub device_key: Option<String>,
    pub mode: AdapterMode,
    pub filter_duplicates: bool,
    pub output_timestamps: bool,
    pub buffer_limit: usize,
    pub multiline_assets: bool,
    pub multiline_devices: bool,
    pub heartbeat: HeartbeatConfig,
    pub write_timeout: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            device_key: None,
            mode: AdapterMode::Current,
            filter_duplicates: true,
            output_timestamps: true,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            multiline_assets: true,
            multiline_devices: true,
            heartbeat: HeartbeatConfig::default(),
            write_timeout: mtc_shdr::DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl From<&Config> for AdapterOptions {
    fn from(config: &Config) -> Self {
        Self {
            device_key: config.adapter.device_key.clone(),
            mode: config.adapter.mode,
            filter_duplicates: config.adapter.filter_duplicates,
            output_timestamps: config.adapter.output_timestamps,
            buffer_limit: config.adapter.buffer_limit,
            multiline_assets: config.adapter.multiline_assets,
            multiline_devices: config.adapter.multiline_devices,
            heartbeat: HeartbeatConfig {
                heartbeat: config.server.heartbeat(),
                max_missed: config.server.max_missed_heartbeats,
            },
            write_timeout: config.server.timeout(),
        }
    }
}

struct Inner {
    options: AdapterOptions,
    store: StateStore,
    queue: ObservationQueue,
    assets: Mutex<BTreeMap<String, Asset>>,
    devices: Mutex<BTreeMap<String, Device>>,
    clients: ClientRegistry,
    events: EventBus,
    /// Serializes flushes, immediate sends and connects, so a batch is
    /// promoted or rolled back before the next one is taken and every agent
    /// sees each batch either in its replay or on the wire.
    flush: tokio::sync::Mutex<()>,
}

/// The producing side of an SHDR connection.
///
/// Observations are staged with the `add_*` methods and written by a flush
/// (`send_changed` / `send_buffer`, usually from the interval loop), or
/// written at once with the `send_*` methods. Cloning is cheap and clones
/// share all state.
#[derive(Clone)]
pub struct ShdrAdapter {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for ShdrAdapter {
    fn default() -> Self {
        Self::new(AdapterOptions::default())
    }
}

impl ShdrAdapter {
    pub fn new(options: AdapterOptions) -> Self {
        let events = EventBus::new();
        let clients = ClientRegistry::new(options.write_timeout, events.clone());

        Self {
            inner: Arc::new(Inner {
                store: StateStore::new(options.filter_duplicates),
                queue: ObservationQueue::new(options.buffer_limit),
                assets: Mutex::new(BTreeMap::new()),
                devices: Mutex::new(BTreeMap::new()),
                clients,
                events,
                flush: tokio::sync::Mutex::new(()),
                options,
            }),
        }
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.inner.options
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AdapterEvent> {
        self.inner.events.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.count()
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    fn with_default_device(&self, observation: Observation) -> Observation {
        match (&self.inner.options.device_key, observation.device_key()) {
            (Some(device), None) => set_device(observation, device),
            _ => observation,
        }
    }

    /// Applies the timestamp policy: unset timestamps get the current time,
    /// or every timestamp is dropped when output is disabled.
    fn stamp(&self, observation: Observation, now: Timestamp) -> Observation {
        if !self.inner.options.output_timestamps {
            observation.with_timestamp(Timestamp::UNSET)
        } else if observation.timestamp().is_set() {
            observation
        } else {
            observation.with_timestamp(now)
        }
    }

    fn stamp_time(&self, timestamp: Timestamp) -> Timestamp {
        if self.inner.options.output_timestamps {
            timestamp.or(Timestamp::now())
        } else {
            Timestamp::UNSET
        }
    }

    // -------------------------------------------------------------------------
    // Staging
    // -------------------------------------------------------------------------

    /// Stages an observation for the next flush.
    ///
    /// In current mode this returns `false` when the value repeats what the
    /// slot already holds; in buffer mode, when the queue is full or already
    /// holds the exact same sample.
    pub fn add_observation(&self, observation: impl Into<Observation>) -> bool {
        let observation = self.with_default_device(observation.into());

        match self.inner.options.mode {
            AdapterMode::Current => self.inner.store.upsert(observation),
            AdapterMode::Buffer => {
                let observation = self.stamp(observation, Timestamp::now());
                let accepted = self.inner.queue.push(observation);
                if !accepted {
                    debug!(queued = self.inner.queue.len(), "observation not queued");
                }
                accepted
            }
        }
    }

    pub fn add_data_item(&self, item: DataItem) -> bool {
        self.add_observation(item)
    }

    pub fn add_message(&self, message: Message) -> bool {
        self.add_observation(message)
    }

    pub fn add_condition(&self, condition: Condition) -> bool {
        self.add_observation(condition)
    }

    pub fn add_time_series(&self, series: TimeSeries) -> bool {
        self.add_observation(series)
    }

    pub fn add_data_set(&self, data_set: DataSet) -> bool {
        self.add_observation(data_set)
    }

    pub fn add_table(&self, table: Table) -> bool {
        self.add_observation(table)
    }

    /// Merges one fault state into the condition `key`.
    ///
    /// NORMAL and UNAVAILABLE clear every active state; WARNING and FAULT
    /// accumulate, replacing an earlier state with the same native code.
    pub fn add_fault_state(
        &self,
        key: impl Into<String>,
        state: FaultState,
        timestamp: Timestamp,
    ) -> bool {
        let condition = Condition::new(key, state.clone()).at(timestamp);
        let Observation::Condition(condition) = self.with_default_device(condition.into()) else {
            return false;
        };

        if self.inner.options.mode == AdapterMode::Buffer {
            return self.add_observation(condition);
        }

        let store_key = mtc_core::Entity::store_key(&condition);
        self.inner
            .store
            .upsert_with(EntityKind::Condition, store_key, |existing| match existing {
                Some(Observation::Condition(current)) => current
                    .clone()
                    .with_fault_state(state)
                    .at(timestamp)
                    .into(),
                _ => condition.into(),
            })
    }

    // -------------------------------------------------------------------------
    // Flushing
    // -------------------------------------------------------------------------

    async fn write_observations(&self, observations: &[Observation]) -> Result<(), SendError> {
        let lines = encode_observations(observations);
        self.inner.clients.broadcast(&lines).await
    }

    /// Writes every staged value not yet sent. On failure the batch stays
    /// pending for the next flush and `last` is left untouched.
    pub async fn send_changed(&self) -> Result<usize, SendError> {
        let _flush = self.inner.flush.lock().await;

        let taken = self.inner.store.take_changed();
        if taken.is_empty() {
            return Ok(0);
        }

        let now = Timestamp::now();
        let stamped: Vec<Observation> = taken
            .iter()
            .map(|observation| self.stamp(observation.clone(), now))
            .collect();

        match self.write_observations(&stamped).await {
            Ok(()) => {
                self.inner.store.promote_to_last(&stamped);
                Ok(stamped.len())
            }
            Err(e) => {
                self.inner.store.rollback(&taken);
                Err(e)
            }
        }
    }

    /// Writes the whole buffer queue in order, draining it on success.
    pub async fn send_buffer(&self) -> Result<usize, SendError> {
        let _flush = self.inner.flush.lock().await;

        let queued = self.inner.queue.snapshot();
        if queued.is_empty() {
            return Ok(0);
        }

        self.write_observations(&queued).await?;
        self.inner.queue.drain_front(queued.len());
        self.inner.store.promote_to_last(&queued);
        Ok(queued.len())
    }

    /// The flush for this adapter's mode; what the interval loop runs.
    pub async fn flush(&self) -> Result<usize, SendError> {
        match self.inner.options.mode {
            AdapterMode::Current => self.send_changed().await,
            AdapterMode::Buffer => self.send_buffer().await,
        }
    }

    /// Re-sends the full last-known state, restamped with `timestamp` when
    /// timestamps are output.
    pub async fn send_last(&self, timestamp: Timestamp) -> Result<(), SendError> {
        let timestamp = self.stamp_time(timestamp);
        let last: Vec<Observation> = self
            .inner
            .store
            .replay_last()
            .into_iter()
            .map(|observation| observation.with_timestamp(timestamp))
            .collect();

        self.write_observations(&last).await
    }

    /// Writes one observation immediately, bypassing staging. The slot's
    /// current and last values are updated only if every client accepted it.
    pub async fn send_observation(&self, observation: impl Into<Observation>) -> Result<(), SendError> {
        let observation = self.with_default_device(observation.into());
        let observation = self.stamp(observation, Timestamp::now());

        let _flush = self.inner.flush.lock().await;
        let sent = [observation];
        self.write_observations(&sent).await?;
        self.inner.store.record_sent(&sent);
        Ok(())
    }

    pub async fn send_data_item(&self, item: DataItem) -> Result<(), SendError> {
        self.send_observation(item).await
    }

    pub async fn send_message(&self, message: Message) -> Result<(), SendError> {
        self.send_observation(message).await
    }

    pub async fn send_condition(&self, condition: Condition) -> Result<(), SendError> {
        self.send_observation(condition).await
    }

    pub async fn send_time_series(&self, series: TimeSeries) -> Result<(), SendError> {
        self.send_observation(series).await
    }

    pub async fn send_data_set(&self, data_set: DataSet) -> Result<(), SendError> {
        self.send_observation(data_set).await
    }

    pub async fn send_table(&self, table: Table) -> Result<(), SendError> {
        self.send_observation(table).await
    }

    /// Stages UNAVAILABLE for every slot this adapter has reported, stamped
    /// with `timestamp`. The next flush carries them out.
    pub fn set_unavailable(&self, timestamp: Timestamp) -> usize {
        let timestamp = timestamp.or(Timestamp::now());
        let mut known = self.inner.store.known();
        if self.inner.options.mode == AdapterMode::Buffer {
            known.extend(self.inner.queue.snapshot());
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut staged = 0;
        for observation in known {
            if !seen.insert((observation.kind(), observation.store_key())) {
                continue;
            }
            if self.add_observation(observation.to_unavailable().with_timestamp(timestamp)) {
                staged += 1;
            }
        }
        staged
    }

    // -------------------------------------------------------------------------
    // Assets and devices
    // -------------------------------------------------------------------------

    /// Writes an asset and remembers it for replay. An asset identical to
    /// the one already sent under the same id is skipped.
    pub async fn send_asset(&self, asset: Asset) -> Result<(), SendError> {
        let mut asset = match (&self.inner.options.device_key, &asset.device_key) {
            (Some(device), None) => asset.with_device(device.clone()),
            _ => asset,
        };

        if self.inner.options.filter_duplicates {
            let assets = lock(&self.inner.assets);
            if assets
                .get(&asset.asset_id)
                .is_some_and(|known| known.change_id() == asset.change_id())
            {
                return Ok(());
            }
        }

        asset.timestamp = self.stamp_time(asset.timestamp);
        let lines = encode_asset(&asset, self.inner.options.multiline_assets);
        let _flush = self.inner.flush.lock().await;
        self.inner.clients.broadcast(&lines).await?;

        lock(&self.inner.assets).insert(asset.asset_id.clone(), asset);
        Ok(())
    }

    pub async fn remove_asset(&self, asset_id: &str, timestamp: Timestamp) -> Result<(), SendError> {
        lock(&self.inner.assets).remove(asset_id);
        let line = encode_remove_asset(asset_id, self.stamp_time(timestamp));
        self.inner.clients.broadcast(&[line]).await
    }

    /// Removes every asset, or only those of `asset_type`.
    pub async fn remove_all_assets(
        &self,
        asset_type: Option<&str>,
        timestamp: Timestamp,
    ) -> Result<(), SendError> {
        lock(&self.inner.assets)
            .retain(|_, asset| asset_type.is_some_and(|kind| asset.asset_type != kind));
        let line = encode_remove_all_assets(asset_type, self.stamp_time(timestamp));
        self.inner.clients.broadcast(&[line]).await
    }

    pub async fn send_device(&self, device: Device) -> Result<(), SendError> {
        let mut device = device;

        if self.inner.options.filter_duplicates {
            let devices = lock(&self.inner.devices);
            if devices
                .get(&device.uuid)
                .is_some_and(|known| known.change_id() == device.change_id())
            {
                return Ok(());
            }
        }

        device.timestamp = self.stamp_time(device.timestamp);
        let lines = encode_device(&device, self.inner.options.multiline_devices);
        let _flush = self.inner.flush.lock().await;
        self.inner.clients.broadcast(&lines).await?;

        lock(&self.inner.devices).insert(device.uuid.clone(), device);
        Ok(())
    }

    pub async fn remove_device(&self, uuid: &str, timestamp: Timestamp) -> Result<(), SendError> {
        lock(&self.inner.devices).remove(uuid);
        let line = encode_remove_device(uuid, self.stamp_time(timestamp));
        self.inner.clients.broadcast(&[line]).await
    }

    pub async fn remove_all_devices(&self, timestamp: Timestamp) -> Result<(), SendError> {
        lock(&self.inner.devices).clear();
        let line = encode_remove_all_devices(self.stamp_time(timestamp));
        self.inner.clients.broadcast(&[line]).await
    }

    // -------------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------------

    /// Lines a newly connected agent receives before anything else.
    fn replay_lines(&self) -> Vec<String> {
        let mut lines = vec![command_line("shdrVersion", &SHDR_VERSION.to_string())];
        lines.extend(encode_observations(&self.inner.store.replay_last()));

        for asset in lock(&self.inner.assets).values() {
            lines.extend(encode_asset(asset, self.inner.options.multiline_assets));
        }
        for device in lock(&self.inner.devices).values() {
            lines.extend(encode_device(device, self.inner.options.multiline_devices));
        }

        lines
    }

    /// Registers an agent writer and replays the full known state to it.
    ///
    /// Waits for any flush in flight: its batch is then either promoted and
    /// part of the replay, or broadcast after this client is registered.
    pub async fn connect_client(
        &self,
        client: ClientId,
        addr: Option<SocketAddr>,
        writer: BoxedWriter,
        cancel: CancellationToken,
    ) -> Result<(), ClientWriteError> {
        let _flush = self.inner.flush.lock().await;
        self.inner
            .clients
            .register(client, addr, writer, cancel, || self.replay_lines())
            .await?;

        self.inner
            .events
            .emit(AdapterEvent::AgentConnected { client, addr });
        Ok(())
    }

    /// Drives one agent connection from connect to close: registration,
    /// replay, then the heartbeat loop. Returns once the agent is gone.
    ///
    /// A connection whose replay fails was never announced, so it ends
    /// without `AgentDisconnected` either.
    pub async fn serve_connection<S>(
        &self,
        stream: S,
        addr: Option<SocketAddr>,
        cancel: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let client = ClientId::new();
        let (reader, writer) = tokio::io::split(stream);

        if let Err(e) = self
            .connect_client(client, addr, Box::new(writer), cancel.clone())
            .await
        {
            warn!(%client, error = %e, "failed to replay state to agent");
            return;
        }

        run_heartbeat(
            client,
            reader,
            &self.inner.clients,
            &self.inner.events,
            self.inner.options.heartbeat,
            cancel,
        )
        .await;
    }

    /// Drops every connected agent.
    pub fn disconnect_all(&self) {
        self.inner.clients.clear();
    }
}

fn set_device(observation: Observation, device: &str) -> Observation {
    match observation {
        Observation::DataItem(item) => item.with_device(device).into(),
        Observation::Message(message) => message.with_device(device).into(),
        Observation::Condition(condition) => condition.with_device(device).into(),
        Observation::TimeSeries(series) => series.with_device(device).into(),
        Observation::DataSet(data_set) => data_set.with_device(device).into(),
        Observation::Table(table) => table.with_device(device).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(mode: AdapterMode) -> ShdrAdapter {
        ShdrAdapter::new(AdapterOptions {
            mode,
            buffer_limit: 2,
            ..AdapterOptions::default()
        })
    }

    #[test]
    fn fault_states_accumulate_until_cleared() {
        let adapter = adapter(AdapterMode::Current);
        let ts = Timestamp(1);

        assert!(adapter.add_fault_state("system", FaultState::warning("W1", "low oil"), ts));
        assert!(adapter.add_fault_state("system", FaultState::fault("F1", "overheat"), ts));
        // same native code replaces rather than duplicates
        assert!(adapter.add_fault_state("system", FaultState::fault("F1", "overheat!"), ts));

        let pending = adapter.inner.store.take_changed();
        let Some(Observation::Condition(condition)) = pending.first() else {
            panic!("expected a condition, got {pending:?}");
        };
        assert_eq!(condition.fault_states.len(), 2);

        assert!(adapter.add_fault_state("system", FaultState::normal(), ts));
        let pending = adapter.inner.store.take_changed();
        let Some(Observation::Condition(condition)) = pending.first() else {
            panic!("expected a condition, got {pending:?}");
        };
        assert_eq!(condition.fault_states, vec![FaultState::normal()]);
    }

    #[test]
    fn default_device_is_applied() {
        let adapter = ShdrAdapter::new(AdapterOptions {
            device_key: Some("mill".into()),
            ..AdapterOptions::default()
        });
        adapter.add_data_item(DataItem::new("temp", 1.0));
        adapter.add_data_item(DataItem::new("temp", 2.0).with_device("lathe"));

        let keys: Vec<String> = adapter
            .inner
            .store
            .take_changed()
            .iter()
            .map(Observation::store_key)
            .collect();
        assert_eq!(keys, vec!["lathe:temp", "mill:temp"]);
    }

    #[test]
    fn set_unavailable_covers_every_known_slot() {
        let adapter = adapter(AdapterMode::Current);
        adapter.add_data_item(DataItem::new("temp", 1.0));
        adapter.add_condition(Condition::normal("system"));
        adapter.inner.store.take_changed();

        assert_eq!(adapter.set_unavailable(Timestamp(5)), 2);
        let pending = adapter.inner.store.take_changed();
        assert!(pending.iter().all(|o| match o {
            Observation::DataItem(item) => item.value.is_unavailable(),
            Observation::Condition(condition) => condition.is_unavailable(),
            _ => false,
        }));
    }
}
