use std::time::Duration;

use async_trait::async_trait;
use mtc_core::{Asset, DataItem, FaultState, Message, Observation, TimeSeries};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{MachineSource, SourceEvent};
use crate::config::SourceConfig;

const EXECUTION_STATES: [&str; 4] = ["ACTIVE", "READY", "FEED_HOLD", "STOPPED"];
const POSITION_SAMPLES: usize = 10;

/// Simulated machine tool: spindle speed, temperatures, execution state, a
/// sampled axis position, and the odd warning.
pub struct MockMachine {
    /// Interval between samples.
    sample_interval: Duration,
    /// Chance per tick, in percent, of a warning on `system`.
    warning_percent: u32,
    send_tool_asset: bool,
}

impl MockMachine {
    pub fn new(sample_interval: Duration, warning_percent: u32, send_tool_asset: bool) -> Self {
        Self {
            sample_interval,
            warning_percent: warning_percent.min(100),
            send_tool_asset,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(
            Duration::from_millis(config.sample_interval_ms),
            config.warning_percent,
            config.send_tool_asset,
        )
    }
}

/// Mutable machine state carried between ticks.
struct MachineState {
    spindle_speed: f64,
    spindle_temp: f64,
    execution: &'static str,
    warned: bool,
    part_count: i64,
}

impl MachineState {
    fn new() -> Self {
        Self {
            spindle_speed: 0.0,
            spindle_temp: 22.0,
            execution: "READY",
            warned: false,
            part_count: 0,
        }
    }

    fn tick(&mut self, warning_percent: u32) -> Vec<SourceEvent> {
        let mut rng = rand::rng();
        let mut events = Vec::new();

        if rng.random_ratio(1, 10) {
            self.execution = EXECUTION_STATES[rng.random_range(0..EXECUTION_STATES.len())];
            if self.execution == "STOPPED" {
                self.part_count += 1;
            }
        }

        let active = self.execution == "ACTIVE";
        self.spindle_speed = if active {
            (rng.random_range(8_000.0..12_000.0_f64)).round()
        } else {
            0.0
        };
        let drift = if active { 0.4 } else { -0.3 };
        self.spindle_temp =
            (self.spindle_temp + drift + rng.random_range(-0.2..0.2)).clamp(20.0, 80.0);
        let spindle_temp = (self.spindle_temp * 10.0).round() / 10.0;

        events.push(obs(DataItem::new("avail", "AVAILABLE")));
        events.push(obs(DataItem::new("execution", self.execution)));
        events.push(obs(DataItem::new("Sspeed", self.spindle_speed)));
        events.push(obs(DataItem::new("Stemp", spindle_temp)));
        events.push(obs(DataItem::new("partcount", self.part_count)));

        if active {
            let samples = (0..POSITION_SAMPLES)
                .map(|_| (rng.random_range(-100.0..100.0_f64) * 100.0).round() / 100.0)
                .collect();
            events.push(obs(TimeSeries::new("Xpos", samples, 100.0)));
        }

        if !self.warned && rng.random_ratio(warning_percent, 100) {
            self.warned = true;
            events.push(SourceEvent::FaultState {
                key: "system".into(),
                state: FaultState::warning("OIL", "Spindle oil pressure low"),
            });
            events.push(obs(
                Message::new("msg", "Check spindle lubrication").with_native_code("M100"),
            ));
        } else if self.warned && rng.random_ratio(1, 4) {
            self.warned = false;
            events.push(SourceEvent::FaultState {
                key: "system".into(),
                state: FaultState::normal(),
            });
        }

        events
    }
}

fn obs(observation: impl Into<Observation>) -> SourceEvent {
    SourceEvent::Observation(observation.into())
}

fn tool_asset() -> Asset {
    let xml = "<CuttingTool assetId=\"T1\" toolId=\"1\" serialNumber=\"A1001\">\n\
               \x20 <CuttingToolLifeCycle>\n\
               \x20   <ToolLife type=\"MINUTES\" countDirection=\"DOWN\" limit=\"300\">300</ToolLife>\n\
               \x20 </CuttingToolLifeCycle>\n\
               </CuttingTool>";
    Asset::new("T1", "CuttingTool", xml)
}

#[async_trait]
impl MachineSource for MockMachine {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<SourceEvent>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);

        let sample_interval = self.sample_interval;
        let warning_percent = self.warning_percent;
        let send_tool_asset = self.send_tool_asset;

        info!(
            sample_interval_ms = sample_interval.as_millis() as u64,
            warning_percent, "Starting mock machine"
        );

        tokio::spawn(async move {
            if send_tool_asset && tx.send(SourceEvent::Asset(tool_asset())).await.is_err() {
                return;
            }

            let mut state = MachineState::new();
            let mut interval = tokio::time::interval(sample_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Mock machine shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        for event in state.tick(warning_percent) {
                            if tx.send(event).await.is_err() {
                                info!("Channel closed, mock machine shutting down");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tick_reports_core_items() {
        let mut state = MachineState::new();
        for _ in 0..20 {
            let events = state.tick(0);
            let keys: Vec<&str> = events
                .iter()
                .filter_map(|e| match e {
                    SourceEvent::Observation(o) => Some(o.key()),
                    _ => None,
                })
                .collect();
            for key in ["avail", "execution", "Sspeed", "Stemp", "partcount"] {
                assert!(keys.contains(&key), "missing {key}");
            }
        }
    }

    #[tokio::test]
    async fn sends_tool_asset_first() {
        let machine = MockMachine::new(Duration::from_millis(10), 0, true);
        let cancel = CancellationToken::new();
        let mut rx = machine.start(cancel.clone()).await.unwrap();

        match rx.recv().await {
            Some(SourceEvent::Asset(asset)) => assert_eq!(asset.asset_id, "T1"),
            other => panic!("expected asset, got {other:?}"),
        }
        cancel.cancel();
    }
}
