//! Thermal gate with hysteresis
//!
//! Closes when a CPU or GPU reading reaches its threshold and reopens once
//! both readings drop below threshold minus the margin.

use crate::config::ThermalConfig;
use crate::thermal::source::{TemperatureReading, ThermalSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Latest readings plus the gate decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalState {
    pub cpu_temp: Option<f64>,
    pub gpu_temp: Option<f64>,
    pub permitted: bool,
}

/// Decides whether AI inference calls are allowed
///
/// The gate closes as soon as either reading reaches its threshold and opens
/// again only once both readings are below threshold minus the margin.
/// Unavailable readings never close the gate.
#[derive(Debug)]
pub struct ThermalGate {
    config: ThermalConfig,
    permitted: AtomicBool,
    state: Mutex<ThermalState>,
}

impl ThermalGate {
    pub fn new(config: ThermalConfig) -> Self {
        Self {
            config,
            permitted: AtomicBool::new(true),
            state: Mutex::new(ThermalState {
                cpu_temp: None,
                gpu_temp: None,
                permitted: true,
            }),
        }
    }

    /// A gate that stays open (thermal checks disabled)
    pub fn disabled() -> Self {
        Self::new(ThermalConfig {
            enabled: false,
            ..ThermalConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// True if AI calls are currently permitted
    pub fn is_permitted(&self) -> bool {
        !self.config.enabled || self.permitted.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ThermalState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a reading and returns the new decision
    pub fn evaluate(&self, reading: TemperatureReading) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let was_permitted = state.permitted;

        let cpu_limit = self.config.cpu_threshold;
        let gpu_limit = self.config.gpu_threshold;
        let margin = self.config.hysteresis_margin;

        let permitted = if was_permitted {
            !(reaches(reading.cpu_c, cpu_limit) || reaches(reading.gpu_c, gpu_limit))
        } else {
            below(reading.cpu_c, cpu_limit - margin) && below(reading.gpu_c, gpu_limit - margin)
        };

        if was_permitted && !permitted {
            warn!(
                "Thermal gate closed: cpu={:?}C gpu={:?}C, pausing AI calls",
                reading.cpu_c, reading.gpu_c
            );
        } else if !was_permitted && permitted {
            info!(
                "Thermal gate reopened: cpu={:?}C gpu={:?}C",
                reading.cpu_c, reading.gpu_c
            );
        }

        *state = ThermalState {
            cpu_temp: reading.cpu_c,
            gpu_temp: reading.gpu_c,
            permitted,
        };
        self.permitted.store(permitted, Ordering::Release);
        permitted
    }

    /// Reads the source once and applies the reading
    pub async fn poll_once(&self, source: &dyn ThermalSource) -> bool {
        let reading = source.read_temps().await;
        self.evaluate(reading)
    }

    /// Polls `source` every configured interval until the task is aborted
    ///
    /// Returns `None` when thermal checks are disabled.
    pub fn spawn_poller(
        self: &Arc<Self>,
        source: Arc<dyn ThermalSource>,
    ) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            debug!("Thermal gate disabled, not polling");
            return None;
        }

        let gate = Arc::clone(self);
        let interval = Duration::from_secs(self.config.poll_interval_secs);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                gate.poll_once(source.as_ref()).await;
            }
        }))
    }
}

fn reaches(reading: Option<f64>, threshold: f64) -> bool {
    reading.is_some_and(|t| t >= threshold)
}

fn below(reading: Option<f64>, limit: f64) -> bool {
    reading.map_or(true, |t| t < limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermal::source::FixedThermalSource;

    fn gate() -> ThermalGate {
        ThermalGate::new(ThermalConfig {
            enabled: true,
            cpu_threshold: 85.0,
            gpu_threshold: 80.0,
            hysteresis_margin: 15.0,
            poll_interval_secs: 1,
        })
    }

    fn cpu(t: f64) -> TemperatureReading {
        TemperatureReading {
            cpu_c: Some(t),
            gpu_c: None,
        }
    }

    #[test]
    fn test_starts_open() {
        assert!(gate().is_permitted());
    }

    #[test]
    fn test_threshold_closes_and_just_below_does_not_reopen() {
        let gate = gate();
        assert!(gate.evaluate(cpu(84.9)));
        assert!(!gate.evaluate(cpu(85.0)));
        assert!(!gate.evaluate(cpu(84.9)));
        assert!(!gate.evaluate(cpu(70.0)));
        assert!(gate.evaluate(cpu(69.9)));
        assert!(gate.is_permitted());
    }

    #[test]
    fn test_either_sensor_closes() {
        let gate = gate();
        assert!(!gate.evaluate(TemperatureReading {
            cpu_c: Some(40.0),
            gpu_c: Some(80.0),
        }));

        // Both must be cool to reopen
        assert!(!gate.evaluate(TemperatureReading {
            cpu_c: Some(40.0),
            gpu_c: Some(66.0),
        }));
        assert!(gate.evaluate(TemperatureReading {
            cpu_c: Some(40.0),
            gpu_c: Some(64.0),
        }));
    }

    #[test]
    fn test_missing_readings_never_close() {
        let gate = gate();
        assert!(gate.evaluate(TemperatureReading::default()));
    }

    #[test]
    fn test_state_tracks_last_reading() {
        let gate = gate();
        gate.evaluate(cpu(90.0));
        let state = gate.state();
        assert_eq!(state.cpu_temp, Some(90.0));
        assert!(!state.permitted);
    }

    #[test]
    fn test_disabled_gate_always_permits() {
        let gate = ThermalGate::disabled();
        gate.evaluate(cpu(120.0));
        assert!(gate.is_permitted());
    }

    #[tokio::test]
    async fn test_poll_once_uses_source() {
        let gate = gate();
        let source = FixedThermalSource::new(Some(99.0), None);
        assert!(!gate.poll_once(&source).await);
        source.set(Some(50.0), None);
        assert!(gate.poll_once(&source).await);
    }

    #[tokio::test]
    async fn test_poller_updates_gate() {
        let gate = Arc::new(gate());
        let source = Arc::new(FixedThermalSource::new(Some(95.0), None));
        let handle = gate.spawn_poller(source).unwrap();

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!gate.is_permitted());
        handle.abort();
    }

    #[test]
    fn test_disabled_gate_does_not_poll() {
        let gate = Arc::new(ThermalGate::disabled());
        let source = Arc::new(FixedThermalSource::default());
        assert!(gate.spawn_poller(source).is_none());
    }
}
