//! Temperature sources

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tracing::trace;

/// One temperature sample; unavailable sensors read as `None`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureReading {
    pub cpu_c: Option<f64>,
    pub gpu_c: Option<f64>,
}

/// Anything that can report current CPU and GPU temperatures
#[async_trait]
pub trait ThermalSource: Send + Sync {
    async fn read_temps(&self) -> TemperatureReading;
}

/// Reads CPU temperature from Linux sysfs thermal zones and GPU
/// temperature from `nvidia-smi`
#[derive(Debug, Clone)]
pub struct SystemThermalSource {
    thermal_root: PathBuf,
    nvidia_smi: String,
}

impl Default for SystemThermalSource {
    fn default() -> Self {
        Self {
            thermal_root: PathBuf::from("/sys/class/thermal"),
            nvidia_smi: "nvidia-smi".to_string(),
        }
    }
}

impl SystemThermalSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hottest thermal zone, in degrees Celsius
    async fn read_cpu(&self) -> Option<f64> {
        let mut entries = tokio::fs::read_dir(&self.thermal_root).await.ok()?;
        let mut hottest: Option<f64> = None;

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with("thermal_zone") {
                continue;
            }
            let Ok(raw) = tokio::fs::read_to_string(entry.path().join("temp")).await else {
                continue;
            };
            // sysfs reports millidegrees
            if let Ok(milli) = raw.trim().parse::<f64>() {
                let celsius = milli / 1000.0;
                hottest = Some(hottest.map_or(celsius, |h| h.max(celsius)));
            }
        }

        hottest
    }

    async fn read_gpu(&self) -> Option<f64> {
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            Command::new(&self.nvidia_smi)
                .args([
                    "--query-gpu=temperature.gpu",
                    "--format=csv,noheader,nounits",
                ])
                .output(),
        )
        .await
        .ok()?
        .ok()?;

        if !output.status.success() {
            return None;
        }

        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl ThermalSource for SystemThermalSource {
    async fn read_temps(&self) -> TemperatureReading {
        let (cpu_c, gpu_c) = tokio::join!(self.read_cpu(), self.read_gpu());
        trace!("Thermal reading: cpu={:?} gpu={:?}", cpu_c, gpu_c);
        TemperatureReading { cpu_c, gpu_c }
    }
}

/// Hottest GPU in `nvidia-smi` CSV output
fn parse_nvidia_smi(output: &str) -> Option<f64> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .fold(None, |hottest, t| Some(hottest.map_or(t, |h: f64| h.max(t))))
}

/// A source that reports whatever was last set
#[derive(Debug, Default)]
pub struct FixedThermalSource {
    reading: Mutex<TemperatureReading>,
}

impl FixedThermalSource {
    pub fn new(cpu_c: Option<f64>, gpu_c: Option<f64>) -> Self {
        Self {
            reading: Mutex::new(TemperatureReading { cpu_c, gpu_c }),
        }
    }

    pub fn set(&self, cpu_c: Option<f64>, gpu_c: Option<f64>) {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner) =
            TemperatureReading { cpu_c, gpu_c };
    }
}

#[async_trait]
impl ThermalSource for FixedThermalSource {
    async fn read_temps(&self) -> TemperatureReading {
        *self.reading.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_takes_hottest() {
        assert_eq!(parse_nvidia_smi("61\n74\n"), Some(74.0));
        assert_eq!(parse_nvidia_smi("[N/A]\n"), None);
        assert_eq!(parse_nvidia_smi(""), None);
    }

    #[tokio::test]
    async fn test_sysfs_zones() {
        let dir = tempfile::tempdir().unwrap();
        for (zone, milli) in [("thermal_zone0", "45000"), ("thermal_zone1", "71500")] {
            let path = dir.path().join(zone);
            std::fs::create_dir(&path).unwrap();
            std::fs::write(path.join("temp"), milli).unwrap();
        }
        std::fs::create_dir(dir.path().join("cooling_device0")).unwrap();

        let source = SystemThermalSource {
            thermal_root: dir.path().to_path_buf(),
            nvidia_smi: "/nonexistent/nvidia-smi".to_string(),
        };

        let reading = source.read_temps().await;
        assert_eq!(reading.cpu_c, Some(71.5));
        assert_eq!(reading.gpu_c, None);
    }

    #[tokio::test]
    async fn test_missing_sensors_read_as_none() {
        let source = SystemThermalSource {
            thermal_root: PathBuf::from("/nonexistent/thermal"),
            nvidia_smi: "/nonexistent/nvidia-smi".to_string(),
        };
        assert_eq!(source.read_temps().await, TemperatureReading::default());
    }

    #[tokio::test]
    async fn test_fixed_source() {
        let source = FixedThermalSource::new(Some(50.0), None);
        assert_eq!(source.read_temps().await.cpu_c, Some(50.0));
        source.set(Some(90.0), Some(70.0));
        assert_eq!(source.read_temps().await.gpu_c, Some(70.0));
    }
}
