use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::{Vehicle, VehicleError};

/// How the session waits out the climb after takeoff.
///
/// `Blind` is a fixed delay with no telemetry check.
/// `Confirmed` polls reported altitude until a fraction of
/// the takeoff altitude is reached, falling back to proceeding when the
/// confirmation window runs out. Both sit behind the same suspension-point
/// call so callers never change.
#[derive(Debug, Clone)]
pub enum ClimbWait {
    Blind { delay: Duration },
    Confirmed { target_fraction: f32, timeout: Duration, poll: Duration },
}

impl Default for ClimbWait {
    fn default() -> Self {
        Self::Blind { delay: Duration::from_secs(6) }
    }
}

impl ClimbWait {
    pub fn from_config(cfg: &ClimbConfig) -> Self {
        if cfg.confirm {
            Self::Confirmed {
                target_fraction: 0.95,
                timeout: Duration::from_secs_f64(cfg.timeout_s),
                poll: Duration::from_millis(250),
            }
        } else {
            Self::Blind { delay: Duration::from_secs_f64(cfg.delay_s) }
        }
    }

    pub async fn wait<V: Vehicle>(
        &self,
        vehicle: &mut V,
        target_alt_m: f32,
    ) -> Result<(), VehicleError> {
        match self {
            Self::Blind { delay } => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            Self::Confirmed { target_fraction, timeout, poll } => {
                let target = target_alt_m * target_fraction;
                let deadline = tokio::time::Instant::now() + *timeout;
                loop {
                    if let Some(alt) = vehicle.relative_altitude().await? {
                        if alt >= target {
                            info!("climb confirmed at {:.1} m", alt);
                            return Ok(());
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        warn!("climb not confirmed within {:?}, proceeding", timeout);
                        return Ok(());
                    }
                    tokio::time::sleep(*poll).await;
                }
            }
        }
    }
}

/// Climb wait settings as they appear in the `[timing]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClimbConfig {
    pub confirm: bool,
    pub delay_s: f64,
    pub timeout_s: f64,
}

impl Default for ClimbConfig {
    fn default() -> Self {
        Self { confirm: false, delay_s: 6.0, timeout_s: 20.0 }
    }
}
