use anyhow::Result;

use crate::geo::Origin;
use crate::path::AreaSpec;

pub fn check_area(area: &AreaSpec) -> Result<()> {
    anyhow::ensure!(area.legs >= 1, "area.legs must be >= 1");
    anyhow::ensure!(area.leg_length_m > 0.0, "area.leg_length_m must be positive");
    anyhow::ensure!(area.spacing_m > 0.0, "area.spacing_m must be positive");
    anyhow::ensure!(area.speed_mps > 0.0, "area.speed_mps must be positive");
    anyhow::ensure!(area.altitude_m > 0.0, "area.altitude_m must be positive");
    // u16 mission seq: 2 waypoints per leg must fit
    anyhow::ensure!(area.legs <= u16::MAX as u32 / 2, "area.legs too large for mission transfer");
    Ok(())
}

pub fn check_origin(origin: &Origin) -> Result<()> {
    anyhow::ensure!(
        origin.lat.abs() <= 90.0 && origin.lon.abs() <= 180.0,
        "home coordinates invalid"
    );
    anyhow::ensure!(origin.lat.abs() < 89.0, "home too close to the pole for local projection");
    Ok(())
}
