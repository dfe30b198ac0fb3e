use serde::{Deserialize, Serialize};

use crate::geo::Origin;

/// Parameters of the rectangular area to sweep.
///
/// Callers validate with `doctor::check_area` before planning; the planner
/// itself assumes a valid spec.
#[derive(Debug, Clone, Deserialize)]
pub struct AreaSpec {
    /// Number of sweep passes.
    pub legs: u32,
    /// Length of each pass, meters.
    pub leg_length_m: f64,
    /// Distance between adjacent passes, meters.
    pub spacing_m: f64,
    /// Commanded ground speed, m/s.
    pub speed_mps: f64,
    /// Flight altitude above launch, meters.
    pub altitude_m: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// A straight sweep pass. Even passes run forward (north), odd ones back.
    Leg { forward: bool },
    /// Lateral move to the next pass.
    Shift,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Target heading at the start of the segment, degrees (NED, 0 = north).
    pub yaw_deg: f32,
    pub length_m: f64,
}

impl Segment {
    /// How long the velocity strategy holds this segment's command.
    pub fn duration_s(&self, speed_mps: f64) -> f64 {
        self.length_m / speed_mps
    }

    /// Forward velocity component for this segment. Backward legs travel
    /// against the nose, so the sign flips there; shifts move at +speed.
    pub fn signed_speed(&self, speed_mps: f64) -> f64 {
        match self.kind {
            SegmentKind::Leg { forward: false } => -speed_mps,
            _ => speed_mps,
        }
    }
}

/// A single mission waypoint, relative-altitude frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub seq: u16,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f32,
}

/// Ordered boustrophedon sweep: legs alternate direction, with one lateral
/// shift between consecutive legs. Immutable once generated.
#[derive(Debug, Clone)]
pub struct CoveragePath {
    area: AreaSpec,
    segments: Vec<Segment>,
}

impl CoveragePath {
    /// Deterministic plan over a validated area: `2*legs - 1` segments.
    pub fn generate(area: &AreaSpec) -> Self {
        let legs = area.legs as usize;
        let mut segments = Vec::with_capacity(2 * legs - 1);

        for i in 0..legs {
            let forward = i % 2 == 0;
            segments.push(Segment {
                kind: SegmentKind::Leg { forward },
                yaw_deg: if forward { 0.0 } else { 180.0 },
                length_m: area.leg_length_m,
            });
            if i + 1 < legs {
                segments.push(Segment {
                    kind: SegmentKind::Shift,
                    yaw_deg: 90.0,
                    length_m: area.spacing_m,
                });
            }
        }

        Self { area: area.clone(), segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn leg_count(&self) -> u32 {
        self.area.legs
    }

    pub fn speed_mps(&self) -> f64 {
        self.area.speed_mps
    }

    pub fn altitude_m(&self) -> f32 {
        self.area.altitude_m
    }

    /// Discrete waypoint rendering of the sweep: a (start, end) pair per
    /// leg, `seq` contiguous from 0. The lateral shift falls out of the
    /// transition between one leg's end and the next leg's start, so both
    /// strategies fly the same geometry.
    pub fn waypoints(&self, origin: &Origin) -> Vec<Waypoint> {
        let mut out = Vec::with_capacity(2 * self.area.legs as usize);
        for i in 0..self.area.legs {
            let east = self.area.spacing_m * i as f64;
            let (from, to) = if i % 2 == 0 {
                (0.0, self.area.leg_length_m)
            } else {
                (self.area.leg_length_m, 0.0)
            };
            for north in [from, to] {
                let (lat, lon) = origin.offset(east, north);
                out.push(Waypoint {
                    seq: out.len() as u16,
                    lat,
                    lon,
                    alt_m: self.area.altitude_m,
                });
            }
        }
        out
    }
}
