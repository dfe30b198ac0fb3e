pub mod doctor;
pub mod geo;
pub mod path;

pub use geo::Origin;
pub use path::{AreaSpec, CoveragePath, Segment, SegmentKind, Waypoint};
