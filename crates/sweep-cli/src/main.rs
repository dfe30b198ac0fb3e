use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sweep_flight::{FlightSession, SessionConfig, Strategy, TimingConfig};
use sweep_plan::{doctor, AreaSpec, CoveragePath, Origin, SegmentKind};
use sweep_vehicle::mav::MavVehicle;
use sweep_vehicle::LinkConfig;

#[derive(Debug, Parser)]
#[command(name = "sweep", version, about = "AEROsweep - boustrophedon coverage flight controller")]
struct Cli {
    /// Optional TOML config for link, timing and home settings.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate config and area parameters without flying.
    Doctor {
        #[command(flatten)]
        area: AreaArgs,
    },
    /// Print the planned sweep.
    Plan {
        #[command(flatten)]
        area: AreaArgs,
    },
    /// Fly the sweep with the selected strategy.
    Fly {
        #[command(flatten)]
        area: AreaArgs,
        #[arg(long, value_enum)]
        strategy: StrategyArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Offboard velocity commands on a fixed cadence.
    Velocity,
    /// Waypoint mission upload + autonomous execution.
    Mission,
}

impl From<StrategyArg> for Strategy {
    fn from(s: StrategyArg) -> Self {
        match s {
            StrategyArg::Velocity => Strategy::Velocity,
            StrategyArg::Mission => Strategy::Mission,
        }
    }
}

#[derive(Debug, Args)]
struct AreaArgs {
    /// Number of sweep passes.
    #[arg(long, default_value_t = 4)]
    legs: u32,

    /// Length of each pass, meters.
    #[arg(long, default_value_t = 10.0)]
    leg_length: f64,

    /// Distance between passes, meters.
    #[arg(long, default_value_t = 3.0)]
    spacing: f64,

    /// Ground speed, m/s.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Flight altitude above launch, meters.
    #[arg(long, default_value_t = 5.0)]
    altitude: f32,
}

impl AreaArgs {
    fn to_spec(&self) -> AreaSpec {
        AreaSpec {
            legs: self.legs,
            leg_length_m: self.leg_length,
            spacing_m: self.spacing,
            speed_mps: self.speed,
            altitude_m: self.altitude,
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct Config {
    #[serde(default)]
    link: LinkConfig,
    #[serde(default)]
    timing: TimingConfig,
    home: Option<Origin>,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        None => Ok(Config::default()),
        Some(p) => {
            let s = std::fs::read_to_string(p).context("read config")?;
            Ok(toml::from_str(&s).context("parse config toml")?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Command::Doctor { area } => run_doctor(&cfg, &area.to_spec()),
        Command::Plan { area } => plan(&cfg, &area.to_spec()),
        Command::Fly { area, strategy } => fly(&cfg, &area.to_spec(), strategy.into()).await,
    }
}

fn run_doctor(cfg: &Config, area: &AreaSpec) -> Result<()> {
    info!("doctor: starting");

    doctor::check_area(area)?;
    if let Some(home) = &cfg.home {
        doctor::check_origin(home)?;
    }
    anyhow::ensure!(!cfg.link.url.is_empty(), "link.url missing");
    anyhow::ensure!(cfg.timing.request_timeout_s > 0.0, "timing.request_timeout_s invalid");
    anyhow::ensure!(cfg.timing.ack_timeout_s > 0.0, "timing.ack_timeout_s invalid");

    info!("doctor: OK");
    Ok(())
}

fn plan(cfg: &Config, area: &AreaSpec) -> Result<()> {
    doctor::check_area(area)?;
    let path = CoveragePath::generate(area);

    for (i, seg) in path.segments().iter().enumerate() {
        let kind = match seg.kind {
            SegmentKind::Leg { forward: true } => "leg fwd",
            SegmentKind::Leg { forward: false } => "leg back",
            SegmentKind::Shift => "shift",
        };
        println!(
            "segment {:2}  {:8}  yaw={:5.1}  len={:6.1}m  hold={:5.1}s",
            i,
            kind,
            seg.yaw_deg,
            seg.length_m,
            seg.duration_s(area.speed_mps)
        );
    }

    if let Some(home) = &cfg.home {
        doctor::check_origin(home)?;
        for wp in path.waypoints(home) {
            println!(
                "waypoint {:3}  lat={:.7}  lon={:.7}  alt={:.1}m",
                wp.seq, wp.lat, wp.lon, wp.alt_m
            );
        }
    }
    Ok(())
}

async fn fly(cfg: &Config, area: &AreaSpec, strategy: Strategy) -> Result<()> {
    doctor::check_area(area)?;

    let origin = match (strategy, &cfg.home) {
        (Strategy::Mission, None) => {
            anyhow::bail!("[home] config section required for the mission strategy")
        }
        (_, Some(home)) => home.clone(),
        // Velocity strategy never projects waypoints; origin is nominal.
        (Strategy::Velocity, None) => Origin { lat: 0.0, lon: 0.0 },
    };
    doctor::check_origin(&origin)?;

    let path = CoveragePath::generate(area);
    let vehicle = MavVehicle::open(&cfg.link)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt: cancelling flight");
                cancel.cancel();
            }
        });
    }

    let session_cfg = SessionConfig { strategy, origin, timing: cfg.timing.clone() };
    let mut session = FlightSession::new(vehicle, path, session_cfg, cancel);
    let report = session.run().await;

    info!(
        "flight finished: {:?} (legs={}, items={})",
        report.state, report.legs_completed, report.items_sent
    );
    if !report.succeeded() {
        match report.error {
            Some(e) => anyhow::bail!("flight failed: {}", e),
            None => anyhow::bail!("flight failed"),
        }
    }
    Ok(())
}
