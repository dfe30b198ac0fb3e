use std::sync::Arc;
use std::time::Duration;

use mavlink::{
    common::{
        MavCmd, MavFrame, MavMessage, MavMissionResult, MavResult, PositionTargetTypemask,
        COMMAND_LONG_DATA, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA,
        SET_POSITION_TARGET_LOCAL_NED_DATA,
    },
    MavConnection, MavHeader,
};
use sweep_plan::Waypoint;
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::{LinkConfig, MissionAck, Vehicle, VehicleError, VelocityNedYaw};

/// MAVLink implementation of [`Vehicle`].
///
/// A blocking reader task pumps incoming frames into an mpsc channel; the
/// async side drains that channel under `tokio::time` deadlines, so every
/// bounded wait is a real suspension point.
pub struct MavVehicle {
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    hdr: MavHeader,
    target_sys: u8,
    target_comp: u8,
    rx: mpsc::UnboundedReceiver<MavMessage>,
    _reader: tokio::task::JoinHandle<()>,
    started: std::time::Instant,
    ack_timeout: Duration,
    takeoff_alt_m: Option<f32>,
    last_rel_alt_m: Option<f32>,
}

impl MavVehicle {
    pub fn open(cfg: &LinkConfig) -> Result<Self, VehicleError> {
        // quick validate serial device before handing the url to mavlink
        if let Some(rest) = cfg.url.strip_prefix("serial:") {
            let (dev, baud) = rest
                .rsplit_once(':')
                .ok_or_else(|| VehicleError::Link(format!("bad serial url {}", cfg.url)))?;
            let baud: u32 = baud
                .parse()
                .map_err(|_| VehicleError::Link(format!("bad baud in {}", cfg.url)))?;
            let _ = tokio_serial::new(dev, baud)
                .open_native_async()
                .map_err(|e| VehicleError::Link(format!("open serial device {}: {}", dev, e)))?;
        }

        let conn = mavlink::connect::<MavMessage>(&cfg.url)
            .map_err(|e| VehicleError::Link(format!("mavlink connect {}: {}", cfg.url, e)))?;
        let conn: Arc<dyn MavConnection<MavMessage> + Send + Sync> = Arc::from(conn);

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_conn = conn.clone();
        // mavlink recv blocks; keep it off the async runtime. A run of
        // receive errors with no good frame in between means the link is
        // gone; stopping here drops `tx`, so the async side sees
        // `Link("link reader stopped")` instead of endless timeouts.
        let reader = tokio::task::spawn_blocking(move || {
            let mut health = ReaderHealth::new();
            loop {
                match reader_conn.recv() {
                    Ok((_hdr, msg)) => {
                        health.frame_ok();
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if health.frame_err() {
                            warn!("link receive failing repeatedly, stopping reader: {}", e);
                            break;
                        }
                        if health.first_err() {
                            warn!("link receive error: {}", e);
                        }
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
        });

        Ok(Self {
            conn,
            hdr: MavHeader {
                system_id: cfg.sys_id,
                component_id: cfg.comp_id,
                sequence: 0,
            },
            target_sys: cfg.target_sys,
            target_comp: cfg.target_comp,
            rx,
            _reader: reader,
            started: std::time::Instant::now(),
            ack_timeout: cfg.command_ack_timeout(),
            takeoff_alt_m: None,
            last_rel_alt_m: None,
        })
    }

    fn send(&mut self, msg: MavMessage) -> Result<(), VehicleError> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        self.conn
            .send(&self.hdr, &msg)
            .map_err(|e| VehicleError::Link(format!("mavlink send: {}", e)))?;
        Ok(())
    }

    /// Track telemetry we care about while draining the channel.
    fn note(&mut self, msg: &MavMessage) {
        if let MavMessage::GLOBAL_POSITION_INT(pos) = msg {
            self.last_rel_alt_m = Some(pos.relative_alt as f32 / 1000.0);
        }
    }

    async fn command_long(
        &mut self,
        name: &'static str,
        cmd: MavCmd,
        params: [f32; 7],
    ) -> Result<(), VehicleError> {
        let data = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command: cmd.into(),
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        };
        self.send(MavMessage::COMMAND_LONG(data))?;
        self.expect_ack(name, cmd).await
    }

    /// Wait briefly for a matching COMMAND_ACK. Explicit denial is a
    /// rejection; silence within the window is treated as fire-and-forget.
    async fn expect_ack(&mut self, name: &'static str, cmd: MavCmd) -> Result<(), VehicleError> {
        let deadline = tokio::time::Instant::now() + self.ack_timeout;
        loop {
            let msg = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => {
                    debug!("no COMMAND_ACK for {} within {:?}", name, self.ack_timeout);
                    return Ok(());
                }
                Ok(None) => return Err(VehicleError::Link("link reader stopped".into())),
                Ok(Some(msg)) => msg,
            };
            self.note(&msg);
            if let MavMessage::COMMAND_ACK(ack) = msg {
                if ack.command == cmd {
                    return match ack.result {
                        MavResult::MAV_RESULT_ACCEPTED | MavResult::MAV_RESULT_IN_PROGRESS => {
                            Ok(())
                        }
                        other => {
                            warn!("vehicle denied {}: {:?}", name, other);
                            Err(VehicleError::CommandRejected { command: name })
                        }
                    };
                }
            }
        }
    }
}

impl Vehicle for MavVehicle {
    async fn wait_connected(&mut self) -> Result<(), VehicleError> {
        loop {
            let msg = self
                .rx
                .recv()
                .await
                .ok_or_else(|| VehicleError::Link("link reader stopped".into()))?;
            self.note(&msg);
            if matches!(msg, MavMessage::HEARTBEAT(_)) {
                info!("vehicle: heartbeat received");
                return Ok(());
            }
        }
    }

    async fn arm(&mut self) -> Result<(), VehicleError> {
        info!("vehicle: arming");
        self.command_long(
            "arm",
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn disarm(&mut self) -> Result<(), VehicleError> {
        info!("vehicle: disarming");
        self.command_long(
            "disarm",
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn set_takeoff_altitude(&mut self, alt_m: f32) -> Result<(), VehicleError> {
        // Carried in param7 of the takeoff command.
        self.takeoff_alt_m = Some(alt_m);
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<(), VehicleError> {
        let alt = self.takeoff_alt_m.unwrap_or(f32::NAN);
        info!("vehicle: takeoff to {:.1} m", alt);
        self.command_long(
            "takeoff",
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, f32::NAN, 0.0, 0.0, alt],
        )
        .await
    }

    async fn return_to_launch(&mut self) -> Result<(), VehicleError> {
        info!("vehicle: return to launch");
        self.command_long(
            "return_to_launch",
            MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
            [0.0; 7],
        )
        .await
    }

    async fn set_mode(&mut self, mode: &str) -> Result<(), VehicleError> {
        let Some((main, sub)) = px4_main_sub(mode) else {
            warn!("unknown flight mode {:?}", mode);
            return Err(VehicleError::CommandRejected { command: "set_mode" });
        };
        info!("vehicle: set mode {}", mode);
        self.command_long(
            "set_mode",
            MavCmd::MAV_CMD_DO_SET_MODE,
            [1.0, main, sub, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn start_offboard(&mut self) -> Result<(), VehicleError> {
        // The autopilot wants setpoints streaming before it accepts OFFBOARD.
        self.set_velocity(VelocityNedYaw::neutral(0.0)).await?;
        match self.set_mode("OFFBOARD").await {
            Ok(()) => Ok(()),
            Err(VehicleError::CommandRejected { .. }) => {
                Err(VehicleError::Offboard("vehicle refused OFFBOARD mode".into()))
            }
            Err(e) => Err(e),
        }
    }

    async fn stop_offboard(&mut self) -> Result<(), VehicleError> {
        match self.set_mode("AUTO.LOITER").await {
            Ok(()) => Ok(()),
            Err(VehicleError::CommandRejected { .. }) => {
                Err(VehicleError::Offboard("vehicle refused leaving OFFBOARD".into()))
            }
            Err(e) => Err(e),
        }
    }

    async fn set_velocity(&mut self, v: VelocityNedYaw) -> Result<(), VehicleError> {
        let data = velocity_target(
            &v,
            self.started.elapsed().as_millis() as u32,
            self.target_sys,
            self.target_comp,
        );
        self.send(MavMessage::SET_POSITION_TARGET_LOCAL_NED(data))
    }

    async fn clear_mission(&mut self) -> Result<(), VehicleError> {
        info!("vehicle: clearing mission");
        self.send(MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            ..Default::default()
        }))
    }

    async fn send_item_count(&mut self, count: u16) -> Result<(), VehicleError> {
        info!("vehicle: announcing {} mission items", count);
        self.send(MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            count,
            ..Default::default()
        }))
    }

    async fn await_item_request(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<u16>, VehicleError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(VehicleError::Link("link reader stopped".into())),
                Ok(Some(msg)) => msg,
            };
            self.note(&msg);
            match msg {
                MavMessage::MISSION_REQUEST(req) => return Ok(Some(req.seq)),
                MavMessage::MISSION_REQUEST_INT(req) => return Ok(Some(req.seq)),
                _ => {}
            }
        }
    }

    async fn send_item(&mut self, wp: &Waypoint) -> Result<(), VehicleError> {
        debug!("vehicle: sending mission item {}", wp.seq);
        let data = mission_item(wp, self.target_sys, self.target_comp);
        self.send(MavMessage::MISSION_ITEM_INT(data))
    }

    async fn await_ack(&mut self, timeout: Duration) -> Result<Option<MissionAck>, VehicleError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let msg = match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(VehicleError::Link("link reader stopped".into())),
                Ok(Some(msg)) => msg,
            };
            self.note(&msg);
            if let MavMessage::MISSION_ACK(ack) = msg {
                let accepted = ack.mavtype == MavMissionResult::MAV_MISSION_ACCEPTED;
                if !accepted {
                    warn!("mission ack reports {:?}", ack.mavtype);
                }
                return Ok(Some(MissionAck { accepted }));
            }
        }
    }

    async fn start_mission(&mut self) -> Result<(), VehicleError> {
        info!("vehicle: starting mission");
        self.command_long("start_mission", MavCmd::MAV_CMD_MISSION_START, [0.0; 7])
            .await
    }

    async fn relative_altitude(&mut self) -> Result<Option<f32>, VehicleError> {
        while let Ok(msg) = self.rx.try_recv() {
            self.note(&msg);
        }
        Ok(self.last_rel_alt_m)
    }
}

/// Consecutive receive errors tolerated before the reader gives up.
const READER_ERROR_BUDGET: u32 = 50;

/// Error budget for the blocking reader. Any good frame resets it.
struct ReaderHealth {
    consecutive_errors: u32,
}

impl ReaderHealth {
    fn new() -> Self {
        Self { consecutive_errors: 0 }
    }

    fn frame_ok(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Record a receive error; true once the budget is exhausted.
    fn frame_err(&mut self) -> bool {
        self.consecutive_errors += 1;
        self.consecutive_errors >= READER_ERROR_BUDGET
    }

    fn first_err(&self) -> bool {
        self.consecutive_errors == 1
    }
}

/// PX4 custom mode pair (main, sub) for the mode names the session uses.
fn px4_main_sub(mode: &str) -> Option<(f32, f32)> {
    match mode {
        "POSCTL" => Some((3.0, 0.0)),
        "AUTO.LOITER" => Some((4.0, 3.0)),
        "AUTO.MISSION" => Some((4.0, 4.0)),
        "AUTO.RTL" => Some((4.0, 5.0)),
        "OFFBOARD" => Some((6.0, 0.0)),
        _ => None,
    }
}

fn velocity_target(
    v: &VelocityNedYaw,
    time_boot_ms: u32,
    target_system: u8,
    target_component: u8,
) -> SET_POSITION_TARGET_LOCAL_NED_DATA {
    // Velocity + yaw control: ignore position, acceleration and yaw rate.
    let type_mask = PositionTargetTypemask::POSITION_TARGET_TYPEMASK_X_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Y_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_Z_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE;

    SET_POSITION_TARGET_LOCAL_NED_DATA {
        time_boot_ms,
        target_system,
        target_component,
        coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
        type_mask,
        x: 0.0,
        y: 0.0,
        z: 0.0,
        vx: v.north_mps,
        vy: v.east_mps,
        vz: v.down_mps,
        afx: 0.0,
        afy: 0.0,
        afz: 0.0,
        yaw: v.yaw_deg.to_radians(),
        yaw_rate: 0.0,
    }
}

fn mission_item(wp: &Waypoint, target_system: u8, target_component: u8) -> MISSION_ITEM_INT_DATA {
    MISSION_ITEM_INT_DATA {
        target_system,
        target_component,
        seq: wp.seq,
        frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
        command: MavCmd::MAV_CMD_NAV_WAYPOINT,
        current: 0,
        autocontinue: 1,
        param1: 2.0, // hold time at waypoint, seconds
        param2: 0.0,
        param3: 0.0,
        param4: f32::NAN, // yaw: let the vehicle choose
        x: (wp.lat * 1e7) as i32,
        y: (wp.lon * 1e7) as i32,
        z: wp.alt_m,
        ..Default::default()
    }
}
