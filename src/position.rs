//! Dead-reckoning position estimation
//!
//! Integrates commanded displacements from the takeoff point; there is no
//! external position sensing on this link. The estimator is fed every
//! wire command that was acknowledged by the vehicle and answers two
//! questions: where are we relative to home, and is the geofence
//! breached.
//!
//! State machine: `Disarmed --takeoff--> Armed --land|emergency--> Disarmed`.
//! Positional updates are no-ops while disarmed; `land`/`emergency`
//! freeze the pose without clearing it.

/// Default geofence radius (cm)
pub const DEFAULT_MAX_DISTANCE_CM: f64 = 300.0;

/// Horizontal/vertical distance below which the vehicle counts as home (cm)
const HOME_TOLERANCE_CM: f64 = 20.0;

/// Heading error below which no correcting rotation is planned (deg)
const ALIGN_TOLERANCE_DEG: f64 = 5.0;

/// Longest single forward step in a return-home plan (cm)
const FORWARD_CHUNK_CM: f64 = 400.0;

/// Longest single descent in a return-home plan (cm)
const MAX_DESCENT_CM: f64 = 500.0;

/// Read-only pose telemetry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    /// Position relative to the takeoff point (cm)
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Heading, always in `[0, 360)` (deg)
    pub yaw: f64,
    pub armed: bool,
    pub distance_from_home: f64,
    pub max_distance_cm: f64,
}

/// Dead-reckoning pose estimator with geofence
pub struct PositionEstimator {
    x: f64,
    y: f64,
    z: f64,
    yaw: f64,
    armed: bool,
    max_distance_cm: f64,
}

impl PositionEstimator {
    pub fn new(max_distance_cm: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            yaw: 0.0,
            armed: false,
            max_distance_cm,
        }
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            x: self.x,
            y: self.y,
            z: self.z,
            yaw: self.yaw,
            armed: self.armed,
            distance_from_home: self.distance_from_home(),
            max_distance_cm: self.max_distance_cm,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Euclidean distance from the takeoff point (cm)
    pub fn distance_from_home(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Apply one acknowledged wire command to the pose.
    ///
    /// `takeoff` resets the pose to the origin and arms; `land` and
    /// `emergency` disarm without touching the pose. Movement and
    /// rotation commands integrate while armed; anything else (flips,
    /// stream control) leaves the pose alone. A missing or malformed
    /// trailing argument falls back to the wire defaults (20 cm / 90
    /// deg) rather than rejecting the command: the vehicle already
    /// executed it, so the model stays lenient to stay in sync.
    pub fn update_after_command(&mut self, command: &str) {
        let cmd = command.trim().to_ascii_lowercase();
        if cmd == "takeoff" {
            self.x = 0.0;
            self.y = 0.0;
            self.z = 0.0;
            self.yaw = 0.0;
            self.armed = true;
            log::debug!("estimator armed, pose reset to origin");
            return;
        }
        if cmd == "land" || cmd == "emergency" {
            if self.armed {
                log::debug!(
                    "estimator disarmed at ({:.1}, {:.1}, {:.1}) yaw {:.1}",
                    self.x,
                    self.y,
                    self.z,
                    self.yaw
                );
            }
            self.armed = false;
            return;
        }
        if !self.armed {
            return;
        }

        let mut parts = cmd.split_whitespace();
        let verb = parts.next().unwrap_or("");
        let arg = parts.last().and_then(|t| t.parse::<f64>().ok());

        let rad = self.yaw.to_radians();
        let (sin, cos) = rad.sin_cos();
        match verb {
            "forward" => {
                let d = arg.unwrap_or(crate::commands::DEFAULT_DISTANCE as f64);
                self.x += d * cos;
                self.y += d * sin;
            }
            "back" => {
                let d = arg.unwrap_or(crate::commands::DEFAULT_DISTANCE as f64);
                self.x -= d * cos;
                self.y -= d * sin;
            }
            "left" => {
                let d = arg.unwrap_or(crate::commands::DEFAULT_DISTANCE as f64);
                self.x -= d * sin;
                self.y += d * cos;
            }
            "right" => {
                let d = arg.unwrap_or(crate::commands::DEFAULT_DISTANCE as f64);
                self.x += d * sin;
                self.y -= d * cos;
            }
            "up" => self.z += arg.unwrap_or(crate::commands::DEFAULT_DISTANCE as f64),
            "down" => self.z -= arg.unwrap_or(crate::commands::DEFAULT_DISTANCE as f64),
            "cw" => self.yaw += arg.unwrap_or(crate::commands::DEFAULT_ANGLE as f64),
            "ccw" => self.yaw -= arg.unwrap_or(crate::commands::DEFAULT_ANGLE as f64),
            _ => {}
        }
        self.yaw = normalize_deg(self.yaw);
    }

    /// Geofence check: armed and further from home than the configured
    /// maximum
    pub fn should_return_home(&self) -> bool {
        self.armed && self.distance_from_home() > self.max_distance_cm
    }

    /// Advisory plan of wire commands that would bring the vehicle home.
    ///
    /// The plan is computed from the pose at planning time only; a caller
    /// executing it must feed each acknowledged step back through
    /// [`update_after_command`](Self::update_after_command) and may
    /// re-plan afterwards. Empty when disarmed or already home.
    ///
    /// Rotation sign follows the estimator's own kinematics (`cw` adds to
    /// yaw), so replaying the plan through the estimator converges on the
    /// origin.
    pub fn return_home_commands(&self) -> Vec<String> {
        if !self.armed {
            return Vec::new();
        }
        if self.x == 0.0 && self.y == 0.0 && self.z == 0.0 {
            return Vec::new();
        }

        let mut plan = Vec::new();
        let mut dist_xy = self.x.hypot(self.y);

        if dist_xy > HOME_TOLERANCE_CM {
            let bearing_home = (-self.y).atan2(-self.x).to_degrees();
            let delta = wrap_deg_180(bearing_home - self.yaw);
            if delta.abs() > ALIGN_TOLERANCE_DEG {
                let magnitude = delta.abs().min(360.0) as i64;
                if delta > 0.0 {
                    plan.push(format!("cw {}", magnitude));
                } else {
                    plan.push(format!("ccw {}", magnitude));
                }
            }
            while dist_xy > HOME_TOLERANCE_CM {
                let step = FORWARD_CHUNK_CM.min(dist_xy) as i64;
                plan.push(format!("forward {}", step));
                dist_xy -= step as f64;
            }
        }

        if self.z > HOME_TOLERANCE_CM {
            plan.push(format!("down {}", self.z.min(MAX_DESCENT_CM) as i64));
        }

        plan
    }
}

/// Normalize an angle to `[0, 360)`
fn normalize_deg(deg: f64) -> f64 {
    ((deg % 360.0) + 360.0) % 360.0
}

/// Wrap an angle difference into `[-180, 180]`
fn wrap_deg_180(deg: f64) -> f64 {
    (((deg + 540.0) % 360.0) + 360.0) % 360.0 - 180.0
}
