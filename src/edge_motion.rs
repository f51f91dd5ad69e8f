//! Touchpad edge motion.
//!
//! During a one-finger tap-and-drag, the dragging finger eventually runs into the edge of the
//! touchpad. [`EdgeMotion`] notices when the finger is within a few millimeters of an edge and
//! keeps moving the pointer in that direction, at a constant speed, until the finger moves away
//! from the edge or the drag ends. This lets a drag (or a text selection) continue past the
//! physical bounds of the touchpad.
//!
//! Motion is injected from a [`TimerSubsystem`] timer that re-arms itself every
//! [`EdgeMotionConfig::min_interval`] for as long as the finger stays at the edge.

#[cfg(feature = "serde")]
mod serde;

use crate::{
    time::Usec,
    timer::{Timer, TimerSubsystem},
    touchpad::{DeviceFloatCoords, DeviceId, Touch, Touchpad},
};

flag_set! {
    /// A set of touchpad edges.
    ///
    /// At most one of [`Edge::LEFT`]/[`Edge::RIGHT`] and one of [`Edge::TOP`]/[`Edge::BOTTOM`] is
    /// set by edge detection; two flags mean the touch is in a corner.
    pub struct Edge: u8 {
        LEFT = 1 << 0,
        RIGHT = 1 << 1,
        TOP = 1 << 2,
        BOTTOM = 1 << 3,
    }
}

/// State of the edge motion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMotionState {
    /// No drag in progress.
    Idle,
    /// Dragging, away from the edges.
    DragActive,
    /// Dragging at an edge; pointer motion is being injected.
    EdgeMotion,
}

/// Tuning of the edge motion behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct EdgeMotionConfig {
    speed_mm_per_s: f64,
    min_interval: Usec,
    edge_threshold_mm: f64,
    min_distance_mm: f64,
}

impl Default for EdgeMotionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeMotionConfig {
    /// Returns the default configuration: 70 mm/s, injected every 8ms, starting 5mm from the
    /// edge.
    pub const fn new() -> Self {
        Self {
            speed_mm_per_s: 70.0,
            min_interval: Usec::from_millis(8),
            edge_threshold_mm: 5.0,
            min_distance_mm: 0.001,
        }
    }

    /// Returns a copy of `self` with the given pointer speed, in mm/s of finger-equivalent
    /// motion.
    #[inline]
    pub const fn with_speed(mut self, mm_per_s: f64) -> Self {
        self.speed_mm_per_s = mm_per_s;
        self
    }

    /// Returns a copy of `self` with the given interval between motion events.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero, since the timer would then fire again within the same
    /// dispatch forever.
    #[inline]
    #[track_caller]
    pub const fn with_min_interval(mut self, interval: Usec) -> Self {
        assert!(!interval.is_zero(), "edge motion interval must not be zero");
        self.min_interval = interval;
        self
    }

    /// Returns a copy of `self` with the given edge margin, in mm.
    #[inline]
    pub const fn with_edge_threshold(mut self, mm: f64) -> Self {
        self.edge_threshold_mm = mm;
        self
    }

    /// Returns a copy of `self` with the given distance below which no motion is injected, in
    /// mm.
    #[inline]
    pub const fn with_min_distance(mut self, mm: f64) -> Self {
        self.min_distance_mm = mm;
        self
    }

    #[inline]
    pub const fn speed(&self) -> f64 {
        self.speed_mm_per_s
    }

    #[inline]
    pub const fn min_interval(&self) -> Usec {
        self.min_interval
    }

    #[inline]
    pub const fn edge_threshold(&self) -> f64 {
        self.edge_threshold_mm
    }

    #[inline]
    pub const fn min_distance(&self) -> f64 {
        self.min_distance_mm
    }
}

/// Gives the edge motion timer access to the [`EdgeMotion`] instance and device it belongs to.
///
/// Implemented by the dispatch context of the [`TimerSubsystem`], which typically owns all
/// devices.
pub trait EdgeMotionHost {
    /// Returns the edge motion state and the device identified by `device`, or [`None`] if the
    /// device is gone.
    fn edge_motion(&mut self, device: DeviceId) -> Option<(&mut EdgeMotion, &mut dyn Touchpad)>;
}

#[derive(Debug)]
struct Binding {
    device: DeviceId,
    timer: Timer,
}

/// Edge motion state machine for a single touchpad.
///
/// Binds to its device on the first call to [`EdgeMotion::evaluate`], and must be released with
/// [`EdgeMotion::teardown`] before the device (or the [`TimerSubsystem`]) goes away.
#[derive(Debug)]
pub struct EdgeMotion {
    config: EdgeMotionConfig,
    binding: Option<Binding>,
    state: EdgeMotionState,
    last_motion_time: Usec,
    edge: Edge,
    /// Unit vector pointing towards `edge`.
    direction: (f64, f64),
    continuous_motion_count: u64,
}

impl Default for EdgeMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeMotion {
    pub const fn new() -> Self {
        Self::with_config(EdgeMotionConfig::new())
    }

    pub const fn with_config(config: EdgeMotionConfig) -> Self {
        Self {
            config,
            binding: None,
            state: EdgeMotionState::Idle,
            last_motion_time: Usec::ZERO,
            edge: Edge::NONE,
            direction: (0.0, 0.0),
            continuous_motion_count: 0,
        }
    }

    pub fn config(&self) -> &EdgeMotionConfig {
        &self.config
    }

    pub fn state(&self) -> EdgeMotionState {
        self.state
    }

    /// Returns the edges the dragging touch was last detected at.
    pub fn edge(&self) -> Edge {
        self.edge
    }

    /// Returns the unit vector that injected motion follows.
    pub fn direction(&self) -> (f64, f64) {
        self.direction
    }

    /// Returns the number of motion events injected since entering
    /// [`EdgeMotionState::EdgeMotion`].
    pub fn continuous_motion_count(&self) -> u64 {
        self.continuous_motion_count
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Returns the device this instance is bound to.
    pub fn device(&self) -> Option<DeviceId> {
        self.binding.as_ref().map(|b| b.device)
    }

    /// Returns the timer injecting motion, once bound.
    pub fn timer(&self) -> Option<&Timer> {
        self.binding.as_ref().map(|b| &b.timer)
    }

    /// Updates the state machine from the current drag state and touches of `tp`.
    ///
    /// Called once per gesture processing cycle. Returns whether edge motion is active, which
    /// the gesture code uses to suppress regular pointer motion.
    ///
    /// # Panics
    ///
    /// Panics if `self` is already bound to a different device.
    pub fn evaluate<C: EdgeMotionHost + 'static>(
        &mut self,
        timers: &mut TimerSubsystem<C>,
        tp: &mut dyn Touchpad,
        now: Usec,
    ) -> bool {
        self.bind(timers, tp.id());

        let drag_active = tp.tap_state().is_dragging();
        let detected = if drag_active {
            self.detect_drag_edge(&*tp)
        } else {
            Edge::NONE
        };

        let next = match (drag_active, detected.is_empty()) {
            (false, _) => EdgeMotionState::Idle,
            (true, true) => EdgeMotionState::DragActive,
            (true, false) => EdgeMotionState::EdgeMotion,
        };

        if next != self.state {
            log::debug!(
                "edge motion: {:?} -> {:?} (edge {:?})",
                self.state,
                next,
                detected
            );
            self.state = next;
            self.edge = detected;

            match next {
                EdgeMotionState::Idle | EdgeMotionState::DragActive => {
                    self.continuous_motion_count = 0;
                    if let Some(b) = &self.binding {
                        timers.cancel(&b.timer);
                    }
                }
                EdgeMotionState::EdgeMotion => {
                    self.direction = motion_vector(detected);
                    self.last_motion_time = now;
                    self.handle_timeout(timers, tp, now);
                }
            }
        } else if self.state == EdgeMotionState::EdgeMotion {
            if detected != self.edge {
                // Corner <-> side: keep the timer and the motion timestamp going.
                log::trace!("edge motion: edge {:?} -> {:?}", self.edge, detected);
                self.edge = detected;
                self.direction = motion_vector(detected);
            }

            // A tick is lost when the host couldn't resolve the device; start over from here.
            let stalled = self
                .binding
                .as_ref()
                .is_some_and(|b| !timers.is_active(&b.timer));
            if stalled {
                log::debug!("edge motion: timer was not re-armed, restarting");
                self.last_motion_time = now;
                self.handle_timeout(timers, tp, now);
            }
        }

        self.state == EdgeMotionState::EdgeMotion
    }

    /// Injects motion and re-arms the timer. Invoked by the edge motion timer.
    pub fn handle_timeout<C>(
        &mut self,
        timers: &mut TimerSubsystem<C>,
        tp: &mut dyn Touchpad,
        now: Usec,
    ) {
        if self.state != EdgeMotionState::EdgeMotion {
            return;
        }

        self.inject_motion(tp, now);
        if let Some(b) = &self.binding {
            // A deserialized config bypasses the builder check.
            let interval = self.config.min_interval.max(Usec::from_micros(1));
            timers.set(&b.timer, now + interval);
        }
    }

    /// Cancels and releases the timer, and returns to the unbound idle state.
    pub fn teardown<C>(&mut self, timers: &mut TimerSubsystem<C>) {
        if let Some(b) = self.binding.take() {
            log::debug!("edge motion: releasing {:?}", b.device);
            timers.cancel(&b.timer);
            timers.destroy(b.timer);
        }
        *self = Self::with_config(self.config);
    }

    fn bind<C: EdgeMotionHost + 'static>(
        &mut self,
        timers: &mut TimerSubsystem<C>,
        device: DeviceId,
    ) {
        match &self.binding {
            Some(b) if b.device == device => return,
            Some(b) => panic!(
                "edge motion is bound to {:?} and cannot be used with {device:?}",
                b.device
            ),
            None => {}
        }

        let timer = timers.init("edge drag motion", move |ctx: &mut C, timers, now| {
            match ctx.edge_motion(device) {
                Some((fsm, tp)) => fsm.handle_timeout(timers, tp, now),
                None => log::debug!("edge motion: timer fired for removed device {device:?}"),
            }
        });
        log::debug!("edge motion: bound to {device:?}");
        self.binding = Some(Binding { device, timer });
    }

    fn detect_drag_edge(&self, tp: &dyn Touchpad) -> Edge {
        // Dragging is single-touch, so only the first touch in contact matters.
        tp.touches()
            .iter()
            .find(|t| t.state.is_contact())
            .map_or(Edge::NONE, |t| self.detect_edge(tp, t))
    }

    fn detect_edge(&self, tp: &dyn Touchpad, touch: &Touch) -> Edge {
        let (abs_x, abs_y) = (tp.abs_x(), tp.abs_y());
        let threshold_x = abs_x.mm_to_units(self.config.edge_threshold_mm);
        let threshold_y = abs_y.mm_to_units(self.config.edge_threshold_mm);
        let (x, y) = (f64::from(touch.point.x), f64::from(touch.point.y));

        let mut edge = Edge::NONE;
        if x < f64::from(abs_x.minimum()) + threshold_x {
            edge |= Edge::LEFT;
        } else if x > f64::from(abs_x.maximum()) - threshold_x {
            edge |= Edge::RIGHT;
        }
        if y < f64::from(abs_y.minimum()) + threshold_y {
            edge |= Edge::TOP;
        } else if y > f64::from(abs_y.maximum()) - threshold_y {
            edge |= Edge::BOTTOM;
        }
        edge
    }

    fn inject_motion(&mut self, tp: &mut dyn Touchpad, now: Usec) {
        if self.last_motion_time.is_zero() {
            self.last_motion_time = now;
            return;
        }

        let elapsed = Usec::delta(now, self.last_motion_time);
        let dist_mm = self.config.speed_mm_per_s * elapsed.as_secs_f64();
        if dist_mm < self.config.min_distance_mm {
            return;
        }

        let (scale_x, scale_y) = tp.accel_scale();
        let raw = DeviceFloatCoords {
            x: self.direction.0 * dist_mm * scale_x,
            y: self.direction.1 * dist_mm * scale_y,
        };
        let delta = tp.filter_motion(raw, now);
        log::trace!("edge motion: injecting {raw:?} -> {delta:?} after {elapsed:?}");
        tp.notify_motion(now, delta, raw);

        self.last_motion_time = now;
        self.continuous_motion_count += 1;
    }
}

/// Returns the unit vector pointing towards `edge`.
pub fn motion_vector(edge: Edge) -> (f64, f64) {
    let dx: f64 = if edge.contains(Edge::LEFT) {
        -1.0
    } else if edge.contains(Edge::RIGHT) {
        1.0
    } else {
        0.0
    };
    let dy: f64 = if edge.contains(Edge::TOP) {
        -1.0
    } else if edge.contains(Edge::BOTTOM) {
        1.0
    } else {
        0.0
    };

    let mag = dx.hypot(dy);
    if mag > 0.0 { (dx / mag, dy / mag) } else { (0.0, 0.0) }
}
