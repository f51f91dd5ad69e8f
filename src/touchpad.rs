//! The device side of edge motion: touches, geometry, gesture state, and the pointer pipeline.
//!
//! Nothing in here is implemented by this crate; a touchpad driver implements [`Touchpad`] to let
//! [`EdgeMotion`] observe its touches and inject pointer motion.
//!
//! [`EdgeMotion`]: crate::edge_motion::EdgeMotion

use crate::{AbsInfo, time::Usec};

/// Identifies a device for the lifetime of its binding to an [`EdgeMotion`] instance.
///
/// [`EdgeMotion`]: crate::edge_motion::EdgeMotion
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

/// A position in device units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCoords {
    pub x: i32,
    pub y: i32,
}

impl DeviceCoords {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A motion delta in device units, before pointer acceleration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceFloatCoords {
    pub x: f64,
    pub y: f64,
}

/// A motion delta after pointer acceleration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NormalizedCoords {
    pub x: f64,
    pub y: f64,
}

/// Lifecycle state of a touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchState {
    /// The slot is unused.
    None,
    /// A finger is close to, but not touching, the surface.
    Hovering,
    /// The touch started in this frame.
    Begin,
    /// The touch is ongoing.
    Update,
    /// The touch may be ending (pressure dropped below the threshold).
    MaybeEnd,
    /// The touch ended in this frame.
    End,
}

impl TouchState {
    /// Returns whether a finger is in contact with the surface.
    pub fn is_contact(self) -> bool {
        !matches!(self, Self::None | Self::Hovering)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub state: TouchState,
    pub point: DeviceCoords,
}

impl Touch {
    pub const fn new(state: TouchState, point: DeviceCoords) -> Self {
        Self { state, point }
    }
}

/// The tap gesture state of a device, as far as dragging is concerned.
///
/// The tap state machine has many more states; everything that isn't a one-finger drag is
/// [`TapState::Idle`] or [`TapState::Other`] here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Idle,
    /// Any non-dragging state of the tap state machine.
    Other,
    /// A one-finger tap-and-drag is in progress.
    Dragging,
    /// A second finger was put down during a drag.
    Dragging2,
    /// The finger was lifted; the drag continues if it comes back within the drag-lock timeout.
    DraggingWait,
    /// The finger was put down again after [`TapState::DraggingWait`].
    DraggingOrTap,
    /// The finger was lifted and a double-tap may follow.
    DraggingOrDoubletap,
}

impl TapState {
    /// Returns whether a one-finger drag is active.
    pub fn is_dragging(self) -> bool {
        matches!(
            self,
            Self::Dragging
                | Self::Dragging2
                | Self::DraggingWait
                | Self::DraggingOrTap
                | Self::DraggingOrDoubletap
        )
    }
}

/// A touchpad that edge motion can observe and drive.
pub trait Touchpad {
    fn id(&self) -> DeviceId;

    /// Returns the current tap gesture state.
    fn tap_state(&self) -> TapState;

    /// Returns the tracked touches, in slot order.
    fn touches(&self) -> &[Touch];

    /// Returns the X axis range and resolution.
    fn abs_x(&self) -> AbsInfo;

    /// Returns the Y axis range and resolution.
    fn abs_y(&self) -> AbsInfo;

    /// Returns the factors converting a distance in mm into the units the acceleration filter
    /// expects, per axis.
    fn accel_scale(&self) -> (f64, f64) {
        (self.abs_x().accel_scale_coeff(), self.abs_y().accel_scale_coeff())
    }

    /// Passes a raw motion delta through the device's pointer acceleration filter.
    fn filter_motion(&mut self, raw: DeviceFloatCoords, time: Usec) -> NormalizedCoords;

    /// Emits a pointer motion event.
    fn notify_motion(&mut self, time: Usec, delta: NormalizedCoords, raw: DeviceFloatCoords);
}
