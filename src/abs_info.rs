use std::fmt;

/// Range and resolution of an absolute position axis of a touch device.
///
/// Positions reported on the axis lie between [`AbsInfo::minimum`] and [`AbsInfo::maximum`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AbsInfo {
    minimum: i32,
    maximum: i32,
    resolution: i32,
}

impl AbsInfo {
    /// Creates a new [`AbsInfo`] with a minimum and maximum value, and an unknown resolution.
    #[inline]
    pub const fn new(minimum: i32, maximum: i32) -> Self {
        Self {
            minimum,
            maximum,
            resolution: 0,
        }
    }

    /// Returns a copy of `self` with the given axis resolution, in units/mm.
    #[inline]
    pub const fn with_resolution(mut self, resolution: i32) -> Self {
        self.resolution = resolution;
        self
    }

    #[inline]
    pub const fn minimum(&self) -> i32 {
        self.minimum
    }

    #[inline]
    pub const fn maximum(&self) -> i32 {
        self.maximum
    }

    /// Returns the raw resolution of this axis, in units/mm.
    ///
    /// This is 0 when the device doesn't report a resolution.
    #[inline]
    pub const fn resolution(&self) -> i32 {
        self.resolution
    }

    /// Returns the resolution used for unit conversions.
    ///
    /// A missing (0 or negative) resolution is treated as 1 unit/mm.
    #[inline]
    pub const fn effective_resolution(&self) -> i32 {
        if self.resolution > 0 { self.resolution } else { 1 }
    }

    /// Converts a physical length in millimeters into a length in axis units.
    #[inline]
    pub fn mm_to_units(&self, mm: f64) -> f64 {
        mm * f64::from(self.effective_resolution())
    }

    /// Returns the factor that converts a distance in mm into the units of a 1000 DPI
    /// reference mouse, which is what pointer acceleration filters expect.
    #[inline]
    pub fn accel_scale_coeff(&self) -> f64 {
        const DEFAULT_MOUSE_DPI: f64 = 1000.0;
        (DEFAULT_MOUSE_DPI / 25.4) / f64::from(self.effective_resolution())
    }
}

impl fmt::Debug for AbsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbsInfo")
            .field("minimum", &self.minimum())
            .field("maximum", &self.maximum())
            .field("resolution", &self.resolution())
            .finish()
    }
}
