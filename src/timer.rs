//! Many logical timers multiplexed onto a single deadline source.
//!
//! A [`TimerSubsystem`] owns one OS deadline primitive (a `timerfd` by default) and any number of
//! logical timers. Whenever a timer is set or cancelled, the deadline source is re-armed to the
//! earliest pending expiry. When the source becomes readable, [`TimerSubsystem::dispatch`] runs
//! the callbacks of every timer that is due.
//!
//! Timer callbacks receive a caller-chosen context `C` (the state that owns the timers) and the
//! subsystem itself, so they can re-arm or cancel any timer, including their own.
//!
//! Everything here is single-threaded: callbacks run synchronously inside `dispatch`/`flush`, and
//! the subsystem never blocks.

#[cfg(test)]
mod tests;

use std::{
    fmt, io,
    os::fd::{AsRawFd, BorrowedFd},
    thread,
    time::Duration,
};

use crate::{
    ratelimit::RateLimit,
    time::Usec,
    timerfd::TimerFd,
    util::poll_readable,
};

/// An OS-level absolute deadline primitive and the clock it is measured against.
///
/// [`TimerFd`] is the production implementation.
pub trait DeadlineSource {
    /// Reads the monotonic clock the deadlines refer to.
    fn now(&self) -> io::Result<Usec>;

    /// Arms the source to become ready at `deadline`, or disarms it if `deadline` is [`None`].
    fn arm(&mut self, deadline: Option<Usec>) -> io::Result<()>;

    /// Consumes a pending readiness notification, returning the number of expirations.
    ///
    /// Fails with [`io::ErrorKind::WouldBlock`] if the source isn't ready.
    fn consume(&self) -> io::Result<u64>;

    /// Returns the waitable file descriptor, if the source has one.
    ///
    /// The descriptor must be non-blocking and become readable once the armed deadline passes.
    fn fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

flag_set! {
    /// Flags for [`TimerSubsystem::set_with_flags`].
    pub struct TimerFlags: u32 {
        /// The expiry may lie in the past without producing a diagnostic.
        ALLOW_NEGATIVE = 1 << 0,
    }
}

/// Thresholds for the timing-anomaly diagnostics emitted by [`TimerSubsystem::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimerConfig {
    past_tolerance: Usec,
    future_threshold: Usec,
    past_warning_interval: Usec,
    past_warning_burst: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerConfig {
    /// Returns the default configuration: warn when an expiry is more than 20ms in the past or
    /// more than 5s in the future; at most 5 "in the past" warnings per hour.
    pub const fn new() -> Self {
        Self {
            past_tolerance: Usec::from_millis(20),
            future_threshold: Usec::from_millis(5000),
            past_warning_interval: Usec::from_hours(1),
            past_warning_burst: 5,
        }
    }

    /// Returns a copy of `self` with the given tolerance for expiries in the past.
    #[inline]
    pub const fn with_past_tolerance(mut self, tolerance: Usec) -> Self {
        self.past_tolerance = tolerance;
        self
    }

    /// Returns a copy of `self` with the given threshold for expiries in the future.
    #[inline]
    pub const fn with_future_threshold(mut self, threshold: Usec) -> Self {
        self.future_threshold = threshold;
        self
    }

    /// Returns a copy of `self` that allows at most `burst` "in the past" warnings per
    /// `interval`.
    #[inline]
    pub const fn with_past_warning_limit(mut self, interval: Usec, burst: u32) -> Self {
        self.past_warning_interval = interval;
        self.past_warning_burst = burst;
        self
    }

    #[inline]
    pub const fn past_tolerance(&self) -> Usec {
        self.past_tolerance
    }

    #[inline]
    pub const fn future_threshold(&self) -> Usec {
        self.future_threshold
    }
}

/// Callback invoked when a timer expires.
///
/// Receives the dispatch context, the subsystem (to re-arm or cancel timers), and the current
/// time.
pub type TimerCallback<C> = Box<dyn FnMut(&mut C, &mut TimerSubsystem<C>, Usec)>;

/// Handle to a logical timer registered with a [`TimerSubsystem`].
///
/// Created by [`TimerSubsystem::init`], and must be handed back to [`TimerSubsystem::destroy`]
/// once the owner is done with it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "timers must be destroyed with `TimerSubsystem::destroy`"]
pub struct Timer {
    index: usize,
    generation: u32,
}

struct TimerState<C> {
    name: String,
    /// Zero iff the timer is inactive.
    expire: Usec,
    /// Position in `TimerSubsystem::active`, `Some` iff `expire` is non-zero.
    active_pos: Option<usize>,
    /// `None` while the callback is running.
    callback: Option<TimerCallback<C>>,
}

struct Entry<C> {
    generation: u32,
    timer: Option<TimerState<C>>,
}

#[track_caller]
fn lookup<'a, C>(entries: &'a [Entry<C>], timer: &Timer) -> &'a TimerState<C> {
    match entries.get(timer.index) {
        Some(Entry {
            generation,
            timer: Some(state),
        }) if *generation == timer.generation => state,
        _ => panic!("{timer:?} does not belong to this timer subsystem"),
    }
}

#[track_caller]
fn lookup_mut<'a, C>(entries: &'a mut [Entry<C>], timer: &Timer) -> &'a mut TimerState<C> {
    match entries.get_mut(timer.index) {
        Some(Entry {
            generation,
            timer: Some(state),
        }) if *generation == timer.generation => state,
        _ => panic!("{timer:?} does not belong to this timer subsystem"),
    }
}

/// Schedules many logical timers on a single deadline source.
///
/// `C` is the context passed to every timer callback during dispatch.
///
/// Dropping the subsystem while any timer is still active is a bug in the timer owners and
/// panics.
pub struct TimerSubsystem<C> {
    source: Box<dyn DeadlineSource>,
    entries: Vec<Entry<C>>,
    free: Vec<usize>,
    /// Indices of active timers, unordered.
    active: Vec<usize>,
    /// The deadline the source is currently armed with.
    next_expiry: Option<Usec>,
    expiry_in_past_limit: RateLimit,
    config: TimerConfig,
}

impl<C> fmt::Debug for TimerSubsystem<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Active<'a, C>(&'a TimerSubsystem<C>);

        impl<C> fmt::Debug for Active<'_, C> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut map = f.debug_map();
                for &index in &self.0.active {
                    if let Some(state) = &self.0.entries[index].timer {
                        map.entry(&state.name, &state.expire);
                    }
                }
                map.finish()
            }
        }

        f.debug_struct("TimerSubsystem")
            .field("fd", &self.source.fd().map(|fd| fd.as_raw_fd()))
            .field("next_expiry", &self.next_expiry)
            .field("active", &Active(self))
            .field("config", &self.config)
            .finish()
    }
}

impl<C> TimerSubsystem<C> {
    /// Creates a timer subsystem backed by a new `timerfd`, with the default [`TimerConfig`].
    ///
    /// # Errors
    ///
    /// Fails if the `timerfd` cannot be created.
    pub fn new() -> io::Result<Self> {
        Self::with_config(TimerConfig::new())
    }

    /// Creates a timer subsystem backed by a new `timerfd`.
    pub fn with_config(config: TimerConfig) -> io::Result<Self> {
        Ok(Self::with_source(TimerFd::new()?, config))
    }

    /// Creates a timer subsystem on top of an arbitrary [`DeadlineSource`].
    pub fn with_source(source: impl DeadlineSource + 'static, config: TimerConfig) -> Self {
        Self {
            source: Box::new(source),
            entries: Vec::new(),
            free: Vec::new(),
            active: Vec::new(),
            next_expiry: None,
            expiry_in_past_limit: RateLimit::new(
                config.past_warning_interval,
                config.past_warning_burst,
            ),
            config,
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Returns the deadline source's file descriptor, for adding it to an external poll loop.
    ///
    /// When it becomes readable, call [`TimerSubsystem::dispatch`].
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.source.fd()
    }

    /// Returns whether the deadline source is ready, without blocking.
    ///
    /// Sources without a file descriptor are checked against the clock instead.
    pub fn is_ready(&self) -> io::Result<bool> {
        match self.source.fd() {
            Some(fd) => poll_readable(fd, Duration::ZERO),
            None => Ok(self
                .next_expiry
                .is_some_and(|next| next <= self.source.now().unwrap_or(Usec::ZERO))),
        }
    }

    /// Returns the current monotonic time.
    ///
    /// If the clock cannot be read, this logs an error and returns [`Usec::ZERO`], which callers
    /// must treat as "no time available".
    pub fn now(&self) -> Usec {
        match self.source.now() {
            Ok(now) => now,
            Err(e) => {
                log::error!("clock_gettime failed: {e}");
                Usec::ZERO
            }
        }
    }

    /// Registers a new, inactive timer.
    ///
    /// `name` is only used in diagnostics.
    pub fn init(
        &mut self,
        name: &str,
        callback: impl FnMut(&mut C, &mut TimerSubsystem<C>, Usec) + 'static,
    ) -> Timer {
        let state = TimerState {
            name: name.to_string(),
            expire: Usec::ZERO,
            active_pos: None,
            callback: Some(Box::new(callback)),
        };
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    timer: None,
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index];
        entry.timer = Some(state);
        Timer {
            index,
            generation: entry.generation,
        }
    }

    /// Releases a timer.
    ///
    /// # Panics
    ///
    /// Panics if the timer is still active. Owners must cancel their timers before tearing
    /// down, since the callback would otherwise fire into a context that no longer exists.
    #[track_caller]
    pub fn destroy(&mut self, timer: Timer) {
        let state = lookup(&self.entries, &timer);
        if !state.expire.is_zero() {
            log::error!("bug: timer {} has not been cancelled", state.name);
            panic!("timer `{}` destroyed while still active", state.name);
        }

        let entry = &mut self.entries[timer.index];
        entry.timer = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(timer.index);
    }

    /// Arms `timer` to fire at `expire`.
    ///
    /// Equivalent to [`TimerSubsystem::set_with_flags`] with [`TimerFlags::NONE`].
    #[track_caller]
    pub fn set(&mut self, timer: &Timer, expire: Usec) {
        self.set_with_flags(timer, expire, TimerFlags::NONE);
    }

    /// Arms or re-arms `timer` to fire at `expire`.
    ///
    /// An expiry in the past is allowed: the timer fires on the next dispatch. Unless
    /// [`TimerFlags::ALLOW_NEGATIVE`] is given, this is reported as a (rate-limited) diagnostic
    /// when the expiry lies further in the past than the configured tolerance.
    ///
    /// # Panics
    ///
    /// Panics if `expire` is zero.
    #[track_caller]
    pub fn set_with_flags(&mut self, timer: &Timer, expire: Usec, flags: TimerFlags) {
        assert!(!expire.is_zero(), "timer expiry must not be zero");

        let now = self.now();
        if !now.is_zero() {
            if expire < now {
                let tdelta = Usec::delta(now, expire);
                if !flags.contains(TimerFlags::ALLOW_NEGATIVE)
                    && tdelta > self.config.past_tolerance
                {
                    let name = &lookup(&self.entries, timer).name;
                    log_ratelimit!(
                        self.expiry_in_past_limit,
                        now,
                        "client bug: timer {name}: scheduled expiry is in the past (-{}ms), your system is too slow",
                        tdelta.as_millis(),
                    );
                }
            } else if Usec::delta(expire, now) > self.config.future_threshold {
                log::error!(
                    "bug: timer {}: offset more than {}, now {} expire {}",
                    lookup(&self.entries, timer).name,
                    self.config.future_threshold.human(),
                    now.as_millis(),
                    expire.as_millis(),
                );
            }
        }

        let state = lookup_mut(&mut self.entries, timer);
        if state.expire.is_zero() {
            state.active_pos = Some(self.active.len());
            self.active.push(timer.index);
        }
        state.expire = expire;

        self.arm();
    }

    /// Deactivates `timer`. Does nothing if it isn't active.
    #[track_caller]
    pub fn cancel(&mut self, timer: &Timer) {
        lookup(&self.entries, timer);
        self.cancel_index(timer.index);
    }

    /// Returns whether `timer` is armed.
    #[track_caller]
    pub fn is_active(&self, timer: &Timer) -> bool {
        !lookup(&self.entries, timer).expire.is_zero()
    }

    /// Returns the expiry of `timer`, or [`None`] if it is inactive.
    #[track_caller]
    pub fn expiry(&self, timer: &Timer) -> Option<Usec> {
        let expire = lookup(&self.entries, timer).expire;
        (!expire.is_zero()).then_some(expire)
    }

    #[track_caller]
    pub fn name(&self, timer: &Timer) -> &str {
        &lookup(&self.entries, timer).name
    }

    /// Returns the earliest expiry over all active timers, which is what the deadline source is
    /// armed with.
    pub fn next_expiry(&self) -> Option<Usec> {
        self.next_expiry
    }

    /// Returns the number of active timers.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Handles readiness of the deadline source: acknowledges it and runs every due timer.
    ///
    /// Does nothing (beyond logging) if the current time cannot be determined.
    pub fn dispatch(&mut self, ctx: &mut C) {
        match self.source.consume() {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("bug: timer: error reading from timerfd: {e}"),
        }

        let now = self.now();
        if now.is_zero() {
            return;
        }

        self.run_expired(ctx, now);
    }

    /// Runs all timers that are due at `now`.
    ///
    /// Meant for callers that dispatch infrequently: by the time they look, both a timer expiry
    /// and a later input event may be pending, and nothing guarantees the timer is observed
    /// first. Calling this with the timestamp of the input event before processing it keeps
    /// the two in order.
    ///
    /// Returns immediately if no timer is due.
    pub fn flush(&mut self, ctx: &mut C, now: Usec) {
        match self.next_expiry {
            Some(next) if next <= now => self.run_expired(ctx, now),
            _ => {}
        }
    }

    /// Waits for the deadline source to become ready, then runs every due timer.
    ///
    /// This never completes if no timer is armed.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::Unsupported`] if the deadline source has no file descriptor.
    #[cfg(any(feature = "tokio", feature = "async-io"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "tokio", feature = "async-io"))))]
    pub async fn dispatch_async(&mut self, ctx: &mut C) -> io::Result<()> {
        let Some(fd) = self.source.fd() else {
            return Err(io::ErrorKind::Unsupported.into());
        };
        crate::util::r#async::read_when_ready(fd, || self.source.consume()).await?;

        let now = self.now();
        if !now.is_zero() {
            self.run_expired(ctx, now);
        }
        Ok(())
    }

    fn cancel_index(&mut self, index: usize) {
        let Some(state) = self.entries[index].timer.as_mut() else {
            return;
        };
        if state.expire.is_zero() {
            return;
        }

        state.expire = Usec::ZERO;
        if let Some(pos) = state.active_pos.take() {
            self.active.swap_remove(pos);
            if let Some(&moved) = self.active.get(pos) {
                if let Some(moved) = self.entries[moved].timer.as_mut() {
                    moved.active_pos = Some(pos);
                }
            }
        }

        self.arm();
    }

    /// Re-arms the deadline source to the earliest active expiry.
    fn arm(&mut self) {
        let earliest = self
            .active
            .iter()
            .filter_map(|&index| self.entries[index].timer.as_ref())
            .map(|state| state.expire)
            .min();

        if let Err(e) = self.source.arm(earliest) {
            log::error!("timer: timerfd_settime error: {e}");
        }
        self.next_expiry = earliest;
    }

    fn first_expired(&self, now: Usec) -> Option<usize> {
        self.active.iter().copied().find(|&index| {
            self.entries[index]
                .timer
                .as_ref()
                .is_some_and(|state| state.expire <= now)
        })
    }

    fn run_expired(&mut self, ctx: &mut C, now: Usec) {
        // Callbacks may cancel, re-arm, or destroy any timer, so the scan restarts from scratch
        // after every callback instead of iterating over a collection that may have changed.
        while let Some(index) = self.first_expired(now) {
            // Cancel first: the callback may re-arm its own timer.
            self.cancel_index(index);

            let entry = &mut self.entries[index];
            let generation = entry.generation;
            let Some(mut callback) = entry.timer.as_mut().and_then(|state| state.callback.take())
            else {
                // Re-entrant dispatch from inside this timer's own callback.
                log::trace!("timer {index} is already running; skipping");
                continue;
            };

            callback(ctx, self, now);

            let entry = &mut self.entries[index];
            if entry.generation == generation {
                if let Some(state) = &mut entry.timer {
                    state.callback.get_or_insert(callback);
                }
            }
        }
    }
}

impl<C> Drop for TimerSubsystem<C> {
    fn drop(&mut self) {
        if self.active.is_empty() {
            return;
        }

        for &index in &self.active {
            if let Some(state) = &self.entries[index].timer {
                log::error!("bug: timer: {} still present on shutdown", state.name);
            }
        }

        // All timer users should have cancelled and destroyed their timers by now.
        if !thread::panicking() {
            panic!(
                "timer subsystem dropped with {} active timer(s)",
                self.active.len()
            );
        }
    }
}
