//! Simulates a tap-and-drag that runs into the right edge of a touchpad.
//!
//! The simulated finger moves right by 2mm every 16ms and stops 2mm short of the edge. Once it is
//! within the edge margin, the pointer keeps moving on its own until the drag is released 500ms
//! later. Pointer motion is printed as it is emitted.
//!
//! Run with `RUST_LOG=evmotion=debug` to see the state machine transitions.

use std::{io, os::fd::AsRawFd};

use evmotion::{
    AbsInfo, EdgeMotion, TimerSubsystem, Usec,
    edge_motion::EdgeMotionHost,
    touchpad::{
        DeviceCoords, DeviceFloatCoords, DeviceId, NormalizedCoords, TapState, Touch, TouchState,
        Touchpad,
    },
};

/// 100x60mm at 20 units/mm.
const ABS_X: AbsInfo = AbsInfo::new(0, 2000).with_resolution(20);
const ABS_Y: AbsInfo = AbsInfo::new(0, 1200).with_resolution(20);

struct SimPad {
    tap: TapState,
    touches: [Touch; 1],
    pointer: (f64, f64),
    injected: u32,
}

impl Touchpad for SimPad {
    fn id(&self) -> DeviceId {
        DeviceId(0)
    }

    fn tap_state(&self) -> TapState {
        self.tap
    }

    fn touches(&self) -> &[Touch] {
        &self.touches
    }

    fn abs_x(&self) -> AbsInfo {
        ABS_X
    }

    fn abs_y(&self) -> AbsInfo {
        ABS_Y
    }

    fn filter_motion(&mut self, raw: DeviceFloatCoords, _time: Usec) -> NormalizedCoords {
        NormalizedCoords {
            x: raw.x * 1.5,
            y: raw.y * 1.5,
        }
    }

    fn notify_motion(&mut self, time: Usec, delta: NormalizedCoords, _raw: DeviceFloatCoords) {
        self.pointer.0 += delta.x;
        self.pointer.1 += delta.y;
        self.injected += 1;
        println!(
            "{:>10} edge motion {:+.3},{:+.3} -> pointer at {:.1},{:.1}",
            time.as_millis(),
            delta.x,
            delta.y,
            self.pointer.0,
            self.pointer.1,
        );
    }
}

struct Device {
    fsm: EdgeMotion,
    pad: SimPad,
}

impl EdgeMotionHost for Device {
    fn edge_motion(&mut self, device: DeviceId) -> Option<(&mut EdgeMotion, &mut dyn Touchpad)> {
        if device != self.pad.id() {
            return None;
        }
        let pad: &mut dyn Touchpad = &mut self.pad;
        Some((&mut self.fsm, pad))
    }
}

fn wait(timers: &TimerSubsystem<Device>, timeout_ms: i32) -> io::Result<()> {
    let fd = timers.fd().expect("timerfd-backed subsystem has an fd");
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    if unsafe { libc::poll(&mut pollfd, 1, timeout_ms) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn main() -> io::Result<()> {
    env_logger::init();

    let mut timers = TimerSubsystem::<Device>::new()?;
    let mut dev = Device {
        fsm: EdgeMotion::new(),
        pad: SimPad {
            tap: TapState::Dragging,
            touches: [Touch::new(TouchState::Update, DeviceCoords::new(1000, 600))],
            pointer: (0.0, 0.0),
            injected: 0,
        },
    };

    // Finger motion: 40 units (2mm) every 16ms, up to 40 units short of the maximum.
    let stop_x = ABS_X.maximum() - 40;
    while dev.pad.touches[0].point.x < stop_x {
        dev.pad.touches[0].point.x = (dev.pad.touches[0].point.x + 40).min(stop_x);
        dev.pad.pointer.0 += 40.0;
        wait(&timers, 16)?;
        timers.dispatch(&mut dev);

        let now = timers.now();
        let active = dev.fsm.evaluate(&mut timers, &mut dev.pad, now);
        println!(
            "{:>10} finger at x={} {:?}{}",
            now.as_millis(),
            dev.pad.touches[0].point.x,
            dev.fsm.state(),
            if active { " (pointer driven by edge motion)" } else { "" },
        );
    }

    // Rest at the edge; the timer does the rest.
    let release = timers.now() + Usec::from_millis(500);
    while timers.now() < release {
        wait(&timers, 50)?;
        timers.dispatch(&mut dev);
    }

    dev.pad.tap = TapState::Idle;
    let now = timers.now();
    dev.fsm.evaluate(&mut timers, &mut dev.pad, now);
    println!(
        "released after {} injected motion events; pointer at {:.1},{:.1}",
        dev.pad.injected, dev.pad.pointer.0, dev.pad.pointer.1,
    );

    dev.fsm.teardown(&mut timers);
    Ok(())
}
