//! Schedules one timer per command line argument and prints them as they fire.
//!
//! Arguments are delays in milliseconds, e.g. `cargo run --example timers 250 100 1000`. A delay
//! may be suffixed with `r` to make the timer re-arm itself 3 times.

use std::{env, io, os::fd::AsRawFd, process};

use evmotion::{Timer, TimerSubsystem, Usec};

struct Demo {
    start: Usec,
    handles: Vec<Timer>,
    count: usize,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        eprintln!("usage: {} <delay-ms>[r]...", env!("CARGO_CRATE_NAME"));
        process::exit(1);
    }

    let mut timers = TimerSubsystem::<Demo>::new()?;
    let start = timers.now();
    let mut demo = Demo {
        start,
        handles: Vec::new(),
        count: 0,
    };

    for (i, arg) in args.iter().enumerate() {
        let (ms, mut repeat) = match arg.strip_suffix('r') {
            Some(ms) => (ms, 3),
            None => (arg.as_str(), 0),
        };
        let Ok(ms) = ms.parse::<u32>() else {
            eprintln!("invalid delay '{arg}'");
            process::exit(1);
        };
        let ms = ms.max(1);

        let name = format!("{ms}ms");
        let handle = timers.init(&name.clone(), move |demo: &mut Demo, timers, now| {
            demo.count += 1;
            println!(
                "{name:>8} fired at +{}",
                Usec::delta(now, demo.start).human()
            );
            if repeat > 0 {
                repeat -= 1;
                timers.set(&demo.handles[i], now.add_millis(ms));
            }
        });
        timers.set(&handle, start.add_millis(ms));
        demo.handles.push(handle);
    }

    println!("{timers:?}");

    while timers.active_count() > 0 {
        let fd = timers.fd().expect("timerfd-backed subsystem has an fd");
        let mut pollfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        if unsafe { libc::poll(&mut pollfd, 1, -1) } == -1 {
            return Err(io::Error::last_os_error());
        }
        timers.dispatch(&mut demo);
    }

    println!("{} callbacks ran", demo.count);
    for handle in demo.handles.drain(..) {
        timers.destroy(handle);
    }
    Ok(())
}
