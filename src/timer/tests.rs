use crate::{
    ratelimit::RateLimitState,
    test::{ScriptedSource, init_logger},
};

use super::*;

const T0: Usec = Usec::from_seconds(100);

#[derive(Default)]
struct Ctx {
    fired: Vec<&'static str>,
    timers: Vec<Option<Timer>>,
}

impl Ctx {
    fn count(&self, name: &str) -> usize {
        self.fired.iter().filter(|n| **n == name).count()
    }
}

fn subsystem() -> (TimerSubsystem<Ctx>, ScriptedSource) {
    init_logger();
    let source = ScriptedSource::new(T0);
    let timers = TimerSubsystem::with_source(source.clone(), TimerConfig::new());
    (timers, source)
}

fn recording(name: &'static str) -> impl FnMut(&mut Ctx, &mut TimerSubsystem<Ctx>, Usec) {
    move |ctx, _, _| ctx.fired.push(name)
}

fn teardown(mut timers: TimerSubsystem<Ctx>, ctx: Ctx) {
    for timer in ctx.timers.into_iter().flatten() {
        timers.cancel(&timer);
        timers.destroy(timer);
    }
}

#[test]
fn init_does_not_arm() {
    let (mut timers, source) = subsystem();
    let t = timers.init("idle", recording("idle"));
    assert!(!timers.is_active(&t));
    assert_eq!(timers.expiry(&t), None);
    assert_eq!(timers.name(&t), "idle");
    assert_eq!(timers.active_count(), 0);
    assert_eq!(source.arm_calls(), 0);
    timers.destroy(t);
}

#[test]
fn armed_to_earliest_expiry() {
    let (mut timers, source) = subsystem();
    let a = timers.init("a", recording("a"));
    let b = timers.init("b", recording("b"));

    timers.set(&a, T0.add_millis(30));
    assert_eq!(source.armed(), Some(T0.add_millis(30)));
    timers.set(&b, T0.add_millis(10));
    assert_eq!(source.armed(), Some(T0.add_millis(10)));
    assert_eq!(timers.next_expiry(), Some(T0.add_millis(10)));

    // Re-setting an active timer updates it in place.
    timers.set(&b, T0.add_millis(50));
    assert_eq!(timers.active_count(), 2);
    assert_eq!(source.armed(), Some(T0.add_millis(30)));

    timers.cancel(&a);
    assert_eq!(source.armed(), Some(T0.add_millis(50)));
    timers.cancel(&b);
    assert_eq!(source.armed(), None);
    assert_eq!(timers.next_expiry(), None);

    // Cancelling an inactive timer does nothing.
    let calls = source.arm_calls();
    timers.cancel(&b);
    assert_eq!(source.arm_calls(), calls);

    timers.destroy(a);
    timers.destroy(b);
}

#[test]
fn set_cancel_sequences_keep_invariants() {
    let (mut timers, source) = subsystem();
    let handles: Vec<Timer> = (0..6).map(|_| timers.init("t", |_, _, _| {})).collect();
    let mut model = [Usec::ZERO; 6];

    // Deterministic LCG, so failures are reproducible.
    let mut seed = 0x2545_f491_u32;
    let mut next = move || {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        seed >> 8
    };

    for _ in 0..1000 {
        let i = (next() % 6) as usize;
        if next() % 3 == 0 {
            timers.cancel(&handles[i]);
            model[i] = Usec::ZERO;
        } else {
            let expire = T0.add_millis(1 + next() % 4000);
            timers.set(&handles[i], expire);
            model[i] = expire;
        }

        let min = model.iter().copied().filter(|e| !e.is_zero()).min();
        assert_eq!(source.armed(), min);
        assert_eq!(timers.next_expiry(), min);
        assert_eq!(
            timers.active_count(),
            model.iter().filter(|e| !e.is_zero()).count()
        );
        for (handle, expire) in handles.iter().zip(model) {
            assert_eq!(timers.is_active(handle), !expire.is_zero());
            assert_eq!(timers.expiry(handle), (!expire.is_zero()).then_some(expire));
        }
    }

    for handle in handles {
        timers.cancel(&handle);
        timers.destroy(handle);
    }
}

#[test]
fn dispatch_fires_due_timers_once() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("a", recording("a"));
    let b = timers.init("b", recording("b"));
    let c = timers.init("c", recording("c"));
    timers.set(&a, T0.add_millis(5));
    timers.set(&b, T0.add_millis(10));
    timers.set(&c, T0.add_millis(20));

    source.set_now(T0.add_millis(10));
    timers.dispatch(&mut ctx);
    ctx.fired.sort();
    assert_eq!(ctx.fired, ["a", "b"]);
    assert!(!timers.is_active(&a));
    assert!(!timers.is_active(&b));
    assert!(timers.is_active(&c));
    assert_eq!(source.armed(), Some(T0.add_millis(20)));
    assert_eq!(source.state().consumed, 1);

    // Nothing left to do until `c` is due.
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired.len(), 2);

    source.set_now(T0.add_millis(25));
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.count("c"), 1);
    assert_eq!(source.armed(), None);

    ctx.timers = vec![Some(a), Some(b), Some(c)];
    teardown(timers, ctx);
}

#[test]
fn self_rearm_to_now_fires_again() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let t = timers.init("again", |ctx: &mut Ctx, timers, now| {
        ctx.fired.push("again");
        if ctx.fired.len() < 3 {
            let me = ctx.timers[0].as_ref().unwrap();
            timers.set(me, now);
        }
    });
    timers.set(&t, T0.add_millis(1));
    ctx.timers.push(Some(t));

    source.set_now(T0.add_millis(1));
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.count("again"), 3);
    assert_eq!(timers.active_count(), 0);

    teardown(timers, ctx);
}

#[test]
fn callback_cancels_sibling() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("a", |ctx: &mut Ctx, timers, _| {
        ctx.fired.push("a");
        timers.cancel(ctx.timers[1].as_ref().unwrap());
    });
    let b = timers.init("b", recording("b"));
    timers.set(&a, T0.add_millis(5));
    timers.set(&b, T0.add_millis(20));
    ctx.timers = vec![Some(a), Some(b)];

    source.set_now(T0.add_millis(10));
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired, ["a"]);
    assert!(!timers.is_active(ctx.timers[1].as_ref().unwrap()));
    assert_eq!(timers.active_count(), 0);
    assert_eq!(source.armed(), None);

    // `b` stays cancelled once its original expiry has passed.
    source.set_now(T0.add_millis(30));
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired, ["a"]);

    teardown(timers, ctx);
}

#[test]
fn callback_cancels_due_sibling() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("a", |ctx: &mut Ctx, timers, _| {
        ctx.fired.push("a");
        timers.cancel(ctx.timers[1].as_ref().unwrap());
    });
    let b = timers.init("b", recording("b"));
    timers.set(&a, T0.add_millis(5));
    timers.set(&b, T0.add_millis(5));
    ctx.timers = vec![Some(a), Some(b)];

    // Both are due; whichever order they run in, each runs at most once.
    source.set_now(T0.add_millis(5));
    timers.dispatch(&mut ctx);
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.count("a"), 1);
    assert!(ctx.count("b") <= 1);
    assert!(!timers.is_active(ctx.timers[1].as_ref().unwrap()));
    assert_eq!(timers.active_count(), 0);

    teardown(timers, ctx);
}

#[test]
fn callback_destroys_and_creates_timers() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("a", |ctx: &mut Ctx, timers, now| {
        ctx.fired.push("a");
        // Release our own timer and the idle sibling, then schedule a new one right away. The
        // new timer may reuse either slot.
        for timer in ctx.timers.drain(..).flatten() {
            timers.destroy(timer);
        }
        let c = timers.init("c", recording("c"));
        timers.set(&c, now);
        ctx.timers.push(Some(c));
    });
    let b = timers.init("b", recording("b"));
    timers.set(&a, T0.add_millis(5));
    ctx.timers = vec![Some(a), Some(b)];

    source.set_now(T0.add_millis(5));
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired, ["a", "c"]);
    assert_eq!(timers.active_count(), 0);

    teardown(timers, ctx);
}

#[test]
fn flush_uses_cached_expiry() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("a", recording("a"));
    let b = timers.init("b", recording("b"));

    // Nothing armed.
    timers.flush(&mut ctx, T0.add_millis(100));
    assert!(ctx.fired.is_empty());

    timers.set(&a, T0.add_millis(10));
    timers.set(&b, T0.add_millis(30));

    timers.flush(&mut ctx, T0.add_millis(9));
    assert!(ctx.fired.is_empty());
    assert_eq!(source.state().consumed, 0);

    // `flush` uses the given time, not the clock, and doesn't touch the deadline source.
    timers.flush(&mut ctx, T0.add_millis(10));
    assert_eq!(ctx.fired, ["a"]);
    assert_eq!(source.state().consumed, 0);
    assert_eq!(timers.next_expiry(), Some(T0.add_millis(30)));

    timers.flush(&mut ctx, T0.add_millis(60));
    assert_eq!(ctx.fired, ["a", "b"]);
    assert_eq!(timers.next_expiry(), None);

    ctx.timers = vec![Some(a), Some(b)];
    teardown(timers, ctx);
}

#[test]
fn clock_failure() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("a", recording("a"));
    timers.set(&a, T0.add_millis(1));

    source.set_now(T0.add_millis(5));
    source.state().clock_fails = true;
    assert_eq!(timers.now(), Usec::ZERO);
    timers.dispatch(&mut ctx);
    assert!(ctx.fired.is_empty());
    assert!(timers.is_active(&a));

    source.state().clock_fails = false;
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired, ["a"]);

    ctx.timers.push(Some(a));
    teardown(timers, ctx);
}

#[test]
fn arm_failure_is_not_fatal() {
    let (mut timers, source) = subsystem();
    let a = timers.init("a", recording("a"));

    source.state().arm_fails = true;
    timers.set(&a, T0.add_millis(10));
    assert_eq!(source.armed(), None);
    assert_eq!(timers.next_expiry(), Some(T0.add_millis(10)));
    assert!(timers.is_active(&a));

    // The next set/cancel retries.
    source.state().arm_fails = false;
    timers.set(&a, T0.add_millis(20));
    assert_eq!(source.armed(), Some(T0.add_millis(20)));

    timers.cancel(&a);
    timers.destroy(a);
}

#[test]
fn expiry_in_the_past() {
    let (mut timers, source) = subsystem();
    let mut ctx = Ctx::default();
    let a = timers.init("late", recording("late"));

    // Allowed, but each of these is reported; the 6th report within an hour is dropped.
    for _ in 0..5 {
        timers.set(&a, T0 - Usec::from_millis(100));
    }
    assert_eq!(
        timers.expiry_in_past_limit.test(T0),
        RateLimitState::Exceeded
    );

    source.set_now(T0.add_millis(1));
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired, ["late"]);

    ctx.timers.push(Some(a));
    teardown(timers, ctx);
}

#[test]
fn allow_negative_is_not_reported() {
    let (mut timers, _source) = subsystem();
    let a = timers.init("late", recording("late"));

    for _ in 0..10 {
        timers.set_with_flags(&a, T0 - Usec::from_millis(100), TimerFlags::ALLOW_NEGATIVE);
    }
    // Within the tolerance.
    timers.set(&a, T0 - Usec::from_millis(20));
    assert_eq!(timers.expiry_in_past_limit.test(T0), RateLimitState::Pass);

    timers.cancel(&a);
    timers.destroy(a);
}

#[test]
#[should_panic(expected = "destroyed while still active")]
fn destroy_active_timer() {
    let (mut timers, _source) = subsystem();
    let a = timers.init("leaky", recording("leaky"));
    timers.set(&a, T0.add_millis(10));
    timers.destroy(a);
}

#[test]
#[should_panic(expected = "must not be zero")]
fn zero_expiry() {
    let (mut timers, _source) = subsystem();
    let a = timers.init("zero", recording("zero"));
    timers.set(&a, Usec::ZERO);
}

#[test]
#[should_panic(expected = "1 active timer")]
fn drop_with_active_timer() {
    let (mut timers, _source) = subsystem();
    let a = timers.init("forgotten", recording("forgotten"));
    timers.set(&a, T0.add_millis(10));
    drop(timers);
}

#[test]
#[should_panic(expected = "does not belong to this timer subsystem")]
fn foreign_handle() {
    let (mut timers, _source) = subsystem();
    let (mut other, _other_source) = subsystem();
    let _a = timers.init("a", recording("a"));
    let _b = other.init("b", recording("b"));
    let c = other.init("c", recording("c"));
    timers.is_active(&c);
}

#[test]
fn flags_debug() {
    assert_eq!(format!("{:?}", TimerFlags::NONE), "NONE");
    assert_eq!(format!("{:?}", TimerFlags::ALLOW_NEGATIVE), "ALLOW_NEGATIVE");
    assert!(TimerFlags::ALLOW_NEGATIVE.contains(TimerFlags::NONE));
}

#[test]
fn real_timerfd() -> io::Result<()> {
    init_logger();
    let mut timers = TimerSubsystem::<Ctx>::new()?;
    let mut ctx = Ctx::default();
    assert!(timers.fd().is_some());
    assert!(!timers.is_ready()?);

    let a = timers.init("real", recording("real"));
    timers.set(&a, timers.now().add_millis(5));
    while !timers.is_ready()? {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    timers.dispatch(&mut ctx);
    assert_eq!(ctx.fired, ["real"]);
    assert!(!timers.is_ready()?);

    timers.destroy(a);
    Ok(())
}

#[cfg(any(feature = "tokio", feature = "async-io"))]
#[test]
fn dispatch_async() -> io::Result<()> {
    use crate::util::r#async::Runtime;

    init_logger();
    let rt = Runtime::new()?;

    let mut timers = TimerSubsystem::<Ctx>::new()?;
    let mut ctx = Ctx::default();
    let a = timers.init("async", recording("async"));
    timers.set(&a, timers.now().add_millis(10));

    rt.block_on(timers.dispatch_async(&mut ctx))?;
    assert_eq!(ctx.fired, ["async"]);

    timers.destroy(a);
    Ok(())
}

#[cfg(any(feature = "tokio", feature = "async-io"))]
#[test]
fn dispatch_async_without_fd() {
    use crate::util::r#async::Runtime;

    let (mut timers, _source) = subsystem();
    let rt = Runtime::new().unwrap();
    let err = rt
        .block_on(timers.dispatch_async(&mut Ctx::default()))
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Unsupported);
}
