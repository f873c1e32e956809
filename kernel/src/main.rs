//! Standalone demo driving the thread subsystem through a short scenario:
//! create a process and two threads, have one wait on the other's exit
//! signal, then kill the target and watch the waiter wake up.
//!
//! Grounded on the teacher's own demo binaries, which wire up `env_logger`
//! and then exercise a handful of kernel entry points directly rather than
//! going through a real transport.

use kernel::config::ServerConfig;
use kernel::context::CpuType;
use kernel::ke::wait::{SelectRequest, WaitFlags, WakeDeliveryResult};
use kernel::ps::lifecycle::{self, Engine};

/// A `WaitChannel` that just logs what it would have sent over the wire.
struct ConsoleChannel {
    label: &'static str,
}

impl kernel::ke::wait::WaitChannel for ConsoleChannel {
    fn send_wakeup(&mut self, cookie: u64, status: u32) -> WakeDeliveryResult {
        log::info!("[{}] wake: cookie={cookie:#x} status={status:#x}", self.label);
        WakeDeliveryResult::Ok
    }
}

fn main() {
    env_logger::init();

    let mut engine = Engine::new(ServerConfig::default());

    let process = engine.processes.insert(0xF, engine.now);
    let waiter = lifecycle::create_thread(&mut engine, process, 0xF).expect("create waiter");
    let target = lifecycle::create_thread(&mut engine, process, 0xF).expect("create target");

    lifecycle::init_thread(
        &mut engine,
        waiter,
        0x7000_0000,
        0x0040_1000,
        CpuType::X86_64,
        4242,
        1,
        0,
        Box::new(ConsoleChannel { label: "waiter" }),
    )
    .expect("init waiter");
    lifecycle::init_thread(
        &mut engine,
        target,
        0x7000_1000,
        0x0040_2000,
        CpuType::X86_64,
        4242,
        2,
        0,
        Box::new(ConsoleChannel { label: "target" }),
    )
    .expect("init target");

    let exit_handle: kernel::ke::object::ObjectRef = {
        let record = engine.threads.get(target).expect("target exists");
        record.exit_signal.clone()
    };

    let outcome = kernel::ke::wait::select(
        &mut engine.threads,
        &mut engine.timers,
        &mut engine.seq,
        engine.now,
        SelectRequest {
            thread: waiter,
            cookie: 0xCAFE,
            handles: vec![exit_handle],
            flags: WaitFlags::empty(),
            timeout_raw: kernel::ke::wait::RAW_TIMEOUT_INFINITE,
            signal: None,
        },
    )
    .expect("select succeeds");

    log::info!("waiter parked: {outcome:?}");

    engine.advance_clock(10);
    lifecycle::kill_thread(&mut engine, target, 0x42).expect("kill target");

    let (entries, stats) = lifecycle::snapshot(&mut engine);
    log::info!(
        "snapshot: {} live threads, table high water mark {}",
        entries.len(),
        stats.high_water_mark
    );
    for entry in entries {
        engine.threads.release(entry.id);
    }

    lifecycle::cleanup_thread(&mut engine, target).expect("cleanup target");
    lifecycle::cleanup_thread(&mut engine, waiter).expect("cleanup waiter");
}
