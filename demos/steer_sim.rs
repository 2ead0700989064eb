// software model of multi-queue steering: one polling thread per rx queue feeds frames
// through the dispatcher while a collaborator thread keeps rebinding queues to sockets.
// prints per-second counters until ctrl-c or --seconds elapses.

extern crate clap;
extern crate core_affinity;
extern crate ctrlc;
extern crate xsk_steer;

use {
    clap::Parser,
    std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
    xsk_steer::{
        set_cpu_affinity, Dispatcher, Frame, MissPolicy, QueueId, RedirectTable, SocketHandle,
        SteerConfig, XskRing,
    },
};

/// umem-style buffer handle: where the frame lives, not the bytes
#[derive(Debug)]
struct FrameBuf {
    offset: usize,
    len: u32,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "steering simulation", long_about = None)]
struct Opt {
    /// rx queues to simulate
    #[arg(long, default_value = "4")]
    queues: u32,

    /// AF_XDP-like sockets to spread the queues over
    #[arg(long, default_value = "2")]
    sockets: usize,

    #[arg(long, default_value = "1024")]
    ring_depth: usize,

    /// drop | pass
    #[arg(long, default_value = "drop")]
    miss: String,

    /// rebind period of the collaborator in milliseconds
    #[arg(long, default_value = "250")]
    rebind_ms: u64,

    #[arg(long, default_value = "5")]
    seconds: u64,

    /// pin polling threads to cores
    #[arg(long)]
    pin: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();

    let config = SteerConfig {
        capacity: opt.queues,
        miss_policy: opt.miss.parse::<MissPolicy>()?,
        ring_depth: opt.ring_depth,
        ..Default::default()
    };
    config.validate()?;

    let table = Arc::new(RedirectTable::with_capacity(config.capacity)?);
    let dispatcher = Arc::new(Dispatcher::<FrameBuf>::new(
        Arc::clone(&table),
        config.miss_policy,
    ));
    let exit = Arc::new(AtomicBool::new(false));
    {
        let exit = Arc::clone(&exit);
        ctrlc::set_handler(move || exit.store(true, Ordering::Relaxed))?;
    }

    // sockets and their consumers
    let received = Arc::new(AtomicUsize::new(0));
    let mut handles: Vec<SocketHandle> = Vec::with_capacity(opt.sockets);
    let mut threads = Vec::new();
    for _ in 0..opt.sockets.max(1) {
        let (producer, consumer) = XskRing::bounded::<FrameBuf>(config.ring_depth);
        handles.push(dispatcher.register(producer));
        let received = Arc::clone(&received);
        let exit = Arc::clone(&exit);
        threads.push(thread::spawn(move || {
            let mut bytes = 0usize;
            while !exit.load(Ordering::Relaxed) {
                if let Some(buf) = consumer.recv_timeout(Duration::from_millis(50)) {
                    debug_assert_eq!(buf.offset % 4096, 0);
                    bytes += buf.len as usize;
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
            bytes
        }));
    }

    // queues 0..n-1 start bound round-robin; the last queue stays unbound
    for q in 0..config.capacity.saturating_sub(1) {
        dispatcher.bind(QueueId(q), handles[q as usize % handles.len()])?;
    }

    let cores = core_affinity::get_core_ids().unwrap_or_default();
    let mut pollers = Vec::new();
    for q in 0..config.capacity {
        let dispatcher = Arc::clone(&dispatcher);
        let exit = Arc::clone(&exit);
        let cpu = cores.get(q as usize % cores.len().max(1)).map(|c| c.id);
        let pin = opt.pin;
        pollers.push(thread::spawn(move || {
            if let (true, Some(cpu)) = (pin, cpu) {
                if let Err(e) = set_cpu_affinity([cpu]) {
                    eprintln!("queue {q}: pinning to cpu {cpu} failed: {e}");
                }
            }
            let mut offset = 0usize;
            while !exit.load(Ordering::Relaxed) {
                let frame = Frame::new(q, FrameBuf { offset, len: 1500 });
                let _ = dispatcher.dispatch(frame);
                offset = offset.wrapping_add(4096);
            }
        }));
    }

    // collaborator: rotate bindings, occasionally leaving a queue unbound
    let collaborator = {
        let dispatcher = Arc::clone(&dispatcher);
        let exit = Arc::clone(&exit);
        let handles = handles.clone();
        let capacity = config.capacity;
        let period = Duration::from_millis(opt.rebind_ms.max(1));
        thread::spawn(move || {
            let mut round = 0usize;
            while !exit.load(Ordering::Relaxed) {
                thread::sleep(period);
                let queue = QueueId((round % capacity as usize) as u32);
                if round % 3 == 2 {
                    let _ = dispatcher.unbind(queue);
                } else {
                    let handle = handles[round % handles.len()];
                    let _ = dispatcher.bind(queue, handle);
                }
                round += 1;
            }
        })
    };

    let started = Instant::now();
    let mut last = dispatcher.stats().snapshot();
    while !exit.load(Ordering::Relaxed) && started.elapsed() < Duration::from_secs(opt.seconds) {
        thread::sleep(Duration::from_secs(1));
        let now = dispatcher.stats().snapshot();
        println!(
            "frames {:>10}/s  redirected {:>10}/s  unmapped {:>8}/s  unavailable {:>8}/s  passed {:>8}/s  bound {}",
            now.frames - last.frames,
            now.redirected - last.redirected,
            now.dropped_unmapped - last.dropped_unmapped,
            now.dropped_unavailable - last.dropped_unavailable,
            now.passed - last.passed,
            table.len(),
        );
        last = now;
    }
    exit.store(true, Ordering::Relaxed);

    for p in pollers {
        let _ = p.join();
    }
    let _ = collaborator.join();
    let mut bytes = 0usize;
    for t in threads {
        bytes += t.join().unwrap_or(0);
    }

    let total = dispatcher.stats().snapshot();
    println!(
        "total: {} frames, {} redirected, {} dropped, {} passed, {} received ({} bytes)",
        total.frames,
        total.redirected,
        total.dropped(),
        total.passed,
        received.load(Ordering::Relaxed),
        bytes,
    );
    Ok(())
}
