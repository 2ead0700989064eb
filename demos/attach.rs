// attach the steering classifier to an interface and hold it until ctrl-c.
// sockets are bound by whichever process owns them; this only manages the hook.
//
//   cargo build --release --manifest-path xdp-ebpf/Cargo.toml --target bpfel-unknown-none -Z build-std=core
//   sudo -E cargo run --example attach -- -i eth0 --object xdp-ebpf/target/bpfel-unknown-none/release/xdp-redirect

extern crate clap;
extern crate ctrlc;
extern crate xsk_steer;

use {
    clap::Parser,
    std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    },
    xsk_steer::{
        program::{if_index, raise_capabilities},
        AttachMode, MissPolicy, QueueId, RedirectProgram, SteerConfig,
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about = "attach xdp queue steering", long_about = None)]
struct Opt {
    #[arg(short, long, default_value = "lo")]
    interface: String,

    /// compiled xdp-redirect object
    #[arg(long)]
    object: PathBuf,

    /// drop | pass
    #[arg(long, default_value = "drop")]
    miss: String,

    /// auto | native | generic
    #[arg(long, default_value = "auto")]
    mode: String,

    /// queues to unbind after attaching (stale entries from a pinned map)
    #[arg(long, value_delimiter = ',')]
    unbind: Vec<u32>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();

    let config = SteerConfig {
        interface: opt.interface,
        miss_policy: opt.miss.parse::<MissPolicy>()?,
        attach_mode: opt.mode.parse::<AttachMode>()?,
        ..Default::default()
    };
    config.validate()?;

    if let Err(e) = raise_capabilities() {
        eprintln!("{e}");
        eprintln!("run with: sudo -E cargo run --example attach -- <args>");
        std::process::exit(1);
    }

    let if_index = if_index(&config.interface)?;
    let mut program = RedirectProgram::load_file(&opt.object, &config.program_options())?;
    program.attach(if_index)?;

    for queue in opt.unbind {
        let removed = program.delete(QueueId(queue))?;
        println!("queue {queue}: {}", if removed { "unbound" } else { "was not bound" });
    }

    println!(
        "steering {} queues on {} (if_index {if_index}), miss policy {}, mode {}",
        program.capacity(),
        config.interface,
        config.miss_policy,
        config.attach_mode,
    );

    let exit = Arc::new(AtomicBool::new(false));
    {
        let exit = Arc::clone(&exit);
        ctrlc::set_handler(move || exit.store(true, Ordering::Relaxed))?;
    }
    while !exit.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }

    program.detach()?;
    println!("detached from {}", config.interface);
    Ok(())
}
