use analog_backend_mock::{BackgroundBackend, ScriptedDevice, DEFAULT_ADDR};
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(33);
/// Keys wiggled by `--demo`; 0x04..=0x0d carry the default mapping.
const DEMO_KEYS: std::ops::RangeInclusive<u16> = 0x04..=0x0d;

fn parse_arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = std::env::args().collect();

    let addr = parse_arg_value(&args, "--addr")
        .or_else(|| std::env::var("KEYBIND_BACKEND_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let addr_file = parse_arg_value(&args, "--addr-file").map(PathBuf::from);
    let run_for_ms = parse_arg_value(&args, "--run-for-ms")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis);
    let demo = args.iter().any(|a| a == "--demo");

    let device = Arc::new(ScriptedDevice::new());
    let mut backend = match BackgroundBackend::start(&addr, Arc::clone(&device), TICK) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = &addr_file {
        let _ = fs::write(path, backend.listen_addr().to_string());
    }

    println!("mock_backend listening on ws://{}", backend.listen_addr());

    let mut rng = rand::thread_rng();
    let mut held: Option<(u16, f32)> = None;
    let start = Instant::now();
    loop {
        if demo {
            held = demo_step(&device, &mut rng, held);
        }
        thread::sleep(TICK);
        if let Some(max) = run_for_ms {
            if start.elapsed() >= max {
                break;
            }
        }
    }

    backend.shutdown();
}

/// Presses one random key at a time, ramping it down before picking the next.
fn demo_step(
    device: &ScriptedDevice,
    rng: &mut impl Rng,
    held: Option<(u16, f32)>,
) -> Option<(u16, f32)> {
    match held {
        Some((key, value)) if value > 0.05 => {
            let next = value * rng.gen_range(0.80..0.95);
            device.set_value(key, next);
            Some((key, next))
        }
        Some((key, _)) => {
            device.set_value(key, 0.0);
            None
        }
        None if rng.gen_bool(0.1) => {
            let key = rng.gen_range(DEMO_KEYS);
            let value = rng.gen_range(0.4..1.0);
            device.set_value(key, value);
            Some((key, value))
        }
        None => None,
    }
}
