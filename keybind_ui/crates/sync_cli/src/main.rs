use clap::{Parser, Subcommand};
use keybind_client::sync_core::capture::{CaptureState, CaptureStep};
use keybind_client::sync_core::notes::note_name;
use keybind_client::sync_core::protocol::{Channel, DeviceSnapshot, NoteNumber, NOTE_NUMBER_MAX};
use keybind_client::sync_core::settings::SettingsAction;
use keybind_client::sync_core::snapshot_diff::changed_keys;
use keybind_client::{logging, AppState, ClientConfig, Session};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

fn note_arg() -> clap::builder::RangedI64ValueParser<NoteNumber> {
    clap::value_parser!(u8).range(0..=i64::from(NOTE_NUMBER_MAX))
}

#[derive(Parser, Debug)]
#[command(name = "sync_cli")]
struct Args {
    /// Backend websocket url. Overrides KEYBIND_WS_URL.
    #[arg(long)]
    ws_url: Option<String>,

    /// MIDI channel the mapping commands act on.
    #[arg(long, default_value_t = 0)]
    channel: u8,

    /// Print note names with flats instead of sharps.
    #[arg(long, default_value_t = false)]
    flat: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream key changes and the active key.
    Monitor {
        /// Stop after this many milliseconds; runs until ctrl-c otherwise.
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Wait for a key press and bind it to NOTE.
    Bind {
        #[arg(long, value_parser = note_arg())]
        note: NoteNumber,
    },
    /// Remove every binding to NOTE on the channel.
    Unbind {
        #[arg(long, value_parser = note_arg())]
        note: NoteNumber,
    },
    /// Print the current mapping of the channel.
    Mapping,
    /// List MIDI output ports.
    Ports,
    SelectPort {
        #[arg(long)]
        index: usize,
    },
    /// List connected analog keyboards.
    Devices,
    /// Change note settings; omitted flags stay as they are.
    Set {
        #[arg(long, allow_hyphen_values = true)]
        shift: Option<i32>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        velocity_scale: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();
    let args = Args::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(raw) = args.ws_url.as_deref() {
        config.ws_url = url::Url::parse(raw.trim())
            .map_err(|e| anyhow::anyhow!("invalid --ws-url {raw:?}: {e}"))?;
    }
    let channel = Channel::new(args.channel)
        .ok_or_else(|| anyhow::anyhow!("--channel must be within 0..=15"))?;

    let state = AppState::start(&config);
    let session = Session::attach(&state, &config);
    session.set_channel(channel);

    if !session
        .wait_until(READY_TIMEOUT, |s| s.settings().is_some())
        .await
    {
        return Err(anyhow::anyhow!(
            "no settings from backend at {} (is it running?)",
            config.ws_url
        ));
    }
    eprintln!("connected to {}", config.ws_url);

    match args.command {
        Command::Monitor { duration_ms } => {
            monitor(&session, args.flat, duration_ms.map(Duration::from_millis)).await
        }
        Command::Bind { note } => {
            let step = session.begin_capture(note, 0u8);
            if !matches!(step, CaptureStep::Armed { .. }) {
                return Err(anyhow::anyhow!("capture did not start"));
            }
            eprintln!(
                "press a key for {} within {:?}",
                note_name(note, args.flat),
                config.capture_timeout
            );
            let before = session.settings();
            session
                .wait_until(config.capture_timeout + Duration::from_millis(500), |s| {
                    s.capture_state() == CaptureState::Idle
                })
                .await;
            if session.settings() == before {
                return Err(anyhow::anyhow!("capture ended without changing the mapping"));
            }
            wait_persisted(&session).await?;
            print_mapping(&session, channel, args.flat);
            Ok(())
        }
        Command::Unbind { note } => {
            session.begin_capture(note, 2u8);
            wait_persisted(&session).await?;
            print_mapping(&session, channel, args.flat);
            Ok(())
        }
        Command::Mapping => {
            print_mapping(&session, channel, args.flat);
            Ok(())
        }
        Command::Ports => {
            let ports = session.backend().get_port_options().await?;
            for p in ports {
                let mark = if p.selected { "*" } else { " " };
                println!("{mark} {:>2}  {}", p.index, p.label);
            }
            Ok(())
        }
        Command::SelectPort { index } => {
            session.select_port(index).await?;
            for p in session.port_options().iter().filter(|p| p.selected) {
                println!("selected {}: {}", p.index, p.label);
            }
            Ok(())
        }
        Command::Devices => {
            session.refresh_devices().await?;
            let devices = session.connected_devices();
            if devices.is_empty() {
                println!("no devices");
            }
            for d in devices {
                println!(
                    "{:04x}:{:04x}  {} {} ({:?})",
                    d.vendor_id, d.product_id, d.manufacturer_name, d.device_name, d.device_type
                );
            }
            Ok(())
        }
        Command::Set {
            shift,
            threshold,
            velocity_scale,
        } => {
            let actions = shift
                .map(SettingsAction::NoteShiftChanged)
                .into_iter()
                .chain(threshold.map(SettingsAction::ThresholdChanged))
                .chain(velocity_scale.map(SettingsAction::VelocityScaleChanged));
            for action in actions {
                session.dispatch_settings(action)?;
            }
            wait_persisted(&session).await?;
            if let Some(settings) = session.settings() {
                println!("{}", serde_json::to_string_pretty(&settings.note_config)?);
                println!("shift_amount: {}", settings.shift_amount);
            }
            Ok(())
        }
    }
}

async fn monitor(session: &Session, flat: bool, duration: Option<Duration>) -> anyhow::Result<()> {
    let mut changes = session.changes();
    let mut previous = DeviceSnapshot::default();
    let mut last_active = None;
    let run = async {
        loop {
            let current = session.midi_state();
            for change in changed_keys(&previous, &current) {
                println!(
                    "key {:#04x}: {} -> {}",
                    change.key,
                    fmt_value(change.old_value),
                    fmt_value(change.new_value)
                );
            }
            previous = current;

            let active = session.active_key().map(|a| a.key);
            if active != last_active {
                if let Some(active) = session.active_key() {
                    let notes: Vec<String> = active
                        .state
                        .notes
                        .iter()
                        .map(|n| note_name(n.note, flat))
                        .collect();
                    println!(
                        "active {:#04x} [{}] peak velocity {:.2}",
                        active.key,
                        notes.join(" "),
                        session.peak_velocity()
                    );
                }
                last_active = active;
            }

            if changes.changed().await.is_err() {
                return;
            }
        }
    };
    match duration {
        Some(d) => {
            let _ = tokio::time::timeout(d, run).await;
        }
        None => {
            tokio::select! {
                _ = run => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    }
    Ok(())
}

fn fmt_value(v: Option<f32>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

/// Edits are pushed to the backend in the background; poll until it agrees.
async fn wait_persisted(session: &Session) -> anyhow::Result<()> {
    let Some(local) = session.settings() else {
        return Err(anyhow::anyhow!("settings not loaded"));
    };
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    loop {
        let remote = session.backend().get_config().await?;
        if remote == *local {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow::anyhow!("backend did not store the new settings"));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn print_mapping(session: &Session, channel: Channel, flat: bool) {
    let Some(settings) = session.settings() else {
        return;
    };
    let mut bindings = settings.mapping(channel).cloned().unwrap_or_default();
    bindings.sort_by_key(|b| (b.note, b.key));
    println!("channel {channel}: {} binding(s)", bindings.len());
    for b in bindings {
        println!("  {:>4}  key {:#04x}", note_name(b.note, flat), b.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_argument_is_range_checked() {
        let args = Args::try_parse_from(["sync_cli", "bind", "--note", "127"]).unwrap();
        assert!(matches!(args.command, Command::Bind { note: 127 }));
        assert!(Args::try_parse_from(["sync_cli", "bind", "--note", "128"]).is_err());
        assert!(Args::try_parse_from(["sync_cli", "unbind", "--note", "200"]).is_err());
    }
}
