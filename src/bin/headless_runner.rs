use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use raster8::machine::{Machine, MachineConfig};
use raster8::runner::{DeliveryPolicy, EmulatorThread, RunnerOptions};

#[derive(Debug, Clone)]
struct Config {
    rom: PathBuf,
    seconds: u64,
    policy: DeliveryPolicy,
    want_video: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rom: PathBuf::new(),
            seconds: 10,
            policy: DeliveryPolicy::Overwrite,
            want_video: true,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rom" => {
                let value = args
                    .next()
                    .context("--rom requires a path, e.g. --rom games/smb.nes")?;
                cfg.rom = PathBuf::from(value);
            }
            "--seconds" => {
                let value = args.next().context("--seconds requires a number")?;
                cfg.seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value: {value}"))?;
            }
            "--policy" => {
                let value = args.next().context("--policy requires overwrite|wait")?;
                cfg.policy = match value.as_str() {
                    "overwrite" => DeliveryPolicy::Overwrite,
                    "wait" => DeliveryPolicy::WaitForConsume,
                    other => bail!("unknown delivery policy: {other}"),
                };
            }
            "--no-video" => cfg.want_video = false,
            other => bail!("unknown argument: {other}"),
        }
    }

    if cfg.rom.as_os_str().is_empty() {
        bail!("usage: raster8_headless --rom <path> [--seconds N] [--policy overwrite|wait] [--no-video]");
    }
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::init();
    let cfg = parse_args()?;

    let mut machine = Machine::new(MachineConfig::default());
    let info = machine
        .load_path(&cfg.rom)
        .with_context(|| format!("loading {}", cfg.rom.display()))?;
    machine.set_power(true);

    println!(
        "running {} for {}s: {} (mapper {}), {:?}, {:?} delivery",
        info.name, cfg.seconds, info.board, info.mapper_id, info.region, cfg.policy
    );

    let samples_per_frame = machine.samples_per_frame();
    let options = RunnerOptions {
        policy: cfg.policy,
        target_fps: None,
        want_video: cfg.want_video,
    };
    let (emulator, frames) = EmulatorThread::spawn(machine, options);

    let start = Instant::now();
    let deadline = start + Duration::from_secs(cfg.seconds);
    let mut consumed: u64 = 0;
    let mut audio_samples: u64 = 0;
    let mut audio_off_by_more_than_one: u64 = 0;

    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(bundle) = frames.take_timeout(remaining.min(Duration::from_millis(100))) else {
            if frames.is_disconnected() {
                bail!("emulator thread exited early");
            }
            continue;
        };

        consumed += 1;
        audio_samples += bundle.audio.len() as u64;
        if bundle.audio.len().abs_diff(samples_per_frame) > 1 {
            audio_off_by_more_than_one += 1;
        }
    }

    let stats = emulator.stats();
    let wall = start.elapsed().as_secs_f64();
    drop(emulator);

    println!(
        "emulated {} frames in {:.2}s ({:.2} fps), consumed {}, dropped {}",
        stats.emulated_frames,
        wall,
        stats.emulated_frames as f64 / wall,
        consumed,
        stats.dropped_frames
    );
    println!(
        "audio: {} samples total, {} frames deviated more than one sample from {}",
        audio_samples, audio_off_by_more_than_one, samples_per_frame
    );

    Ok(())
}
