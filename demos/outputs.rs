use std::{fs::OpenOptions, path::PathBuf};

use clap::Parser;
use kms_display::{
    commit::AtomicCommitFlags,
    device::DrmKmsDevice,
    display::{Display, DisplayOptions},
    probe::ProbeMode,
};

#[derive(Debug, Parser)]
#[command(about = "List the outputs and pipes of a drm device")]
struct Cli {
    /// Path of the drm node
    #[arg(default_value = "/dev/dri/card0")]
    device: PathBuf,
    /// Run a full detection cycle on every connector
    #[arg(long)]
    force_probe: bool,
    /// Do not use atomic modesetting
    #[arg(long)]
    legacy: bool,
    /// Ask the driver whether every connected output could be lit on its first valid pipe
    #[arg(long)]
    test_modeset: bool,
}

fn main() {
    let args = Cli::parse();

    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().init();
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.device)
        .expect("Failed to open drm node");
    let mut options = DisplayOptions::from_env();
    options.force_legacy |= args.legacy;
    let mut display =
        Display::with_options(DrmKmsDevice::new(file), options).expect("Failed to create display");

    if args.force_probe {
        for idx in 0..display.outputs().len() {
            if let Err(err) = display.refresh_output(idx, ProbeMode::Force) {
                println!("Failed to probe output {}: {}", idx, err);
            }
        }
    }

    println!(
        "atomic: {}, universal planes: {}",
        display.is_atomic(),
        display.has_universal_planes()
    );
    for pipe in display.pipes() {
        let kinds = pipe.planes().iter().map(|p| format!("{:?}", p.kind())).collect::<Vec<_>>();
        println!(
            "pipe {} (crtc {}): enabled {}, planes [{}]",
            pipe.id(),
            pipe.crtc(),
            pipe.is_enabled(),
            kinds.join(", ")
        );
    }
    for output in display.outputs() {
        let mode = output.mode().map(|m| m.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{}: valid {}, connected {}, pipes {:#b}, active {:?}, mode {}",
            output.name(),
            output.is_valid(),
            output.is_connected(),
            output.valid_pipes().bits(),
            output.active_pipe(),
            mode
        );
    }

    if args.test_modeset {
        let mut used = kms_display::pipe::PipeMask::empty();
        let assignments = display
            .connected_outputs()
            .filter_map(|(idx, output)| {
                let pipe = output.valid_pipes().iter().find(|pipe| !used.contains(*pipe))?;
                used.insert(pipe);
                Some((idx, pipe))
            })
            .collect::<Vec<_>>();
        for (idx, pipe) in assignments {
            display.output_mut(idx).unwrap().set_pipe(Some(pipe));
        }
        if !display.is_atomic() {
            println!("Legacy modesets cannot be tested without applying them");
            return;
        }
        match display.try_commit_atomic(AtomicCommitFlags::ALLOW_MODESET | AtomicCommitFlags::TEST_ONLY) {
            Ok(()) => println!("Modeset accepted"),
            Err(err) => println!("Modeset rejected: {}", err),
        }
    }
}
