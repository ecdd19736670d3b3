use std::{path::PathBuf, time::Duration};

use clap::Parser;
use harvestar_console::{
    config::DEFAULT_BASE_URL,
    dispatcher::DispatchState,
    replay::{LoggedEvent, ReplayError, SEQUENCES},
    simulator::SimulatedArm,
    trail, ArmTransport, ConfigBuilder, Console, ConsoleConfig, HttpArm,
};
use harvestar_geom::{Axis, Pose};
use harvestar_protocol::TelemetryEvent;
use indicatif::ProgressBar;
use reedline::{DefaultPrompt, DefaultPromptSegment, Prompt, Reedline};

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
struct Args {
    /// Where the arm's backend is listening.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    url: String,

    /// Drive an in-memory arm instead of talking to a backend.
    #[arg(long)]
    simulate: bool,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    #[arg(long, default_value_t = 10)]
    history_len: usize,

    #[arg(long, default_value_t = 3000)]
    history_age_ms: u64,

    /// Keep an SVG of the replay trail up to date at this path.
    #[arg(long)]
    trail_svg: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> ConsoleConfig {
        ConfigBuilder::default()
            .with_base_url(&self.url)
            .with_request_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(self.max_retries)
            .with_backoff(Duration::from_millis(self.backoff_ms))
            .with_poll_interval(Duration::from_millis(self.poll_ms))
            .with_history_len(self.history_len)
            .with_history_age(Duration::from_millis(self.history_age_ms))
            .build()
    }
}

#[derive(Debug)]
enum Error {
    Exit,
    Err(anyhow::Error),
}

impl<E> From<E> for Error
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Error::Err(e.into())
    }
}

type Result<T> = std::result::Result<T, Error>;

async fn wait_until_ready<T: ArmTransport>(console: &Console<T>) {
    let bar = ProgressBar::new_spinner().with_message("Waiting for the arm...");
    bar.enable_steady_tick(TICK);
    loop {
        match console.check_ready().await {
            Ok(()) => break,
            Err(e) => {
                bar.set_message(format!("Waiting for the arm... ({e})"));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    bar.finish_with_message("ready!");
}

async fn send_target<T: ArmTransport>(console: &Console<T>) {
    let bar = ProgressBar::new_spinner().with_message("Sending command...");
    bar.enable_steady_tick(TICK);

    let mut state = console.dispatcher().subscribe();
    let send = console.send_target();
    tokio::pin!(send);
    let result = loop {
        tokio::select! {
            res = &mut send => break res,
            Ok(()) = state.changed() => {
                if let DispatchState::Retrying { attempt } = &*state.borrow_and_update() {
                    bar.set_message(format!("Connection error, retrying (attempt {attempt})..."));
                }
            }
        }
    };

    match result {
        Ok(r) => bar.finish_with_message(r.to_string()),
        Err(e) => bar.abandon_with_message(e.to_string()),
    }
}

fn describe(e: &LoggedEvent) -> String {
    let what = match &e.event {
        TelemetryEvent::Position { data } => format!("position {data:?}"),
        TelemetryEvent::Other => "(unrecognized message)".to_owned(),
        ev => {
            let kind = match ev {
                TelemetryEvent::Bounds { .. } => "bounds",
                TelemetryEvent::Done { .. } => "done",
                _ => "error",
            };
            format!("{kind}: {}", ev.message().unwrap_or(""))
        }
    };
    format!("[{:>7.2}s] {what}", e.elapsed.as_secs_f64())
}

/// Prints replay telemetry as it arrives, until the replay ends or the
/// operator hits ctrl-c. Detaching leaves the replay running.
async fn follow_replay<T: ArmTransport>(console: &Console<T>, args: &Args) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(TICK);
    let mut rx = console.replay().subscribe();
    let mut printed = 0;

    loop {
        let snap = rx.borrow_and_update().clone();
        if snap.log.len() < printed {
            printed = 0;
        }
        for e in &snap.log[printed..] {
            bar.println(describe(e));
        }
        printed = snap.log.len();
        bar.set_message(snap.status.clone());

        if let Some(path) = &args.trail_svg {
            trail::write_trail(path, &snap.history, snap.live.as_ref())?;
        }
        if !snap.state.is_active() {
            match snap.error {
                Some(e) => bar.abandon_with_message(format!("{}: {e}", snap.status)),
                None => bar.finish_with_message(snap.status),
            }
            return Ok(());
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                bar.abandon_with_message("detached, the replay is still running (`stop` to stop)");
                return Ok(());
            }
        }
    }
}

fn show<T: ArmTransport>(console: &Console<T>) {
    let Pose { x, y, z, effector } = console.target();
    eprintln!("target: x={x} y={y} z={z} effector={effector}");
    match console.dispatcher().state() {
        DispatchState::Finished(r) => eprintln!("last command: {r}"),
        s => eprintln!("last command: {s:?}"),
    }

    let snap = console.replay().snapshot();
    eprintln!("replay: {:?}, {}", snap.state, snap.status);
    if let Some(e) = &snap.error {
        eprintln!("  error: {e}");
    }
    if let Some(live) = &snap.live {
        eprintln!("  live: x={} y={} z={}", live.x, live.y, live.z);
    }
    eprintln!(
        "  {} events logged, {} points in the trail",
        snap.log.len(),
        snap.history.len()
    );
}

fn string_prompt(s: &str) -> DefaultPrompt {
    DefaultPrompt::new(
        DefaultPromptSegment::Basic(s.to_owned()),
        DefaultPromptSegment::Empty,
    )
}

fn read_cmd(reed: &mut Reedline, prompt: &dyn Prompt) -> Result<String> {
    let s = reed.read_line(prompt)?;
    match s {
        reedline::Signal::Success(s) => Ok(s),
        reedline::Signal::CtrlC | reedline::Signal::CtrlD => Err(Error::Exit),
    }
}

fn parse_value(s: &str) -> Option<f64> {
    // Validation happens on send; here we only need something float-shaped.
    s.trim().parse().ok()
}

async fn command_mode<T: ArmTransport>(console: &Console<T>, args: &Args) -> Result<()> {
    let mut reed = Reedline::create();
    let prompt = string_prompt("harvestar");
    loop {
        let line = read_cmd(&mut reed, &prompt)?;
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => {}
            ["quit"] => break,
            ["move"] => {
                for axis in Axis::ALL {
                    let current = console.target().get(axis);
                    let axis_prompt = string_prompt(&format!("{} [{current}]? ", axis.name()));
                    let s = read_cmd(&mut reed, &axis_prompt)?;
                    if s.trim().is_empty() {
                        continue;
                    }
                    match parse_value(&s) {
                        Some(v) => {
                            console.edit(axis, v);
                        }
                        None => eprintln!("error: expected a number, keeping {current}"),
                    }
                }
                send_target(console).await;
            }
            ["set", axis, value] => match (axis.parse::<Axis>(), parse_value(value)) {
                (Ok(axis), Some(v)) => {
                    let t = console.edit(axis, v);
                    eprintln!("target: {t:?}");
                }
                (Err(e), _) => eprintln!("error: {e}"),
                (_, None) => eprintln!("error: expected a number"),
            },
            ["send"] => send_target(console).await,
            ["show"] => show(console),
            ["list"] => {
                for s in SEQUENCES {
                    eprintln!("{}: {}", s.id, s.name);
                }
            }
            ["replay", index] => {
                let Ok(index) = index.parse::<u32>() else {
                    eprintln!("error: expected a sequence number");
                    continue;
                };
                match console.replay().start(Some(index)).await {
                    Ok(()) => follow_replay(console, args).await?,
                    Err(ReplayError::AlreadyRunning) => {
                        eprintln!("a replay is already running, following it");
                        follow_replay(console, args).await?;
                    }
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            ["replay"] => match console.replay().start(None).await {
                Ok(()) => follow_replay(console, args).await?,
                Err(e) => eprintln!("error: {e} (try `list`)"),
            },
            ["follow"] => follow_replay(console, args).await?,
            ["clear"] => console.replay().clear(),
            ["stop"] => {
                console.replay().stop();
                eprintln!("stopped following the replay");
            }
            _ => eprintln!(
                "commands: move, set <x|y|z|effector> <value>, send, show, list, \
                 replay <n>, follow, clear, stop, quit"
            ),
        }
    }

    Ok(())
}

async fn run<T: ArmTransport>(transport: T, args: &Args) -> Result<()> {
    let console = Console::new(transport, &args.config());
    wait_until_ready(&console).await;
    command_mode(&console, args).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let res = if args.simulate {
        eprintln!("using a simulated arm");
        run(SimulatedArm::new(), &args).await
    } else {
        let config = args.config();
        run(HttpArm::new(&config.base_url, config.request_timeout)?, &args).await
    };

    match res {
        Err(Error::Err(e)) => Err(e),
        _ => {
            eprintln!("exiting...");
            Ok(())
        }
    }
}
