//! # Linear actuator console
//!
//! ## Modes
//! - **tui** (default): full-screen control session.
//! - **home:** send a single home command and exit.
//! - **run [speed]:** home, wait, run at `speed` (default `speed_high`), wait, exit.
//! - **interactive:** `cmd> ` prompt; each line goes to the controller verbatim.
//!
//! `--config <path>` loads a TOML config; otherwise built-in defaults apply.
//! Logging goes to `<log_dir>/actuator_control.log` in tui mode (the screen is
//! taken) and to stderr otherwise. Filter with `RUST_LOG`.

use std::{
    fs::{OpenOptions, create_dir_all},
    io::{BufRead, Write, stdin, stdout},
    path::{Path, PathBuf},
    process::ExitCode,
    thread,
    time::Duration,
};
use env_logger::{Env, Target};
use log::{error, info};

use actuator_control::{
    AppError, Config,
    actuator::link::{ActuatorCommand, ActuatorLink},
    config::MAX_SPEED,
    session::{
        control::ControlSession, rig::Rig, state::StatusKind, terminal::CrosstermTerminal,
    },
};

const LOG_FILE: &str = "actuator_control.log";
const RUN_HOMING_WAIT: Duration = Duration::from_secs(3);
const RUN_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Tui,
    Home,
    Run(Option<u32>),
    Interactive,
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    mode: Mode,
    config: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation, AppError> {
    let mut mode = None;
    let mut config = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| AppError::Usage("--config needs a path".into()))?;
                config = Some(PathBuf::from(path));
            }
            "tui" | "--tui" if mode.is_none() => mode = Some(Mode::Tui),
            "home" | "--home" if mode.is_none() => mode = Some(Mode::Home),
            "interactive" | "--interactive" if mode.is_none() => mode = Some(Mode::Interactive),
            "run" | "--run" if mode.is_none() => mode = Some(Mode::Run(None)),
            value if matches!(mode, Some(Mode::Run(None))) => {
                let speed = value
                    .parse::<u32>()
                    .map_err(|_| AppError::Usage(format!("invalid speed {:?}", value)))?;
                if speed > MAX_SPEED {
                    return Err(AppError::Usage(format!("speed must be 0-{}", MAX_SPEED)));
                }
                mode = Some(Mode::Run(Some(speed)));
            }
            other => return Err(AppError::Usage(format!("unexpected argument {:?}", other))),
        }
    }

    Ok(Invocation {
        mode: mode.unwrap_or(Mode::Tui),
        config,
    })
}

fn init_logging(mode: &Mode, log_dir: &Path) -> Result<(), AppError> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if *mode == Mode::Tui {
        create_dir_all(log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn open_link(config: &Config) -> Result<ActuatorLink, AppError> {
    println!("Connecting to {} @ {}...", config.serial_port, config.baud_rate);
    Ok(ActuatorLink::open(
        &config.serial_port,
        config.baud_rate,
        config.settle_delay(),
        config.reset_delay(),
    )?)
}

fn run_tui(config: &Config) -> Result<(), AppError> {
    let (rig, notes) = Rig::connect(config);
    let terminal = CrosstermTerminal::new()?;
    let mut session = ControlSession::new(config, rig, terminal);

    let failures: Vec<&str> = notes
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(text, _)| text.as_str())
        .collect();
    if failures.is_empty() {
        session.set_status("Ready", StatusKind::Ok);
    } else {
        session.set_status(failures.join(" | "), StatusKind::Error);
    }

    session.run()?;
    Ok(())
}

fn run_home(config: &Config) -> Result<(), AppError> {
    let mut link = open_link(config)?;
    link.send(ActuatorCommand::Home)?;
    println!("Home sent");
    link.close();
    Ok(())
}

fn run_speed(config: &Config, speed: u32) -> Result<(), AppError> {
    let mut link = open_link(config)?;
    link.send(ActuatorCommand::Home)?;
    thread::sleep(RUN_HOMING_WAIT);
    link.send(ActuatorCommand::Run(speed))?;
    println!("Running at {}", speed);
    thread::sleep(RUN_DURATION);
    link.close();
    Ok(())
}

fn run_interactive(config: &Config) -> Result<(), AppError> {
    let mut link = open_link(config)?;
    println!("Commands: h (home), r <speed> (run), s (stop), exit");

    let mut lines = stdin().lock().lines();
    loop {
        print!("cmd> ");
        stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let command = line.trim();
        match command {
            "" => continue,
            "exit" | "quit" => break,
            _ => {
                if let Err(e) = link.send_raw(command) {
                    eprintln!("error: {}", e);
                    if !link.is_connected() {
                        break;
                    }
                }
            }
        }
    }

    link.close();
    Ok(())
}

fn run(invocation: Invocation) -> Result<(), AppError> {
    let config = match &invocation.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    init_logging(&invocation.mode, Path::new(&config.log_dir))?;
    info!("=== ACTUATOR CONTROL START ({:?}) ===", invocation.mode);

    let result = match invocation.mode {
        Mode::Tui => run_tui(&config),
        Mode::Home => run_home(&config),
        Mode::Run(speed) => run_speed(&config, speed.unwrap_or(config.speed_high)),
        Mode::Interactive => run_interactive(&config),
    };

    match &result {
        Ok(()) => info!("=== ACTUATOR CONTROL FINISHED ==="),
        Err(e) => error!("{}", e),
    }
    result
}

fn main() -> ExitCode {
    let invocation = match parse_args(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("usage: actuator_control [tui | home | run [speed] | interactive] [--config <path>]");
            return ExitCode::from(2);
        }
    };

    match run(invocation) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, AppError> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_means_tui_with_defaults() {
        let inv = parse(&[]).unwrap();
        assert_eq!(inv.mode, Mode::Tui);
        assert_eq!(inv.config, None);
    }

    #[test]
    fn run_takes_an_optional_speed() {
        assert_eq!(parse(&["run"]).unwrap().mode, Mode::Run(None));
        assert_eq!(parse(&["--run", "800"]).unwrap().mode, Mode::Run(Some(800)));
        assert!(matches!(parse(&["run", "16000"]), Err(AppError::Usage(_))));
        assert!(matches!(parse(&["run", "fast"]), Err(AppError::Usage(_))));
    }

    #[test]
    fn config_path_combines_with_any_mode() {
        let inv = parse(&["--config", "rig.toml", "interactive"]).unwrap();
        assert_eq!(inv.mode, Mode::Interactive);
        assert_eq!(inv.config, Some(PathBuf::from("rig.toml")));
        assert!(matches!(parse(&["home", "--config"]), Err(AppError::Usage(_))));
    }

    #[test]
    fn second_mode_is_rejected() {
        assert!(matches!(parse(&["home", "interactive"]), Err(AppError::Usage(_))));
    }
}
