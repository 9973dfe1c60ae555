use clap::{App, Arg};
use colored::*;
use lablogger::components::balance::REQUEST_WEIGHT;
use lablogger::components::{Balance, RateSink, Stirrer};
use lablogger::display::LineDisplay;
use lablogger::reader::ProtocolReader;
use lablogger::sim::{ConsoleBackend, LoopbackSerial, SystemClock};
use lablogger::{Controller, ControllerConfig, MemoryStorage};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;
use tracing::{info, warn};

const DEFAULT_TICK_MS: &str = "50";
const STORAGE_SIZE: usize = 512;

/// Produces balance frames in answer to weigh requests.
struct SimulatedBalance {
    port: LoopbackSerial,
    weight: f64,
    drift: f64,
    unstable_every: u32,
    answered: u32,
}

impl SimulatedBalance {
    fn new(port: LoopbackSerial, unstable_every: u32) -> Self {
        Self {
            port,
            weight: 100.0,
            drift: 0.013,
            unstable_every,
            answered: 0,
        }
    }

    fn service(&mut self) {
        let written = self.port.written();
        if written.is_empty() {
            return;
        }
        self.port.clear_written();
        let requests = written.windows(REQUEST_WEIGHT.len()).filter(|w| *w == REQUEST_WEIGHT).count();
        for _ in 0..requests {
            self.answered += 1;
            self.weight += self.drift;
            if self.weight > 100.5 || self.weight < 99.5 {
                self.drift = -self.drift;
            }
            let flag = if self.unstable_every > 0 && self.answered % self.unstable_every == 0 {
                'D'
            } else {
                'S'
            };
            let frame = format!("S {flag} {:>10.2} g\r\n", self.weight);
            self.port.feed(frame.as_bytes());
        }
    }
}

struct PrintingSink;

impl RateSink for PrintingSink {
    fn set_rate(&mut self, rpm: u32) {
        println!("{} {rpm} rpm", "[stirrer]".magenta().bold());
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("lablogger-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Host simulator for the lab logger controller loop")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Controller configuration (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("tick")
                .short("t")
                .long("tick-ms")
                .value_name("MS")
                .help("Controller tick interval")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "tick must be a number".into())),
        )
        .arg(
            Arg::with_name("unstable")
                .short("u")
                .long("unstable-every")
                .value_name("N")
                .help("Every Nth simulated reading is unstable (0 = never)")
                .takes_value(true)
                .default_value("5"),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => ControllerConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ControllerConfig::default(),
    };
    let tick_ms: u64 = matches.value_of("tick").unwrap_or(DEFAULT_TICK_MS).parse()?;
    let unstable_every: u32 = matches.value_of("unstable").unwrap_or("0").parse()?;

    println!("{}", "Lab Logger Simulator".bold());
    println!("identity: {}  version: {}", config.identity.cyan(), config.version);
    println!("type commands such as `data-log on`, `log-period 10s`, `speed 300 rpm`");

    let serial = LoopbackSerial::new();
    let mut instrument = SimulatedBalance::new(serial.clone(), unstable_every);
    let display = LineDisplay::new(4, 20, config.display_notice_ms);

    let mut controller = Controller::new(
        config,
        SystemClock::new(),
        MemoryStorage::new(STORAGE_SIZE),
        ConsoleBackend,
        display,
    );
    controller.add(ProtocolReader::new(
        Balance::new("balance", "g"),
        serial,
        Balance::reader_config(),
    ))?;
    controller.add(Stirrer::new("stirrer", PrintingSink, 1500))?;
    controller.init()?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut interval = time::interval(Duration::from_millis(tick_ms));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                controller.tick();
                instrument.service();
                if controller.take_restart_request() {
                    info!("restart requested, exiting");
                    break;
                }
            }
            line = stdin.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        let code = controller.receive_command(&line);
                        let label = if code < 0 { code.to_string().red() } else { code.to_string().green() };
                        println!("{} {} {}", "=>".bold(), label, controller.command().message());
                        for n in 1..=4 {
                            if let Some(text) = controller.display().line(n) {
                                println!("   | {text}");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        }
    }

    println!("{}", controller.state_info().dimmed());
    Ok(())
}
