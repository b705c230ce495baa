// src/main.rs  -  roboid entry point: diagnostics and demo programs
use anyhow::Result;
use clap::Parser;
use roboid::config::{AppConfig, Cli, DemoProgram, DEFAULT_CONFIG_TOML};
use roboid::connector::{ConnectionResult, Connector, PACKET_DELIMITER, VALID_PACKET_LENGTH};
use roboid::hamster::{self, Hamster, LedColor, LineTracerMode};
use roboid::serial::{self, BAUD_BRIDGE};
use roboid::{Runner, Wheeled};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    // ── --print-config  ───────────────────────────────────────────────────────
    if cli.print_config {
        print!("{}", DEFAULT_CONFIG_TOML);
        return Ok(());
    }

    // ── --write-config  ───────────────────────────────────────────────────────
    if cli.write_config {
        let path = AppConfig::write_default_config(&cli)?;
        println!("Config written to: {}", path.display());
        println!("Edit it to set the bridge port, tempo, etc.");
        return Ok(());
    }

    // ── --list-ports  ─────────────────────────────────────────────────────────
    if cli.list_ports {
        let ports = serial::list_ports();
        if ports.is_empty() {
            println!("No serial ports found.");
        } else {
            println!("Available serial ports:");
            for p in &ports {
                println!("  {p}");
            }
        }
        return Ok(());
    }

    // ── Load config ───────────────────────────────────────────────────────────
    let cfg = AppConfig::load(&cli)?;
    let port = if cfg.port.is_empty() { None } else { Some(cfg.port.as_str()) };

    // ── --check-bridge  ───────────────────────────────────────────────────────
    if cli.check_bridge {
        return check_bridge(port);
    }

    // ── Runner + Ctrl-C  ──────────────────────────────────────────────────────
    let runner = Runner::new();
    {
        let runner = runner.clone();
        ctrlc::set_handler(move || {
            log::info!("[main] Ctrl-C: disposing all robots");
            runner.dispose_all();
            std::process::exit(1);
        })?;
    }

    // ── Attach the robot ──────────────────────────────────────────────────────
    let hamster = Hamster::create_port(&runner, port)?;
    runner.wait_until_ready();
    hamster.tempo(cfg.tempo);
    println!("Connected to {} #{}", hamster.name(), hamster.index());

    match cfg.demo {
        DemoProgram::Square => demo_square(&hamster),
        DemoProgram::Follow => demo_follow(&runner, &hamster),
        DemoProgram::Scale => demo_scale(&hamster),
    }

    runner.dispose_all();
    println!("Done.");
    Ok(())
}

/// Probe one port (or all of them) for a bridge with a paired Hamster.
fn check_bridge(port: Option<&str>) -> Result<()> {
    let mut connector = Connector::new(
        "hamster",
        0,
        VALID_PACKET_LENGTH,
        PACKET_DELIMITER,
        hamster::check_connection,
    );
    match connector.open(port, BAUD_BRIDGE) {
        ConnectionResult::Found => {
            println!(
                "Bridge OK on {}  (robot address {})",
                connector.port_name(),
                connector.address()
            );
            Ok(())
        }
        ConnectionResult::NotConnected => {
            println!(
                "Bridge found on {} but no robot is paired.  Switch the robot on.",
                connector.port_name()
            );
            std::process::exit(1);
        }
        ConnectionResult::NotAvailable => {
            println!("No USB to BLE bridge found.  Run `roboid --list-ports` to see all ports.");
            std::process::exit(1);
        }
    }
}

/// One square on the board grid: four cells, four left turns.
fn demo_square(hamster: &Hamster) {
    hamster.leds(LedColor::Blue, LedColor::Blue);
    for _ in 0..4 {
        hamster.board_forward();
        hamster.board_left();
    }
    hamster.leds(LedColor::Green, LedColor::Green);
    hamster.stop();
}

/// Follow a black line on both sensors for ten seconds.
fn demo_follow(runner: &Runner, hamster: &Hamster) {
    hamster.line_tracer_speed(5.0);
    hamster.line_tracer_mode(LineTracerMode::BlackBothSensors);
    runner.wait(10_000);
    hamster.line_tracer_mode(LineTracerMode::Off);
    hamster.stop();
}

/// C major scale, one beat per note at the configured tempo.
fn demo_scale(hamster: &Hamster) {
    for pitch in [40, 42, 44, 45, 47, 49, 51, 52] {
        hamster.note(pitch as f64, 0.5);
    }
    hamster.beep();
}
