//! spinet-sim: desktop and headless runner for the control network.
//!
//! Provides two execution modes:
//!
//! - **GUI mode** (default): LED rows for the coordinator and counter
//!   responder, servo pulse bar, pot gauge; keyboard/gamepad input, quick
//!   save and load.
//! - **Headless mode** (`--headless`): runs a fixed number of poll
//!   iterations and prints one line per iteration.

use clap::{Parser, ValueEnum};
use gilrs::{Axis, Button as GilrsButton, Event as GilrsEvent, EventType, Gilrs};
use log::{error, info, warn};
use minifb::{Key, Scale, ScaleMode, Window, WindowOptions};
use spinet_core::counter::{DECREMENT_PIN, INCREMENT_PIN};
use spinet_core::{NetError, Network, NetworkConfig, PollReport, Topology, WaitBound};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Logical framebuffer size
const VIEW_WIDTH: usize = 128;
const VIEW_HEIGHT: usize = 64;
/// Pot change per frame while Up/Down is held
const POT_STEP: u16 = 8;
/// Analog stick deadzone
const STICK_DEADZONE: f32 = 0.3;
/// Save state used when `--state` is not given
const DEFAULT_STATE_FILE: &str = "spinet.state";

const COLOR_BG: u32 = 0x101018;
const COLOR_LED_ON: u32 = 0xFF3030;
const COLOR_LED_OFF: u32 = 0x3A1818;
const COLOR_SERVO: u32 = 0x30D060;
const COLOR_POT: u32 = 0x3080FF;
const COLOR_FRAME: u32 = 0x404050;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TopologyArg {
    /// Coordinator and one counter responder
    Single,
    /// Coordinator, servo responder and counter responder
    Dual,
}

impl From<TopologyArg> for Topology {
    fn from(t: TopologyArg) -> Self {
        match t {
            TopologyArg::Single => Topology::Single,
            TopologyArg::Dual => Topology::Dual,
        }
    }
}

/// Simulate a three-node SPI control network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Responders wired to the bus
    #[arg(short, long, value_enum, default_value = "single")]
    topology: TopologyArg,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Poll iterations to run in headless mode
    #[arg(short = 'n', long, default_value_t = 20)]
    iterations: u64,

    /// Potentiometer level, 0..=1023
    #[arg(short, long, default_value_t = 512, value_parser = clap::value_parser!(u16).range(0..=1023))]
    pot: u16,

    /// Press the increment button before iteration N (repeatable)
    #[arg(long = "inc-at", value_name = "N")]
    inc_at: Vec<u64>,

    /// Press the decrement button before iteration N (repeatable)
    #[arg(long = "dec-at", value_name = "N")]
    dec_at: Vec<u64>,

    /// Select-line settle delay in milliseconds
    #[arg(long, default_value_t = spinet_core::config::SETTLE_DELAY_MS)]
    settle_ms: u32,

    /// Transfer wait bound in cycles (0 = wait forever)
    #[arg(long, default_value_t = spinet_core::config::DEFAULT_WAIT_CYCLES)]
    wait_cycles: u64,

    /// Cycles between a responder interrupt flag and its handler
    #[arg(long, default_value_t = spinet_core::config::DEFAULT_ISR_LATENCY)]
    latency: u64,

    /// Initial value of the responder edge counter
    #[arg(long, default_value_t = spinet_core::config::COUNTER_SEED)]
    seed: u8,

    /// Save state file (F5/F9 in the GUI; loaded before and saved after a headless run)
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Enable debug messages
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        let mut cfg = NetworkConfig::new(self.topology.into());
        cfg.settle_us = self.settle_ms.saturating_mul(1000);
        cfg.wait = if self.wait_cycles == 0 { WaitBound::Forever } else { WaitBound::Cycles(self.wait_cycles) };
        cfg.isr_latency_cycles = self.latency;
        cfg.counter_seed = self.seed;
        cfg
    }

    /// Load a save state, then put back the timing given on the command line.
    fn load_state(&self, net: &mut Network, path: &std::path::Path) -> Result<(), NetError> {
        net.load_from_file(path)?;
        net.apply_timing(&self.network_config())?;
        Ok(())
    }
}

// ─── Gamepad ────────────────────────────────────────────────────────────────

struct GamepadState {
    up: bool, down: bool,
    inc: bool, dec: bool,
    left_stick_y: f32,
}

impl GamepadState {
    fn new() -> Self {
        GamepadState { up: false, down: false, inc: false, dec: false, left_stick_y: 0.0 }
    }
    fn eff_up(&self)   -> bool { self.up   || self.left_stick_y < -STICK_DEADZONE }
    fn eff_down(&self) -> bool { self.down || self.left_stick_y >  STICK_DEADZONE }
}

fn init_gamepad() -> Option<Gilrs> {
    match Gilrs::new() {
        Ok(gilrs) => {
            for (id, gp) in gilrs.gamepads() {
                info!("gamepad [{}] \"{}\"", id, gp.name());
            }
            Some(gilrs)
        }
        Err(e) => { warn!("gamepad: {}", e); None }
    }
}

fn poll_gamepad(gilrs: &mut Gilrs, state: &mut GamepadState) {
    while let Some(GilrsEvent { event, .. }) = gilrs.next_event() {
        match event {
            EventType::ButtonPressed(b, _)  => apply_button(state, b, true),
            EventType::ButtonReleased(b, _) => apply_button(state, b, false),
            EventType::AxisChanged(a, v, _) => apply_axis(state, a, v),
            EventType::Disconnected => { info!("gamepad disconnected"); *state = GamepadState::new(); }
            _ => {}
        }
    }
}

fn apply_button(state: &mut GamepadState, btn: GilrsButton, pressed: bool) {
    match btn {
        GilrsButton::DPadUp   => state.up   = pressed,
        GilrsButton::DPadDown => state.down = pressed,
        GilrsButton::South | GilrsButton::RightTrigger => state.inc = pressed,
        GilrsButton::East  | GilrsButton::LeftTrigger  => state.dec = pressed,
        _ => {}
    }
}

fn apply_axis(state: &mut GamepadState, axis: Axis, value: f32) {
    match axis {
        Axis::LeftStickY => state.left_stick_y = value,
        Axis::DPadY => { state.up = value < -STICK_DEADZONE; state.down = value > STICK_DEADZONE; }
        _ => {}
    }
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn main() {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, log::LevelFilter::Debug);
    } else {
        builder.filter(None, log::LevelFilter::Info);
    }
    builder.init();

    let mut net = match Network::new(args.network_config()) {
        Ok(net) => net,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    net.set_pot(args.pot);

    let ok = if args.headless {
        run_headless(&args, &mut net)
    } else {
        run_gui(&args, &mut net)
    };
    if !ok {
        std::process::exit(1);
    }
}

fn state_path(args: &Args) -> PathBuf {
    args.state.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

// ─── GUI Mode ───────────────────────────────────────────────────────────────

fn run_gui(args: &Args, net: &mut Network) -> bool {
    let scale = 6;
    let (win_w, win_h) = (VIEW_WIDTH * scale, VIEW_HEIGHT * scale);
    let title = format!("spinet-sim ({})", net.config.topology.name());
    let mut window = match Window::new(
        &title, win_w, win_h,
        WindowOptions {
            scale: Scale::X1,
            scale_mode: ScaleMode::AspectRatioStretch,
            resize: true,
            ..Default::default()
        },
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("window: {}", e);
            return false;
        }
    };
    window.set_target_fps(60);

    let path = state_path(args);
    let mut gilrs = init_gamepad();
    let mut gp = GamepadState::new();
    let mut view = vec![COLOR_BG; VIEW_WIDTH * VIEW_HEIGHT];
    let mut scaled_buf = vec![0u32; win_w * win_h];
    let mut last_report: Option<PollReport> = None;
    let mut last_title = Instant::now();
    let mut prev_f5 = false;
    let mut prev_f9 = false;
    let mut stalled = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        if let Some(ref mut g) = gilrs { poll_gamepad(g, &mut gp); }

        // Quick save (F5) / quick load (F9)
        let f5 = window.is_key_down(Key::F5);
        if f5 && !prev_f5 {
            if let Err(e) = net.save_to_file(&path) { error!("{}", e); }
        }
        prev_f5 = f5;
        let f9 = window.is_key_down(Key::F9);
        if f9 && !prev_f9 {
            match args.load_state(net, &path) {
                Ok(()) => stalled = false,
                Err(e) => error!("{}", e),
            }
        }
        prev_f9 = f9;

        // Input
        let pot = net.pot();
        if window.is_key_down(Key::Up) || gp.eff_up() {
            net.set_pot((pot + POT_STEP).min(1023));
        } else if window.is_key_down(Key::Down) || gp.eff_down() {
            net.set_pot(pot.saturating_sub(POT_STEP));
        }
        net.set_button(INCREMENT_PIN, window.is_key_down(Key::Z) || gp.inc);
        net.set_button(DECREMENT_PIN, window.is_key_down(Key::X) || gp.dec);

        match net.run_iteration() {
            Ok(report) => {
                stalled = false;
                last_report = Some(report);
            }
            Err(e @ NetError::BusStall { .. }) | Err(e @ NetError::TransferInFlight) => {
                if !stalled { warn!("{}", e); }
                stalled = true;
            }
            Err(e) => {
                error!("{}", e);
                return false;
            }
        }

        draw(net, &mut view);
        for y in 0..win_h {
            let row = &view[(y / scale) * VIEW_WIDTH..(y / scale + 1) * VIEW_WIDTH];
            for x in 0..win_w {
                scaled_buf[y * win_w + x] = row[x / scale];
            }
        }
        if let Err(e) = window.update_with_buffer(&scaled_buf, win_w, win_h) {
            error!("window update: {}", e);
            return false;
        }

        if last_title.elapsed() >= Duration::from_millis(500) {
            let sent = last_report.as_ref().map_or(0, |r| r.sent);
            let servo = net.servo_pulse_us().map(|us| format!(" servo={:.0}us", us)).unwrap_or_default();
            window.set_title(&format!(
                "{} - pot={} sent={} display={}{}{}",
                title, net.pot(), sent, net.displayed(), servo,
                if stalled { " [STALL]" } else { "" },
            ));
            last_title = Instant::now();
        }
    }
    info!("{} iterations, {} cycles", net.iterations, net.tick);
    true
}

fn fill_rect(view: &mut [u32], x: usize, y: usize, w: usize, h: usize, color: u32) {
    for yy in y..(y + h).min(VIEW_HEIGHT) {
        for xx in x..(x + w).min(VIEW_WIDTH) {
            view[yy * VIEW_WIDTH + xx] = color;
        }
    }
}

/// Eight LEDs, MSB on the left.
fn draw_leds(view: &mut [u32], y: usize, value: u8) {
    for bit in 0..8 {
        let on = value & (0x80 >> bit) != 0;
        fill_rect(view, 8 + bit * 14, y, 10, 8, if on { COLOR_LED_ON } else { COLOR_LED_OFF });
    }
}

fn draw_bar(view: &mut [u32], y: usize, fraction: f32, color: u32) {
    let width = VIEW_WIDTH - 16;
    fill_rect(view, 7, y - 1, width + 2, 8, COLOR_FRAME);
    fill_rect(view, 8, y, width, 6, COLOR_BG);
    let filled = (fraction.clamp(0.0, 1.0) * width as f32).round() as usize;
    fill_rect(view, 8, y, filled, 6, color);
}

fn draw(net: &Network, view: &mut [u32]) {
    view.fill(COLOR_BG);
    draw_leds(view, 4, net.displayed());
    if let Some(r) = net.counter_responder() {
        draw_leds(view, 18, r.display.read());
    }
    if let Some(r) = net.servo_responder() {
        let period = r.pwm.period_us();
        let fraction = if period > 0.0 { r.pwm.pulse_width_us() / period } else { 0.0 };
        draw_bar(view, 36, fraction, COLOR_SERVO);
    }
    draw_bar(view, 50, net.pot() as f32 / 1023.0, COLOR_POT);
}

// ─── Headless Mode ──────────────────────────────────────────────────────────

fn run_headless(args: &Args, net: &mut Network) -> bool {
    if let Some(ref path) = args.state {
        if path.exists() {
            if let Err(e) = args.load_state(net, path) {
                error!("{}", e);
                return false;
            }
        }
    }

    info!("poll plan: {:?}", net.poll_cycle().targets());
    let start = net.iterations;
    for i in 0..args.iterations {
        if args.inc_at.contains(&i) { net.press_button(INCREMENT_PIN); }
        if args.dec_at.contains(&i) { net.press_button(DECREMENT_PIN); }
        match net.run_iteration() {
            Ok(report) => println!("{}", format_report(start + i, &report, net)),
            Err(e) => {
                println!("iter {:4}: {}", start + i, e);
                return false;
            }
        }
    }

    if let Some(ref path) = args.state {
        if let Err(e) = net.save_to_file(path) {
            error!("{}", e);
            return false;
        }
    }
    true
}

fn format_report(iteration: u64, report: &PollReport, net: &Network) -> String {
    let replies: Vec<String> = report.replies.iter()
        .map(|(line, v)| format!("{}:{}", line, v))
        .collect();
    let mut line = format!(
        "iter {:4}: sent={:3} reply=[{}] display={:3} cycles={}",
        iteration, report.sent, replies.join(","), net.displayed(), report.cycles,
    );
    if let Some(us) = net.servo_pulse_us() {
        line.push_str(&format!(" servo={:.0}us", us));
    }
    line
}
