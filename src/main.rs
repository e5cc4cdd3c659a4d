// ============================================================================
// main.rs - Gravifields
// Entry point. Initializes logging, parses arguments and starts either the
// event loop or the headless runner.
// ============================================================================

use gravifields::app::App;
use gravifields::cli::{parse_args, Command};
use gravifields::headless::run_headless;
use winit::event_loop::EventLoop;

fn main() {
    env_logger::init();

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let result = match command {
        Command::Headless(config) => run_headless(&config).map(|_| ()),
        Command::Window(config) => run_window(config),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run_window(config: gravifields::app::AppConfig) -> Result<(), String> {
    let event_loop = EventLoop::new().map_err(|e| format!("Failed to create event loop: {e}"))?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop
        .run_app(&mut app)
        .map_err(|e| format!("Event loop error: {e}"))
}
