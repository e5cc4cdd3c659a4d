// ============================================================================
// cli.rs - Gravifields
// Command-line parsing for the windowed and headless entry points.
// ============================================================================

use crate::app::AppConfig;
use crate::headless::HeadlessConfig;

pub const USAGE: &str = "\
usage: gravifields [--headless] [--frames N] [--seed N] [--complexity N]
                   [--grid N] [--width N] [--height N]";

#[derive(Clone, Debug)]
pub enum Command {
    Window(AppConfig),
    Headless(HeadlessConfig),
}

/// Parses the arguments that follow the program name.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut headless = false;
    let mut app = AppConfig::default();
    let mut batch = HeadlessConfig::default();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let flag = arg.to_lowercase();
        if flag == "--headless" {
            headless = true;
            continue;
        }
        if flag == "--help" || flag == "-h" {
            return Err(USAGE.to_string());
        }

        let value = args
            .next()
            .ok_or_else(|| format!("missing value for {arg}\n{USAGE}"))?;
        match flag.as_str() {
            "--frames" => batch.frames = number(&arg, &value)?,
            "--seed" => {
                let seed = number(&arg, &value)?;
                app.simulation.seed = Some(seed);
                batch.simulation.seed = Some(seed);
            }
            "--complexity" => {
                let complexity = number(&arg, &value)?;
                app.simulation.complexity = complexity;
                batch.simulation.complexity = complexity;
            }
            "--grid" => {
                let grid = number(&arg, &value)?;
                app.simulation.particles_grid_size = grid;
                batch.simulation.particles_grid_size = grid;
            }
            "--width" => {
                let width = number(&arg, &value)?;
                app.window_size.width = width;
                batch.viewport.width = width;
            }
            "--height" => {
                let height = number(&arg, &value)?;
                app.window_size.height = height;
                batch.viewport.height = height;
            }
            _ => return Err(format!("unknown argument {arg}\n{USAGE}")),
        }
    }

    if headless && batch.viewport.is_empty() {
        return Err(format!(
            "headless viewport must be non-empty, got {}x{}",
            batch.viewport.width, batch.viewport.height
        ));
    }

    Ok(if headless {
        Command::Headless(batch)
    } else {
        Command::Window(app)
    })
}

fn number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value {value:?} for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Viewport;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_opens_a_window() {
        assert!(matches!(parse_args(args(&[])).unwrap(), Command::Window(_)));
    }

    #[test]
    fn headless_options_are_applied() {
        let command = parse_args(args(&[
            "--headless", "--frames", "42", "--seed", "7", "--complexity", "1", "--grid", "3", "--width", "320",
            "--height", "200",
        ]))
        .unwrap();
        let Command::Headless(config) = command else {
            panic!("expected headless command");
        };
        assert_eq!(config.frames, 42);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.complexity, 1);
        assert_eq!(config.simulation.particles_grid_size, 3);
        assert_eq!(config.viewport, Viewport::new(320, 200));
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse_args(args(&["--frames"])).is_err());
        assert!(parse_args(args(&["--frames", "many"])).is_err());
        assert!(parse_args(args(&["--bogus", "1"])).is_err());
        assert!(parse_args(args(&["--headless", "--width", "0"])).is_err());
    }
}
