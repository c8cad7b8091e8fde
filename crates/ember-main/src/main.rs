//! `ember` binary: headless bootstrap driven by the command line.

use std::io::Write;

use ember_main::prelude::*;

fn run() -> Result<i32, anyhow::Error> {
    let argv: Vec<String> = std::env::args().collect();
    let binary = argv
        .first()
        .cloned()
        .unwrap_or_else(|| ENGINE_NAME.to_lowercase());

    let platform = HeadlessPlatform::new();
    let help = ArgParser::new(platform.video_drivers(), platform.audio_drivers()).help_text(&binary);
    let mut boot = Bootstrapper::new(Box::new(platform), argv);

    if let Err(e) = boot.setup(true) {
        let mut stdout = std::io::stdout().lock();
        match &e {
            BootError::HelpRequested => {}
            BootError::VersionRequested => {
                writeln!(stdout, "{ENGINE_NAME} v{}", env!("CARGO_PKG_VERSION"))?;
            }
            other => eprintln!("{other}"),
        }
        if e.shows_help() {
            writeln!(stdout, "{help}")?;
        }
        boot.cleanup();
        return Ok(e.exit_code());
    }

    if boot.start() {
        boot.run();
    }
    boot.cleanup();
    Ok(boot.exit_code())
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
