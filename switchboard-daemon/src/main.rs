use anyhow::{Context, Result};
use switchboard_daemon::application::Application;
use switchboard_daemon::args::Args;

use std::path::{Path, PathBuf};

fn setup_logging(verbosity: u64, log_file: &Path) -> Result<()> {
    let mut base_config = fern::Dispatch::new();

    base_config = match verbosity {
        0 => base_config.level(log::LevelFilter::Warn),
        1 => base_config.level(log::LevelFilter::Info),
        2 => base_config.level(log::LevelFilter::Debug),
        _3_or_more => base_config.level(log::LevelFilter::Trace),
    };

    // Separate file config so we can include year, month and day in file logs
    let file_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(log_file)?);

    base_config.chain(file_config).apply()?;

    Ok(())
}

fn default_socket_file() -> PathBuf {
    switchboard_stdx::env::runtime_file("switchboard", "sock")
}

fn default_log_file() -> PathBuf {
    switchboard_stdx::env::runtime_file("switchboard", "log")
}

/// Whether this process may bind the socket. A socket that accepts a
/// connection belongs to a healthy daemon; a socket nobody answers is
/// leftover from a crash and is removed.
fn claim_socket(path: &Path) -> Result<bool> {
    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Ok(false),
        Err(_) => {
            if path.exists() {
                std::fs::remove_file(path)
                    .with_context(|| format!("cannot remove stale socket {}", path.display()))?;
            }
            Ok(true)
        }
    }
}

fn main() -> Result<()> {
    let exit_code = main_impl()?;
    std::process::exit(exit_code);
}

fn main_impl() -> Result<i32> {
    let args = Args::parse_args().context("could not parse arguments")?;

    if args.display_help {
        print!(
            "\
{} {}
{}

USAGE:
    switchboard [FLAGS]

FLAGS:
    -h, --help             Print help information
    -v                     Increase logging verbosity each use for up to 3 times
    --log <file>           Specify a file to use for logging
                           (default file: {})
    --socket <file>        Specify the unix socket path to bind
                           (default file: {})
    -V, --version          Print version information
",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
            default_log_file().display(),
            default_socket_file().display(),
        );
        return Ok(0);
    }

    if args.display_version {
        println!("switchboard {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let log_file = args.log_file.clone().unwrap_or_else(default_log_file);
    setup_logging(args.verbosity, &log_file).context("failed to initialize logging")?;

    let socket_path = args.socket.clone().unwrap_or_else(default_socket_file);
    if !claim_socket(&socket_path)? {
        // a healthy daemon already serves this socket
        log::info!("daemon already running on {}", socket_path.display());
        return Ok(0);
    }

    // Everything runs on this one thread; the transports and connection
    // pumps are io-bound tasks multiplexed onto it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let result = runtime.block_on(async {
        let listener = tokio::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("cannot bind {}", socket_path.display()))?;
        log::info!("listening on {}", socket_path.display());

        Application::new(listener).run().await
    });

    let _ = std::fs::remove_file(&socket_path);
    result.map(|()| 0)
}
