/// minikit command-line entry point.
///
/// Handles:
/// - Logging setup
/// - Serving an application with the configured backend
/// - File digests, key generation and stdin/stdout encryption
use anyhow::Context;
use minikit::cli::{Cli, CipherArgs, Command, ServeArgs};
use minikit::crypto::{self, HashAlgorithm};
use minikit::server::{self, Server};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_millis();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();
}

/// Stop `server` on the first Ctrl-C.
fn watch_ctrl_c(server: Arc<dyn Server>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    thread::Builder::new()
        .name("minikit-signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("Interrupted, shutting down");
                        if let Err(e) = server.stop() {
                            log::error!("Failed to stop server: {}", e);
                        }
                    }
                    Err(e) => log::error!("Cannot listen for Ctrl-C: {}", e),
                }
            })
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

fn serve(args: &ServeArgs) -> anyhow::Result<()> {
    let overrides = args.overrides()?.with_app(server::demo());
    let server: Arc<dyn Server> = Arc::from(server::make_server(overrides)?);

    log::info!("Starting {} server", server.name());
    log::info!("Bind address: {}", server.config().bind_addr);
    log::info!("Threads: {}", server.config().threads);

    watch_ctrl_c(server.clone())?;
    server.run()?;
    Ok(())
}

fn list_backends() {
    for backend in server::global().backends() {
        println!("{:<15} {}", backend.name, backend.description);
    }
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut input = Vec::new();
    io::stdin().read_to_end(&mut input).context("Failed to read stdin")?;
    Ok(input)
}

fn write_stdout(data: &[u8], newline: bool) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(data)?;
    if newline {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

fn encode(args: &CipherArgs) -> anyhow::Result<()> {
    let input = read_stdin()?;
    let output = crypto::encode_data(&input, &args.secret, args.encoding)?;
    write_stdout(&output, args.encoding.is_some())
}

fn decode(args: &CipherArgs) -> anyhow::Result<()> {
    let input = read_stdin()?;
    let output = crypto::decode_data(&input, &args.secret, args.encoding)?;
    write_stdout(&output, false)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::from_args();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Serve(args) => serve(args)?,
        Command::Backends => list_backends(),
        Command::Digest { file, algorithm } => {
            let algorithm = HashAlgorithm::from_name_or_default(algorithm);
            let digest = crypto::file_digest(file, Some(algorithm))
                .with_context(|| format!("Cannot digest {}", file.display()))?;
            println!("{}  {}", digest, file.display());
        }
        Command::Keygen { size, charset } => {
            println!("{}", crypto::gen_secret_key(*size, charset)?);
        }
        Command::Encode(args) => encode(args)?,
        Command::Decode(args) => decode(args)?,
    }
    Ok(())
}
