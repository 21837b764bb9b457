mod core;
mod utils;
mod workers;

use crate::core::config::LOG_FILE_NAME;
use crate::utils::log_file::FileLogLayer;
use crate::utils::sos::SignalOfStop;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workers::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();

    let data_dir = crate::utils::data_dir::init(args.conf.as_deref())?;

    // webrtc_ice logs "unknown TransactionID" warnings for late STUN
    // responses, which are normal.
    let filter = match args.verbose {
        0 => "warn,pastewire=info,webrtc_ice::agent=error",
        1 => "info,webrtc_ice::agent=error",
        2 => "debug,webrtc_ice::agent=error",
        _ => "trace",
    };

    let file_layer = FileLogLayer::new(&data_dir.join("logs").join(LOG_FILE_NAME))?;

    // Chat output goes to stdout. Console logging is opt-in with -v and
    // writes to stderr; the log file always gets everything the filter lets through.
    let console_layer = (args.verbose > 0).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(console_layer)
        .with(file_layer)
        .init();

    let sos = SignalOfStop::new();

    // Ctrl+C handler
    let sos_clone = sos.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sos_clone.cancel();
    });

    workers::repl::run(args, sos).await
}
