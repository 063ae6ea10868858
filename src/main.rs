use peerlink::utils::log_buffer::FileLogLayer;
use peerlink::utils::sos::SignalOfStop;
use peerlink::workers::args::Args;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::load();

    // Initialize the global data directory (must happen before any persistence access)
    let data_dir = peerlink::utils::data_dir::init(args.conf.as_deref())?;

    // webrtc_ice reports late STUN responses as "unknown TransactionID" warnings,
    // which are harmless. Keep them out unless tracing everything.
    let filter = match args.verbose {
        0 => "warn,peerlink=info,webrtc_ice::agent=error",
        1 => "info,webrtc_ice::agent=error",
        2 => "debug,webrtc_ice::agent=error",
        _ => "trace",
    };

    let filter_layer = EnvFilter::new(filter);
    let file_layer = FileLogLayer::new(&data_dir.join("logs").join("peerlink.log"))?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    let sos = SignalOfStop::new();

    // Ctrl+C handler
    let sos_clone = sos.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sos_clone.cancel();
    });

    peerlink::workers::console::run(args, sos, data_dir).await
}
