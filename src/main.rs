use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = geo_item_search::run() {
        tracing::error!(error = %e, "fatal");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
