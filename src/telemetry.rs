use tracing_subscriber::EnvFilter;

/// Logs go to stderr. `BATCHCERTD_LOG` sets the filter, `BATCHCERTD_LOG_FORMAT=json` the format.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("BATCHCERTD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    match std::env::var("BATCHCERTD_LOG_FORMAT").as_deref() {
        Ok("json") => {
            builder.json().init();
        }
        _ => {
            builder.init();
        }
    }
}
