use std::io::Write;

fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Initialise the logger once for the process. `RUST_LOG` wins over `debug`.
pub fn init_logging(debug: bool) {
    let filter = default_filter(debug);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        })
        .init();
}
