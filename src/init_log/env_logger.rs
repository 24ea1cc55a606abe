use std::io::Write;

use chrono::Local;

pub fn init(env_cargo_crate_name: &str) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| super::default_filter(env_cargo_crate_name));
    let _ = env_logger::builder()
        .parse_filters(&filter)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("<unnamed>"),
                &record.args()
            )
        })
        .try_init();
}
