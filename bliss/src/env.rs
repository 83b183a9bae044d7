use once_cell::sync::Lazy;
use std::path::PathBuf;

pub static BLISS_HOME: Lazy<String> = Lazy::new(|| {
    std::env::var("BLISS_HOME").unwrap_or_else(|_| {
        let home_dir: String = match dirs::home_dir() {
            None => ".".to_string(),
            Some(dir) => dir.display().to_string(),
        };
        format!("{}/.bliss", home_dir)
    })
});

pub static BLISS_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BLISS_PORT")
        .unwrap_or("3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000)
});

pub static BLISS_DATA_DIR: Lazy<String> = Lazy::new(|| {
    std::env::var("BLISS_DATA_DIR").unwrap_or(format!("{}/data", BLISS_HOME.as_str()))
});

/// the catalog (a.k.a. `prime.db`) holding structures, routes, templates and databases
pub static BLISS_CATALOG: Lazy<String> = Lazy::new(|| {
    std::env::var("BLISS_CATALOG").unwrap_or(format!("{}/prime.db", BLISS_HOME.as_str()))
});

pub static BLISS_LOG: Lazy<String> =
    Lazy::new(|| std::env::var("BLISS_LOG").unwrap_or("info".to_string()));

pub fn config_path() -> PathBuf {
    PathBuf::from(BLISS_HOME.as_str()).join("config.yaml")
}
