#[macro_use]
extern crate async_trait;

pub mod cache;
pub mod catalog;
pub mod clone;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod err;
pub mod files;
pub mod host;
pub mod render;
pub mod route;
pub mod sandbox;
pub mod shutdown;
pub mod stream;

#[cfg(feature = "server")]
pub mod server;

pub static VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
pub mod test {
    use crate::VERSION;

    #[test]
    pub fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
