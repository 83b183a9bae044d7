use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub type ShutdownHook = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

static SHUTDOWN_TX: Lazy<watch::Sender<Option<i32>>> = Lazy::new(|| watch::channel(None).0);

static SHUTDOWN_HOOKS: Lazy<Mutex<Vec<ShutdownHook>>> = Lazy::new(|| Mutex::new(vec![]));

/// `hook` runs once the server has stopped accepting requests
pub fn add_shutdown_hook(hook: ShutdownHook) {
    SHUTDOWN_HOOKS.lock().push(hook);
}

/// Requests a shutdown with the given exit code.  Safe to call from any thread, including a
/// signal handler; only the first request counts.
pub fn shutdown(code: i32) {
    SHUTDOWN_TX.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(code);
            true
        } else {
            false
        }
    });
}

/// the exit code of a requested shutdown, if any
pub fn requested() -> Option<i32> {
    *SHUTDOWN_TX.borrow()
}

/// resolves with the exit code once [`shutdown`] has been called
pub async fn shutdown_signal() -> i32 {
    let mut rx = SHUTDOWN_TX.subscribe();
    let code = match rx.wait_for(|code| code.is_some()).await {
        Ok(code) => (*code).unwrap_or(0),
        Err(_) => 0,
    };
    code
}

/// drains and runs every registered hook, giving up after `timeout`
pub async fn run_shutdown_hooks(timeout: Duration) {
    let hooks: Vec<ShutdownHook> = SHUTDOWN_HOOKS.lock().drain(..).collect();
    if hooks.is_empty() {
        return;
    }
    info!("running {} shutdown hooks", hooks.len());
    let mut set = JoinSet::new();
    for hook in hooks {
        set.spawn(hook);
    }
    if tokio::time::timeout(timeout, async move {
        while set.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("shutdown hooks did not finish within {:?}", timeout);
    }
}
