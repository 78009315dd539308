// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation handle shared by the walker, workers and extractors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Cancel `token` on the first Ctrl-C; exit with 130 on the second.
pub fn install_interrupt_handler(token: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("symdex-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::debug!("signal handler unavailable: {err}");
                    return;
                }
            };
            runtime.block_on(async move {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::warn!("interrupt received, cancelling build");
                token.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(crate::errors::EXIT_CANCELLED);
                }
            });
        });
    if let Err(err) = spawned {
        tracing::debug!("failed to spawn signal thread: {err}");
    }
}
