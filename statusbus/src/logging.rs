use tracing::Level;

/// Install a `tracing-subscriber` fmt subscriber for binaries. The library
/// itself never installs one. Calling this twice is harmless.
pub fn init_tracing(level: Level) {
    // a second call fails because a global default is already set
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing(Level::DEBUG);
        init_tracing(Level::INFO);
        tracing::info!("still logging");
    }
}
