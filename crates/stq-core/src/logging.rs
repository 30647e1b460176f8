use crate::Result;

/// Install process-wide logging for a worker.
///
/// The always-available path is the `[TAG]` println/eprintln logging used
/// throughout the crates. With the `tracing` feature enabled this also wires
/// a `tracing-subscriber` formatter, quiet by default outside the stq crates.
pub fn init(service_name: &str) -> Result<()> {
    let _ = service_name;

    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::{fmt, EnvFilter};

        // `RUST_LOG` wins when set.
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "warn,stq_core=info,stq_graph=info,{service_name}=info"
            ))
        });

        fmt().with_env_filter(filter).with_target(true).init();
    }

    Ok(())
}
