//! Scalar statistics sink
//!
//! The training loop reports scalar metrics through this narrow interface;
//! the default sink forwards them to `tracing`, but any key/value consumer
//! can be plugged in.

/// Sink for scalar key/value training statistics
pub trait StatLogger: Send + Sync {
    /// Record one scalar under `key`; values accumulate until the next dump
    fn record(&mut self, key: &str, value: f64);

    /// Flush everything recorded since the last dump, tagged with `step`
    fn dump(&mut self, step: usize);
}

/// Default sink that forwards dumped scalars through `tracing`
#[derive(Debug, Default)]
pub struct TracingStatLogger {
    pending: Vec<(String, f64)>,
}

impl TracingStatLogger {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatLogger for TracingStatLogger {
    fn record(&mut self, key: &str, value: f64) {
        self.pending.push((key.to_string(), value));
    }

    fn dump(&mut self, step: usize) {
        for (key, value) in self.pending.drain(..) {
            tracing::info!(step, %key, value, "stat");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_clears_pending_records() {
        let mut logger = TracingStatLogger::new();
        logger.record("loss", 0.5);
        logger.record("accuracy", 0.9);
        assert_eq!(logger.pending.len(), 2);
        logger.dump(0);
        assert!(logger.pending.is_empty());
    }
}
