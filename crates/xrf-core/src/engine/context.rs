use super::config::ProcessingConfig;
use super::error::EngineError;
use super::optimizer::Optimizer;
use super::progress::ProgressReporter;
use crate::core::io::IoGate;
use std::sync::Arc;
use tracing::debug;

/// Resources shared by every stage of one processing run.
///
/// The context is built once per run and handed to workflows by reference. It owns the
/// fixed-size worker pool, the optimizer back-end shared by all iterative routines and the
/// gate that serializes loader and serializer calls.
pub struct ProcessingContext<'a> {
    pub config: &'a ProcessingConfig,
    pub reporter: &'a ProgressReporter<'a>,
    pub optimizer: Arc<dyn Optimizer>,
    pub io: IoGate,
    pool: rayon::ThreadPool,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(
        config: &'a ProcessingConfig,
        reporter: &'a ProgressReporter<'a>,
    ) -> Result<Self, EngineError> {
        let threads = config.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("xrf-worker-{i}"))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
        debug!(threads, optimizer = %config.optimizer, "Processing context ready");

        Ok(Self {
            config,
            reporter,
            optimizer: Arc::from(config.optimizer.build(config.optimizer_settings)),
            io: IoGate::new(),
            pool,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` inside the worker pool; parallel iterators used by `op` execute on it.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::ProcessingConfigBuilder;
    use crate::engine::routines::FitRoutineKind;

    #[test]
    fn pool_uses_configured_thread_count() {
        let config = ProcessingConfigBuilder::new()
            .threads(3)
            .fit_kinds(vec![FitRoutineKind::Roi])
            .build()
            .unwrap();
        let reporter = ProgressReporter::new();
        let context = ProcessingContext::new(&config, &reporter).unwrap();
        assert_eq!(context.threads(), 3);
        assert_eq!(context.install(rayon::current_num_threads), 3);
    }
}
