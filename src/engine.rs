//! Execution context: one engine (device + worker pool) and one in-order stream.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dilconv_view::{ConvError, Result};
use serde::Serialize;

/// Device family an engine executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Cpu,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Cpu => f.write_str("cpu"),
        }
    }
}

/// A compute device together with the dedicated rayon pool its kernels run on.
#[derive(Clone)]
pub struct Engine {
    kind: EngineKind,
    index: usize,
    pool: Arc<rayon::ThreadPool>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("threads", &self.num_threads())
            .finish()
    }
}

impl Engine {
    /// CPU engine `index` with `threads` workers (`None`: one per core).
    pub fn cpu(index: usize, threads: Option<usize>) -> Result<Self> {
        if threads == Some(0) {
            return Err(ConvError::InvalidConfig(
                "engine thread count must be > 0".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(move |i| format!("dilconv-cpu{index}-{i}"))
            .build()
            .map_err(|e| ConvError::ThreadPool(e.to_string()))?;
        log::debug!(
            "engine cpu:{index} started with {} threads",
            pool.current_num_threads()
        );
        Ok(Self {
            kind: EngineKind::Cpu,
            index,
            pool: Arc::new(pool),
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `f` with this engine's pool as the current rayon pool.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }
}

/// In-order queue of work on one engine.
///
/// Submission executes synchronously, so completion order always equals
/// submission order. [`Stream::wait`] is the drain point callers use before
/// reading results or stopping a timer.
#[derive(Debug, Default)]
pub struct Stream {
    submitted: AtomicU64,
    drained: AtomicU64,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `f` on `engine` and record the submission.
    pub fn submit<R, F>(&self, engine: &Engine, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        let out = engine.install(f);
        self.submitted.fetch_add(1, Ordering::Release);
        out
    }

    /// Block until every submitted item has completed; returns how many
    /// items this call drained.
    pub fn wait(&self) -> u64 {
        let submitted = self.submitted.load(Ordering::Acquire);
        let before = self.drained.swap(submitted, Ordering::AcqRel);
        submitted.saturating_sub(before)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    /// Items submitted but not yet drained by [`Stream::wait`].
    pub fn pending(&self) -> u64 {
        self.submitted()
            .saturating_sub(self.drained.load(Ordering::Acquire))
    }
}

/// Engine plus stream, created once per run and passed to every operator.
#[derive(Debug)]
pub struct ExecutionContext {
    engine: Engine,
    stream: Stream,
}

impl ExecutionContext {
    /// CPU engine 0 with `threads` workers (`None`: one per core).
    pub fn new(threads: Option<usize>) -> Result<Self> {
        Ok(Self::with_engine(Engine::cpu(0, threads)?))
    }

    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            stream: Stream::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Submit `f` to the stream.
    pub fn execute<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.stream.submit(&self.engine, f)
    }

    /// Drain the stream.
    pub fn wait(&self) -> u64 {
        self.stream.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_thread_count() {
        let engine = Engine::cpu(0, Some(2)).unwrap();
        assert_eq!(engine.num_threads(), 2);
        assert_eq!(engine.kind(), EngineKind::Cpu);
        assert_eq!(engine.install(rayon::current_num_threads), 2);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            Engine::cpu(0, Some(0)),
            Err(ConvError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stream_counts_and_drains() {
        let ctx = ExecutionContext::new(Some(1)).unwrap();
        assert_eq!(ctx.execute(|| 1 + 1), 2);
        ctx.execute(|| ());
        assert_eq!(ctx.stream().pending(), 2);
        assert_eq!(ctx.wait(), 2);
        assert_eq!(ctx.stream().pending(), 0);
        assert_eq!(ctx.wait(), 0);
        assert_eq!(ctx.stream().submitted(), 2);
    }
}
