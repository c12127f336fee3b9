//! Ordered middleware chains with last-in-first-out unwinding.
//!
//! A [`Pipeline`] runs its stages in registration order against one
//! exclusively borrowed context. Each stage answers with a [`Next`]:
//!
//! - [`Next::Continue`] moves on to the following stage,
//! - [`Next::ContinueWith`] moves on and pushes a continuation that runs when
//!   the chain unwinds,
//! - [`Next::Done`] stops forward progress and unwinds immediately.
//!
//! When every stage continued, [`Pipeline::execute`] hands back the
//! [`UnwindStack`] so the caller can do its completion work first and unwind
//! afterwards. Continuations always run newest first.
//!
//! Stages have exactly one shape, so a stage with the wrong signature is
//! rejected by the compiler rather than at registration:
//!
//! ```compile_fail
//! use herald_robot::pipeline::{Next, Pipeline, from_fn};
//!
//! let mut pipeline: Pipeline<Vec<u8>> = Pipeline::new("receive");
//! pipeline.register(from_fn(|ctx: &mut Vec<u8>, extra: u8| Ok(Next::Continue)));
//! ```

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use {
    async_trait::async_trait,
    futures::FutureExt,
    tracing::{debug, error, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, labels, middleware as middleware_metrics};

use crate::error::Error;

/// Continuation run while a pipeline unwinds.
pub type UnwindFn<C> = Box<dyn FnOnce(&mut C) + Send>;

/// A stage's decision about the rest of the chain.
pub enum Next<C> {
    /// Run the following stage.
    Continue,
    /// Run the following stage, and `UnwindFn` once the chain unwinds.
    ContinueWith(UnwindFn<C>),
    /// Skip the remaining stages and the completion; unwind now.
    Done,
}

impl<C> Next<C> {
    pub fn continue_with(unwind: impl FnOnce(&mut C) + Send + 'static) -> Self {
        Self::ContinueWith(Box::new(unwind))
    }
}

impl<C> fmt::Debug for Next<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::ContinueWith(_) => f.write_str("ContinueWith(..)"),
            Self::Done => f.write_str("Done"),
        }
    }
}

/// A pipeline stage.
///
/// Returning an error, or panicking, aborts this execution only: the
/// continuations installed by earlier stages still unwind.
#[async_trait]
pub trait Middleware<C: Send + 'static>: Send + Sync {
    async fn handle(&self, ctx: &mut C) -> anyhow::Result<Next<C>>;
}

/// Adapter turning a synchronous closure into a [`Middleware`].
pub struct FnMiddleware<F>(F);

/// Wrap a synchronous closure as a stage.
pub fn from_fn<C, F>(f: F) -> FnMiddleware<F>
where
    C: Send + 'static,
    F: Fn(&mut C) -> anyhow::Result<Next<C>> + Send + Sync,
{
    FnMiddleware(f)
}

#[async_trait]
impl<C, F> Middleware<C> for FnMiddleware<F>
where
    C: Send + 'static,
    F: Fn(&mut C) -> anyhow::Result<Next<C>> + Send + Sync,
{
    async fn handle(&self, ctx: &mut C) -> anyhow::Result<Next<C>> {
        (self.0)(ctx)
    }
}

/// Continuations collected during the forward pass.
#[must_use = "the completion must be followed by UnwindStack::run"]
pub struct UnwindStack<C> {
    pipeline: &'static str,
    entries: Vec<UnwindFn<C>>,
}

impl<C> UnwindStack<C> {
    fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, unwind: UnwindFn<C>) {
        self.entries.push(unwind);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every continuation, most recently installed first.
    ///
    /// A panicking continuation is logged and does not stop the ones below it.
    pub fn run(mut self, ctx: &mut C) {
        while let Some(unwind) = self.entries.pop() {
            let depth = self.entries.len();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| unwind(ctx))) {
                let err = Error::panicked(
                    format!("{} unwind continuation {depth}", self.pipeline),
                    payload,
                );
                error!(pipeline = self.pipeline, error = %err, "unwind continuation panicked");
            }
        }
    }
}

impl<C> fmt::Debug for UnwindStack<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnwindStack")
            .field("pipeline", &self.pipeline)
            .field("len", &self.entries.len())
            .finish()
    }
}

/// How one [`Pipeline::execute`] call ended.
#[derive(Debug)]
pub enum Execution<C> {
    /// Every stage continued. Run the completion, then the stack.
    Complete(UnwindStack<C>),
    /// A stage returned [`Next::Done`]; already unwound.
    Halted,
    /// A stage failed; already unwound. The completion must not run.
    Failed(Error),
}

impl<C> Execution<C> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// An append-only, reusable chain of stages over context type `C`.
pub struct Pipeline<C: Send + 'static> {
    name: &'static str,
    stages: Vec<Arc<dyn Middleware<C>>>,
}

impl<C: Send + 'static> Pipeline<C> {
    /// `name` tags log lines and errors (`receive`, `listener`, `response`).
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            stages: Vec::new(),
        }
    }

    pub fn register(&mut self, stage: impl Middleware<C> + 'static) {
        self.register_shared(Arc::new(stage));
    }

    /// Register a stage that is also used elsewhere.
    pub fn register_shared(&mut self, stage: Arc<dyn Middleware<C>>) {
        self.stages.push(stage);
        debug!(
            pipeline = self.name,
            stages = self.stages.len(),
            "middleware registered"
        );
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the forward pass over `ctx`.
    ///
    /// Always yields to the scheduler before the first stage, so the outcome
    /// is never produced in the caller's current turn, even when no stage is
    /// registered.
    pub async fn execute(&self, ctx: &mut C) -> Execution<C> {
        tokio::task::yield_now().await;

        let mut unwind = UnwindStack::new(self.name);
        for (index, stage) in self.stages.iter().enumerate() {
            let outcome = AssertUnwindSafe(stage.handle(ctx)).catch_unwind().await;
            let err = match outcome {
                Ok(Ok(Next::Continue)) => continue,
                Ok(Ok(Next::ContinueWith(f))) => {
                    unwind.push(f);
                    continue;
                },
                Ok(Ok(Next::Done)) => {
                    debug!(pipeline = self.name, stage = index, "middleware halted");
                    #[cfg(feature = "metrics")]
                    counter!(middleware_metrics::HALTED_TOTAL, labels::PIPELINE => self.name)
                        .increment(1);
                    unwind.run(ctx);
                    return Execution::Halted;
                },
                Ok(Err(e)) => Error::middleware(self.name, e),
                Err(payload) => {
                    Error::panicked(format!("{} middleware stage {index}", self.name), payload)
                },
            };
            warn!(pipeline = self.name, stage = index, error = %err, "middleware failed");
            #[cfg(feature = "metrics")]
            counter!(middleware_metrics::FAILURES_TOTAL, labels::PIPELINE => self.name)
                .increment(1);
            unwind.run(ctx);
            return Execution::Failed(err);
        }

        Execution::Complete(unwind)
    }
}

impl<C: Send + 'static> fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stages.len())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Trace {
        events: Vec<String>,
    }

    impl Trace {
        fn push(&mut self, event: impl Into<String>) {
            self.events.push(event.into());
        }
    }

    /// Logs its name and unwinds with `done<name>`.
    fn wrapping(name: &'static str) -> FnMiddleware<impl Fn(&mut Trace) -> anyhow::Result<Next<Trace>>> {
        from_fn(move |ctx: &mut Trace| {
            ctx.push(name);
            Ok(Next::continue_with(move |ctx: &mut Trace| {
                ctx.push(format!("done{name}"))
            }))
        })
    }

    fn passing(name: &'static str) -> FnMiddleware<impl Fn(&mut Trace) -> anyhow::Result<Next<Trace>>> {
        from_fn(move |ctx: &mut Trace| {
            ctx.push(name);
            Ok(Next::Continue)
        })
    }

    async fn run_to_end(pipeline: &Pipeline<Trace>, ctx: &mut Trace) -> &'static str {
        match pipeline.execute(ctx).await {
            Execution::Complete(unwind) => {
                ctx.push("complete");
                unwind.run(ctx);
                "complete"
            },
            Execution::Halted => "halted",
            Execution::Failed(_) => "failed",
        }
    }

    #[tokio::test]
    async fn forward_then_reverse_unwind() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));
        pipeline.register(wrapping("B"));
        pipeline.register(wrapping("C"));

        let mut ctx = Trace::default();
        assert_eq!(run_to_end(&pipeline, &mut ctx).await, "complete");
        assert_eq!(ctx.events, [
            "A", "B", "C", "complete", "doneC", "doneB", "doneA"
        ]);
    }

    #[tokio::test]
    async fn plain_continue_keeps_earlier_continuation() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));
        pipeline.register(passing("B"));

        let mut ctx = Trace::default();
        run_to_end(&pipeline, &mut ctx).await;
        assert_eq!(ctx.events, ["A", "B", "complete", "doneA"]);
    }

    #[tokio::test]
    async fn done_skips_rest_and_unwinds() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));
        pipeline.register(from_fn(|ctx: &mut Trace| {
            ctx.push("B");
            Ok(Next::Done)
        }));
        pipeline.register(passing("C"));

        let mut ctx = Trace::default();
        assert_eq!(run_to_end(&pipeline, &mut ctx).await, "halted");
        assert_eq!(ctx.events, ["A", "B", "doneA"]);
    }

    #[tokio::test]
    async fn error_stops_forward_progress_and_unwinds_lifo() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));
        pipeline.register(wrapping("B"));
        pipeline.register(from_fn(|ctx: &mut Trace| {
            ctx.push("C");
            anyhow::bail!("stage C broke")
        }));
        pipeline.register(passing("D"));

        let mut ctx = Trace::default();
        let execution = pipeline.execute(&mut ctx).await;
        let Execution::Failed(err) = execution else {
            panic!("expected failure, got {execution:?}");
        };
        assert!(matches!(err, Error::Middleware { pipeline: "test", .. }));
        assert!(err.to_string().contains("stage C broke"));
        assert_eq!(ctx.events, ["A", "B", "C", "doneB", "doneA"]);
    }

    #[tokio::test]
    async fn panicking_stage_is_a_failure() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));
        pipeline.register(from_fn(|_: &mut Trace| -> anyhow::Result<Next<Trace>> {
            panic!("stage exploded")
        }));

        let mut ctx = Trace::default();
        let execution = pipeline.execute(&mut ctx).await;
        let Execution::Failed(Error::Panicked { message, .. }) = execution else {
            panic!("expected panic failure, got {execution:?}");
        };
        assert_eq!(message, "stage exploded");
        assert_eq!(ctx.events, ["A", "doneA"]);
    }

    #[tokio::test]
    async fn panicking_continuation_does_not_block_the_rest() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));
        pipeline.register(from_fn(|_: &mut Trace| {
            Ok(Next::continue_with(|_: &mut Trace| panic!("cleanup failed")))
        }));

        let mut ctx = Trace::default();
        run_to_end(&pipeline, &mut ctx).await;
        assert_eq!(ctx.events, ["A", "complete", "doneA"]);
    }

    #[tokio::test]
    async fn empty_pipeline_completes_on_a_later_turn() {
        let pipeline: Pipeline<Trace> = Pipeline::new("test");
        let mut ctx = Trace::default();
        assert!(pipeline.execute(&mut ctx).now_or_never().is_none());

        let execution = pipeline.execute(&mut ctx).await;
        let Execution::Complete(unwind) = execution else {
            panic!("expected completion");
        };
        assert!(unwind.is_empty());
        unwind.run(&mut ctx);
    }

    struct Deferred(&'static str);

    #[async_trait]
    impl Middleware<Trace> for Deferred {
        async fn handle(&self, ctx: &mut Trace) -> anyhow::Result<Next<Trace>> {
            tokio::task::yield_now().await;
            ctx.push(self.0);
            let name = self.0;
            Ok(Next::continue_with(move |ctx: &mut Trace| {
                ctx.push(format!("done{name}"))
            }))
        }
    }

    #[tokio::test]
    async fn asynchronous_stages_keep_ordering() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(Deferred("A"));
        pipeline.register(wrapping("B"));
        pipeline.register(Deferred("C"));

        let mut ctx = Trace::default();
        run_to_end(&pipeline, &mut ctx).await;
        assert_eq!(ctx.events, [
            "A", "B", "C", "complete", "doneC", "doneB", "doneA"
        ]);
    }

    #[tokio::test]
    async fn executions_are_independent() {
        let mut pipeline = Pipeline::new("test");
        pipeline.register(wrapping("A"));

        let mut first = Trace::default();
        let mut second = Trace::default();
        run_to_end(&pipeline, &mut first).await;
        run_to_end(&pipeline, &mut second).await;
        assert_eq!(first.events, second.events);
        assert_eq!(pipeline.len(), 1);
    }
}
