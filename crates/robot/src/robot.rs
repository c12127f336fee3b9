//! The dispatcher: inbound middleware, the listener loop and catch-all fallback.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use {
    async_trait::async_trait,
    regex::Regex,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{
    counter, dispatch as dispatch_metrics, gauge, histogram, labels,
    listeners as listener_metrics,
};

use crate::{
    adapter::{Adapter, Envelope, NullAdapter},
    brain::Brain,
    context::{ListenerContext, ReceiveContext, ResponseContext},
    error::{Error, Result},
    listener::{Handler, Listener, ListenerOptions, Match, Matcher, TextMatcher},
    message::Message,
    pipeline::{Execution, Middleware, Pipeline, UnwindStack},
    response::Response,
};

/// Receives every error raised while dispatching, with the response that was
/// being handled.
pub trait ErrorObserver: Send + Sync {
    fn on_error(&self, error: &Error, response: &Response);
}

impl<F> ErrorObserver for F
where
    F: Fn(&Error, &Response) + Send + Sync,
{
    fn on_error(&self, error: &Error, response: &Response) {
        self(error, response)
    }
}

/// A chat robot: listeners, three middleware pipelines, an adapter and a
/// brain. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Robot {
    inner: Arc<RobotInner>,
}

struct RobotInner {
    name: String,
    alias: Option<String>,
    adapter: Arc<dyn Adapter>,
    brain: Brain,
    listeners: Vec<Arc<Listener>>,
    receive_middleware: Pipeline<ReceiveContext>,
    listener_middleware: Pipeline<ListenerContext>,
    response_middleware: Pipeline<ResponseContext>,
    observers: Vec<Arc<dyn ErrorObserver>>,
}

/// One inbound pipeline run whose unwind is still pending.
struct Attempt {
    ctx: ReceiveContext,
    unwind: UnwindStack<ReceiveContext>,
    executed: bool,
}

impl Attempt {
    fn finish(mut self) {
        self.unwind.run(&mut self.ctx);
    }
}

impl Robot {
    pub fn builder(name: impl Into<String>) -> RobotBuilder {
        RobotBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.inner.alias.as_deref()
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    pub fn brain(&self) -> &Brain {
        &self.inner.brain
    }

    /// Registered listeners, in dispatch order.
    pub fn listeners(&self) -> &[Arc<Listener>] {
        &self.inner.listeners
    }

    pub(crate) fn response_middleware(&self) -> &Pipeline<ResponseContext> {
        &self.inner.response_middleware
    }

    /// Dispatch one inbound message.
    ///
    /// Runs receive middleware, then every listener in registration order
    /// until one finishes the message. When no listener executed, the
    /// message is dispatched once more wrapped as [`Message::CatchAll`]
    /// before the inbound middleware unwinds. Resolves once all of that is
    /// done.
    pub async fn receive(&self, message: Message) {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::MESSAGES_RECEIVED_TOTAL, labels::KIND => message.kind())
            .increment(1);

        debug!(kind = message.kind(), user = %message.user().id, "received message");
        let Some(attempt) = self.attempt(message).await else {
            return;
        };

        if !attempt.executed
            && let Some(fallback) = attempt.ctx.response.message.clone().into_catch_all()
        {
            debug!("no listeners executed; falling back to catch-all");
            #[cfg(feature = "metrics")]
            counter!(dispatch_metrics::CATCH_ALL_FALLBACKS_TOTAL).increment(1);

            if let Some(fallback) = self.attempt(fallback).await {
                fallback.finish();
            }
        }
        attempt.finish();

        #[cfg(feature = "metrics")]
        histogram!(dispatch_metrics::DURATION_SECONDS).record(start.elapsed().as_secs_f64());
    }

    /// Run receive middleware and, if it completes, the listener loop. The
    /// inbound unwind is left to the caller.
    async fn attempt(&self, message: Message) -> Option<Attempt> {
        let mut ctx = ReceiveContext {
            response: Response::new(self.clone(), message, None),
        };
        match self.inner.receive_middleware.execute(&mut ctx).await {
            Execution::Complete(unwind) => {
                let executed = self.process_listeners(&ctx).await;
                Some(Attempt {
                    ctx,
                    unwind,
                    executed,
                })
            },
            Execution::Halted => {
                debug!(kind = ctx.response.message.kind(), "receive middleware halted");
                None
            },
            Execution::Failed(err) => {
                self.report_error(&err, &ctx.response);
                None
            },
        }
    }

    /// Offer the message to each listener in turn. Returns whether any
    /// listener executed.
    async fn process_listeners(&self, ctx: &ReceiveContext) -> bool {
        let message = &ctx.response.message;
        let mut any_executed = false;
        for (index, listener) in self.inner.listeners.iter().enumerate() {
            let executed = listener
                .call(message, &self.inner.listener_middleware, self)
                .await;
            any_executed |= executed;
            if message.is_done() {
                debug!(
                    listener = index,
                    remaining = self.inner.listeners.len() - index - 1,
                    "message finished; skipping remaining listeners"
                );
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::MESSAGES_FINISHED_TOTAL).increment(1);
                break;
            }
        }
        any_executed
    }

    /// Hand `error` to every observer. A panicking observer is logged and
    /// does not stop the others.
    pub fn report_error(&self, error: &Error, response: &Response) {
        error!(
            error = %error,
            kind = response.message.kind(),
            user = %response.message.user().id,
            "dispatch error"
        );
        for observer in &self.inner.observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_error(error, response)));
            if let Err(payload) = outcome {
                let err = Error::panicked("error observer", payload);
                error!(error = %err, "error observer panicked");
            }
        }
    }

    /// Send straight to the adapter, bypassing response middleware.
    pub async fn send<I, S>(&self, envelope: &Envelope, strings: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strings = strings.into_iter().map(Into::into).collect();
        self.inner
            .adapter
            .send(envelope, strings, None)
            .await
            .map_err(|e| Error::adapter("send", e))
    }

    /// Reply straight through the adapter, bypassing response middleware.
    pub async fn reply<I, S>(&self, envelope: &Envelope, strings: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let strings = strings.into_iter().map(Into::into).collect();
        self.inner
            .adapter
            .reply(envelope, strings, None)
            .await
            .map_err(|e| Error::adapter("reply", e))
    }

    /// Let the adapter drive inbound events until it stops, then shut down.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            name = %self.inner.name,
            adapter = self.inner.adapter.name(),
            listeners = self.inner.listeners.len(),
            "robot running"
        );
        let result = self.inner.adapter.run(self.clone()).await;
        self.shutdown().await;
        result
    }

    /// Close the brain and the adapter.
    pub async fn shutdown(&self) {
        self.inner.brain.close();
        if let Err(e) = self.inner.adapter.close().await {
            warn!(error = %e, adapter = self.inner.adapter.name(), "adapter close failed");
        }
        info!(name = %self.inner.name, "robot stopped");
    }
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("name", &self.inner.name)
            .field("alias", &self.inner.alias)
            .field("adapter", &self.inner.adapter.name())
            .field("listeners", &self.inner.listeners.len())
            .finish_non_exhaustive()
    }
}

enum PendingListener {
    Ready(Listener),
    /// Addressed listeners compile once name and alias are final.
    Respond {
        pattern: String,
        options: ListenerOptions,
        callback: Box<dyn Handler>,
    },
}

/// Collects listeners, middleware and collaborators for a [`Robot`].
pub struct RobotBuilder {
    name: String,
    alias: Option<String>,
    adapter: Arc<dyn Adapter>,
    brain: Option<Brain>,
    listeners: Vec<PendingListener>,
    receive_middleware: Pipeline<ReceiveContext>,
    listener_middleware: Pipeline<ListenerContext>,
    response_middleware: Pipeline<ResponseContext>,
    observers: Vec<Arc<dyn ErrorObserver>>,
}

impl RobotBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            adapter: Arc::new(NullAdapter),
            brain: None,
            listeners: Vec::new(),
            receive_middleware: Pipeline::new("receive"),
            listener_middleware: Pipeline::new("listener"),
            response_middleware: Pipeline::new("response"),
            observers: Vec::new(),
        }
    }

    pub fn alias(&mut self, alias: impl Into<String>) -> &mut Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn adapter(&mut self, adapter: impl Adapter + 'static) -> &mut Self {
        self.adapter = Arc::new(adapter);
        self
    }

    /// Use an adapter the caller keeps a handle to.
    pub fn shared_adapter(&mut self, adapter: Arc<dyn Adapter>) -> &mut Self {
        self.adapter = adapter;
        self
    }

    pub fn brain(&mut self, brain: Brain) -> &mut Self {
        self.brain = Some(brain);
        self
    }

    pub fn on_error(&mut self, observer: Arc<dyn ErrorObserver>) -> &mut Self {
        self.observers.push(observer);
        self
    }

    /// Register a listener with a custom matcher.
    pub fn listen(
        &mut self,
        matcher: impl Matcher + 'static,
        options: ListenerOptions,
        callback: impl Handler + 'static,
    ) -> &mut Self {
        self.add_listener(Listener::new(matcher, options, callback))
    }

    pub fn add_listener(&mut self, listener: Listener) -> &mut Self {
        self.listeners.push(PendingListener::Ready(listener));
        self
    }

    /// Register a listener for any text message matching `pattern`.
    pub fn hear(
        &mut self,
        pattern: &str,
        options: ListenerOptions,
        callback: impl Handler + 'static,
    ) -> Result<&mut Self> {
        let matcher = TextMatcher::parse(pattern)?;
        Ok(self.listen(matcher, options, callback))
    }

    /// Register a listener for text addressed to the robot by name or alias
    /// and followed by `pattern`.
    pub fn respond(
        &mut self,
        pattern: &str,
        options: ListenerOptions,
        callback: impl Handler + 'static,
    ) -> Result<&mut Self> {
        Regex::new(pattern).map_err(|e| Error::invalid_pattern(pattern, e))?;
        self.listeners.push(PendingListener::Respond {
            pattern: pattern.to_string(),
            options,
            callback: Box::new(callback),
        });
        Ok(self)
    }

    /// Register a listener that only sees [`Message::CatchAll`]. The callback
    /// receives the unwrapped message.
    pub fn catch_all(&mut self, options: ListenerOptions, callback: impl Handler + 'static) -> &mut Self {
        self.listen(
            |message: &Message| message.is_catch_all().then(Match::new),
            options,
            Unwrapping(Box::new(callback)),
        )
    }

    pub fn receive_middleware(&mut self, stage: impl Middleware<ReceiveContext> + 'static) -> &mut Self {
        self.receive_middleware.register(stage);
        self
    }

    pub fn listener_middleware(&mut self, stage: impl Middleware<ListenerContext> + 'static) -> &mut Self {
        self.listener_middleware.register(stage);
        self
    }

    pub fn response_middleware(&mut self, stage: impl Middleware<ResponseContext> + 'static) -> &mut Self {
        self.response_middleware.register(stage);
        self
    }

    pub fn build(self) -> Result<Robot> {
        let Self {
            name,
            alias,
            adapter,
            brain,
            listeners,
            receive_middleware,
            listener_middleware,
            response_middleware,
            observers,
        } = self;

        if name.trim().is_empty() {
            return Err(Error::configuration("robot name must not be empty"));
        }

        let mut compiled = Vec::with_capacity(listeners.len());
        for pending in listeners {
            let listener = match pending {
                PendingListener::Ready(listener) => listener,
                PendingListener::Respond {
                    pattern,
                    options,
                    callback,
                } => {
                    let regex = respond_pattern(&name, alias.as_deref(), &pattern)?;
                    Listener::from_parts(Box::new(TextMatcher::new(regex)), options, callback)
                },
            };
            compiled.push(Arc::new(listener));
        }
        let listeners = compiled;

        #[cfg(feature = "metrics")]
        gauge!(listener_metrics::REGISTERED).set(listeners.len() as f64);

        debug!(
            name = %name,
            listeners = listeners.len(),
            receive = receive_middleware.len(),
            listener = listener_middleware.len(),
            response = response_middleware.len(),
            "robot built"
        );

        Ok(Robot {
            inner: Arc::new(RobotInner {
                name,
                alias,
                adapter,
                brain: brain.unwrap_or_default(),
                listeners,
                receive_middleware,
                listener_middleware,
                response_middleware,
                observers,
            }),
        })
    }
}

/// Catch-all callback wrapper that swaps the wrapper for the message it holds.
struct Unwrapping(Box<dyn Handler>);

#[async_trait]
impl Handler for Unwrapping {
    async fn call(&self, mut response: Response) -> anyhow::Result<()> {
        if let Message::CatchAll(wrapper) = &response.message {
            response.message = wrapper.message().clone();
        }
        self.0.call(response).await
    }
}

/// Build the regex used by `respond`: optional whitespace and `@`, the name or
/// alias with an optional `:` or `,`, then `pattern`.
///
/// Leading inline flags such as `(?i)` apply to the whole expression.
pub fn respond_pattern(name: &str, alias: Option<&str>, pattern: &str) -> Result<Regex> {
    let (flags, body) = split_inline_flags(pattern);
    if body.starts_with('^') {
        warn!(pattern, "anchors don't work well with respond, perhaps you want to use hear");
    }

    let name = regex::escape(name);
    let addressed = match alias.map(regex::escape) {
        Some(alias) => {
            let (a, b) = if name.len() > alias.len() {
                (&name, &alias)
            } else {
                (&alias, &name)
            };
            format!(r"^\s*[@]?(?:{a}[:,]?|{b}[:,]?)\s*(?:{body})")
        },
        None => format!(r"^\s*[@]?{name}[:,]?\s*(?:{body})"),
    };

    Regex::new(&format!("{flags}{addressed}")).map_err(|e| Error::invalid_pattern(pattern, e))
}

/// Split leading flag groups like `(?i)` or `(?im)` off `pattern`.
fn split_inline_flags(pattern: &str) -> (&str, &str) {
    let mut end = 0;
    while let Some(rest) = pattern[end..].strip_prefix("(?") {
        let Some(close) = rest.find(')') else {
            break;
        };
        let flags = &rest[..close];
        if flags.is_empty() || !flags.chars().all(|c| c.is_ascii_alphabetic() || c == '-') {
            break;
        }
        end += close + 3;
    }
    pattern.split_at(end)
}
