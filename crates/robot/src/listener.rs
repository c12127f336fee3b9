//! Listeners: a matcher, options and a callback evaluated per inbound message.

use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use {
    async_trait::async_trait,
    futures::FutureExt,
    regex::{Captures, Regex},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::{debug, trace},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, labels, listeners as listener_metrics};

use crate::{
    context::ListenerContext,
    error::{Error, Result},
    message::Message,
    pipeline::{Execution, Pipeline},
    response::Response,
    robot::Robot,
};

/// The result of a successful match.
///
/// For text listeners these are the capture groups, index 0 being the whole
/// match. Custom matchers may return an empty match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    groups: Vec<Option<String>>,
}

impl Match {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(|g| g.map(Into::into)).collect(),
        }
    }

    pub fn from_captures(captures: &Captures<'_>) -> Self {
        Self {
            groups: captures
                .iter()
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// Group `index`, or `None` when it does not exist or did not participate.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> {
        self.groups.iter().map(Option::as_deref)
    }
}

/// Decides whether a listener wants a message.
pub trait Matcher: Send + Sync {
    fn matches(&self, message: &Message) -> Option<Match>;
}

impl<F> Matcher for F
where
    F: Fn(&Message) -> Option<Match> + Send + Sync,
{
    fn matches(&self, message: &Message) -> Option<Match> {
        self(message)
    }
}

/// Matches the text of [`Message::Text`] against a regex.
///
/// Every other variant, catch-alls included, never matches.
#[derive(Debug, Clone)]
pub struct TextMatcher {
    regex: Regex,
}

impl TextMatcher {
    pub fn new(regex: Regex) -> Self {
        Self { regex }
    }

    pub fn parse(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::new)
            .map_err(|e| Error::invalid_pattern(pattern, e))
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl Matcher for TextMatcher {
    fn matches(&self, message: &Message) -> Option<Match> {
        message.as_text()?.match_pattern(&self.regex)
    }
}

/// A listener callback.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, response: Response) -> anyhow::Result<()>;
}

/// Wraps a synchronous closure as a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(Response) -> anyhow::Result<()> + Send + Sync,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(Response) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, response: Response) -> anyhow::Result<()> {
        (self.0)(response)
    }
}

/// Wraps a closure returning a future as a [`Handler`].
pub struct AsyncHandlerFn<F>(F);

pub fn async_handler_fn<F, Fut>(f: F) -> AsyncHandlerFn<F>
where
    F: Fn(Response) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    AsyncHandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for AsyncHandlerFn<F>
where
    F: Fn(Response) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, response: Response) -> anyhow::Result<()> {
        (self.0)(response).await
    }
}

/// Listener metadata. `id` is always present, possibly `None`; anything else
/// is free-form and visible to listener middleware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerOptions {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ListenerOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// A registered `{matcher, options, callback}` triple. Immutable once built.
pub struct Listener {
    matcher: Box<dyn Matcher>,
    options: ListenerOptions,
    callback: Box<dyn Handler>,
}

impl Listener {
    pub fn new(
        matcher: impl Matcher + 'static,
        options: ListenerOptions,
        callback: impl Handler + 'static,
    ) -> Self {
        Self::from_parts(Box::new(matcher), options, Box::new(callback))
    }

    pub(crate) fn from_parts(
        matcher: Box<dyn Matcher>,
        options: ListenerOptions,
        callback: Box<dyn Handler>,
    ) -> Self {
        Self {
            matcher,
            options,
            callback,
        }
    }

    /// A listener over text messages.
    pub fn text(regex: Regex, options: ListenerOptions, callback: impl Handler + 'static) -> Self {
        Self::new(TextMatcher::new(regex), options, callback)
    }

    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.options.id.as_deref()
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Evaluate the matcher alone.
    pub fn matches(&self, message: &Message) -> Option<Match> {
        self.matcher.matches(message)
    }

    fn label(&self) -> &str {
        self.id().unwrap_or("<anonymous>")
    }

    /// Try this listener against `message`.
    ///
    /// Returns whether the listener executed: `false` when the matcher
    /// declined (or panicked), `true` once the listener middleware was
    /// entered, whether or not the middleware or the callback then failed.
    /// Always resolves on a later scheduler turn.
    pub async fn call(
        self: &Arc<Self>,
        message: &Message,
        middleware: &Pipeline<ListenerContext>,
        robot: &Robot,
    ) -> bool {
        let matched = match panic::catch_unwind(AssertUnwindSafe(|| self.matcher.matches(message)))
        {
            Ok(matched) => matched,
            Err(payload) => {
                let err = Error::panicked(format!("listener {} matcher", self.label()), payload);
                robot.report_error(&err, &Response::new(robot.clone(), message.clone(), None));
                return false;
            },
        };

        let Some(matched) = matched else {
            trace!(listener = self.label(), kind = message.kind(), "listener did not match");
            tokio::task::yield_now().await;
            return false;
        };

        debug!(listener = self.label(), kind = message.kind(), "listener matched");
        let mut ctx = ListenerContext {
            listener: Arc::clone(self),
            response: Response::new(robot.clone(), message.clone(), Some(matched)),
        };

        match middleware.execute(&mut ctx).await {
            Execution::Complete(unwind) => {
                self.invoke(ctx.response.clone(), robot).await;
                unwind.run(&mut ctx);
            },
            Execution::Halted => {
                debug!(listener = self.label(), "listener middleware halted");
            },
            Execution::Failed(err) => robot.report_error(&err, &ctx.response),
        }

        #[cfg(feature = "metrics")]
        counter!(
            listener_metrics::EXECUTED_TOTAL,
            labels::LISTENER => self.label().to_string()
        )
        .increment(1);

        tokio::task::yield_now().await;
        true
    }

    /// Run the callback, reporting errors and panics instead of propagating.
    async fn invoke(&self, response: Response, robot: &Robot) {
        let outcome = AssertUnwindSafe(self.callback.call(response.clone()))
            .catch_unwind()
            .await;
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => Error::listener_callback(self.options.id.clone(), e),
            Err(payload) => {
                Error::panicked(format!("listener {} callback", self.label()), payload)
            },
        };

        #[cfg(feature = "metrics")]
        counter!(
            listener_metrics::ERRORS_TOTAL,
            labels::LISTENER => self.label().to_string()
        )
        .increment(1);

        robot.report_error(&err, &response);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Listener`] from parts that may be supplied in any order.
#[derive(Default)]
pub struct ListenerBuilder {
    matcher: Option<Box<dyn Matcher>>,
    options: ListenerOptions,
    callback: Option<Box<dyn Handler>>,
}

impl ListenerBuilder {
    #[must_use]
    pub fn matcher(mut self, matcher: impl Matcher + 'static) -> Self {
        self.matcher = Some(Box::new(matcher));
        self
    }

    /// Use a text matcher compiled from `pattern`.
    pub fn pattern(self, pattern: &str) -> Result<Self> {
        Ok(self.matcher(TextMatcher::parse(pattern)?))
    }

    #[must_use]
    pub fn options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.options.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn callback(mut self, callback: impl Handler + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<Listener> {
        let matcher = self
            .matcher
            .ok_or_else(|| Error::configuration("listener is missing a matcher"))?;
        let callback = self
            .callback
            .ok_or_else(|| Error::configuration("listener is missing a callback"))?;
        Ok(Listener::from_parts(matcher, self.options, callback))
    }
}
