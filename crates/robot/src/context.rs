//! Per-execution records handed to middleware stages.
//!
//! Each context is created fresh for one pipeline execution and owned by it.

use std::{fmt, sync::Arc};

use crate::{listener::Listener, response::Response};

/// Context for inbound (`receive`) middleware.
///
/// Stages may rewrite `response.message`; listeners see the rewritten message.
#[derive(Debug)]
pub struct ReceiveContext {
    pub response: Response,
}

/// Context for listener middleware, built once a listener matched.
#[derive(Debug)]
pub struct ListenerContext {
    pub listener: Arc<Listener>,
    pub response: Response,
}

/// Context for outbound (`response`) middleware.
#[derive(Debug)]
pub struct ResponseContext {
    pub response: Response,
    /// Lines to deliver. Stages may replace the vector or edit it in place.
    pub strings: Vec<String>,
    pub method: Method,
    pub plaintext: bool,
}

/// Which adapter operation an outbound call ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Send,
    Reply,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Reply => "reply",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
