//! Line-oriented stdin/stdout adapter.

use std::sync::atomic::{AtomicU64, Ordering};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    herald_robot::{Adapter, Envelope, Message, Robot, SendCallback, TextMessage},
    serde_json::json,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
        sync::Mutex,
    },
    tracing::debug,
};

type Input = Box<dyn AsyncBufRead + Send + Unpin>;
type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Each input line becomes a text message from a single local user; output
/// goes back out one string per line.
pub struct ShellAdapter {
    input: Mutex<Option<Input>>,
    output: Mutex<Output>,
    next_id: AtomicU64,
}

impl ShellAdapter {
    pub fn stdio() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }

    pub fn with_io(
        input: impl AsyncBufRead + Send + Unpin + 'static,
        output: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            input: Mutex::new(Some(Box::new(input))),
            output: Mutex::new(Box::new(output)),
            next_id: AtomicU64::new(1),
        }
    }

    async fn write_lines(&self, lines: impl Iterator<Item = String>) -> Result<()> {
        let mut output = self.output.lock().await;
        for line in lines {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
        }
        output.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Adapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    async fn send(
        &self,
        _envelope: &Envelope,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        self.write_lines(strings.into_iter().filter(|s| !s.is_empty()))
            .await?;
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    async fn reply(
        &self,
        envelope: &Envelope,
        strings: Vec<String>,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        let name = &envelope.user.name;
        self.write_lines(
            strings
                .into_iter()
                .filter(|s| !s.is_empty())
                .map(|s| format!("{name}: {s}")),
        )
        .await?;
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }

    async fn run(&self, robot: Robot) -> Result<()> {
        let Some(input) = self.input.lock().await.take() else {
            bail!("shell adapter is already running");
        };

        let options = json!({ "name": "Shell", "room": "Shell" });
        let user = robot.brain().user_for_id("1", options.as_object().cloned());

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if matches!(text, "exit" | "quit") {
                break;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            debug!(id, "shell input");
            let message: Message = TextMessage::new(user.clone(), text)
                .with_id(id.to_string())
                .into();
            robot.receive(message).await;
        }
        Ok(())
    }
}
