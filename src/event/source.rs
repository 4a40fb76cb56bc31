use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    net::UnixStream,
};
use tracing::warn;

use crate::event::Event;

#[async_trait]
pub trait EventStream: Send {
    /// `Ok(None)` once the remote end closed the stream.
    async fn next(&mut self) -> Result<Option<Event>>;
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventStream>>;
}

/// JSON lines, one event per line. Malformed lines are skipped.
pub struct LineStream<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LineStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventStream for LineStream<R> {
    async fn next(&mut self) -> Result<Option<Event>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Event::from_line(line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => warn!("skipping malformed event line: {}", e),
            }
        }
    }
}

pub struct UnixSocketSource {
    path: PathBuf,
}

impl UnixSocketSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EventSource for UnixSocketSource {
    async fn connect(&self) -> Result<Box<dyn EventStream>> {
        let stream = UnixStream::connect(&self.path).await?;
        Ok(Box::new(LineStream::new(BufReader::new(stream))))
    }
}
