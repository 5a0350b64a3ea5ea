//! Call-scoped token streaming
//!
//! Every streaming call gets its own bounded channel. The producer side is a
//! [`TokenSink`] handed to the engine or remote client; the consumer sees a
//! [`CompletionStream`] of tokens followed by the final result.

use duet_kernel::inference::CompletionResult;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

/// Tokens buffered before a slow consumer applies back-pressure.
pub const TOKEN_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamToken {
    pub text: String,
    /// Engine token id; byte offset into the response for remote tokens.
    pub id: u32,
}

impl StreamToken {
    pub fn new(text: impl Into<String>, id: u32) -> Self {
        Self {
            text: text.into(),
            id,
        }
    }
}

pub type TokenSink = mpsc::Sender<StreamToken>;

pub fn token_channel() -> (TokenSink, mpsc::Receiver<StreamToken>) {
    mpsc::channel(TOKEN_CHANNEL_CAPACITY)
}

/// Tokens of an attempt that may still be abandoned. They are collected
/// off to the side and reach the caller only through [`StagedTokens::commit`].
/// Dropping the value discards them once the producer lets go of its sink.
pub(crate) struct StagedTokens {
    sink: TokenSink,
    collector: JoinHandle<Vec<StreamToken>>,
}

impl StagedTokens {
    pub(crate) fn new() -> Self {
        let (sink, mut rx) = token_channel();
        // Drained concurrently so a blocking producer never stalls on capacity.
        let collector = tokio::spawn(async move {
            let mut tokens = Vec::new();
            while let Some(token) = rx.recv().await {
                tokens.push(token);
            }
            tokens
        });
        Self { sink, collector }
    }

    /// Producer side for the attempt. Every clone must be dropped before commit.
    pub(crate) fn sink(&self) -> TokenSink {
        self.sink.clone()
    }

    /// Forward the collected tokens to `target` in order.
    pub(crate) async fn commit(self, target: &TokenSink) {
        drop(self.sink);
        let Ok(tokens) = self.collector.await else {
            return;
        };
        for token in tokens {
            if target.send(token).await.is_err() {
                break;
            }
        }
    }
}

/// Commit `staged` into `target` when the call is streaming.
pub(crate) async fn commit_staged(staged: Option<StagedTokens>, target: Option<&TokenSink>) {
    if let (Some(staged), Some(target)) = (staged, target) {
        staged.commit(target).await;
    }
}

/// Token stream of one completion plus the task producing its result.
pub struct CompletionStream {
    tokens: ReceiverStream<StreamToken>,
    task: JoinHandle<CompletionResult>,
}

impl CompletionStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamToken>, task: JoinHandle<CompletionResult>) -> Self {
        Self {
            tokens: ReceiverStream::new(rx),
            task,
        }
    }

    /// Wait for the final result. Tokens not yet consumed are discarded.
    pub async fn finish(self) -> CompletionResult {
        drop(self.tokens);
        match self.task.await {
            Ok(result) => result,
            Err(e) => CompletionResult::failure(format!("completion task failed: {e}")),
        }
    }
}

impl Stream for CompletionStream {
    type Item = StreamToken;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.tokens).poll_next(cx)
    }
}
