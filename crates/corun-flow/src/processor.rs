// SPDX-License-Identifier: MIT OR Apache-2.0
//! Composable per-item stream transforms.

use corun_cancel::FallibleStream;
use futures::stream::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

type Stage<T, R> = Arc<dyn Fn(FallibleStream<T>) -> FallibleStream<R> + Send + Sync>;

/// An ordered, immutable chain of stream transforms.
///
/// Every builder method returns a **new** processor with the stage
/// appended, so processors can be shared and extended divergently. A
/// processor is pure assembly: nothing runs until
/// [`apply`](FlowProcessor::apply) instantiates the chain over a source,
/// and each instantiation is independent (restartable).
pub struct FlowProcessor<T, R> {
    stage: Stage<T, R>,
}

impl<T, R> Clone for FlowProcessor<T, R> {
    fn clone(&self) -> Self {
        Self {
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<T, R> std::fmt::Debug for FlowProcessor<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowProcessor").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> FlowProcessor<T, T> {
    /// The identity processor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: Arc::new(|stream| stream),
        }
    }
}

impl<T: Send + 'static> Default for FlowProcessor<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ChunkState<R> {
    upstream: Option<FallibleStream<R>>,
    buffer: Vec<R>,
    size: usize,
}

impl<T: Send + 'static, R: Send + 'static> FlowProcessor<T, R> {
    /// Instantiate the chain over `stream`.
    #[must_use]
    pub fn apply(&self, stream: FallibleStream<T>) -> FallibleStream<R> {
        (self.stage)(stream)
    }

    fn then<S: Send + 'static>(
        &self,
        next: impl Fn(FallibleStream<R>) -> FallibleStream<S> + Send + Sync + 'static,
    ) -> FlowProcessor<T, S> {
        let previous = Arc::clone(&self.stage);
        FlowProcessor {
            stage: Arc::new(move |input| next(previous(input))),
        }
    }

    /// Keep only values matching `predicate`.
    #[must_use]
    pub fn filter<P>(&self, predicate: P) -> FlowProcessor<T, R>
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.then(move |stream| {
            let predicate = Arc::clone(&predicate);
            Box::pin(stream.try_filter(move |value| std::future::ready(predicate(value))))
        })
    }

    /// Transform each value; the mapper also receives a running index.
    #[must_use]
    pub fn map<S, M>(&self, mapper: M) -> FlowProcessor<T, S>
    where
        S: Send + 'static,
        M: Fn(R, usize) -> S + Send + Sync + 'static,
    {
        let mapper = Arc::new(mapper);
        self.then(move |stream| {
            let mapper = Arc::clone(&mapper);
            let mut index = 0usize;
            Box::pin(stream.map_ok(move |value| {
                let out = mapper(value, index);
                index += 1;
                out
            }))
        })
    }

    /// Expand each value into a sub-stream and flatten, preserving
    /// upstream order.
    #[must_use]
    pub fn compose<S, M>(&self, mapper: M) -> FlowProcessor<T, S>
    where
        S: Send + 'static,
        M: Fn(R) -> FallibleStream<S> + Send + Sync + 'static,
    {
        let mapper = Arc::new(mapper);
        self.then(move |stream| {
            let mapper = Arc::clone(&mapper);
            Box::pin(stream.map_ok(move |value| mapper(value)).try_flatten())
        })
    }

    /// Observe each value without changing it.
    #[must_use]
    pub fn peek<P>(&self, inspect: P) -> FlowProcessor<T, R>
    where
        P: Fn(&R) + Send + Sync + 'static,
    {
        let inspect = Arc::new(inspect);
        self.then(move |stream| {
            let inspect = Arc::clone(&inspect);
            Box::pin(stream.inspect_ok(move |value| inspect(value)))
        })
    }

    /// Swallow values until `predicate` first matches; emit that value and
    /// everything after it.
    #[must_use]
    pub fn skip_until<P>(&self, predicate: P) -> FlowProcessor<T, R>
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.then(move |stream| {
            let predicate = Arc::clone(&predicate);
            Box::pin(stream.try_skip_while(move |value| {
                std::future::ready(Ok::<bool, anyhow::Error>(!predicate(value)))
            }))
        })
    }

    /// Emit values while `predicate` holds; end on the first miss.
    #[must_use]
    pub fn take_while<P>(&self, predicate: P) -> FlowProcessor<T, R>
    where
        P: Fn(&R) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.then(move |stream| {
            let predicate = Arc::clone(&predicate);
            Box::pin(stream.try_take_while(move |value| {
                std::future::ready(Ok::<bool, anyhow::Error>(predicate(value)))
            }))
        })
    }

    /// Recover from error items: when `handler` returns `true` the error
    /// is dropped and iteration resumes; otherwise it is re-emitted and
    /// the stream ends.
    #[must_use]
    pub fn resume_on_error<H>(&self, handler: H) -> FlowProcessor<T, R>
    where
        H: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.then(move |stream| {
            let handler = Arc::clone(&handler);
            Box::pin(futures::stream::unfold(
                (Some(stream), handler),
                |(mut upstream, handler)| async move {
                    let mut stream = upstream.take()?;
                    loop {
                        match stream.next().await {
                            Some(Ok(value)) => {
                                return Some((Ok(value), (Some(stream), handler)));
                            }
                            Some(Err(err)) => {
                                if handler(&err) {
                                    debug!(target: "corun.flow", error = %err, "recovered stream error");
                                    continue;
                                }
                                return Some((Err(err), (None, handler)));
                            }
                            None => return None,
                        }
                    }
                },
            ))
        })
    }

    /// Recover from every error item (the default recovery policy).
    #[must_use]
    pub fn resume_on_any_error(&self) -> FlowProcessor<T, R> {
        self.resume_on_error(|_| true)
    }

    /// Collect values into arrays of `size`, flushing any remainder at
    /// end-of-stream. Errors pass through without disturbing the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[must_use]
    pub fn chunk(&self, size: usize) -> FlowProcessor<T, Vec<R>> {
        assert!(size >= 1, "chunk size must be at least 1");
        self.then(move |stream| {
            Box::pin(futures::stream::unfold(
                ChunkState {
                    upstream: Some(stream),
                    buffer: Vec::new(),
                    size,
                },
                |mut state| async move {
                    let mut stream = state.upstream.take()?;
                    loop {
                        match stream.next().await {
                            Some(Ok(value)) => {
                                state.buffer.push(value);
                                if state.buffer.len() >= state.size {
                                    let chunk = std::mem::take(&mut state.buffer);
                                    state.upstream = Some(stream);
                                    return Some((Ok(chunk), state));
                                }
                            }
                            Some(Err(err)) => {
                                state.upstream = Some(stream);
                                return Some((Err(err), state));
                            }
                            None => {
                                if state.buffer.is_empty() {
                                    return None;
                                }
                                let chunk = std::mem::take(&mut state.buffer);
                                return Some((Ok(chunk), state));
                            }
                        }
                    }
                },
            ))
        })
    }
}
