// SPDX-License-Identifier: MIT OR Apache-2.0
//! The lazy, restartable publisher.

use crate::observable::{BridgeOptions, Observable, Observer, Subscription};
use crate::processor::FlowProcessor;
use corun_buffer::{AsyncQueue, QueueError};
use corun_cancel::{
    CancelStreamOptions, CancellationSource, CancellationToken, FallibleStream,
    cancellable_stream,
};
use futures::stream::StreamExt;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

type SourceFactory<T> = Arc<dyn Fn() -> FallibleStream<T> + Send + Sync>;

/// A lazy, restartable async stream with composable stages.
///
/// A flowable closes over a source factory: nothing runs until a terminal
/// is called, and every terminal call builds a fresh pipeline instance, so
/// one flowable can be drained many times and shared freely. Builder
/// methods return a new flowable with the stage appended.
pub struct Flowable<T> {
    factory: SourceFactory<T>,
}

impl<T> Clone for Flowable<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T> std::fmt::Debug for Flowable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flowable").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Flowable<T> {
    // -- sources ---------------------------------------------------------

    /// A flowable over a custom source factory.
    #[must_use]
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn() -> FallibleStream<T> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// A flowable over a cloneable collection of items.
    #[must_use]
    pub fn of<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_factory(move || {
            let items = items.clone();
            Box::pin(futures::stream::iter(items.into_iter().map(Ok)))
        })
    }

    /// A one-item flowable.
    #[must_use]
    pub fn single(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::of([value])
    }

    /// The empty flowable.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_factory(|| Box::pin(futures::stream::empty()))
    }

    /// Concatenate several flowables, draining each in turn.
    #[must_use]
    pub fn concat(parts: Vec<Flowable<T>>) -> Self {
        Self::from_factory(move || {
            let streams: Vec<FallibleStream<T>> =
                parts.iter().map(|part| (part.factory)()).collect();
            Box::pin(futures::stream::iter(streams).flatten())
        })
    }

    /// This flowable followed by `other`.
    #[must_use]
    pub fn concat_with(&self, other: &Flowable<T>) -> Self {
        Self::concat(vec![self.clone(), other.clone()])
    }

    /// Bridge a push-based observable: each terminal run subscribes anew,
    /// buffering pushed items in an [`AsyncQueue`] sized by `options`.
    ///
    /// Producer completion ends the stream after the buffered remainder is
    /// drained; a producer error (or an overflow under the `Fixed` policy)
    /// surfaces as the stream's error. Dropping the stream unsubscribes.
    #[must_use]
    pub fn from_observable<O>(observable: Arc<O>, options: BridgeOptions) -> Self
    where
        O: Observable<T> + 'static,
    {
        Self::from_factory(move || {
            let queue = match options.buffer_size {
                Some(capacity) => AsyncQueue::bounded(capacity, options.overflow),
                None => AsyncQueue::unbounded(),
            };
            let failure = Arc::new(Mutex::new(None));
            let observer = Arc::new(BridgeObserver {
                queue: queue.clone(),
                failure: Arc::clone(&failure),
            });
            let guard = SubscriptionGuard(observable.subscribe(observer));
            let state = DrainState {
                queue,
                failure,
                token: options.token.clone(),
                _guard: guard,
            };
            Box::pin(futures::stream::unfold(
                (Some(state), false),
                |(state, done)| async move {
                    if done {
                        return None;
                    }
                    let state = state?;
                    match state.queue.dequeue_until(&state.token).await {
                        Ok(Some(value)) => Some((Ok(value), (Some(state), false))),
                        Ok(None) => {
                            let pending = state
                                .failure
                                .lock()
                                .expect("bridge failure slot poisoned")
                                .take();
                            match pending {
                                Some(err) => Some((Err(err), (None, true))),
                                None => None,
                            }
                        }
                        Err(cancelled) => Some((Err(cancelled.into()), (None, true))),
                    }
                },
            ))
        })
    }

    /// A flowable over a broadcast channel: each terminal run subscribes a
    /// fresh receiver, so the flowable behaves as a restartable event
    /// source. A receiver that lags surfaces the loss as a stream error.
    #[must_use]
    pub fn events(sender: tokio::sync::broadcast::Sender<T>) -> Self
    where
        T: Clone,
    {
        Self::from_factory(move || {
            let receiver = sender.subscribe();
            Box::pin(
                BroadcastStream::new(receiver)
                    .map(|item| item.map_err(anyhow::Error::new)),
            )
        })
    }

    // -- stages ----------------------------------------------------------

    fn wrap<R: Send + 'static>(
        &self,
        stage: impl Fn(FallibleStream<T>) -> FallibleStream<R> + Send + Sync + 'static,
    ) -> Flowable<R> {
        let factory = Arc::clone(&self.factory);
        Flowable {
            factory: Arc::new(move || stage(factory())),
        }
    }

    /// Run this flowable through a prebuilt processor chain.
    #[must_use]
    pub fn pipe<R: Send + 'static>(&self, processor: &FlowProcessor<T, R>) -> Flowable<R> {
        let processor = processor.clone();
        self.wrap(move |stream| processor.apply(stream))
    }

    /// Keep only values matching `predicate`.
    #[must_use]
    pub fn filter<P>(&self, predicate: P) -> Flowable<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().filter(predicate))
    }

    /// Transform each value with its running index.
    #[must_use]
    pub fn map<R, M>(&self, mapper: M) -> Flowable<R>
    where
        R: Send + 'static,
        M: Fn(T, usize) -> R + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().map(mapper))
    }

    /// Expand each value into a sub-stream and flatten.
    #[must_use]
    pub fn compose<R, M>(&self, mapper: M) -> Flowable<R>
    where
        R: Send + 'static,
        M: Fn(T) -> FallibleStream<R> + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().compose(mapper))
    }

    /// Observe each value without changing it.
    #[must_use]
    pub fn peek<P>(&self, inspect: P) -> Flowable<T>
    where
        P: Fn(&T) + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().peek(inspect))
    }

    /// Swallow values until `predicate` first matches.
    #[must_use]
    pub fn skip_until<P>(&self, predicate: P) -> Flowable<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().skip_until(predicate))
    }

    /// Emit values while `predicate` holds.
    #[must_use]
    pub fn take_while<P>(&self, predicate: P) -> Flowable<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().take_while(predicate))
    }

    /// Recover from error items per `handler`.
    #[must_use]
    pub fn resume_on_error<H>(&self, handler: H) -> Flowable<T>
    where
        H: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.pipe(&FlowProcessor::new().resume_on_error(handler))
    }

    /// Recover from every error item.
    #[must_use]
    pub fn resume_on_any_error(&self) -> Flowable<T> {
        self.pipe(&FlowProcessor::new().resume_on_any_error())
    }

    /// Collect values into arrays of `size`.
    #[must_use]
    pub fn chunk(&self, size: usize) -> Flowable<Vec<T>> {
        self.pipe(&FlowProcessor::new().chunk(size))
    }

    // -- terminals -------------------------------------------------------

    fn open(&self, options: CancelStreamOptions) -> FallibleStream<T> {
        cancellable_stream((self.factory)(), options)
    }

    /// Build a fresh pipeline instance as a plain stream. Cancellation of
    /// `options.token` ends the stream silently unless
    /// `throw_on_cancellation` is set.
    #[must_use]
    pub fn to_stream(&self, options: CancelStreamOptions) -> FallibleStream<T> {
        self.open(options)
    }

    /// Drain into a vector. Cancellation surfaces as an error.
    pub async fn to_vec(&self, token: &CancellationToken) -> anyhow::Result<Vec<T>> {
        self.to_vec_with(CancelStreamOptions::strict(token)).await
    }

    /// Drain into a vector with explicit cancellation options; with a
    /// non-strict wrapper a cancelled drain yields the partial prefix.
    pub async fn to_vec_with(&self, options: CancelStreamOptions) -> anyhow::Result<Vec<T>> {
        let mut stream = self.open(options);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item?);
        }
        Ok(out)
    }

    /// Drain invoking `visit` per item. Cancellation surfaces as an error.
    pub async fn for_each<F>(&self, visit: F, token: &CancellationToken) -> anyhow::Result<()>
    where
        F: FnMut(T),
    {
        self.for_each_with(visit, CancelStreamOptions::strict(token))
            .await
    }

    /// Drain invoking `visit` per item, with explicit cancellation
    /// options.
    pub async fn for_each_with<F>(
        &self,
        mut visit: F,
        options: CancelStreamOptions,
    ) -> anyhow::Result<()>
    where
        F: FnMut(T),
    {
        let mut stream = self.open(options);
        while let Some(item) = stream.next().await {
            visit(item?);
        }
        Ok(())
    }

    /// Pull the first value, then release the pipeline. `None` when the
    /// stream is empty.
    pub async fn select_first(&self, token: &CancellationToken) -> anyhow::Result<Option<T>> {
        let mut stream = self.open(CancelStreamOptions::strict(token));
        match stream.next().await {
            Some(item) => Ok(Some(item?)),
            None => Ok(None),
        }
        // Dropping the stream releases the upstream source.
    }

    /// Drain the stream, keeping the last value. `None` when the stream is
    /// empty.
    pub async fn select_last(&self, token: &CancellationToken) -> anyhow::Result<Option<T>> {
        let mut stream = self.open(CancelStreamOptions::strict(token));
        let mut last = None;
        while let Some(item) = stream.next().await {
            last = Some(item?);
        }
        Ok(last)
    }

    /// Push-based bridge: drain asynchronously into `observer`, emitting
    /// `on_next` per item and then exactly one of `on_complete` /
    /// `on_error`. Unsubscribing short-circuits further `on_next` and
    /// completes the stream.
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let source = CancellationSource::new();
        let token = source.token();
        let mut stream = self.open(CancelStreamOptions::with_token(&token));
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(value)) => {
                        if token.is_cancelled() {
                            break;
                        }
                        observer.on_next(value);
                    }
                    Some(Err(err)) => {
                        debug!(target: "corun.flow", error = %err, "subscription errored");
                        observer.on_error(err);
                        return;
                    }
                    None => break,
                }
            }
            observer.on_complete();
        });
        Subscription::new(source)
    }
}

// ---------------------------------------------------------------------------
// Observable bridge plumbing
// ---------------------------------------------------------------------------

struct BridgeObserver<T> {
    queue: AsyncQueue<T>,
    failure: Arc<Mutex<Option<anyhow::Error>>>,
}

impl<T: Send + 'static> Observer<T> for BridgeObserver<T> {
    fn on_next(&self, value: T) {
        match self.queue.enqueue(value) {
            Ok(()) => {}
            Err(err @ QueueError::Full { .. }) => {
                // Overflow under the Fixed policy becomes the stream error.
                *self.failure.lock().expect("bridge failure slot poisoned") =
                    Some(anyhow::Error::new(err));
                self.queue.close();
            }
            Err(_) => {
                // Already read-only or closed: the producer outlived the
                // stream; drop the value.
            }
        }
    }

    fn on_error(&self, error: anyhow::Error) {
        *self.failure.lock().expect("bridge failure slot poisoned") = Some(error);
        self.queue.close();
    }

    fn on_complete(&self) {
        self.queue.set_read_only();
    }
}

struct SubscriptionGuard(Subscription);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

struct DrainState<T> {
    queue: AsyncQueue<T>,
    failure: Arc<Mutex<Option<anyhow::Error>>>,
    token: CancellationToken,
    // Held for its Drop: ends the upstream subscription with the stream.
    _guard: SubscriptionGuard,
}
