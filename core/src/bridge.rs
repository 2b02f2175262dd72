//! Blocking-to-async bridge
//!
//! Pulls a blocking iterator one item at a time on the worker pool so the
//! async scheduler keeps running other sessions while a pull is in flight.
//! Pulls are strictly sequential: the iterator is moved into the worker for
//! the duration of a pull and handed back with its item.

use futures_util::Stream;

use crate::error::PipelineExecutionError;
use crate::pool::WorkerPool;

pub struct Bridge<I> {
    source: Option<I>,
    pool: WorkerPool,
    pulls: u64,
}

impl<I, T> Bridge<I>
where
    I: Iterator<Item = Result<T, PipelineExecutionError>> + Send + 'static,
    T: Send + 'static,
{
    pub fn new(source: I, pool: WorkerPool) -> Self {
        Self {
            source: Some(source),
            pool,
            pulls: 0,
        }
    }

    /// True once the source has reported its end, or a pull was abandoned
    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Pulls completed so far
    pub fn pulls(&self) -> u64 {
        self.pulls
    }

    /// Next item from the source, or `None` once it is exhausted.
    ///
    /// Dropping the returned future while a pull is in flight detaches the
    /// pull: it runs to completion on its worker, its result is discarded and
    /// the bridge reports exhaustion from then on.
    pub async fn next(&mut self) -> Option<Result<T, PipelineExecutionError>> {
        let mut source = self.source.take()?;

        let pulled = self
            .pool
            .offload(move || {
                let item = source.next();
                (source, item)
            })
            .await;

        match pulled {
            Ok((source, item)) => {
                self.pulls += 1;
                if item.is_some() {
                    self.source = Some(source);
                }
                item
            }
            Err(e) => Some(Err(e.into())),
        }
    }

    /// Consume the bridge as a `Stream` of pulled items
    pub fn into_stream(self) -> impl Stream<Item = Result<T, PipelineExecutionError>> + Send {
        let mut bridge = self;
        async_stream::stream! {
            while let Some(item) = bridge.next().await {
                yield item;
            }
        }
    }
}
