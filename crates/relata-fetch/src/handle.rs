//! Shareable completion handles for in-flight fetches.

use crate::FetchError;
use futures::future::{BoxFuture, FutureExt, Shared};
use relata_graph::ModelRef;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

pub type FetchResult = Result<Vec<ModelRef>, FetchError>;

/// Completion of one fetch. Clones observe the same outcome; awaiting a
/// handle is optional, the work runs on its own task.
#[derive(Clone)]
pub struct FetchHandle {
    inner: Shared<BoxFuture<'static, FetchResult>>,
    done: Arc<AtomicBool>,
}

impl FetchHandle {
    /// Drive `work` on a Tokio task. Must be called inside a runtime.
    pub(crate) fn spawn(work: impl Future<Output = FetchResult> + Send + 'static) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let task = tokio::spawn(async move {
            let result = work.await;
            flag.store(true, Ordering::Release);
            result
        });
        let inner = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => Err(FetchError::Join(err.to_string())),
            }
        }
        .boxed()
        .shared();
        Self { inner, done }
    }

    /// An already settled handle
    pub fn ready(result: FetchResult) -> Self {
        Self {
            inner: futures::future::ready(result).boxed().shared(),
            done: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn same_as(&self, other: &FetchHandle) -> bool {
        Arc::ptr_eq(&self.done, &other.done)
    }
}

impl Future for FetchHandle {
    type Output = FetchResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}
