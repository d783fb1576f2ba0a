use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};

/// A join handle whose task dies with it. The supervisor keeps one per
/// spawned task; dropping the set on shutdown aborts whatever is still
/// running.
pub struct AbortOnDropHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> From<JoinHandle<T>> for AbortOnDropHandle<T> {
    fn from(inner: JoinHandle<T>) -> Self {
        AbortOnDropHandle { inner }
    }
}

impl<T> Future for AbortOnDropHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl<T> Drop for AbortOnDropHandle<T> {
    fn drop(&mut self) {
        self.inner.abort();
    }
}
