use crate::{Error, Result};
use futures::{
    StreamExt, TryStreamExt,
    future,
    stream::{self, BoxStream},
};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};

/// Container a method hands its results back in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// Lazy pull stream, nothing runs until polled.
    #[default]
    Stream,
    /// Pushed into a channel by a task spawned on the call.
    Channel,
    /// Collected by a task spawned on the call.
    Eager,
}

/// Results of a method call, in the shape the method declares.
///
/// Every shape yields the same elements in the same order.
pub enum MethodOutput<T> {
    Stream(BoxStream<'static, Result<T>>),
    Channel(mpsc::Receiver<Result<T>>),
    Eager(EagerTask<T>),
}

/// Task collecting every result of an eager call, errors included.
///
/// Dropping it aborts the task together with the stream it drives.
pub struct EagerTask<T>(JoinHandle<Vec<Result<T>>>);

impl<T> Drop for EagerTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for EagerTask<T> {
    type Output = Result<Vec<Result<T>>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map_err(Error::new)
    }
}

impl<T: Send + 'static> MethodOutput<T> {
    /// Wraps `stream` into `shape`. Shapes that spawn fall back to a plain
    /// stream outside of a tokio runtime.
    pub fn adapt(stream: BoxStream<'static, Result<T>>, shape: ReturnShape) -> Self {
        if shape == ReturnShape::Stream {
            return MethodOutput::Stream(stream);
        }
        let Ok(handle) = Handle::try_current() else {
            log::warn!("No tokio runtime available for {shape:?} results, returning a stream");
            return MethodOutput::Stream(stream);
        };
        match shape {
            ReturnShape::Channel => {
                let (tx, rx) = mpsc::channel(1);
                handle.spawn(async move {
                    let mut stream = stream;
                    while let Some(item) = stream.next().await {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                });
                MethodOutput::Channel(rx)
            }
            _ => MethodOutput::Eager(EagerTask(handle.spawn(stream.collect()))),
        }
    }

    /// Stream failing with `error`.
    pub fn failed(error: Error) -> Self {
        MethodOutput::Stream(stream::once(future::ready(Err(error))).boxed())
    }

    pub fn shape(&self) -> ReturnShape {
        match self {
            MethodOutput::Stream(..) => ReturnShape::Stream,
            MethodOutput::Channel(..) => ReturnShape::Channel,
            MethodOutput::Eager(..) => ReturnShape::Eager,
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        match self {
            MethodOutput::Stream(stream) => stream,
            MethodOutput::Channel(rx) => {
                stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) })
                    .boxed()
            }
            MethodOutput::Eager(task) => stream::once(task)
                .flat_map(|results| match results {
                    Ok(values) => stream::iter(values).left_stream(),
                    Err(e) => stream::once(future::ready(Err(e))).right_stream(),
                })
                .boxed(),
        }
    }

    /// All the results, the first error aborts.
    pub async fn collect(self) -> Result<Vec<T>> {
        self.into_stream().try_collect().await
    }
}
