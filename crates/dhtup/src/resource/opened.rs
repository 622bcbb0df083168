use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::time::Sleep;
use tokio_util::sync::WaitForCancellationFutureOwned;

use super::error::{ResourceError, Step};
use crate::record::Record;
use crate::scope::{Scope, ScopeError};
use crate::swarm::{ContentId, FileEntry, FileReader};
use crate::target::Target;

// manifest sizes are untrusted
const MAX_PREALLOC: u64 = 1 << 20;

/// A readable file of a resolved resource
///
/// Once the opening scope is cancelled every read fails with an `Other`
///  error, and once its deadline passes with a `TimedOut` error. Neither
///  is retryable, and both carry the [`ScopeError`] as their inner error.
///  Dropping the handle releases the underlying reader; the swarm session
///  it came from stays alive.
pub struct OpenedResource {
    reader: FileReader,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    deadline: Option<Pin<Box<Sleep>>>,
    interrupted: Option<ScopeError>,
    target: Target,
    record: Record,
    entry: FileEntry,
}

impl std::fmt::Debug for OpenedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedResource")
            .field("content_id", &self.record.content_id)
            .field("seq", &self.record.seq)
            .field("path", &self.entry.path)
            .field("len", &self.entry.size)
            .finish()
    }
}

impl OpenedResource {
    pub(crate) fn new(
        reader: FileReader,
        scope: &Scope,
        target: Target,
        record: Record,
        entry: FileEntry,
    ) -> Self {
        Self {
            reader,
            cancelled: Box::pin(scope.token().clone().cancelled_owned()),
            deadline: scope
                .deadline_at()
                .map(|deadline| Box::pin(tokio::time::sleep_until(deadline))),
            interrupted: None,
            target,
            record,
            entry,
        }
    }

    pub fn content_id(&self) -> ContentId {
        self.record.content_id
    }

    pub fn seq(&self) -> i64 {
        self.record.seq
    }

    pub fn name(&self) -> Option<&str> {
        self.record.name.as_deref()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn path(&self) -> &str {
        &self.entry.path
    }

    /// Size the manifest declares for the file
    pub fn len(&self) -> u64 {
        self.entry.size
    }

    pub fn is_empty(&self) -> bool {
        self.entry.size == 0
    }

    /// Read the remainder of the file
    pub async fn read_all(&mut self) -> Result<Bytes, ResourceError> {
        let mut buf = Vec::with_capacity(self.entry.size.min(MAX_PREALLOC) as usize);
        let read = self.read_to_end(&mut buf).await;
        read.map_err(|source| {
            match source
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<ScopeError>())
            {
                Some(scope_error) => ResourceError::Scope {
                    step: Step::Read,
                    target: self.target,
                    source: *scope_error,
                },
                None => ResourceError::Read {
                    path: self.entry.path.clone(),
                    content_id: self.record.content_id,
                    source,
                },
            }
        })?;
        Ok(Bytes::from(buf))
    }

    /// Release the reader
    pub fn close(self) {}
}

impl AsyncRead for OpenedResource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.interrupted.is_none() {
            if this.cancelled.as_mut().poll(cx).is_ready() {
                this.interrupted = Some(ScopeError::Cancelled);
            } else if let Some(deadline) = this.deadline.as_mut() {
                if deadline.as_mut().poll(cx).is_ready() {
                    this.interrupted = Some(ScopeError::DeadlineExceeded);
                }
            }
        }
        match this.interrupted {
            // never Interrupted: std readers retry that kind forever
            Some(ScopeError::Cancelled) => {
                Poll::Ready(Err(io::Error::other(ScopeError::Cancelled)))
            }
            Some(ScopeError::DeadlineExceeded) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                ScopeError::DeadlineExceeded,
            ))),
            None => Pin::new(&mut this.reader).poll_read(cx, buf),
        }
    }
}

impl Drop for OpenedResource {
    fn drop(&mut self) {
        tracing::trace!(
            "OpenedResource: released {} of {}",
            self.entry.path,
            self.record.content_id
        );
    }
}
