//! Session-owned document shared between the interactive side and a replacement run.
//!
//! Access goes through a mutex, so a reader never observes a page while a run
//! is rewriting its resources. A separate busy flag is the single-writer
//! advisory lock: at most one run holds it, and it is released when the run's
//! [`WriteLease`] drops, whatever way the run ends.

use lopdf::Document;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::error::{Error, Result};

#[derive(Debug)]
struct DocumentCell {
    document: Mutex<Option<Document>>,
    busy: AtomicBool,
}

/// Cloneable handle to the open document
#[derive(Debug, Clone)]
pub struct SharedDocument {
    inner: Arc<DocumentCell>,
}

impl SharedDocument {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(DocumentCell {
                document: Mutex::new(Some(document)),
                busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let document = Document::load(path)?;
        info!(path = %path.display(), pages = document.get_pages().len(), "loaded document");
        Ok(Self::new(document))
    }

    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(Document::load_mem(bytes)?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Document>>> {
        self.inner.document.lock().map_err(|_| Error::DocumentClosed)
    }

    /// Run `f` against the document; waits for an in-flight page to finish
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> Result<R> {
        let guard = self.lock()?;
        let document = guard.as_ref().ok_or(Error::DocumentClosed)?;
        Ok(f(document))
    }

    /// Mutate the document outside of a run
    pub fn write<R>(&self, f: impl FnOnce(&mut Document) -> R) -> Result<R> {
        let _lease = self.try_lease()?;
        self.write_leased(f)
    }

    /// Mutate while the caller already holds the write lease
    pub(crate) fn write_leased<R>(&self, f: impl FnOnce(&mut Document) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        let document = guard.as_mut().ok_or(Error::DocumentClosed)?;
        Ok(f(document))
    }

    /// Whether a run currently holds the write lease
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Take the single-writer lease, or fail with [`Error::Busy`]
    pub(crate) fn try_lease(&self) -> Result<WriteLease> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(WriteLease {
            cell: Arc::clone(&self.inner),
        })
    }

    /// Close the document. A run still in flight fails at its next page.
    pub fn close(&self) -> Option<Document> {
        match self.inner.document.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Save to a file; rejected while a run is active
    pub fn save(&self, path: &Path, compress_streams: bool) -> Result<()> {
        self.write(|doc| {
            if compress_streams {
                doc.compress();
            }
            doc.save(path).map(|_| ())
        })??;
        info!(path = %path.display(), "saved document");
        Ok(())
    }

    /// Serialize to bytes; rejected while a run is active
    pub fn save_to_bytes(&self, compress_streams: bool) -> Result<Vec<u8>> {
        self.write(|doc| {
            if compress_streams {
                doc.compress();
            }
            let mut output = Vec::new();
            doc.save_to(&mut output).map(|_| output)
        })?
        .map_err(Error::from)
    }
}

/// Proof of holding the single-writer lease; releases it on drop
#[derive(Debug)]
pub(crate) struct WriteLease {
    cell: Arc<DocumentCell>,
}

impl Drop for WriteLease {
    fn drop(&mut self) {
        self.cell.busy.store(false, Ordering::Release);
    }
}
