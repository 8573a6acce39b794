//! Background, single-consumer pipeline for durable page writes.
//!
//! Stores that want writes off the calling thread hand pages to a
//! [`BackgroundPageWriter`] instead of writing synchronously. A bounded
//! channel provides backpressure; [`BackgroundPageWriter::flush`] provides a
//! barrier that blocks until every page enqueued before the call has been
//! written, without needing a counter or condvar: a `Barrier` sentinel is
//! pushed through the same channel, and channel FIFO ordering guarantees it
//! is processed only after every write enqueued ahead of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use storage::{Page, WriteSeek};

enum WriteMsg {
    Write { page: Arc<Page>, txn_id: u64 },
    Barrier(SyncSender<()>),
    Shutdown,
}

/// Single background thread draining a bounded queue of page writes against
/// one sink.
pub struct BackgroundPageWriter {
    sender: SyncSender<WriteMsg>,
    handle: Mutex<Option<JoinHandle<()>>>,
    failed: Arc<AtomicBool>,
}

impl BackgroundPageWriter {
    /// Spawns the writer thread. `sink_factory` is called once, on the
    /// writer thread, to produce the `WriteSeek` the pages are written
    /// through — this keeps non-`Send` or thread-affine sinks usable.
    pub fn spawn<F>(queue_capacity: usize, sink_factory: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> std::io::Result<Box<dyn WriteSeek>> + Send + 'static,
    {
        let (sender, receiver) = sync_channel(queue_capacity.max(1));
        let failed = Arc::new(AtomicBool::new(false));
        let failed_thread = Arc::clone(&failed);

        let handle = std::thread::Builder::new()
            .name("background-page-writer".into())
            .spawn(move || {
                let mut sink = match sink_factory() {
                    Ok(sink) => sink,
                    Err(err) => {
                        tracing::error!(error = %err, "background page writer failed to open sink");
                        failed_thread.store(true, Ordering::Release);
                        drain_until_shutdown(&receiver);
                        return;
                    }
                };
                run_loop(&receiver, sink.as_mut(), &failed_thread);
            })?;

        Ok(Self {
            sender,
            handle: Mutex::new(Some(handle)),
            failed,
        })
    }

    /// Enqueues `page` to be written under `txn_id`. Blocks if the queue is
    /// full (backpressure), never writes inline.
    pub fn enqueue(&self, page: Arc<Page>, txn_id: u64) {
        if self.sender.send(WriteMsg::Write { page, txn_id }).is_err() {
            tracing::warn!("background page writer thread is gone; dropping queued write");
        }
    }

    /// Blocks until every write enqueued before this call has completed.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = sync_channel(0);
        if self.sender.send(WriteMsg::Barrier(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.recv();
    }

    /// Whether the writer thread has hit an unrecoverable I/O error and is
    /// now discarding queued writes instead of performing them.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Signals the writer thread to exit after draining its queue, and
    /// joins it.
    pub fn shutdown(&self) {
        let _ = self.sender.send(WriteMsg::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundPageWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(receiver: &Receiver<WriteMsg>, sink: &mut dyn WriteSeek, failed: &AtomicBool) {
    for msg in receiver.iter() {
        match msg {
            WriteMsg::Write { page, txn_id } => {
                if failed.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(err) = page.write(sink, txn_id) {
                    tracing::error!(
                        page_id = page.id(),
                        error = %err,
                        "background page write failed; subsequent writes will be dropped"
                    );
                    failed.store(true, Ordering::Release);
                }
            }
            WriteMsg::Barrier(ack) => {
                let _ = ack.send(());
            }
            WriteMsg::Shutdown => return,
        }
    }
}

fn drain_until_shutdown(receiver: &Receiver<WriteMsg>) {
    for msg in receiver.iter() {
        match msg {
            WriteMsg::Barrier(ack) => {
                let _ = ack.send(());
            }
            WriteMsg::Shutdown => return,
            WriteMsg::Write { .. } => {}
        }
    }
}
