// src/display/sender.rs
//! PrioritySender - decouples frame submission from hardware flush timing.
//!
//! Threading model:
//! - Owns the wrapped sink once started; only the worker thread touches it.
//! - One pending-frame slot, not a queue. Submitting while a frame is pending
//!   replaces it (latest wins), so memory stays at one frame however fast
//!   producers go.
//! - At most one `send()` on the wrapped sink is in flight at any time.
//!
//! Startup is two-phase. `new` only builds state; `post_daemon_init` spawns
//! the worker and raises it to real-time priority, which needs the process to
//! still be privileged and already detached (see `crate::lifecycle`).

use crate::color::Color;
use crate::display::driver::{stage_frame, DisplaySink, FrameSink};
use crate::frame::Frame;
use crate::lifecycle::{set_realtime_priority, PostDaemonInit};

use anyhow::{anyhow, Context, Result};
use log::*;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Frame>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    frame_ready: Condvar,
    submitted: AtomicU64,
    sent: AtomicU64,
    coalesced: AtomicU64,
}

/// Counters describing what the sender has done so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderStats {
    pub submitted: u64,
    pub sent: u64,
    /// Frames replaced in the slot before the worker picked them up.
    pub coalesced: u64,
    /// Frames currently waiting; never more than one.
    pub pending: usize,
}

/// Cloneable, thread-safe submission handle for a `PrioritySender`.
#[derive(Debug, Clone)]
pub struct SenderHandle {
    shared: Arc<Shared>,
}

impl SenderHandle {
    pub fn stats(&self) -> SenderStats {
        let pending = usize::from(self.shared.slot.lock().pending.is_some());
        SenderStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            sent: self.shared.sent.load(Ordering::Relaxed),
            coalesced: self.shared.coalesced.load(Ordering::Relaxed),
            pending,
        }
    }
}

impl FrameSink for SenderHandle {
    fn submit(&self, frame: Frame) {
        let replaced = self.shared.slot.lock().pending.replace(frame).is_some();
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
            trace!("PrioritySender: Pending frame replaced by a newer one");
        }
        self.shared.frame_ready.notify_one();
    }
}

pub struct PrioritySender<S: DisplaySink + 'static> {
    width: usize,
    height: usize,
    handle: SenderHandle,
    delegate: Option<S>,
    worker: Option<JoinHandle<()>>,
    staging: Frame,
    realtime_priority: i32,
}

impl<S: DisplaySink + 'static> PrioritySender<S> {
    /// Wraps `delegate`. Nothing is flushed until `post_daemon_init` runs;
    /// frames submitted before that collapse into the single pending slot.
    ///
    /// `realtime_priority` is the `SCHED_FIFO` priority for the worker; 0
    /// leaves the worker at normal priority.
    pub fn new(delegate: S, realtime_priority: i32) -> Self {
        let (width, height) = (delegate.width(), delegate.height());
        Self {
            width,
            height,
            handle: SenderHandle {
                shared: Arc::new(Shared::default()),
            },
            delegate: Some(delegate),
            worker: None,
            staging: Frame::new(width, height),
            realtime_priority,
        }
    }

    pub fn handle(&self) -> SenderHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> SenderStats {
        self.handle.stats()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the worker thread and elevates its scheduling priority.
    ///
    /// Requires the post-daemonize, still-privileged phase. A failed priority
    /// elevation is logged and the worker keeps running at normal priority.
    pub fn post_daemon_init(&mut self, _phase: &PostDaemonInit) -> Result<()> {
        let delegate = self
            .delegate
            .take()
            .ok_or_else(|| anyhow!("PrioritySender: Worker already started"))?;
        let shared = self.handle.shared.clone();
        let priority = self.realtime_priority;
        let (elevated_tx, elevated_rx) = sync_channel(1);

        let worker = thread::Builder::new()
            .name("ft-sender".to_string())
            .spawn(move || {
                let elevated = if priority > 0 {
                    set_realtime_priority(priority)
                } else {
                    Ok(())
                };
                let _ = elevated_tx.send(elevated);
                run_worker(delegate, shared);
            })
            .context("Failed to spawn sender thread")?;
        self.worker = Some(worker);

        match elevated_rx.recv() {
            Ok(Ok(())) if priority > 0 => {
                info!("PrioritySender: Worker running at SCHED_FIFO priority {}", priority)
            }
            Ok(Ok(())) => info!("PrioritySender: Worker running at normal priority"),
            Ok(Err(e)) => warn!(
                "PrioritySender: Could not raise worker priority ({:#}); running at normal priority",
                e
            ),
            Err(_) => warn!("PrioritySender: Worker exited before reporting its priority"),
        }
        Ok(())
    }
}

fn run_worker<S: DisplaySink>(mut sink: S, shared: Arc<Shared>) {
    debug!("PrioritySender: Worker started");
    loop {
        let frame = {
            let mut slot = shared.slot.lock();
            loop {
                if let Some(frame) = slot.pending.take() {
                    break frame;
                }
                if slot.shutdown {
                    debug!("PrioritySender: Worker exiting");
                    return;
                }
                shared.frame_ready.wait(&mut slot);
            }
        };

        stage_frame(&mut sink, &frame);
        if let Err(e) = sink.send() {
            warn!("PrioritySender: Flush failed: {:#}", e);
        }
        shared.sent.fetch_add(1, Ordering::Relaxed);
    }
}

impl<S: DisplaySink + 'static> DisplaySink for PrioritySender<S> {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        self.staging.set(x, y, color);
    }

    /// Submits the staged pixels and returns without waiting for the flush.
    fn send(&mut self) -> Result<()> {
        self.handle.submit(self.staging.clone());
        Ok(())
    }
}

impl<S: DisplaySink + 'static> Drop for PrioritySender<S> {
    fn drop(&mut self) {
        self.handle.shared.slot.lock().shutdown = true;
        self.handle.shared.frame_ready.notify_all();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.join() {
                error!("PrioritySender: Worker thread panicked: {:?}", e);
            }
        }
    }
}
