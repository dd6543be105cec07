//! Hotplug event monitoring, grounded in `spec.md` §4.6's self-pipe
//! design rather than the single simpler variant that survives in
//! `original_source/xdev_monitor.c` (which has no shutdown pipe and is
//! flagged in `spec.md` §9 as dead code not to imitate).
//!
//! A producer thread polls the channel's fd and a dedicated shutdown
//! pipe together; whichever becomes readable first decides whether the
//! loop reads one more event or exits. Each decoded device is pushed
//! onto a shared queue and signaled by writing one byte to an event
//! pipe, which doubles as the fd callers `poll()` alongside their own
//! event loop.

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags};

use crate::context::Context;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::ioutil;

/// How many undelivered devices the event pipe will buffer before the
/// producer starts dropping new ones rather than blocking forever.
/// Mirrors `spec.md` §4.6's bounded-queue backpressure rule; the event
/// pipe itself (a handful of kernel buffer pages) is the gate, this is
/// just the matching cap on the in-process queue.
const QUEUE_CAPACITY: usize = 256;

struct Shared {
    queue: Mutex<VecDeque<Device>>,
}

struct Pipes {
    event_read: OwnedFd,
    event_write: OwnedFd,
    shutdown_read: OwnedFd,
    shutdown_write: OwnedFd,
}

fn make_pipes() -> Result<Pipes> {
    let (event_read, event_write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
    let (shutdown_read, shutdown_write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
    Ok(Pipes {
        event_read,
        event_write,
        shutdown_read,
        shutdown_write,
    })
}

/// Watches the driver-control channel for hotplug events on a
/// background thread and delivers them through a queue the caller
/// drains with [`Monitor::receive_device`].
pub struct Monitor {
    context: Context,
    shared: Arc<Shared>,
    event_read: OwnedFd,
    shutdown_write: Option<OwnedFd>,
    worker: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Builds a monitor over `context`'s channel. The background
    /// thread isn't started until [`Monitor::enable_receiving`] is
    /// called, mirroring `xdev_monitor_enable_receiving`'s separation
    /// from construction.
    pub fn new(context: &Context) -> Self {
        Monitor {
            context: context.clone(),
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
            }),
            event_read: {
                // Placeholder fd until enable_receiving() replaces it;
                // never polled before that call.
                let (r, w) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
                    .expect("failed to create placeholder pipe");
                ioutil::xclose(w);
                r
            },
            shutdown_write: None,
            worker: None,
        }
    }

    /// Starts the background producer thread. Calling this more than
    /// once is a no-op once a thread is already running.
    pub fn enable_receiving(&mut self) -> Result<()> {
        self.enable_receiving_filtered(None)
    }

    /// Like [`Monitor::enable_receiving`], but only devices that pass
    /// `filter` are queued for delivery.
    pub fn enable_receiving_filtered(&mut self, filter: Option<Arc<dyn Filter>>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let pipes = make_pipes()?;
        let channel_fd_owner = self.context.channel().clone();
        let shared = Arc::clone(&self.shared);
        let event_write = pipes.event_write;
        let shutdown_read = pipes.shutdown_read;
        let context = self.context.clone();

        let worker = std::thread::spawn(move || {
            producer_loop(context, channel_fd_owner, shared, event_write, shutdown_read, filter);
        });

        self.event_read = pipes.event_read;
        self.shutdown_write = Some(pipes.shutdown_write);
        self.worker = Some(worker);
        Ok(())
    }

    /// The fd to `poll()` alongside the rest of a caller's event loop;
    /// becomes readable whenever at least one device is queued.
    pub fn get_fd(&self) -> BorrowedFd<'_> {
        self.event_read.as_fd()
    }

    /// Pops one device off the queue, blocking (via `poll()` on
    /// [`Monitor::get_fd`]) until one is available.
    ///
    /// `spec.md` §4.6 requires the event pipe to stay non-blocking
    /// throughout, so this does a poll-then-read loop internally
    /// rather than relying on a blocking read.
    pub fn receive_device(&self) -> Result<Device> {
        loop {
            if let Some(device) = self.try_receive_device()? {
                return Ok(device);
            }
            let mut fds = [PollFd::new(self.event_read.as_fd(), PollFlags::POLLIN)];
            ioutil::xpoll_indefinite(&mut fds)?;
        }
    }

    /// Non-blocking variant of [`Monitor::receive_device`]: returns
    /// `Ok(None)` immediately if nothing is queued yet.
    ///
    /// Mirrors `spec.md` §4.6's consumer algorithm: a readiness byte is
    /// drained first, and only then is the queue consulted. A byte
    /// without a matching entry is the defensive case the spec calls
    /// out -- it should never happen under a correct producer, and is
    /// reported as [`Error::OutOfBuffer`] rather than silently ignored.
    pub fn try_receive_device(&self) -> Result<Option<Device>> {
        if !ioutil::xread_byte(self.event_read.as_fd())? {
            return Ok(None);
        }

        let mut queue = self.shared.queue.lock().expect("monitor queue lock poisoned");
        match queue.pop_front() {
            Some(device) => Ok(Some(device)),
            None => Err(Error::OutOfBuffer),
        }
    }

    /// Number of devices currently queued for delivery.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().expect("monitor queue lock poisoned").len()
    }
}

fn producer_loop(
    context: Context,
    channel: Arc<dyn crate::channel::Channel>,
    shared: Arc<Shared>,
    event_write: OwnedFd,
    shutdown_read: OwnedFd,
    filter: Option<Arc<dyn Filter>>,
) {
    loop {
        let mut fds = [
            PollFd::new(channel.as_fd(), PollFlags::POLLIN),
            PollFd::new(shutdown_read.as_fd(), PollFlags::POLLIN),
        ];

        if ioutil::xpoll_indefinite(&mut fds).is_err() {
            break;
        }

        let shutdown_ready = fds[1]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false);
        if shutdown_ready {
            tracing::debug!("monitor producer received shutdown signal");
            break;
        }

        let channel_ready = fds[0]
            .revents()
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false);
        if !channel_ready {
            continue;
        }

        let event = match channel.next_event() {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, "monitor producer failed to read event");
                continue;
            }
        };

        let device = Device::from_event(&context, event.event, event.device, event.parent, event.raw);

        if let Some(f) = &filter {
            if !f.should_include(&device) {
                continue;
            }
        }

        let devname = device.devname().to_string();

        let mut queue = shared.queue.lock().expect("monitor queue lock poisoned");
        if queue.len() >= QUEUE_CAPACITY {
            tracing::warn!(devname, "monitor queue full, dropping event");
            continue;
        }
        queue.push_back(device);
        drop(queue);

        // `xwrite_byte` reports a full pipe as `Ok(false)`, not `Err` --
        // both mean the readiness byte never made it out, so both must
        // roll back the just-appended entry to keep the event-pipe byte
        // count equal to the queue length (spec.md §4.6 step 8).
        let signaled = match ioutil::xwrite_byte(event_write.as_fd(), 1) {
            Ok(signaled) => signaled,
            Err(e) => {
                tracing::warn!(error = %e, "failed to signal monitor readiness");
                false
            }
        };
        if !signaled {
            tracing::warn!(devname, "monitor readiness pipe full, dropping event");
            let mut queue = shared.queue.lock().expect("monitor queue lock poisoned");
            queue.pop_back();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(write_end) = self.shutdown_write.take() {
            let _ = ioutil::xwrite_byte(write_end.as_fd(), 1);
            ioutil::xclose(write_end);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChannel;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx_with(mock: MockChannel) -> Context {
        Context::new_with_channel(Arc::new(mock)).unwrap()
    }

    #[test]
    fn delivers_queued_events_in_fifo_order() {
        let mock = MockChannel::new();
        mock.push_event("device-attach", "wd0", "", "<dict/>");
        mock.push_event("device-attach", "wd1", "", "<dict/>");
        let ctx = ctx_with(mock);

        let mut mon = Monitor::new(&ctx);
        mon.enable_receiving().unwrap();

        let first = mon.receive_device().unwrap();
        let second = mon.receive_device().unwrap();
        assert_eq!(first.devname(), "wd0");
        assert_eq!(second.devname(), "wd1");
    }

    #[test]
    fn try_receive_device_is_non_blocking_when_idle() {
        let ctx = ctx_with(MockChannel::new());
        let mut mon = Monitor::new(&ctx);
        mon.enable_receiving().unwrap();
        assert!(mon.try_receive_device().unwrap().is_none());
    }

    #[test]
    fn filter_drops_events_before_they_are_queued() {
        let mock = MockChannel::new();
        mock.push_event("device-attach", "wd0", "", "<dict/>");
        mock.push_event("device-attach", "kbd0", "", "<dict/>");
        let ctx = ctx_with(mock);

        let mut mon = Monitor::new(&ctx);
        mon.enable_receiving_filtered(Some(Arc::new(|d: &Device| d.devname() == "kbd0")))
            .unwrap();

        let only = mon.receive_device().unwrap();
        assert_eq!(only.devname(), "kbd0");
        assert!(mon.try_receive_device().unwrap().is_none());
    }

    #[test]
    fn shutdown_while_idle_joins_cleanly() {
        let ctx = ctx_with(MockChannel::new());
        let mut mon = Monitor::new(&ctx);
        mon.enable_receiving().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(mon);
    }
}
