//! Per-tick consumers and the bounded render handoff.
//!
//! The coordinator hands each published snapshot to a consumer thread and
//! waits for its acknowledgement, at most for the render timeout. A consumer
//! that misses the deadline is logged and the simulation moves on.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, warn};

use crate::error::{SimError, SimResult};
use crate::telemetry::TickSnapshot;

/// Receives the state after every rendered tick.
pub trait TickConsumer: Send {
    fn on_tick(&mut self, snapshot: &TickSnapshot);
}

impl<F> TickConsumer for F
where
    F: FnMut(&TickSnapshot) + Send,
{
    fn on_tick(&mut self, snapshot: &TickSnapshot) {
        self(snapshot)
    }
}

pub struct RenderHandoff {
    frames: Option<Sender<TickSnapshot>>,
    acks: Receiver<u64>,
    thread: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl RenderHandoff {
    pub fn spawn(mut consumer: Box<dyn TickConsumer>, timeout: Duration) -> SimResult<Self> {
        let (frame_tx, frame_rx) = channel::bounded::<TickSnapshot>(1);
        let (ack_tx, ack_rx) = channel::bounded::<u64>(1);
        let thread = thread::Builder::new()
            .name("vanet-render".to_string())
            .spawn(move || {
                for snapshot in frame_rx {
                    consumer.on_tick(&snapshot);
                    // A full ack slot means a stale ack is still unread; drop this one.
                    let _ = ack_tx.try_send(snapshot.time);
                }
            })
            .map_err(SimError::Io)?;
        Ok(Self {
            frames: Some(frame_tx),
            acks: ack_rx,
            thread: Some(thread),
            timeout,
        })
    }

    /// Hands `snapshot` to the consumer and waits for it to finish. Returns
    /// `false` when the consumer did not acknowledge in time.
    pub fn deliver(&self, snapshot: TickSnapshot) -> bool {
        let Some(frames) = &self.frames else {
            return false;
        };
        while self.acks.try_recv().is_ok() {}

        let time = snapshot.time;
        let deadline = Instant::now() + self.timeout;
        match frames.send_timeout(snapshot, self.timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(time, "consumer still busy with an earlier tick; frame dropped");
                return false;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                warn!(time, "consumer thread is gone");
                return false;
            }
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.acks.recv_timeout(remaining) {
                Ok(acked) if acked == time => return true,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(time, timeout_ms = self.timeout.as_millis() as u64, "consumer timed out");
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(time, "consumer thread is gone");
                    return false;
                }
            }
        }
    }
}

impl Drop for RenderHandoff {
    fn drop(&mut self) {
        self.frames.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("consumer thread panicked");
            } else {
                debug!("consumer thread stopped");
            }
        }
    }
}
