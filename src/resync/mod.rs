//! Periodic resync scheduler
//!
//! Some state cannot be observed through watch events (a remote service's
//! health, a timer on the cluster side), so every reconciled object is also
//! revisited on a jittered period. One scheduler runs per controller.
//!
//! The timer heap is owned by a single task. Callers talk to it through a
//! channel, so no lock guards the heap.

pub mod heap;

use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::Resource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::key::ObjectKey;
use heap::TimerHeap;

/// `period` scaled by a uniform factor in `[0.75, 1.25)`
pub fn jittered<R: Rng + ?Sized>(period: Duration, rng: &mut R) -> Duration {
    period.mul_f64(rng.gen_range(0.75..1.25))
}

#[derive(Debug)]
enum Command {
    Enqueue(ObjectKey),
    Dequeue(ObjectKey),
}

/// Handle for registering objects with the scheduler loop
#[derive(Clone, Debug)]
pub struct PeriodicResync {
    commands: mpsc::UnboundedSender<Command>,
    period: Duration,
}

/// Keys whose resync timer fired
#[derive(Debug)]
pub struct ResyncEvents {
    rx: mpsc::UnboundedReceiver<ObjectKey>,
}

impl PeriodicResync {
    /// Start the scheduler loop on the current tokio runtime.
    ///
    /// The loop stops once every handle is dropped.
    pub fn new(period: Duration) -> (Self, ResyncEvents) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(command_rx, event_tx, period));
        (Self { commands, period }, ResyncEvents { rx })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Schedule `key` for a resync one jittered period from now. Enqueueing
    /// a key that is already waiting restarts its timer.
    pub fn enqueue(&self, key: ObjectKey) {
        if self.commands.send(Command::Enqueue(key)).is_err() {
            debug!("Resync loop has stopped, dropping enqueue");
        }
    }

    /// Forget `key`, e.g. after its object was deleted
    pub fn dequeue(&self, key: ObjectKey) {
        if self.commands.send(Command::Dequeue(key)).is_err() {
            debug!("Resync loop has stopped, dropping dequeue");
        }
    }
}

impl ResyncEvents {
    pub async fn recv(&mut self) -> Option<ObjectKey> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ObjectKey> + Send + 'static {
        stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|key| (key, rx))
        })
    }

    /// Triggers in the shape `Controller::reconcile_on` consumes
    pub fn into_object_refs<K>(self) -> impl Stream<Item = ObjectRef<K>> + Send + 'static
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        self.into_stream().map(|key| key.object_ref::<K>())
    }
}

async fn run_loop(
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ObjectKey>,
    period: Duration,
) {
    let mut timers: TimerHeap<ObjectKey> = TimerHeap::new();
    let mut rng = StdRng::from_entropy();

    info!("Periodic resync started with period {:?}", period);

    loop {
        let next = timers.peek_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Enqueue(key)) => {
                    let deadline = Instant::now() + jittered(period, &mut rng);
                    timers.push_or_reset(key, deadline);
                }
                Some(Command::Dequeue(key)) => {
                    timers.remove(&key);
                }
                None => break,
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                for key in timers.pop_expired(Instant::now()) {
                    debug!("Resync timer fired for {}", key);
                    if events.send(key).is_err() {
                        debug!("Resync event receiver dropped, stopping");
                        return;
                    }
                }
            }
        }
    }

    info!("Periodic resync stopped with {} pending timers", timers.len());
}
