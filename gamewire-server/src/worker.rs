//! Bounded worker pool that runs callbacks off the I/O runtime.
//!
//! Every session owns a lane: a FIFO of pending jobs plus a `scheduled`
//! flag. A lane with work sits at most once on the shared ready queue, so
//! one worker at a time drains it and its jobs run in arrival order, while
//! any idle worker can pick up any other ready lane.

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::session::Session;
use crossbeam_channel::{Receiver, Sender, unbounded};
use gamewire_core::Message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause before retrying a submit to a full lane.
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(1);

/// Jobs a worker runs from one lane before putting it back on the queue.
const LANE_BATCH: usize = 16;

enum Job {
    Message(Message),
    Disconnect,
}

struct LaneState {
    jobs: VecDeque<Job>,
    scheduled: bool,
}

struct Lane {
    session: Arc<Session>,
    state: Mutex<LaneState>,
}

enum Task {
    Run(Arc<Lane>),
    Stop,
}

struct Schedule {
    /// Lanes that are queued or running.
    active: usize,
    closed: bool,
}

struct Shared {
    tasks: Sender<Task>,
    schedule: Mutex<Schedule>,
    drained: Condvar,
}

impl Shared {
    fn schedule(&self, lane: &Arc<Lane>) -> Result<(), ServerError> {
        let mut schedule = self.schedule.lock();
        if schedule.closed {
            return Err(ServerError::Shutdown);
        }
        if self.tasks.send(Task::Run(Arc::clone(lane))).is_err() {
            return Err(ServerError::Shutdown);
        }
        schedule.active += 1;
        Ok(())
    }

    fn release(&self) {
        let mut schedule = self.schedule.lock();
        schedule.active -= 1;
        if schedule.active == 0 {
            self.drained.notify_all();
        }
    }
}

/// Fixed set of OS threads fed by one ready queue of session lanes.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one).
    ///
    /// # Arguments
    /// * `size` - Number of worker threads
    /// * `capacity` - Pending jobs allowed per session lane
    /// * `dispatcher` - Dispatcher the workers run jobs through
    ///
    /// # Errors
    /// Returns an IO error if a worker thread cannot be spawned.
    pub fn new(
        size: usize,
        capacity: usize,
        dispatcher: Arc<Dispatcher>,
    ) -> std::io::Result<Self> {
        let size = size.max(1);
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            tasks: tx,
            schedule: Mutex::new(Schedule {
                active: 0,
                closed: false,
            }),
            drained: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            threads: Vec::with_capacity(size),
            capacity: capacity.max(1),
        };
        for index in 0..size {
            let rx = rx.clone();
            let shared = Arc::clone(&pool.shared);
            let dispatcher = Arc::clone(&dispatcher);
            let thread = std::thread::Builder::new()
                .name(format!("gamewire-worker-{index}"))
                .spawn(move || run_worker(&rx, &shared, &dispatcher))?;
            pool.threads.push(thread);
        }

        tracing::debug!(workers = size, capacity = pool.capacity, "worker pool started");
        Ok(pool)
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Opens the lane that carries one session's jobs.
    #[must_use]
    pub fn lane(&self, session: Arc<Session>) -> SessionLane {
        SessionLane {
            lane: Arc::new(Lane {
                session,
                state: Mutex::new(LaneState {
                    jobs: VecDeque::new(),
                    scheduled: false,
                }),
            }),
            shared: Arc::clone(&self.shared),
            capacity: self.capacity,
        }
    }

    /// Stops accepting new lanes, drains the queued ones and joins the
    /// workers.
    ///
    /// Blocks the calling thread.
    pub fn shutdown(mut self) {
        {
            let mut schedule = self.shared.schedule.lock();
            schedule.closed = true;
            while schedule.active > 0 {
                self.shared.drained.wait(&mut schedule);
            }
        }

        for _ in &self.threads {
            let _ = self.shared.tasks.send(Task::Stop);
        }
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("worker").to_string();
            if thread.join().is_err() {
                tracing::error!(worker = %name, "worker thread panicked");
            }
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.schedule.lock().closed = true;
        for _ in &self.threads {
            let _ = self.shared.tasks.send(Task::Stop);
        }
    }
}

/// Submission side of one session's lane.
pub struct SessionLane {
    lane: Arc<Lane>,
    shared: Arc<Shared>,
    capacity: usize,
}

impl SessionLane {
    /// Queues an inbound message behind the session's pending jobs.
    ///
    /// Waits asynchronously while the lane is full.
    ///
    /// # Errors
    /// Returns [`ServerError::Shutdown`] if the pool has stopped.
    pub async fn submit(&self, message: Message) -> Result<(), ServerError> {
        self.push(Job::Message(message)).await
    }

    /// Queues disconnect cleanup behind any pending messages of the session.
    ///
    /// # Errors
    /// Returns [`ServerError::Shutdown`] if the pool has stopped.
    pub async fn submit_disconnect(self) -> Result<(), ServerError> {
        self.push(Job::Disconnect).await
    }

    async fn push(&self, mut job: Job) -> Result<(), ServerError> {
        loop {
            match self.try_push(job)? {
                None => return Ok(()),
                Some(returned) => {
                    job = returned;
                    tokio::time::sleep(BACKPRESSURE_PAUSE).await;
                }
            }
        }
    }

    /// Hands the job back when the lane is full.
    fn try_push(&self, job: Job) -> Result<Option<Job>, ServerError> {
        let mut state = self.lane.state.lock();
        if state.jobs.len() >= self.capacity {
            return Ok(Some(job));
        }
        if !state.scheduled {
            self.shared.schedule(&self.lane)?;
            state.scheduled = true;
        }
        state.jobs.push_back(job);
        Ok(None)
    }
}

fn run_worker(tasks: &Receiver<Task>, shared: &Shared, dispatcher: &Dispatcher) {
    while let Ok(Task::Run(lane)) = tasks.recv() {
        run_lane(lane, shared, dispatcher);
    }
}

fn run_lane(lane: Arc<Lane>, shared: &Shared, dispatcher: &Dispatcher) {
    for _ in 0..LANE_BATCH {
        let job = {
            let mut state = lane.state.lock();
            match state.jobs.pop_front() {
                Some(job) => job,
                None => {
                    state.scheduled = false;
                    drop(state);
                    shared.release();
                    return;
                }
            }
        };
        match job {
            Job::Message(message) => {
                let _ = dispatcher.on_message(&lane.session, &message);
            }
            Job::Disconnect => dispatcher.on_disconnect(&lane.session),
        }
    }

    // still scheduled; this worker holds a receiver so the send cannot fail
    let _ = shared.tasks.send(Task::Run(lane));
}
