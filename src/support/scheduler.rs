//-
// Copyright (c) 2020, The E3Mail developers
//
// This file is part of E3Mail.
//
// E3Mail is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// E3Mail is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// E3Mail. If not, see <http://www.gnu.org/licenses/>.

//! A process-wide queue of background actions.
//!
//! Actions are run one at a time by a single consumer thread, foreground
//! actions before background ones and in submission order within a
//! priority. Nothing here is persisted; queued actions are lost when the
//! process exits.
//!
//! An action failing with `Error::AccountUnavailable` goes back on the queue
//! once the retry delay has passed. The delay runs on a detached thread so
//! the consumer is never held up by it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use super::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Background,
    Foreground,
}

pub type Work = Box<dyn FnMut() -> Result<(), Error> + Send>;

struct Action {
    description: String,
    priority: Priority,
    sequence: u64,
    work: Work,
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Action {}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Action {
    // BinaryHeap pops the greatest element, so earlier sequence numbers
    // compare greater.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct Queue {
    actions: BinaryHeap<Action>,
    next_sequence: u64,
    shut_down: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    retry_delay: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(
        &self,
        description: String,
        priority: Priority,
        work: Work,
    ) -> bool {
        let mut queue = self.lock();
        if queue.shut_down {
            warn!("Scheduler shut down, dropping {}", description);
            return false;
        }

        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.actions.push(Action {
            description,
            priority,
            sequence,
            work,
        });
        self.available.notify_one();
        true
    }
}

/// A cloneable way to submit actions from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Queue `work`. Returns `false` if the scheduler has shut down.
    pub fn submit(
        &self,
        description: impl Into<String>,
        priority: Priority,
        work: Work,
    ) -> bool {
        self.shared.push(description.into(), priority, work)
    }
}

/// Owns the consumer thread. Dropping the scheduler shuts it down.
pub struct Scheduler {
    handle: SchedulerHandle,
    consumer: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start(retry_delay: Duration) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            retry_delay,
        });

        let consumer_shared = Arc::clone(&shared);
        let consumer = thread::spawn(move || consume(consumer_shared));

        Scheduler {
            handle: SchedulerHandle { shared },
            consumer: Some(consumer),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn submit(
        &self,
        description: impl Into<String>,
        priority: Priority,
        work: Work,
    ) -> bool {
        self.handle.submit(description, priority, work)
    }

    /// Stop accepting actions and wait for the one in progress, if any.
    /// Actions still queued are discarded.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let mut queue = self.handle.shared.lock();
            queue.shut_down = true;
            if !queue.actions.is_empty() {
                info!(
                    "Scheduler discarding {} queued actions",
                    queue.actions.len()
                );
                queue.actions.clear();
            }
            self.handle.shared.available.notify_all();
        }

        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                error!("Scheduler consumer thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consume(shared: Arc<Shared>) {
    loop {
        let mut action = {
            let mut queue = shared.lock();
            loop {
                if queue.shut_down {
                    return;
                }
                if let Some(action) = queue.actions.pop() {
                    break action;
                }
                queue = match shared.available.wait(queue) {
                    Ok(queue) => queue,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        match (action.work)() {
            Ok(()) => info!("Finished {}", action.description),
            Err(Error::AccountUnavailable) => {
                info!(
                    "Account unavailable for {}, retrying in {:?}",
                    action.description, shared.retry_delay
                );
                schedule_retry(&shared, action);
            }
            Err(e) => {
                error!("{} failed: {}", action.description, e);
            }
        }
    }
}

fn schedule_retry(shared: &Arc<Shared>, action: Action) {
    let shared = Arc::clone(shared);
    thread::spawn(move || {
        thread::sleep(shared.retry_delay);
        shared.push(action.description, action.priority, action.work);
    });
}
