//! Fixed-size FIFO worker pool for tile builds.
//!
//! Workers pull boxed jobs from a shared queue; a running counter lets
//! `wait_for_idle` block until the queue is drained and every worker is
//! back in its wait. `request_stop(true)` discards queued jobs.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    tasks: VecDeque<Job>,
    stop: bool,
    running: usize,
}

struct Inner {
    state: Mutex<State>,
    queue_cv: Condvar,
    idle_cv: Condvar,
}

pub struct WorkerPool {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(nthreads: usize) -> Arc<Self> {
        let nthreads = nthreads.max(1);

        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                stop: false,
                // drops to zero once every worker reaches its first wait
                running: nthreads,
            }),
            queue_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });

        let workers = (0..nthreads)
            .map(|_| {
                let inner = Arc::clone(&inner);

                thread::spawn(move || worker_loop(&inner))
            })
            .collect();

        Arc::new(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.inner.state.lock().unwrap();

            if !state.stop {
                state.tasks.push_back(Box::new(job));
            }
        }

        self.inner.queue_cv.notify_one();
    }

    /// Block until the queue is empty and all workers are waiting.
    pub fn wait_for_idle(&self) {
        let state = self.inner.state.lock().unwrap();

        let _guard = self
            .inner
            .idle_cv
            .wait_while(state, |s| !s.tasks.is_empty() || s.running > 0)
            .unwrap();
    }

    /// Signal workers to exit once the queue drains; with `clear`, pending
    /// jobs are dropped and only running jobs finish.
    pub fn request_stop(&self, clear: bool) {
        {
            let mut state = self.inner.state.lock().unwrap();

            state.stop = true;

            if clear {
                state.tasks.clear();
            }
        }

        self.inner.queue_cv.notify_all();
        self.inner.idle_cv.notify_all();
    }

    pub fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());

        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.request_stop(false);
        self.join();
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let job = {
            let mut state = inner.state.lock().unwrap();

            state.running -= 1;
            inner.idle_cv.notify_all();

            state = inner
                .queue_cv
                .wait_while(state, |s| !s.stop && s.tasks.is_empty())
                .unwrap();

            if state.stop && state.tasks.is_empty() {
                return;
            }

            state.running += 1;
            state.tasks.pop_front().unwrap()
        };

        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_all_jobs() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);

            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.wait_for_idle();

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn jobs_can_enqueue_more_jobs() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let pool2 = Arc::clone(&pool);
            let counter = Arc::clone(&counter);

            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);

                for _ in 0..3 {
                    let counter = Arc::clone(&counter);

                    pool2.enqueue(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            });
        }

        // give the first job a moment to fan out, then drain
        std::thread::sleep(Duration::from_millis(50));
        pool.wait_for_idle();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn stop_with_clear_discards_pending_jobs() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&counter);

            // the first job blocks the single worker while the rest queue up
            pool.enqueue(move || {
                std::thread::sleep(Duration::from_millis(100));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..10 {
            let counter = Arc::clone(&counter);

            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.request_stop(true);
        pool.join();

        // only the running job completed
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enqueue_after_stop_is_ignored() {
        let pool = WorkerPool::new(1);

        pool.request_stop(false);
        pool.join();

        let counter = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&counter);

            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
