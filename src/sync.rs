//! Semaphores and barriers: FIFO wait queues of job ids.
//!
//! Neither primitive touches a job directly. A release hands the chosen job
//! id to a [`WakeSink`], and the scheduler makes that job runnable with the
//! given resume value. A grant that reaches a job which stopped waiting in
//! the meantime comes back through [`Release::pass_on`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::interpreter::types::Val;
use crate::scheduler::JobId;

/// Receiver of wake-ups produced by releasing a wait queue
pub trait WakeSink {
    fn wake(&mut self, job: JobId, value: Val, release: Release);
}

/// What produced a wake-up
#[derive(Debug, Clone)]
pub enum Release {
    /// A semaphore permit
    Semaphore(Rc<Semaphore>),
    /// One `signal()` of a barrier
    Barrier(Rc<Barrier>),
    /// `signalAll()`, or anything else with nothing to hand on
    Broadcast,
}

impl Release {
    /// The woken job was gone: give the grant to the next waiter, or bank
    /// the permit
    pub fn pass_on(self, value: Val, sink: &mut dyn WakeSink) {
        match self {
            Release::Semaphore(sem) => sem.v(sink),
            Release::Barrier(barrier) => {
                barrier.signal(value, sink);
            }
            Release::Broadcast => {}
        }
    }
}

/* ===================== Semaphore ===================== */

pub struct Semaphore {
    count: Cell<i64>,
    waiters: RefCell<VecDeque<JobId>>,
}

impl Semaphore {
    pub fn new(count: i64) -> Self {
        Self {
            count: Cell::new(count),
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Try to acquire. Returns false when `job` was queued and must wait.
    pub fn p(&self, job: JobId) -> bool {
        if self.count.get() > 0 {
            self.count.set(self.count.get() - 1);
            true
        } else {
            self.waiters.borrow_mut().push_back(job);
            false
        }
    }

    /// Release: grant the oldest waiter, or bank the permit
    pub fn v(self: &Rc<Self>, sink: &mut dyn WakeSink) {
        let next = self.waiters.borrow_mut().pop_front();
        match next {
            Some(job) => sink.wake(job, Val::Void, Release::Semaphore(self.clone())),
            None => self.count.set(self.count.get() + 1),
        }
    }

    /// Forget a waiter that stopped waiting (stopped or terminated)
    pub fn cancel(&self, job: JobId) {
        self.waiters.borrow_mut().retain(|j| *j != job);
    }

    pub fn value(&self) -> i64 {
        self.count.get()
    }

    pub fn waiting(&self) -> usize {
        self.waiters.borrow().len()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Semaphore({}, {} waiting)", self.value(), self.waiting())
    }
}

/* ===================== Barrier ===================== */

#[derive(Default)]
pub struct Barrier {
    waiters: RefCell<VecDeque<JobId>>,
}

impl Barrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(&self, job: JobId) {
        self.waiters.borrow_mut().push_back(job);
    }

    /// Release the oldest waiter with `payload`. Returns whether one was waiting.
    pub fn signal(self: &Rc<Self>, payload: Val, sink: &mut dyn WakeSink) -> bool {
        let next = self.waiters.borrow_mut().pop_front();
        match next {
            Some(job) => {
                sink.wake(job, payload, Release::Barrier(self.clone()));
                true
            }
            None => false,
        }
    }

    /// Release every waiter with `payload`. Returns how many were released.
    pub fn signal_all(&self, payload: Val, sink: &mut dyn WakeSink) -> usize {
        let waiters: Vec<JobId> = self.waiters.borrow_mut().drain(..).collect();
        for job in &waiters {
            sink.wake(*job, payload.clone(), Release::Broadcast);
        }
        waiters.len()
    }

    pub fn cancel(&self, job: JobId) {
        self.waiters.borrow_mut().retain(|j| *j != job);
    }

    pub fn waiting(&self) -> usize {
        self.waiters.borrow().len()
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Barrier({} waiting)", self.waiting())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Woken(Vec<(JobId, Val)>);

    impl WakeSink for Woken {
        fn wake(&mut self, job: JobId, value: Val, _release: Release) {
            self.0.push((job, value));
        }
    }

    #[test]
    fn test_semaphore_fifo_grants() {
        let sem = Rc::new(Semaphore::new(1));
        let mut woken = Woken::default();

        assert!(sem.p(JobId(1)));
        assert!(!sem.p(JobId(2)));
        assert!(!sem.p(JobId(3)));
        assert_eq!(sem.waiting(), 2);

        sem.v(&mut woken);
        sem.v(&mut woken);
        sem.v(&mut woken);

        assert_eq!(
            woken.0.iter().map(|(j, _)| *j).collect::<Vec<_>>(),
            vec![JobId(2), JobId(3)]
        );
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn test_semaphore_cancelled_waiter_is_skipped() {
        let sem = Rc::new(Semaphore::new(0));
        let mut woken = Woken::default();

        assert!(!sem.p(JobId(1)));
        assert!(!sem.p(JobId(2)));
        sem.cancel(JobId(1));
        sem.v(&mut woken);

        assert_eq!(woken.0, vec![(JobId(2), Val::Void)]);
    }

    #[test]
    fn test_barrier_signal_all_passes_payload() {
        let barrier = Rc::new(Barrier::new());
        let mut woken = Woken::default();

        assert!(!barrier.signal(Val::Num(0.0), &mut woken));
        barrier.wait(JobId(4));
        barrier.wait(JobId(5));

        assert_eq!(barrier.signal_all(Val::Str("go".into()), &mut woken), 2);
        assert_eq!(
            woken.0,
            vec![
                (JobId(4), Val::Str("go".into())),
                (JobId(5), Val::Str("go".into()))
            ]
        );
        assert_eq!(barrier.waiting(), 0);
    }

    #[test]
    fn test_passed_on_permit_is_banked() {
        let sem = Rc::new(Semaphore::new(0));
        let mut woken = Woken::default();

        assert!(!sem.p(JobId(1)));
        Release::Semaphore(sem.clone()).pass_on(Val::Void, &mut woken);
        assert!(woken.0.is_empty());
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn test_passed_on_signal_reaches_next_waiter() {
        let barrier = Rc::new(Barrier::new());
        let mut woken = Woken::default();

        barrier.wait(JobId(1));
        barrier.wait(JobId(2));
        assert!(barrier.signal(Val::Num(7.0), &mut woken));
        Release::Barrier(barrier.clone()).pass_on(Val::Num(7.0), &mut woken);

        assert_eq!(
            woken.0,
            vec![(JobId(1), Val::Num(7.0)), (JobId(2), Val::Num(7.0))]
        );
        assert_eq!(barrier.waiting(), 0);
    }
}
