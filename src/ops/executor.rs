//! Fail-fast-capable parallel task pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

use crate::errors::BuildError;

type Task<'a> = Box<dyn FnOnce() -> Result<(), BuildError> + Send + 'a>;

/// Runs a batch of fallible tasks on a fixed set of worker threads.
///
/// In fail-fast mode the first failure stops workers from pulling
/// queued tasks; tasks already running are allowed to finish, so any
/// job tokens or output channels they hold drain cleanly. The overall
/// result is the first failure observed, if any.
pub struct Executor<'a> {
    fail_fast: bool,
    tasks: Vec<Task<'a>>,
}

impl<'a> Executor<'a> {
    pub fn new(fail_fast: bool) -> Self {
        Executor {
            fail_fast,
            tasks: Vec::new(),
        }
    }

    /// Queue a task. Nothing runs until [`Executor::run`].
    pub fn append(&mut self, task: impl FnOnce() -> Result<(), BuildError> + Send + 'a) {
        self.tasks.push(Box::new(task));
    }

    /// Run every queued task on up to `workers` threads and wait.
    pub fn run(self, workers: usize) -> Result<(), BuildError> {
        if self.tasks.is_empty() {
            return Ok(());
        }
        let fail_fast = self.fail_fast;
        let workers = workers.clamp(1, self.tasks.len());
        let queue = Mutex::new(VecDeque::from(self.tasks));
        let failed = AtomicBool::new(false);
        let first_failure: Mutex<Option<BuildError>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let task = {
                        let mut queue = queue.lock().unwrap();
                        if fail_fast && failed.load(Ordering::SeqCst) {
                            queue.clear();
                        }
                        match queue.pop_front() {
                            Some(task) => task,
                            None => break,
                        }
                    };
                    if let Err(err) = task() {
                        failed.store(true, Ordering::SeqCst);
                        first_failure.lock().unwrap().get_or_insert(err);
                    }
                });
            }
        });

        match first_failure.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_empty_executor_succeeds() {
        assert!(Executor::new(true).run(4).is_ok());
    }

    #[test]
    fn test_all_tasks_run_without_failures() {
        let counter = AtomicUsize::new(0);
        let mut executor = Executor::new(false);
        for _ in 0..8 {
            executor.append(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        executor.run(3).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_first_failure_is_reported() {
        let mut executor = Executor::new(false);
        executor.append(|| Ok(()));
        executor.append(|| Err(BuildError::Configuration("boom".to_string())));
        executor.append(|| Ok(()));

        let err = executor.run(1).unwrap_err();
        assert!(matches!(err, BuildError::Configuration(msg) if msg == "boom"));
    }

    #[test]
    fn test_non_fail_fast_runs_everything() {
        let ran = AtomicUsize::new(0);
        let mut executor = Executor::new(false);
        executor.append(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Err(BuildError::Configuration("first".to_string()))
        });
        executor.append(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Err(BuildError::Configuration("second".to_string()))
        });
        executor.append(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = executor.run(1).unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(matches!(err, BuildError::Configuration(msg) if msg == "first"));
    }

    #[test]
    fn test_fail_fast_skips_unstarted_tasks() {
        let ran = AtomicUsize::new(0);
        let mut executor = Executor::new(true);
        executor.append(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        executor.append(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Err(BuildError::Configuration("second".to_string()))
        });
        executor.append(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // One worker: the third task is still queued when the second
        // fails, so it must never start.
        let err = executor.run(1).unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert!(matches!(err, BuildError::Configuration(msg) if msg == "second"));
    }
}
