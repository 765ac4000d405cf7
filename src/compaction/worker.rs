//! Background compaction worker
//!
//! One named thread drains a task channel. Scheduled work (flush, size
//! compaction) and manual range compactions are serialized on it, so at most
//! one compaction runs at a time.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use crate::error::Result;

/// Work the compaction thread can be asked to do
#[derive(Debug)]
pub(crate) enum Task {
    /// Flush the frozen memtable or run a size compaction, whichever is due
    Schedule,

    /// Compact `level` files overlapping `[begin, end]` down one level,
    /// replying once done
    Manual {
        level: usize,
        begin: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        reply: Sender<Result<()>>,
    },

    /// Stop the thread
    Shutdown,
}

/// Implemented by the engine; the worker only decides when to call it
pub(crate) trait BackgroundWork: Send + Sync {
    /// One round of scheduled work. Failures are recorded by the
    /// implementation, not returned.
    fn run_scheduled(&self);

    fn run_manual(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()>;
}

pub(crate) fn spawn_worker<W: BackgroundWork + 'static>(work: Arc<W>, tasks: Receiver<Task>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stratakv-compaction".to_string())
        .spawn(move || worker_loop(work, tasks))
}

fn worker_loop<W: BackgroundWork>(work: Arc<W>, tasks: Receiver<Task>) {
    tracing::debug!("Compaction worker started");
    for task in tasks.iter() {
        match task {
            Task::Schedule => work.run_scheduled(),
            Task::Manual { level, begin, end, reply } => {
                let result = work.run_manual(level, begin.as_deref(), end.as_deref());
                if let Err(e) = &result {
                    tracing::error!(task = "manual_compaction", level, error = %e, "Task execution failed");
                }
                // The requester may have given up waiting
                let _ = reply.send(result);
            }
            Task::Shutdown => break,
        }
    }
    tracing::debug!("Compaction worker stopped");
}
