use std::io::Result as IoResult;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Sender, channel};
use std::thread::Builder as ThreadBuilder;

use log::{debug, error};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

pub type DispatchJob = Box<dyn FnOnce() + Send + 'static>;

/// Where callback invocations run. Jobs posted from one session must run in
/// the order they were posted.
pub trait DispatchSink: Send + Sync {
    fn post(&self, job: DispatchJob);
}

/// One dedicated OS thread running jobs in order.
pub struct ThreadDispatchSink {
    jobs: Sender<DispatchJob>,
}

impl ThreadDispatchSink {
    pub fn spawn(name: &str) -> IoResult<Self> {
        let (jobs, rx) = channel::<DispatchJob>();
        let thread_name = name.to_string();

        ThreadBuilder::new().name(thread_name.clone()).spawn(move || {
            while let Ok(job) = rx.recv() {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Callback panicked on dispatch thread '{thread_name}'");
                }
            }
            debug!("Dispatch thread '{thread_name}' exiting");
        })?;

        Ok(Self { jobs })
    }
}

impl DispatchSink for ThreadDispatchSink {
    fn post(&self, job: DispatchJob) {
        if self.jobs.send(job).is_err() {
            error!("Dispatch thread is gone, dropping callback");
        }
    }
}

/// Hands jobs to the embedder, which runs them on its own loop.
pub struct ChannelDispatchSink {
    jobs: UnboundedSender<DispatchJob>,
}

impl ChannelDispatchSink {
    pub fn new() -> (Self, UnboundedReceiver<DispatchJob>) {
        let (jobs, rx) = unbounded_channel();
        (Self { jobs }, rx)
    }
}

impl DispatchSink for ChannelDispatchSink {
    fn post(&self, job: DispatchJob) {
        if self.jobs.send(job).is_err() {
            debug!("Dispatch receiver dropped, discarding callback");
        }
    }
}

/// Runs jobs on the posting thread (the session's receive loop).
///
/// Only for callbacks that never block.
#[derive(Debug, Default)]
pub struct InlineDispatchSink;

impl DispatchSink for InlineDispatchSink {
    fn post(&self, job: DispatchJob) {
        job();
    }
}
