//! Admission queue: FIFO within each priority class, higher classes first

use std::collections::VecDeque;
use stockade_core::{Job, JobId, Priority};

#[derive(Debug, Default)]
pub struct AdmissionQueue {
    lanes: [VecDeque<Job>; 3],
}

impl AdmissionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) {
        self.lanes[job.priority.index()].push_back(job);
    }

    /// Next job to dispatch
    pub fn pop(&mut self) -> Option<Job> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Take a queued job out of line
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.lanes.iter_mut().find_map(|lane| {
            let pos = lane.iter().position(|job| job.id == id)?;
            lane.remove(pos)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    #[must_use]
    pub fn len_of(&self, priority: Priority) -> usize {
        self.lanes[priority.index()].len()
    }

    /// Empty the queue in dispatch order
    pub fn drain(&mut self) -> Vec<Job> {
        self.lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
    }
}
