// crates/coordinator/src/queue.rs
//! FIFO of prompts waiting behind the in-flight one.
//!
//! The queue itself is a plain data structure; the single-flight dispatch
//! discipline (exactly one prompt in flight, drain one at a time) lives in
//! the session coordinator, which owns both the queue and the activity
//! state.

use std::collections::VecDeque;

use uuid::Uuid;

/// Whether a prompt is currently running against the external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Nothing running; a submitted prompt dispatches immediately.
    Idle,
    /// A prompt has been dispatched and has not yet completed.
    InFlight,
    /// A cancel has been requested and is being processed.
    Cancelling,
}

/// A prompt submitted while another was in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPrompt {
    pub id: String,
    pub text: String,
    pub model: String,
}

impl QueuedPrompt {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            model: model.into(),
        }
    }
}

/// Bounded FIFO, strictly submission-ordered.
#[derive(Debug)]
pub struct PromptQueue {
    prompts: VecDeque<QueuedPrompt>,
    max_queued: usize,
}

impl PromptQueue {
    pub fn new(max_queued: usize) -> Self {
        Self {
            prompts: VecDeque::new(),
            max_queued,
        }
    }

    /// Append at the tail. `Err` when the queue is at capacity — the caller
    /// surfaces this instead of silently dropping the prompt.
    pub fn push(&mut self, prompt: QueuedPrompt) -> Result<(), usize> {
        if self.prompts.len() >= self.max_queued {
            return Err(self.max_queued);
        }
        self.prompts.push_back(prompt);
        Ok(())
    }

    /// Dequeue the head for dispatch.
    pub fn pop_front(&mut self) -> Option<QueuedPrompt> {
        self.prompts.pop_front()
    }

    /// Remove a queued-but-undispatched prompt by id (explicit user action).
    pub fn remove(&mut self, id: &str) -> bool {
        match self.prompts.iter().position(|p| p.id == id) {
            Some(index) => {
                self.prompts.remove(index);
                true
            }
            None => false,
        }
    }

    /// Discard everything; returns how many prompts were dropped.
    /// Cancellation means "stop everything the user asked for after this
    /// point", so queued prompts are not carried over.
    pub fn clear(&mut self) -> usize {
        let dropped = self.prompts.len();
        self.prompts.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedPrompt> {
        self.prompts.iter()
    }
}
