//! One-shot RPC timers. A fire never touches state directly: it posts a
//! message into the actor's mailbox.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::messages::{InternalMsg, SelfMailbox};

fn schedule(mailbox: &SelfMailbox, delay: Duration, msg: InternalMsg) -> AbortHandle {
    let mailbox = mailbox.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        mailbox.post(msg);
    })
    .abort_handle()
}

#[derive(Debug)]
struct AwaitTimer {
    request_id: u64,
    generation: u64,
    handle: AbortHandle,
}

/// Per-request submit timeouts plus the single await-response timer.
///
/// Cancellation is idempotent. The await timer carries a generation so a
/// fire that raced its cancellation is recognized as stale.
#[derive(Debug, Default)]
pub(crate) struct RpcTimers {
    submit: HashMap<u64, AbortHandle>,
    await_response: Option<AwaitTimer>,
    generation: u64,
}

impl RpcTimers {
    pub fn arm_submit(&mut self, mailbox: &SelfMailbox, request_id: u64, delay: Duration) {
        let handle = schedule(mailbox, delay, InternalMsg::SubmitTimeout { request_id });
        if let Some(previous) = self.submit.insert(request_id, handle) {
            previous.abort();
        }
    }

    pub fn cancel_submit(&mut self, request_id: u64) {
        if let Some(handle) = self.submit.remove(&request_id) {
            handle.abort();
        }
    }

    /// Arm the await-response timer unless one is already running.
    pub fn arm_await(&mut self, mailbox: &SelfMailbox, request_id: u64, delay: Duration) -> bool {
        if self.await_response.is_some() {
            return false;
        }
        self.generation += 1;
        let generation = self.generation;
        let handle = schedule(
            mailbox,
            delay,
            InternalMsg::AwaitTimeout {
                request_id,
                generation,
            },
        );
        self.await_response = Some(AwaitTimer {
            request_id,
            generation,
            handle,
        });
        true
    }

    pub fn cancel_await(&mut self) {
        if let Some(timer) = self.await_response.take() {
            timer.handle.abort();
        }
    }

    /// Cancel the await timer only if it covers `request_id`.
    pub fn cancel_await_for(&mut self, request_id: u64) {
        if self.awaiting() == Some(request_id) {
            self.cancel_await();
        }
    }

    /// Request the await timer currently covers.
    pub fn awaiting(&self) -> Option<u64> {
        self.await_response.as_ref().map(|t| t.request_id)
    }

    /// Consume a fired await timer. `false` when the fire is stale.
    pub fn take_fired_await(&mut self, generation: u64) -> bool {
        match &self.await_response {
            Some(timer) if timer.generation == generation => {
                self.await_response = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.submit.drain() {
            handle.abort();
        }
        self.cancel_await();
    }
}
