// Queue error supervision.
//
// The consumer forwards every error it hits to an unbounded channel. The
// supervisor logs each one and hands fatal ones to a handler supplied by
// the binary, which is the only place the process exits.

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::queue::QueueError;

pub struct Supervisor<F> {
    service_name: String,
    errors: mpsc::UnboundedReceiver<QueueError>,
    on_fatal: F,
}

impl<F> Supervisor<F>
where
    F: Fn(&QueueError, &str) + Send,
{
    pub fn new(service_name: &str, errors: mpsc::UnboundedReceiver<QueueError>, on_fatal: F) -> Self {
        Self {
            service_name: service_name.to_string(),
            errors,
            on_fatal,
        }
    }

    /// Drain the error channel until every sender is dropped.
    pub async fn supervise(mut self) {
        while let Some(e) = self.errors.recv().await {
            if e.is_fatal() {
                error!(service = %self.service_name, error = %e, "Fatal queue error");
                (self.on_fatal)(&e, &self.service_name);
            } else {
                warn!(service = %self.service_name, error = %e, "Queue error");
            }
        }
    }
}
