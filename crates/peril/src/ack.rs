//! Acknowledgment policy.
//!
//! | Disposition  | Broker call          | Effect                                    |
//! |--------------|----------------------|-------------------------------------------|
//! | `Accept`     | `ack`                | removed from the queue                    |
//! | `RetryLater` | `nack(requeue=true)` | redelivered with the redelivered flag set |
//! | `Discard`    | `nack(requeue=false)`| removed, dead-lettered if the queue has a DLX |
//!
//! [`apply`] takes the acknowledger by value, so one delivery can be
//! settled once and only once.

use std::future::Future;

use peril_broker::{Acker, BrokerError};

/// How a handled delivery should be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Accept,
    RetryLater,
    Discard,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::RetryLater => write!(f, "retry-later"),
            Self::Discard => write!(f, "discard"),
        }
    }
}

/// Settles a single delivery.
///
/// Implemented for [`Acker`]; tests supply recording fakes.
pub trait Acknowledge: Send {
    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn nack(self, requeue: bool) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

impl Acknowledge for Acker {
    fn ack(self) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Acker::ack(self)
    }

    fn nack(self, requeue: bool) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Acker::nack(self, requeue)
    }
}

/// Makes exactly one broker call for `disposition`.
pub async fn apply<A: Acknowledge>(acker: A, disposition: Disposition) -> Result<(), BrokerError> {
    match disposition {
        Disposition::Accept => acker.ack().await,
        Disposition::RetryLater => acker.nack(true).await,
        Disposition::Discard => acker.nack(false).await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Ack,
        Nack { requeue: bool },
    }

    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl Acknowledge for Recorder {
        async fn ack(self) -> Result<(), BrokerError> {
            self.0.lock().unwrap().push(Call::Ack);
            Ok(())
        }

        async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
            self.0.lock().unwrap().push(Call::Nack { requeue });
            Ok(())
        }
    }

    async fn calls_for(disposition: Disposition) -> Vec<Call> {
        let calls = Arc::new(Mutex::new(Vec::new()));
        apply(Recorder(Arc::clone(&calls)), disposition).await.unwrap();
        let recorded = calls.lock().unwrap().clone();
        recorded
    }

    #[tokio::test]
    async fn test_each_disposition_makes_one_call() {
        assert_eq!(calls_for(Disposition::Accept).await, vec![Call::Ack]);
        assert_eq!(
            calls_for(Disposition::RetryLater).await,
            vec![Call::Nack { requeue: true }]
        );
        assert_eq!(
            calls_for(Disposition::Discard).await,
            vec![Call::Nack { requeue: false }]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Disposition::RetryLater.to_string(), "retry-later");
    }
}
