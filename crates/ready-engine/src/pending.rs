use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use ready_protocol::{FeatureSet, ReadinessError, ReadinessResult, ReadyOutcome};
use tokio::sync::watch;
use uuid::Uuid;

type Slot = Option<ReadinessResult<ReadyOutcome>>;

/// Become-ready handle: completes once every requested feature is decided.
///
/// Clones share one completion. The engine hands out the same handle for
/// concurrent requests of an equal feature set; [`PendingReady::ptr_eq`] tells
/// whether two handles are the same operation. Dropping every clone abandons
/// the wait but does not cancel probes already in flight.
#[derive(Clone)]
pub struct PendingReady {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    requested: FeatureSet,
    result: watch::Sender<Slot>,
}

impl PendingReady {
    pub(crate) fn new(requested: FeatureSet) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                requested,
                result,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn requested_features(&self) -> &FeatureSet {
        &self.inner.requested
    }

    pub fn is_finished(&self) -> bool {
        self.inner.result.borrow().is_some()
    }

    /// Finished and not failed.
    pub fn is_valid(&self) -> bool {
        matches!(*self.inner.result.borrow(), Some(Ok(_)))
    }

    pub fn is_error(&self) -> bool {
        matches!(*self.inner.result.borrow(), Some(Err(_)))
    }

    /// Outcome if finished, `None` while still pending.
    pub fn result(&self) -> Option<ReadinessResult<ReadyOutcome>> {
        self.inner.result.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &PendingReady) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait until the handle finishes.
    pub async fn wait(&self) -> ReadinessResult<ReadyOutcome> {
        let mut receiver = self.inner.result.subscribe();
        let waited = receiver
            .wait_for(Option::is_some)
            .await
            .map(|slot| (*slot).clone());
        waited
            .ok()
            .flatten()
            .unwrap_or(Err(ReadinessError::HelperDropped))
    }

    pub(crate) fn set_finished(&self, outcome: ReadyOutcome) -> bool {
        self.finish(Ok(outcome))
    }

    pub(crate) fn set_finished_with_error(&self, error: ReadinessError) -> bool {
        self.finish(Err(error))
    }

    /// First result wins; later calls leave the handle untouched.
    fn finish(&self, result: ReadinessResult<ReadyOutcome>) -> bool {
        self.inner.result.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }
}

impl IntoFuture for PendingReady {
    type Output = ReadinessResult<ReadyOutcome>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl fmt::Debug for PendingReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReady")
            .field("id", &self.inner.id)
            .field("requested", &self.inner.requested)
            .field("finished", &self.is_finished())
            .finish()
    }
}
