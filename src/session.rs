/// Per-process custody session.
///
/// Holds the only shared state of the flows: whether a credential flow
/// is running, and the private key unlocked by the last successful
/// unwrap.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rsa::RsaPrivateKey;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CustodyError, Result};

/// The kind of flow holding the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Issuance,
    Unlock,
}

#[derive(Default)]
pub struct Session {
    active: AtomicBool,
    signing_key: RwLock<Option<Arc<RsaPrivateKey>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a credential flow. Fails with `FlowBusy` while another is active.
    pub fn begin(&self, kind: FlowKind) -> Result<FlowPermit<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CustodyError::FlowBusy)?;
        let id = Uuid::new_v4();
        debug!(flow_id = %id, ?kind, "Credential flow started");
        Ok(FlowPermit {
            session: self,
            id,
            kind,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn signing_key(&self) -> Option<Arc<RsaPrivateKey>> {
        self.signing_key.read().clone()
    }

    pub(crate) fn set_signing_key(&self, key: RsaPrivateKey) {
        *self.signing_key.write() = Some(Arc::new(key));
    }

    /// Forget the unlocked key.
    pub fn lock(&self) {
        self.signing_key.write().take();
    }
}

/// Held for the duration of a flow; releases the session on drop.
pub struct FlowPermit<'a> {
    session: &'a Session,
    id: Uuid,
    kind: FlowKind,
}

impl FlowPermit<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }
}

impl Drop for FlowPermit<'_> {
    fn drop(&mut self) {
        self.session.active.store(false, Ordering::Release);
        debug!(flow_id = %self.id, kind = ?self.kind, "Credential flow finished");
    }
}
