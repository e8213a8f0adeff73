use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ProviderError;
use crate::providers::DecryptionService;
use crate::types::{Address, DecryptionSignature, Round, TableId, UnixSeconds};

const LOG_TARGET: &str = "table_sync::decryption::signature";

/// What a cached signature may be reused for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureScope {
    pub identity: Address,
    pub contract: Address,
    pub table_id: TableId,
    pub round: Round,
}

struct CachedSignature {
    scope: SignatureScope,
    signature: Arc<DecryptionSignature>,
}

/// Single active signature slot. Invalidated on every new hand, and never
/// served for another table, round, identity or contract.
#[derive(Default)]
pub struct SignatureCache {
    slot: Mutex<Option<CachedSignature>>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(
        &self,
        scope: &SignatureScope,
        now: UnixSeconds,
    ) -> Option<Arc<DecryptionSignature>> {
        let slot = self.slot.lock();
        let cached = slot.as_ref()?;
        (cached.scope == *scope && cached.signature.covers(&scope.identity, &scope.contract, now))
            .then(|| Arc::clone(&cached.signature))
    }

    pub async fn get_or_create(
        &self,
        service: &dyn DecryptionService,
        scope: &SignatureScope,
        now: UnixSeconds,
    ) -> Result<Arc<DecryptionSignature>, ProviderError> {
        if let Some(signature) = self.cached(scope, now) {
            return Ok(signature);
        }

        debug!(
            target: LOG_TARGET,
            identity = %scope.identity,
            table_id = scope.table_id,
            round = scope.round,
            "requesting decryption signature"
        );
        let signature = Arc::new(
            service
                .create_signature(&scope.identity, std::slice::from_ref(&scope.contract))
                .await?,
        );
        *self.slot.lock() = Some(CachedSignature {
            scope: scope.clone(),
            signature: Arc::clone(&signature),
        });
        Ok(signature)
    }

    pub fn invalidate(&self) {
        if self.slot.lock().take().is_some() {
            debug!(target: LOG_TARGET, "dropped cached decryption signature");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}
