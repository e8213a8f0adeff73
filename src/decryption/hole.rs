use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::signature::{SignatureCache, SignatureScope};
use crate::error::{ProviderError, SyncError, SyncResult};
use crate::providers::{AuthorityProvider, Clock, DecryptionService, LedgerReader};
use crate::types::{Address, ClientIdentity, HoleCards, Round, TableId};

const LOG_TARGET: &str = "table_sync::decryption::hole";

/// One pass of the hole-card workflow: handles, authority, signature, decrypt.
pub struct HoleCardDecryptor {
    ledger: Arc<dyn LedgerReader>,
    decryption: Arc<dyn DecryptionService>,
    authority: Arc<dyn AuthorityProvider>,
    clock: Arc<dyn Clock>,
    identity: ClientIdentity,
    signatures: Arc<SignatureCache>,
    /// (principal, delegate) pairs known to hold decryption authority.
    granted: Mutex<HashSet<(Address, Address)>>,
}

impl HoleCardDecryptor {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        decryption: Arc<dyn DecryptionService>,
        authority: Arc<dyn AuthorityProvider>,
        clock: Arc<dyn Clock>,
        identity: ClientIdentity,
        signatures: Arc<SignatureCache>,
    ) -> Self {
        Self {
            ledger,
            decryption,
            authority,
            clock,
            identity,
            signatures,
            granted: Mutex::new(HashSet::new()),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub async fn attempt(&self, table_id: TableId, round: Round) -> SyncResult<HoleCards> {
        let handles = self
            .ledger
            .hole_card_handles(table_id, &self.identity.principal)
            .await?;

        self.ensure_authority().await?;

        let scope = SignatureScope {
            identity: self.identity.signer.clone(),
            contract: self.identity.contract.clone(),
            table_id,
            round,
        };

        let mut corrected = false;
        let values = loop {
            let signature = self
                .signatures
                .get_or_create(self.decryption.as_ref(), &scope, self.clock.now())
                .await?;
            match self.decryption.user_decrypt(&handles, &signature).await {
                Ok(values) => break values,
                Err(ProviderError::Unauthorized(reason)) if !corrected => {
                    warn!(
                        target: LOG_TARGET,
                        table_id,
                        round,
                        %reason,
                        "decryption refused, renewing signature and authority"
                    );
                    corrected = true;
                    self.signatures.invalidate();
                    self.granted.lock().clear();
                    self.ensure_authority().await?;
                }
                Err(err) => return Err(err.into()),
            }
        };

        match values.as_slice() {
            [card1, card2] => {
                debug!(target: LOG_TARGET, table_id, round, "hole cards decrypted");
                Ok(HoleCards {
                    card1: *card1,
                    card2: *card2,
                })
            }
            other => Err(SyncError::Provider(ProviderError::InvalidState(format!(
                "expected 2 hole card values, got {}",
                other.len()
            )))),
        }
    }

    async fn ensure_authority(&self) -> SyncResult<()> {
        if !self.identity.is_delegated() {
            return Ok(());
        }
        let pair = (
            self.identity.principal.clone(),
            self.identity.signer.clone(),
        );
        if self.granted.lock().contains(&pair) {
            return Ok(());
        }

        match self
            .authority
            .grant_decryption_authority(&pair.0, &pair.1, &self.identity.contract)
            .await
        {
            Ok(()) => {
                info!(
                    target: LOG_TARGET,
                    principal = %pair.0,
                    delegate = %pair.1,
                    "granted decryption authority"
                );
            }
            Err(ProviderError::AlreadyGranted) => {
                debug!(target: LOG_TARGET, principal = %pair.0, "decryption authority already granted");
            }
            Err(err) => return Err(err.into()),
        }
        self.granted.lock().insert(pair);
        Ok(())
    }
}
