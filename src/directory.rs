//! User directory: turns a presented ticket into an identity.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CasError, CasResult};
use crate::identity::Identity;
use crate::validator::{TicketValidator, ValidationOutcome};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the ticket was refused, `Err` when no answer could be had.
    async fn authenticate(&self, ticket: &str, service: &str) -> CasResult<Option<Identity>>;
}

/// Directory that trusts the CAS server's answer as is.
pub struct CasDirectory {
    validator: Arc<dyn TicketValidator>,
}

impl CasDirectory {
    pub fn new(validator: Arc<dyn TicketValidator>) -> Self {
        CasDirectory { validator }
    }
}

#[async_trait]
impl UserDirectory for CasDirectory {
    async fn authenticate(&self, ticket: &str, service: &str) -> CasResult<Option<Identity>> {
        match self.validator.validate(ticket, service).await {
            ValidationOutcome::Authenticated(identity) => Ok(Some(identity)),
            ValidationOutcome::Rejected(reason) => {
                tracing::debug!(service = %service, reason = %reason, "CAS server rejected ticket");
                Ok(None)
            }
            ValidationOutcome::TransportFailure(detail) => Err(CasError::ValidationTransport(detail)),
        }
    }
}
