//! ERP staging channel.
//!
//! Invoice staging is fire-and-forget: `stage` only hands the request over.
//! The actual result comes back later through reconciliation.

use std::sync::Mutex;

use thiserror::Error;

use orderflow_orders::ErpStagingRequest;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErpChannelError {
    #[error("erp channel '{channel}' unavailable: {message}")]
    Unavailable { channel: String, message: String },
}

pub trait ErpChannel: Send + Sync {
    fn stage(&self, request: &ErpStagingRequest) -> Result<(), ErpChannelError>;
}

impl<C> ErpChannel for std::sync::Arc<C>
where
    C: ErpChannel + ?Sized,
{
    fn stage(&self, request: &ErpStagingRequest) -> Result<(), ErpChannelError> {
        (**self).stage(request)
    }
}

/// Records every staged request; can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct InMemoryErpChannel {
    sent: Mutex<Vec<ErpStagingRequest>>,
    failure: Mutex<Option<String>>,
}

impl InMemoryErpChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail with `message` (`None` to recover).
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = message.map(String::from);
        }
    }

    pub fn sent(&self) -> Vec<ErpStagingRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ErpChannel for InMemoryErpChannel {
    fn stage(&self, request: &ErpStagingRequest) -> Result<(), ErpChannelError> {
        let failure = self.failure.lock().ok().and_then(|f| f.clone());
        if let Some(message) = failure {
            return Err(ErpChannelError::Unavailable {
                channel: request.channel.clone(),
                message,
            });
        }

        let mut sent = self.sent.lock().map_err(|_| ErpChannelError::Unavailable {
            channel: request.channel.clone(),
            message: "channel state poisoned".to_string(),
        })?;
        sent.push(request.clone());
        Ok(())
    }
}
