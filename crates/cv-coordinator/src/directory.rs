//! Recipient lookup
//!
//! The coordinator asks the directory who an invitation goes to. The
//! returned order is the order addressed copies are published in.

use async_trait::async_trait;
use cv_common::{Invitation, Recipient};
use cv_config::DirectoryConfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Recipients for `invitation`, in a stable order.
    async fn recipients(&self, invitation: &Invitation) -> Result<Vec<Recipient>, DirectoryError>;
}

/// Fixed guest list, the same for every invitation.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    recipients: Vec<Recipient>,
}

impl StaticDirectory {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self::new(
            config
                .recipients
                .iter()
                .map(|r| Recipient::new(&r.id, &r.name))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn recipients(&self, _invitation: &Invitation) -> Result<Vec<Recipient>, DirectoryError> {
        Ok(self.recipients.clone())
    }
}
