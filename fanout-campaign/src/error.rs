use fanout_common::{CampaignId, CampaignStatus};

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    #[error("campaign {id} is {status}, cannot {operation}")]
    InvalidTransition {
        id: CampaignId,
        status: CampaignStatus,
        operation: &'static str,
    },

    #[error("invalid campaign configuration: {0}")]
    InvalidConfig(&'static str),
}
