//! Flower reward handlers.

use keepsake_engine::collections::rewards::{RewardDraft, RewardSummary, Summary};
use keepsake_engine::Error as StoreError;
use serde::Deserialize;

use super::Created;
use crate::error::Result;
use crate::stores::Stores;

/// Body of a reward action request.
#[derive(Debug, Default, Deserialize)]
pub struct RewardRequest {
    #[serde(default)]
    pub note: Option<String>,
}

/// Balance, redeemed count and recent history.
pub fn handle_summary(stores: &Stores, history_limit: usize) -> RewardSummary {
    stores.rewards.derive(&Summary { history_limit })
}

/// Earn one flower.
pub async fn handle_add_flower(stores: &Stores, request: RewardRequest) -> Result<Created> {
    record_action(stores, RewardDraft::add_flower(request.note)).await
}

/// Spend flowers on a wish. Rejected without contacting the remote when the
/// balance is too low.
pub async fn handle_redeem(stores: &Stores, request: RewardRequest) -> Result<Created> {
    record_action(stores, RewardDraft::redeem_wish(request.note)).await
}

async fn record_action(stores: &Stores, draft: RewardDraft) -> Result<Created> {
    let fields = draft.to_fields().map_err(StoreError::from)?;
    let id = stores.rewards.insert(fields)?.await?;
    tracing::info!(id = %id, action = %draft.action_type.as_str(), "Reward action recorded");
    Ok(Created { id })
}
