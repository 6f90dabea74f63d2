//! The "little red flower" reward ledger.
//!
//! Every action is an immutable row with a signed `flower_amount`; the
//! balance is the sum over all rows. Adding a flower earns one, redeeming a
//! wish spends ten.

use super::{read_record, to_fields, InsertGuard};
use crate::{
    error::{Result, ValidationError},
    view::{FieldEq, SignedTotals, Sum, Totals},
    CollectionSchema, Count, FieldDef, FieldType, Fields, Record, RecordId, Selector, Timestamp,
};
use serde::{Deserialize, Serialize};

pub const COLLECTION: &str = "reward_actions";

pub const AMOUNT_FIELD: &str = "flower_amount";
pub const ACTION_FIELD: &str = "action_type";

/// Flowers earned per `add_flower` action.
pub const FLOWER_REWARD: i64 = 1;

/// Flowers spent per redeemed wish.
pub const REDEEM_COST: i64 = 10;

/// Rows shown in the history list.
pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    AddFlower,
    RedeemWish,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AddFlower => "add_flower",
            ActionType::RedeemWish => "redeem_wish",
        }
    }

    /// Signed balance change of one action.
    pub fn amount(&self) -> i64 {
        match self {
            ActionType::AddFlower => FLOWER_REWARD,
            ActionType::RedeemWish => -REDEEM_COST,
        }
    }
}

pub fn schema() -> CollectionSchema {
    CollectionSchema::new(
        COLLECTION,
        vec![
            FieldDef::required(ACTION_FIELD, FieldType::String)
                .one_of(&[ActionType::AddFlower.as_str(), ActionType::RedeemWish.as_str()]),
            FieldDef::required(AMOUNT_FIELD, FieldType::Int),
            FieldDef::optional("note", FieldType::String),
        ],
    )
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardAction {
    pub id: RecordId,
    pub created_at: Timestamp,
    pub action_type: ActionType,
    pub flower_amount: i64,
    #[serde(default)]
    pub note: Option<String>,
}

impl RewardAction {
    pub fn from_record(record: &Record) -> Result<Self> {
        read_record(record)
    }
}

/// A new ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardDraft {
    pub action_type: ActionType,
    pub flower_amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RewardDraft {
    pub fn add_flower(note: Option<String>) -> Self {
        Self::of(ActionType::AddFlower, note)
    }

    pub fn redeem_wish(note: Option<String>) -> Self {
        Self::of(ActionType::RedeemWish, note)
    }

    fn of(action_type: ActionType, note: Option<String>) -> Self {
        Self {
            action_type,
            flower_amount: action_type.amount(),
            note: note.filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn to_fields(&self) -> std::result::Result<Fields, ValidationError> {
        to_fields(self)
    }
}

/// Current flower balance.
pub fn balance(records: &[Record]) -> i64 {
    Sum::of(AMOUNT_FIELD).select(records)
}

/// Everything the rewards screen shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSummary {
    pub balance: i64,
    /// Number of redeemed wishes
    pub redeemed: usize,
    pub totals: Totals,
    /// Newest actions first
    pub history: Vec<RewardAction>,
}

/// Selector producing a [`RewardSummary`] with at most `history_limit`
/// history rows. The balance always covers every row.
#[derive(Debug, Clone, Copy)]
pub struct Summary {
    pub history_limit: usize,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            history_limit: HISTORY_LIMIT,
        }
    }
}

impl Selector for Summary {
    type Output = RewardSummary;

    fn select(&self, records: &[Record]) -> RewardSummary {
        let totals = SignedTotals::of(AMOUNT_FIELD).select(records);
        RewardSummary {
            balance: totals.net(),
            redeemed: Count(FieldEq::new(ACTION_FIELD, ActionType::RedeemWish.as_str()))
                .select(records),
            totals,
            history: records
                .iter()
                .filter_map(|r| RewardAction::from_record(r).ok())
                .take(self.history_limit)
                .collect(),
        }
    }
}

/// Ledger insert guard: redeeming needs at least [`REDEEM_COST`] flowers,
/// no action may take the balance below zero, and the amount must match
/// the action's direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedeemGuard;

impl InsertGuard for RedeemGuard {
    fn check(&self, records: &[Record], draft: &Fields) -> std::result::Result<(), ValidationError> {
        let amount = draft
            .get(AMOUNT_FIELD)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ValidationError::MissingRequiredField(AMOUNT_FIELD.into()))?;
        let action = match draft.get(ACTION_FIELD).and_then(|v| v.as_str()) {
            Some(a) if a == ActionType::AddFlower.as_str() => ActionType::AddFlower,
            Some(a) if a == ActionType::RedeemWish.as_str() => ActionType::RedeemWish,
            other => {
                return Err(ValidationError::InvalidPayload(format!(
                    "unknown action: {}",
                    other.unwrap_or("none")
                )))
            }
        };

        if amount != action.amount() {
            return Err(ValidationError::InvalidPayload(format!(
                "{} moves {} flowers, not {amount}",
                action.as_str(),
                action.amount()
            )));
        }

        let balance = balance(records);
        if action == ActionType::RedeemWish && balance < REDEEM_COST {
            return Err(ValidationError::InsufficientBalance {
                balance,
                required: REDEEM_COST,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(id: &str, at: &str, action_type: ActionType) -> Record {
        Record::from_row(&json!({
            "id": id,
            "created_at": at,
            "action_type": action_type.as_str(),
            "flower_amount": action_type.amount(),
        }))
        .unwrap()
    }

    fn ledger(flowers: usize) -> Vec<Record> {
        (0..flowers)
            .map(|i| {
                action(
                    &format!("f{i}"),
                    &format!("2024-02-14T10:{:02}:00Z", 59 - i),
                    ActionType::AddFlower,
                )
            })
            .collect()
    }

    fn prepared(draft: RewardDraft) -> Fields {
        schema().prepare_draft(draft.to_fields().unwrap()).unwrap()
    }

    #[test]
    fn empty_ledger_summary() {
        let summary = Summary::default().select(&[]);
        assert_eq!(summary.balance, 0);
        assert_eq!(summary.redeemed, 0);
        assert!(summary.history.is_empty());
    }

    #[test]
    fn summary_counts_everything_but_limits_history() {
        let mut records = ledger(12);
        records.insert(0, action("r1", "2024-02-14T11:00:00Z", ActionType::RedeemWish));

        let summary = Summary { history_limit: 5 }.select(&records);
        assert_eq!(summary.balance, 2);
        assert_eq!(summary.redeemed, 1);
        assert_eq!(summary.totals.credits, 12);
        assert_eq!(summary.totals.debits, 10);
        assert_eq!(summary.history.len(), 5);
        assert_eq!(summary.history[0].action_type, ActionType::RedeemWish);
    }

    #[test]
    fn redeem_needs_ten_flowers() {
        let draft = prepared(RewardDraft::redeem_wish(None));

        let err = RedeemGuard.check(&ledger(1), &draft).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InsufficientBalance {
                balance: 1,
                required: REDEEM_COST
            }
        );

        assert!(RedeemGuard.check(&ledger(10), &draft).is_ok());
    }

    #[test]
    fn flowers_can_always_be_added() {
        let draft = prepared(RewardDraft::add_flower(Some("made dinner".into())));
        assert!(RedeemGuard.check(&[], &draft).is_ok());
        assert_eq!(draft.get("note"), Some(&json!("made dinner")));
    }

    #[test]
    fn amounts_must_match_the_action() {
        let draft = json!({"action_type": "add_flower", "flower_amount": -3})
            .as_object()
            .cloned()
            .unwrap();
        assert!(matches!(
            RedeemGuard.check(&ledger(20), &draft),
            Err(ValidationError::InvalidPayload(_))
        ));

        for (action, amount) in [("redeem_wish", 10), ("redeem_wish", -1), ("add_flower", 500)] {
            let draft = json!({"action_type": action, "flower_amount": amount})
                .as_object()
                .cloned()
                .unwrap();
            assert!(
                matches!(
                    RedeemGuard.check(&ledger(10), &draft),
                    Err(ValidationError::InvalidPayload(_))
                ),
                "{action} with {amount}"
            );
        }
    }

    #[test]
    fn blank_notes_are_dropped() {
        let draft = RewardDraft::add_flower(Some("  ".into()));
        assert!(draft.note.is_none());
        assert!(!draft.to_fields().unwrap().contains_key("note"));
    }
}
