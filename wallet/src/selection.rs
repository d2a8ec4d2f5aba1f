//! Coin selection
//!
//! Picks spendable notes until their sum covers the requested amount.
//! Ties on amount are broken by commitment bytes so selection is
//! deterministic for a given note set.

use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::Zero;
use shroud_config::SelectionPolicyToml;
use shroud_error::{Result, ShroudError};

use crate::store::Note;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Fewest inputs
    #[default]
    LargestFirst,
    /// Consolidates dust
    SmallestFirst,
}

impl From<SelectionPolicyToml> for SelectionPolicy {
    fn from(policy: SelectionPolicyToml) -> Self {
        match policy {
            SelectionPolicyToml::LargestFirst => Self::LargestFirst,
            SelectionPolicyToml::SmallestFirst => Self::SmallestFirst,
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SelectionPolicyToml::from_str(s)
            .map(Self::from)
            .map_err(|e| e.to_string())
    }
}

/// Fail fast on an empty or insufficient spendable set
pub fn check_funds(spendable: &[Note], amount: &BigUint) -> Result<BigUint> {
    if spendable.is_empty() {
        return Err(ShroudError::NoSpendableNotes);
    }
    let available: BigUint = spendable.iter().map(|n| &n.amount).sum();
    if &available < amount {
        return Err(ShroudError::InsufficientBalance {
            required: amount.to_string(),
            available: available.to_string(),
        });
    }
    Ok(available)
}

/// Select notes covering `amount`; returns the selection and its total
pub fn select_notes(spendable: &[Note], amount: &BigUint, policy: SelectionPolicy) -> Result<(Vec<Note>, BigUint)> {
    check_funds(spendable, amount)?;

    let mut candidates: Vec<&Note> = spendable.iter().collect();
    candidates.sort_by(|a, b| {
        let by_amount = match policy {
            SelectionPolicy::LargestFirst => b.amount.cmp(&a.amount),
            SelectionPolicy::SmallestFirst => a.amount.cmp(&b.amount),
        };
        by_amount.then_with(|| a.commitment.cmp(&b.commitment))
    });

    let mut selected = Vec::new();
    let mut total = BigUint::zero();
    for note in candidates {
        if !selected.is_empty() && &total >= amount {
            break;
        }
        total += &note.amount;
        selected.push(note.clone());
    }

    Ok((selected, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shroud_error::ErrorKind;
    use shroud_privacy::{Commitment, Nullifier};

    use crate::store::{NoteKind, NoteMetadata, NoteStatus};

    fn note(amount: u64, tag: u8) -> Note {
        Note {
            id: format!("n{tag}"),
            kind: NoteKind::Deposit,
            amount: amount.into(),
            commitment: Commitment([tag; 32]),
            nullifier: Nullifier::from_bytes([tag; 32]),
            recipient_address: "shroud:alice".into(),
            status: NoteStatus::Confirmed,
            spent: false,
            encrypted_payload: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            metadata: NoteMetadata::default(),
        }
    }

    fn amounts(notes: &[Note]) -> Vec<u64> {
        notes.iter().map(|n| n.amount.to_u64_digits().first().copied().unwrap_or(0)).collect()
    }

    #[test]
    fn test_largest_first() {
        let notes = vec![note(2, 1), note(5, 2), note(3, 3)];
        let (selected, total) = select_notes(&notes, &6u32.into(), SelectionPolicy::LargestFirst).unwrap();
        assert_eq!(amounts(&selected), vec![5, 3]);
        assert_eq!(total, 8u32.into());
    }

    #[test]
    fn test_smallest_first() {
        let notes = vec![note(2, 1), note(5, 2), note(3, 3)];
        let (selected, total) = select_notes(&notes, &4u32.into(), SelectionPolicy::SmallestFirst).unwrap();
        assert_eq!(amounts(&selected), vec![2, 3]);
        assert_eq!(total, 5u32.into());
    }

    #[test]
    fn test_ties_broken_by_commitment() {
        let notes = vec![note(4, 9), note(4, 1), note(4, 5)];
        let (selected, _) = select_notes(&notes, &4u32.into(), SelectionPolicy::LargestFirst).unwrap();
        assert_eq!(selected[0].id, "n1");
    }

    #[test]
    fn test_zero_amount_still_selects_one_input() {
        let notes = vec![note(4, 1)];
        let (selected, _) = select_notes(&notes, &BigUint::zero(), SelectionPolicy::LargestFirst).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn test_prechecks() {
        let err = select_notes(&[], &1u32.into(), SelectionPolicy::LargestFirst).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpendableNotes);

        let notes = vec![note(5, 1), note(3, 2), note(2, 3)];
        let err = select_notes(&notes, &11u32.into(), SelectionPolicy::LargestFirst).unwrap_err();
        assert_eq!(
            err,
            ShroudError::InsufficientBalance {
                required: "11".into(),
                available: "10".into()
            }
        );
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("smallest-first".parse(), Ok(SelectionPolicy::SmallestFirst));
        assert_eq!(
            SelectionPolicy::from(SelectionPolicyToml::LargestFirst),
            SelectionPolicy::LargestFirst
        );
        assert!("random".parse::<SelectionPolicy>().is_err());
    }
}
