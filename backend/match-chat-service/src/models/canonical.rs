//! Deterministic identity for pair-owned records.
//!
//! Match and chat identities are UUIDv5 keys over the sorted participant
//! pair, so "create if absent" needs no id-coordination step: every writer
//! racing on the same pair computes the same key.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use uuid::Uuid;

const MATCH_NAMESPACE: Uuid = Uuid::from_u128(0x5b1f_0c1e_9a57_4d3e_8f61_2c7a_0d4e_6b01);
const CHAT_NAMESPACE: Uuid = Uuid::from_u128(0x7e2a_44c9_13d0_4b8f_a6c2_9f35_81e0_2d02);
const INTEREST_NAMESPACE: Uuid = Uuid::from_u128(0x1c93_ab07_5e64_4f12_b0d8_47a6_c3f9_1e03);
const PRESENCE_NAMESPACE: Uuid = Uuid::from_u128(0x3d48_e6f2_0a7b_4c95_9e13_d27f_6b8a_4c04);

/// Two distinct users, always stored low id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "[Uuid; 2]", try_from = "[Uuid; 2]")]
pub struct ParticipantPair {
    low: Uuid,
    high: Uuid,
}

impl ParticipantPair {
    pub fn new(a: Uuid, b: Uuid) -> Result<Self, AppError> {
        if a == b {
            return Err(AppError::InvalidInput(
                "a pair needs two distinct participants".into(),
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn members(&self) -> [Uuid; 2] {
        [self.low, self.high]
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The participant that is not `user_id`, if `user_id` is in the pair.
    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.low {
            Some(self.high)
        } else if user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }

    fn key(&self) -> String {
        format!("{}:{}", self.low, self.high)
    }

    pub fn match_id(&self) -> Uuid {
        Uuid::new_v5(&MATCH_NAMESPACE, self.key().as_bytes())
    }

    pub fn chat_id(&self) -> Uuid {
        Uuid::new_v5(&CHAT_NAMESPACE, self.key().as_bytes())
    }
}

impl From<ParticipantPair> for [Uuid; 2] {
    fn from(pair: ParticipantPair) -> Self {
        pair.members()
    }
}

impl TryFrom<[Uuid; 2]> for ParticipantPair {
    type Error = AppError;

    fn try_from(value: [Uuid; 2]) -> Result<Self, Self::Error> {
        ParticipantPair::new(value[0], value[1])
    }
}

/// Canonical match id for two users, independent of argument order.
pub fn match_id(a: Uuid, b: Uuid) -> Result<Uuid, AppError> {
    Ok(ParticipantPair::new(a, b)?.match_id())
}

/// Canonical chat thread id for two users, independent of argument order.
pub fn chat_id(a: Uuid, b: Uuid) -> Result<Uuid, AppError> {
    Ok(ParticipantPair::new(a, b)?.chat_id())
}

pub fn interest_id(user_id: Uuid, event_id: Uuid) -> Uuid {
    Uuid::new_v5(
        &INTEREST_NAMESPACE,
        format!("{user_id}:{event_id}").as_bytes(),
    )
}

pub fn presence_id(chat_id: Uuid, user_id: Uuid) -> Uuid {
    Uuid::new_v5(
        &PRESENCE_NAMESPACE,
        format!("{chat_id}:{user_id}").as_bytes(),
    )
}
