//! Feature vector sent to the scorer.
//!
//! Website transactions are always online card-not-present payments from the
//! United Kingdom, so those fields are fixed.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Gender, SenderProfile};

/// Age assumed when the sender never supplied a date of birth.
pub const DEFAULT_AGE: u32 = 30;

const COUNTRY_OF_TRANSACTION: &str = "United Kingdom";
const CARD_TYPE: &str = "Visa";
const ENTRY_MODE: &str = "CVC";
const TRANSACTION_TYPE: &str = "Online";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerchantGroup {
    Restaurant,
    Shopping,
    Electronics,
    #[serde(rename = "Gas Station")]
    GasStation,
    Entertainment,
    Travel,
    Services,
    Other,
}

const KEYWORDS: &[(MerchantGroup, &[&str])] = &[
    (MerchantGroup::Restaurant, &["food", "restaurant", "lunch", "dinner"]),
    (MerchantGroup::Shopping, &["shop", "store", "buy", "purchase"]),
    (
        MerchantGroup::Electronics,
        &["phone", "laptop", "ipad", "electronics"],
    ),
    (MerchantGroup::GasStation, &["gas", "fuel", "petrol"]),
    (MerchantGroup::Entertainment, &["movie", "game", "entertainment"]),
    (MerchantGroup::Travel, &["hotel", "travel", "flight"]),
    (MerchantGroup::Services, &["service", "repair"]),
];

/// Coarse merchant category from a free-text description. First matching group wins.
pub fn infer_merchant_group(description: &str) -> MerchantGroup {
    let description = description.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|word| description.contains(word)))
        .map(|(group, _)| *group)
        .unwrap_or(MerchantGroup::Other)
}

/// Completed years between `date_of_birth` and `today`.
pub fn age_on(date_of_birth: Option<NaiveDate>, today: NaiveDate) -> u32 {
    let Some(dob) = date_of_birth else {
        return DEFAULT_AGE;
    };

    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }

    u32::try_from(age).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerRequest {
    #[serde(rename = "Amount")]
    pub amount: f64,
    #[serde(rename = "Time")]
    pub hour: u32,
    #[serde(rename = "Gender")]
    pub gender: Gender,
    #[serde(rename = "Age")]
    pub age: u32,
    #[serde(rename = "Merchant_Group")]
    pub merchant_group: MerchantGroup,
    #[serde(rename = "Country_of_Transaction")]
    pub country_of_transaction: String,
    #[serde(rename = "Shipping_Address")]
    pub shipping_address: String,
    #[serde(rename = "Country_of_Residence")]
    pub country_of_residence: String,
    #[serde(rename = "Bank")]
    pub bank: String,
    #[serde(rename = "Type_of_Card")]
    pub card_type: String,
    #[serde(rename = "Entry_Mode")]
    pub entry_mode: String,
    #[serde(rename = "Type_of_Transaction")]
    pub transaction_type: String,
}

impl ScorerRequest {
    pub fn build(
        amount: &BigDecimal,
        description: &str,
        sender: &SenderProfile,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            amount: amount.to_f64().unwrap_or(0.0),
            hour: now.hour(),
            gender: sender.gender,
            age: age_on(sender.date_of_birth, now.date_naive()),
            merchant_group: infer_merchant_group(description),
            country_of_transaction: COUNTRY_OF_TRANSACTION.to_string(),
            shipping_address: sender.shipping_address.clone(),
            country_of_residence: sender.country.clone(),
            bank: sender.bank.clone(),
            card_type: CARD_TYPE.to_string(),
            entry_mode: ENTRY_MODE.to_string(),
            transaction_type: TRANSACTION_TYPE.to_string(),
        }
    }
}
