//! Account and owner profile entities.
//! Only the owner's primary account takes part in transfers and payments.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

impl Default for Gender {
    fn default() -> Self {
        Gender::Male
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Gender::Male),
            "F" => Ok(Gender::Female),
            other => Err(ParseEnumError::new("gender", other)),
        }
    }
}

/// Identity data of an account owner. Read-only input to fraud scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        gender: Gender,
        date_of_birth: Option<NaiveDate>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            gender,
            date_of_birth,
            created_at: Utc::now(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub account_number: String,
    pub balance: BigDecimal,
    pub bank: String,
    pub country: String,
    pub shipping_address: String,
    pub is_primary: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Opens a primary account with the bank/country defaults of the platform.
    pub fn primary(owner_id: Uuid, account_number: impl Into<String>, balance: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            account_number: account_number.into(),
            balance,
            bank: "HSBC".to_string(),
            country: "United Kingdom".to_string(),
            shipping_address: "United Kingdom".to_string(),
            is_primary: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_funds(&self, amount: &BigDecimal) -> bool {
        &self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_round_trips_through_its_column_value() {
        assert_eq!("F".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!(Gender::Male.as_str(), "M");
        assert!("X".parse::<Gender>().is_err());
    }

    #[test]
    fn has_funds_is_inclusive() {
        let account = Account::primary(Uuid::new_v4(), "1000000001", BigDecimal::from(100));
        assert!(account.has_funds(&BigDecimal::from(100)));
        assert!(!account.has_funds(&BigDecimal::from(101)));
    }
}
