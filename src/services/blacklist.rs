use tracing::info;

use super::fraud_gate::normalize_domain;
use super::orchestrator::BankingService;
use crate::domain::{BlacklistEntry, BlacklistRisk};
use crate::error::BankResult;
use crate::validation::{sanitize_string, validate_max_len, validate_required, MERCHANT_NAME_MAX_LEN};

#[derive(Debug, Clone)]
pub struct NewBlacklistEntry {
    /// Bare domain or full URL; normalized before storage.
    pub domain: String,
    pub merchant_name: String,
    pub reason: String,
    pub risk_level: BlacklistRisk,
    pub reported_by: Option<String>,
}

impl BankingService {
    /// Adds a domain, or reactivates and overwrites an existing entry for it.
    pub async fn add_blacklist_entry(&self, new: NewBlacklistEntry) -> BankResult<BlacklistEntry> {
        let domain = normalize_domain(&new.domain);
        validate_required("domain", &domain)?;
        let merchant_name = sanitize_string(&new.merchant_name);
        validate_max_len("merchant_name", &merchant_name, MERCHANT_NAME_MAX_LEN)?;
        let reason = sanitize_string(&new.reason);
        validate_required("reason", &reason)?;

        let mut entry = BlacklistEntry::new(domain, merchant_name, reason, new.risk_level);
        entry.created_at = self.now();
        if let Some(reported_by) = new.reported_by.filter(|r| !r.trim().is_empty()) {
            entry.reported_by = reported_by;
        }
        let entry = &entry;

        let stored = self
            .with_retries("add_blacklist_entry", move || async move {
                let mut uow = self.store.begin().await?;
                let stored = uow.upsert_entry(entry).await?;
                uow.commit().await?;
                Ok(stored)
            })
            .await?;

        info!(domain = %stored.domain, risk = %stored.risk_level, "Merchant domain blacklisted");
        Ok(stored)
    }

    /// Returns false when no entry exists for the domain.
    pub async fn deactivate_blacklist_entry(&self, domain: &str) -> BankResult<bool> {
        let domain = normalize_domain(domain);
        let domain = domain.as_str();

        let found = self
            .with_retries("deactivate_blacklist_entry", move || async move {
                let mut uow = self.store.begin().await?;
                let found = uow.set_entry_active(domain, false).await?;
                uow.commit().await?;
                Ok(found)
            })
            .await?;

        info!(domain, found, "Merchant domain blacklist entry deactivated");
        Ok(found)
    }

    pub async fn list_blacklist(&self) -> BankResult<Vec<BlacklistEntry>> {
        let mut uow = self.store.begin().await?;
        Ok(uow.list_entries().await?)
    }
}
