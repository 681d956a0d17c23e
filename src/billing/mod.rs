//! Entitlement boundary
//!
//! Subscription truth lives with an external billing provider; this
//! module is the seam in front of it. The rest of the crate only ever
//! asks one question, "does this customer have pro access", and never
//! sees provider payloads. A local provider backs development and
//! tests.

use crate::{MurmurError, Result};
use tracing::info;

/// Entitlement identifier checked on customer records
pub const PRO_ENTITLEMENT: &str = "pro_access";

/// Provider-agnostic customer record
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomerInfo {
    pub user_id: String,
    /// Active entitlement identifiers
    pub entitlements: Vec<String>,
}

impl CustomerInfo {
    pub fn has_pro_access(&self) -> bool {
        self.entitlements.iter().any(|e| e == PRO_ENTITLEMENT)
    }
}

/// A purchasable package
#[derive(Clone, Debug, PartialEq)]
pub struct Offering {
    pub identifier: String,
    pub price_label: String,
}

/// External billing provider seam
pub trait BillingProvider: Send {
    /// Bind the provider to a stable per-install user id
    fn initialize(&mut self, user_id: &str) -> Result<()>;

    /// Current customer record, including active entitlements
    fn customer_info(&self) -> Result<CustomerInfo>;

    /// Packages currently available for purchase
    fn offerings(&self) -> Result<Vec<Offering>>;

    /// Purchase a package; returns the refreshed customer record
    fn purchase(&mut self, offering: &Offering) -> Result<CustomerInfo>;
}

/// In-process provider with a single flat offering. Grants the pro
/// entitlement immediately on purchase.
#[derive(Default)]
pub struct LocalBilling {
    user_id: Option<String>,
    pro: bool,
}

impl LocalBilling {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out already entitled, for development
    pub fn with_pro() -> Self {
        Self { user_id: None, pro: true }
    }

    fn require_init(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .ok_or_else(|| MurmurError::Config("billing provider not initialized".to_string()))
    }
}

impl BillingProvider for LocalBilling {
    fn initialize(&mut self, user_id: &str) -> Result<()> {
        if user_id.is_empty() {
            return Err(MurmurError::Config("billing user id is empty".to_string()));
        }
        info!("Billing initialized for user {}", user_id);
        self.user_id = Some(user_id.to_string());
        Ok(())
    }

    fn customer_info(&self) -> Result<CustomerInfo> {
        let user_id = self.require_init()?;
        let entitlements = if self.pro {
            vec![PRO_ENTITLEMENT.to_string()]
        } else {
            Vec::new()
        };
        Ok(CustomerInfo { user_id: user_id.to_string(), entitlements })
    }

    fn offerings(&self) -> Result<Vec<Offering>> {
        self.require_init()?;
        Ok(vec![Offering {
            identifier: "pro_monthly".to_string(),
            price_label: "$4.99/month".to_string(),
        }])
    }

    fn purchase(&mut self, offering: &Offering) -> Result<CustomerInfo> {
        self.require_init()?;
        if offering.identifier != "pro_monthly" {
            return Err(MurmurError::Config(format!(
                "unknown offering: {}",
                offering.identifier
            )));
        }
        info!("Purchase completed: {}", offering.identifier);
        self.pro = true;
        self.customer_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_initialization() {
        let billing = LocalBilling::new();
        assert!(billing.customer_info().is_err());
        assert!(billing.offerings().is_err());
    }

    #[test]
    fn test_purchase_grants_pro_access() {
        let mut billing = LocalBilling::new();
        billing.initialize("install-1234").unwrap();

        let before = billing.customer_info().unwrap();
        assert!(!before.has_pro_access());

        let offerings = billing.offerings().unwrap();
        let after = billing.purchase(&offerings[0]).unwrap();
        assert!(after.has_pro_access());
        assert_eq!(after.user_id, "install-1234");
    }

    #[test]
    fn test_unknown_offering_is_rejected() {
        let mut billing = LocalBilling::new();
        billing.initialize("install-1234").unwrap();

        let bogus = Offering {
            identifier: "lifetime_gold".to_string(),
            price_label: "$999".to_string(),
        };
        assert!(billing.purchase(&bogus).is_err());
        assert!(!billing.customer_info().unwrap().has_pro_access());
    }

    #[test]
    fn test_empty_user_id_is_rejected() {
        let mut billing = LocalBilling::new();
        assert!(billing.initialize("").is_err());
    }
}
