//! Coupon records and the stateless validator.
//!
//! [`Coupon::validate`] is pure rule evaluation over the record; the mutating
//! `apply` lives in the storage layer as a single atomic conditional update so
//! two concurrent redemptions of a near-exhausted coupon cannot both succeed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::UserId;

/// How a coupon discounts a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponType {
    /// `value` percent off the purchase amount.
    Percentage,

    /// A flat `value` off the purchase amount.
    FixedAmount,
}

/// A redeemable coupon, keyed by its unique code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    /// Unique coupon code.
    pub code: String,

    /// Discount kind.
    pub coupon_type: CouponType,

    /// Percent (0..=100) or flat amount, depending on `coupon_type`.
    pub value: i64,

    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,

    /// End of the validity window.
    pub valid_to: DateTime<Utc>,

    /// Redemption cap, if any.
    pub max_uses: Option<u32>,

    /// Redemptions so far.
    pub current_uses: u32,

    /// Users who already redeemed this coupon (one redemption per user).
    pub used_by: HashSet<UserId>,

    /// Minimum purchase amount the coupon applies to, if any.
    pub min_purchase_amount: Option<i64>,

    /// Kill switch for the coupon.
    pub is_active: bool,
}

impl Coupon {
    /// Check every redemption rule and compute the discount for `amount`.
    ///
    /// # Errors
    ///
    /// Returns the first failing rule: `CouponInvalid` (inactive, not yet
    /// valid, or below the minimum purchase), `CouponExpired`,
    /// `CouponExhausted`, or `CouponAlreadyUsed`.
    pub fn validate(
        &self,
        user_id: &UserId,
        amount: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        if !self.is_active {
            return Err(LedgerError::CouponInvalid("coupon is not active".into()));
        }
        if now < self.valid_from {
            return Err(LedgerError::CouponInvalid("coupon is not yet valid".into()));
        }
        if now > self.valid_to {
            return Err(LedgerError::CouponExpired);
        }
        if self.is_exhausted() {
            return Err(LedgerError::CouponExhausted);
        }
        if self.used_by.contains(user_id) {
            return Err(LedgerError::CouponAlreadyUsed);
        }
        if let Some(min) = self.min_purchase_amount {
            let amount = amount.ok_or_else(|| {
                LedgerError::CouponInvalid("purchase amount required for this coupon".into())
            })?;
            if amount < min {
                return Err(LedgerError::CouponInvalid(format!(
                    "purchase amount {amount} below minimum {min}"
                )));
            }
        }

        Ok(self.discount_for(amount.unwrap_or(0)))
    }

    /// The discount this coupon grants on `amount`, ignoring redemption rules.
    ///
    /// A fixed discount never exceeds the purchase amount.
    #[must_use]
    pub fn discount_for(&self, amount: i64) -> i64 {
        match self.coupon_type {
            CouponType::Percentage => amount * self.value / 100,
            CouponType::FixedAmount => self.value.min(amount),
        }
    }

    /// Whether the redemption cap is reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.current_uses >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon() -> Coupon {
        let now = Utc::now();
        Coupon {
            code: "SAVE20".into(),
            coupon_type: CouponType::Percentage,
            value: 20,
            valid_from: now - Duration::days(1),
            valid_to: now + Duration::days(30),
            max_uses: Some(10),
            current_uses: 0,
            used_by: HashSet::new(),
            min_purchase_amount: None,
            is_active: true,
        }
    }

    #[test]
    fn percentage_discount() {
        let c = coupon();
        let discount = c.validate(&UserId::generate(), Some(1000), Utc::now()).unwrap();
        assert_eq!(discount, 200);
    }

    #[test]
    fn fixed_amount_discount() {
        let mut c = coupon();
        c.coupon_type = CouponType::FixedAmount;
        c.value = 500;
        let discount = c.validate(&UserId::generate(), Some(2000), Utc::now()).unwrap();
        assert_eq!(discount, 500);
    }

    #[test]
    fn fixed_amount_capped_at_purchase() {
        let mut c = coupon();
        c.coupon_type = CouponType::FixedAmount;
        c.value = 500;
        assert_eq!(c.discount_for(300), 300);
    }

    #[test]
    fn inactive_coupon_rejected() {
        let mut c = coupon();
        c.is_active = false;
        let err = c.validate(&UserId::generate(), Some(1000), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::CouponInvalid(_)));
    }

    #[test]
    fn expired_coupon_rejected() {
        let mut c = coupon();
        c.valid_to = Utc::now() - Duration::days(1);
        let err = c.validate(&UserId::generate(), Some(1000), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::CouponExpired));
    }

    #[test]
    fn not_yet_valid_rejected() {
        let mut c = coupon();
        c.valid_from = Utc::now() + Duration::days(1);
        let err = c.validate(&UserId::generate(), Some(1000), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::CouponInvalid(_)));
    }

    #[test]
    fn exhausted_coupon_rejected() {
        let mut c = coupon();
        c.max_uses = Some(1);
        c.current_uses = 1;
        let err = c.validate(&UserId::generate(), Some(1000), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::CouponExhausted));
    }

    #[test]
    fn repeat_user_rejected() {
        let mut c = coupon();
        let user = UserId::generate();
        c.used_by.insert(user);
        let err = c.validate(&user, Some(1000), Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::CouponAlreadyUsed));
    }

    #[test]
    fn min_purchase_enforced() {
        let mut c = coupon();
        c.min_purchase_amount = Some(500);
        assert!(c.validate(&UserId::generate(), Some(499), Utc::now()).is_err());
        assert!(c.validate(&UserId::generate(), Some(500), Utc::now()).is_ok());
        // Amount must be supplied when a minimum is set.
        assert!(c.validate(&UserId::generate(), None, Utc::now()).is_err());
    }
}
