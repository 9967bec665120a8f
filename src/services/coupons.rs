use crate::{
    entities::{coupon, Coupon, CouponModel},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Coupon registry: validates discount codes and consumes redemptions.
///
/// Validation and consumption are deliberately split: a coupon applied to a
/// cart burns no redemption until the cart actually settles into an order.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Looks up a coupon by its case-normalized name and checks that it is
    /// currently applicable.
    ///
    /// # Errors
    ///
    /// * `NotFound` - no coupon with that name
    /// * `CouponExpired` - past its expiry date
    /// * `CouponQuotaExceeded` - usage limit already reached
    #[instrument(skip(self))]
    pub async fn validate(&self, name: &str) -> Result<CouponModel, ServiceError> {
        let name = normalize_name(name);

        let coupon = Coupon::find()
            .filter(coupon::Column::Name.eq(name.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", name)))?;

        if coupon.expires_at <= Utc::now() {
            return Err(ServiceError::CouponExpired(name));
        }
        if coupon.usage_count >= coupon.usage_limit {
            return Err(ServiceError::CouponQuotaExceeded(name));
        }

        Ok(coupon)
    }

    /// Consumes one redemption with a guarded atomic increment.
    ///
    /// The usage limit is re-checked inside the UPDATE itself, not in
    /// application code, so two checkouts racing on the last redemption
    /// cannot both succeed; the loser gets `CouponQuotaExceeded`.
    pub async fn consume_usage(
        &self,
        conn: &impl ConnectionTrait,
        coupon_id: Uuid,
    ) -> Result<(), ServiceError> {
        let coupon = Coupon::find_by_id(coupon_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::UsageCount.lt(coupon.usage_limit))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(%coupon_id, "coupon redemption lost the quota race");
            return Err(ServiceError::CouponQuotaExceeded(coupon.name));
        }

        Ok(())
    }
}

/// Coupon names are stored lowercase; lookups normalize the same way.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Computes the discount a coupon grants on a subtotal: `percent` off,
/// capped at `max_discount`, never more than the subtotal itself. Rounded
/// to the currency's minor unit, half away from zero, once at the
/// aggregate.
pub fn compute_discount(subtotal: Decimal, percent: Decimal, max_discount: Decimal) -> Decimal {
    let raw = subtotal * percent / Decimal::from(100);
    raw.min(max_discount)
        .min(subtotal)
        .max(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percentage_discount_below_cap() {
        // $250 subtotal, 20% capped at $40 -> min($50, $40) = $40
        let discount = compute_discount(dec!(250), dec!(20), dec!(40));
        assert_eq!(discount, dec!(40));
    }

    #[test]
    fn percentage_discount_under_cap_is_exact() {
        let discount = compute_discount(dec!(100), dec!(10), dec!(40));
        assert_eq!(discount, dec!(10.00));
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        let discount = compute_discount(dec!(5), dec!(100), dec!(40));
        assert_eq!(discount, dec!(5));
    }

    #[test]
    fn discount_rounds_half_away_from_zero_at_the_aggregate() {
        // 15% of $33.35 = $5.0025 -> $5.00; 15% of $33.37 = $5.0055 -> $5.01
        assert_eq!(compute_discount(dec!(33.35), dec!(15), dec!(100)), dec!(5.00));
        assert_eq!(compute_discount(dec!(33.37), dec!(15), dec!(100)), dec!(5.01));
    }

    #[test]
    fn midpoint_rounds_up() {
        // 5% of $10.10 = $0.505 -> $0.51 under half-away-from-zero
        assert_eq!(compute_discount(dec!(10.10), dec!(5), dec!(100)), dec!(0.51));
    }

    #[test]
    fn zero_percent_means_zero_discount() {
        assert_eq!(compute_discount(dec!(250), dec!(0), dec!(40)), dec!(0.00));
    }

    #[test]
    fn names_normalize_to_lowercase() {
        assert_eq!(normalize_name("  SUMMER20 "), "summer20");
        assert_eq!(normalize_name("summer20"), "summer20");
    }
}
