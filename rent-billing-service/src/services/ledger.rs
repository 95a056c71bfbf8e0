//! Balance arithmetic and status rules shared by the generator, allocator and voider.

use crate::models::{InvoiceStatus, PaymentStatus};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

/// A calendar-month billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// Period containing `date`: first through last calendar day of its month.
    pub fn containing(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let next_month = if start.month() == 12 {
            NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
        };
        let end = next_month
            .and_then(|d| d.pred_opt())
            .unwrap_or(start);
        Self { start, end }
    }

    pub fn days(&self) -> u32 {
        self.end.day()
    }

    /// Due date for a lease's `due_day`, clamped into the period.
    pub fn due_date(&self, due_day: i32) -> NaiveDate {
        let day = due_day.clamp(1, self.days() as i32) as u32;
        self.start.with_day(day).unwrap_or(self.end)
    }

    /// Line description, e.g. "February 2026 Rent".
    pub fn rent_description(&self) -> String {
        format!("{} Rent", self.start.format("%B %Y"))
    }
}

/// Payment status as a pure function of allocated total vs payment amount.
pub fn payment_status_for(total_allocated: Decimal, amount: Decimal) -> PaymentStatus {
    if total_allocated >= amount {
        PaymentStatus::Allocated
    } else if total_allocated > Decimal::ZERO {
        PaymentStatus::PartiallyAllocated
    } else {
        PaymentStatus::Unallocated
    }
}

pub fn invoice_status_for_balance(balance: Decimal) -> InvoiceStatus {
    if balance <= Decimal::ZERO {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Open
    }
}

pub fn floor_at_zero(amount: Decimal) -> Decimal {
    amount.max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_spans_calendar_month() {
        let period = BillingPeriod::containing(date(2026, 2, 1));
        assert_eq!(period.start, date(2026, 2, 1));
        assert_eq!(period.end, date(2026, 2, 28));

        let leap = BillingPeriod::containing(date(2028, 2, 1));
        assert_eq!(leap.end, date(2028, 2, 29));

        let december = BillingPeriod::containing(date(2026, 12, 1));
        assert_eq!(december.end, date(2026, 12, 31));
    }

    #[test]
    fn mid_month_date_normalises_to_first() {
        let period = BillingPeriod::containing(date(2026, 4, 17));
        assert_eq!(period.start, date(2026, 4, 1));
        assert_eq!(period.end, date(2026, 4, 30));
    }

    #[test]
    fn due_day_is_clamped_to_period() {
        let feb = BillingPeriod::containing(date(2026, 2, 1));
        assert_eq!(feb.due_date(31), date(2026, 2, 28));
        assert_eq!(feb.due_date(5), date(2026, 2, 5));
        assert_eq!(feb.due_date(0), date(2026, 2, 1));

        let jan = BillingPeriod::containing(date(2026, 1, 1));
        assert_eq!(jan.due_date(31), date(2026, 1, 31));
    }

    #[test]
    fn rent_description_uses_month_name() {
        let feb = BillingPeriod::containing(date(2026, 2, 1));
        assert_eq!(feb.rent_description(), "February 2026 Rent");
    }

    #[test]
    fn payment_status_thresholds() {
        let amount = Decimal::from(150);
        assert_eq!(
            payment_status_for(Decimal::ZERO, amount),
            PaymentStatus::Unallocated
        );
        assert_eq!(
            payment_status_for(Decimal::from(50), amount),
            PaymentStatus::PartiallyAllocated
        );
        assert_eq!(payment_status_for(amount, amount), PaymentStatus::Allocated);
    }

    #[test]
    fn invoice_paid_at_zero_balance() {
        assert_eq!(invoice_status_for_balance(Decimal::ZERO), InvoiceStatus::Paid);
        assert_eq!(
            invoice_status_for_balance(Decimal::from(-5)),
            InvoiceStatus::Paid
        );
        assert_eq!(invoice_status_for_balance(Decimal::ONE), InvoiceStatus::Open);
        assert_eq!(floor_at_zero(Decimal::from(-5)), Decimal::ZERO);
    }
}
