use chrono::NaiveDate;

use crate::model::*;

use super::EngineError;

/// How a field's time is priced. Selected per server by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingStrategy {
    /// One hourly rate: the field's own, else its venue's.
    Flat,
    /// Day-of-week rules; every requested minute must fall under some rule.
    RuleBased,
}

/// Result of pricing one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub total: Money,
    pub covered_minutes: Minute,
    pub requested_minutes: Minute,
}

impl Quote {
    pub fn fully_covered(&self) -> bool {
        self.covered_minutes >= self.requested_minutes
    }
}

fn overflow(rate_per_hour: Money) -> EngineError {
    EngineError::InvalidValue(format!("hourly rate {rate_per_hour} overflows the booking total"))
}

/// `rate_per_hour × minutes / 60`, unrounded.
fn prorate(rate_per_hour: Money, minutes: Minute) -> Result<Money, EngineError> {
    rate_per_hour
        .checked_mul(Money::from(minutes))
        .and_then(|m| m.checked_div(Money::from(60)))
        .ok_or_else(|| overflow(rate_per_hour))
}

impl PricingStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "flat" => Some(PricingStrategy::Flat),
            "rules" | "rule_based" | "rule-based" => Some(PricingStrategy::RuleBased),
            _ => None,
        }
    }

    /// Price `span` on `date`. `venue_rate` is the owning venue's flat rate.
    ///
    /// Rule-based pricing sums every matching rule's overlap, so two rules
    /// covering the same minutes both charge for them.
    pub fn price(
        &self,
        field: &FieldState,
        venue_rate: Option<Money>,
        date: NaiveDate,
        span: &Span,
    ) -> Result<Quote, EngineError> {
        let requested_minutes = span.duration_minutes();
        match self {
            PricingStrategy::Flat => {
                let rate = field
                    .hourly_rate
                    .or(venue_rate)
                    .ok_or(EngineError::ConfigurationError(field.id))?;
                Ok(Quote {
                    total: prorate(rate, requested_minutes)?,
                    covered_minutes: requested_minutes,
                    requested_minutes,
                })
            }
            PricingStrategy::RuleBased => {
                let mut total = Money::ZERO;
                let mut covered_minutes = 0;
                for rule in field.price_rules.iter().filter(|r| r.applies_on(date)) {
                    let minutes = span.overlap_minutes(&rule.span);
                    if minutes == 0 {
                        continue;
                    }
                    total = total
                        .checked_add(prorate(rule.price_per_hour, minutes)?)
                        .ok_or_else(|| overflow(rule.price_per_hour))?;
                    covered_minutes += minutes;
                }
                Ok(Quote {
                    total,
                    covered_minutes,
                    requested_minutes,
                })
            }
        }
    }

    /// Same formula restricted to one slot.
    pub fn price_slot(
        &self,
        field: &FieldState,
        venue_rate: Option<Money>,
        date: NaiveDate,
        slot: &Span,
    ) -> Result<Money, EngineError> {
        self.price(field, venue_rate, date, slot).map(|q| q.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const MONDAY: (i32, u32, u32) = (2025, 1, 6);

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(MONDAY.0, MONDAY.1, MONDAY.2).unwrap()
    }

    fn hm(h: u32, m: u32) -> Minute {
        h * 60 + m
    }

    fn field_with_rules(rules: &[(u8, Minute, Minute, i64)]) -> FieldState {
        let mut field = FieldState::new(Ulid::new(), Ulid::new(), None);
        for &(day, start, end, rate) in rules {
            field.price_rules.push(PriceRule {
                id: Ulid::new(),
                field_id: field.id,
                day_of_week: day,
                span: Span::new(start, end),
                price_per_hour: Money::from(rate),
            });
        }
        field
    }

    #[test]
    fn flat_prefers_field_rate() {
        let mut field = FieldState::new(Ulid::new(), Ulid::new(), Some(Money::from(200_000)));
        let q = PricingStrategy::Flat
            .price(&field, Some(Money::from(100_000)), monday(), &Span::new(hm(19, 0), hm(20, 30)))
            .unwrap();
        assert_eq!(q.total, Money::from(300_000));
        assert!(q.fully_covered());

        field.hourly_rate = None;
        let q = PricingStrategy::Flat
            .price(&field, Some(Money::from(100_000)), monday(), &Span::new(hm(19, 0), hm(19, 45)))
            .unwrap();
        assert_eq!(q.total, Money::from(75_000));
    }

    #[test]
    fn flat_without_rate_is_configuration_error() {
        let field = FieldState::new(Ulid::new(), Ulid::new(), None);
        let result = PricingStrategy::Flat.price(&field, None, monday(), &Span::new(0, 60));
        assert!(matches!(result, Err(EngineError::ConfigurationError(id)) if id == field.id));
    }

    #[test]
    fn rules_sum_partial_overlaps() {
        let field = field_with_rules(&[
            (1, hm(8, 0), hm(9, 0), 100_000),
            (1, hm(9, 0), hm(12, 0), 150_000),
        ]);
        let q = PricingStrategy::RuleBased
            .price(&field, None, monday(), &Span::new(hm(8, 30), hm(10, 0)))
            .unwrap();
        assert_eq!(q.total, Money::from(200_000));
        assert_eq!(q.covered_minutes, 90);
        assert!(q.fully_covered());
    }

    #[test]
    fn rules_with_gap_not_fully_covered() {
        let field = field_with_rules(&[
            (1, hm(8, 0), hm(9, 0), 100_000),
            (1, hm(10, 0), hm(12, 0), 100_000),
        ]);
        let q = PricingStrategy::RuleBased
            .price(&field, None, monday(), &Span::new(hm(8, 0), hm(10, 30)))
            .unwrap();
        assert_eq!(q.requested_minutes, 150);
        assert_eq!(q.covered_minutes, 90);
        assert!(!q.fully_covered());
    }

    #[test]
    fn rules_for_other_days_ignored() {
        let field = field_with_rules(&[(2, 0, DAY_MINUTES, 100_000)]);
        let q = PricingStrategy::RuleBased
            .price(&field, None, monday(), &Span::new(hm(8, 0), hm(9, 0)))
            .unwrap();
        assert_eq!(q.total, Money::ZERO);
        assert_eq!(q.covered_minutes, 0);
    }

    #[test]
    fn overlapping_rules_double_count() {
        let field = field_with_rules(&[
            (1, hm(8, 0), hm(10, 0), 100_000),
            (1, hm(9, 0), hm(11, 0), 50_000),
        ]);
        let q = PricingStrategy::RuleBased
            .price(&field, None, monday(), &Span::new(hm(9, 0), hm(10, 0)))
            .unwrap();
        assert_eq!(q.total, Money::from(150_000));
        assert_eq!(q.covered_minutes, 120);
    }

    #[test]
    fn slot_price_uses_same_formula() {
        let field = field_with_rules(&[(1, hm(18, 0), hm(22, 0), 120_000)]);
        let price = PricingStrategy::RuleBased
            .price_slot(&field, None, monday(), &Span::new(hm(19, 30), hm(19, 45)))
            .unwrap();
        assert_eq!(price, Money::from(30_000));
    }

    #[test]
    fn overflowing_rate_is_invalid_value() {
        let field = FieldState::new(Ulid::new(), Ulid::new(), Some(Money::MAX));
        let result = PricingStrategy::Flat.price(&field, None, monday(), &Span::new(0, 60));
        assert!(matches!(result, Err(EngineError::InvalidValue(_))));

        let mut field = field_with_rules(&[]);
        field.price_rules.push(PriceRule {
            id: Ulid::new(),
            field_id: field.id,
            day_of_week: 1,
            span: Span::new(0, DAY_MINUTES),
            price_per_hour: Money::MAX,
        });
        let result = PricingStrategy::RuleBased.price(&field, None, monday(), &Span::new(0, 60));
        assert!(matches!(result, Err(EngineError::InvalidValue(_))));
    }

    #[test]
    fn parse_strategy_names() {
        assert_eq!(PricingStrategy::parse("flat"), Some(PricingStrategy::Flat));
        assert_eq!(PricingStrategy::parse(" Rules "), Some(PricingStrategy::RuleBased));
        assert_eq!(PricingStrategy::parse("rule-based"), Some(PricingStrategy::RuleBased));
        assert_eq!(PricingStrategy::parse("auction"), None);
    }
}
