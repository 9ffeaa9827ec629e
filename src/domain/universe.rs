//! Universe filter: exclusion rules applied to a raw instrument list.
//!
//! Every rule is independently toggleable. Rules are pure intersections, so the
//! filter is idempotent and its output is always a subset of its input. Held
//! codes are exempt from the limit-lock and price-ceiling rules so that entry
//! filters never force a sell decision.

use crate::domain::instrument::Instrument;
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info};

pub const DEFAULT_MIN_LISTING_DAYS: i64 = 375;
pub const DEFAULT_MAX_PRICE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct UniverseFilterConfig {
    pub drop_suspended: bool,
    pub drop_special_treatment: bool,
    pub drop_excluded_boards: bool,
    pub drop_new_listings: bool,
    pub drop_limit_locked: bool,
    pub drop_high_price: bool,
    /// Code prefixes of excluded exchange boards.
    pub excluded_prefixes: Vec<String>,
    /// Display-name fragments that mark special treatment or delisting risk.
    pub special_treatment_markers: Vec<String>,
    pub min_listing_days: i64,
    pub max_price: f64,
}

impl Default for UniverseFilterConfig {
    fn default() -> Self {
        UniverseFilterConfig {
            drop_suspended: true,
            drop_special_treatment: true,
            drop_excluded_boards: true,
            drop_new_listings: true,
            drop_limit_locked: true,
            drop_high_price: true,
            excluded_prefixes: vec!["4".into(), "8".into(), "68".into()],
            special_treatment_markers: vec!["ST".into(), "*".into(), "退".into()],
            min_listing_days: DEFAULT_MIN_LISTING_DAYS,
            max_price: DEFAULT_MAX_PRICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    Suspended,
    SpecialTreatment,
    ExcludedBoard { prefix: String },
    NewListing { listed_days: i64 },
    LimitUp,
    LimitDown,
    AbovePriceCeiling { price: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DroppedInstrument {
    pub code: String,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterOutcome {
    pub kept: Vec<Instrument>,
    pub dropped: Vec<DroppedInstrument>,
}

impl FilterOutcome {
    pub fn codes(&self) -> Vec<String> {
        self.kept.iter().map(|i| i.code.clone()).collect()
    }
}

/// Apply the enabled exclusion rules, keeping input order.
pub fn filter_universe(
    instruments: &[Instrument],
    as_of: NaiveDate,
    held: &HashSet<String>,
    config: &UniverseFilterConfig,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();

    for inst in instruments {
        match exclusion_reason(inst, as_of, held.contains(&inst.code), config) {
            Some(reason) => {
                debug!(code = %inst.code, reason = ?reason, "dropped from universe");
                outcome.dropped.push(DroppedInstrument {
                    code: inst.code.clone(),
                    reason,
                });
            }
            None => outcome.kept.push(inst.clone()),
        }
    }

    info!(
        input = instruments.len(),
        kept = outcome.kept.len(),
        dropped = outcome.dropped.len(),
        "universe filtered"
    );
    outcome
}

/// First rule that excludes `inst`, or `None` if it passes every enabled rule.
pub fn exclusion_reason(
    inst: &Instrument,
    as_of: NaiveDate,
    is_held: bool,
    config: &UniverseFilterConfig,
) -> Option<DropReason> {
    if config.drop_suspended && inst.suspended {
        return Some(DropReason::Suspended);
    }

    if config.drop_special_treatment
        && (inst.special_treatment
            || config
                .special_treatment_markers
                .iter()
                .any(|m| inst.display_name.contains(m.as_str())))
    {
        return Some(DropReason::SpecialTreatment);
    }

    if config.drop_excluded_boards {
        if let Some(prefix) = config
            .excluded_prefixes
            .iter()
            .find(|p| inst.code.starts_with(p.as_str()))
        {
            return Some(DropReason::ExcludedBoard {
                prefix: prefix.clone(),
            });
        }
    }

    if config.drop_new_listings {
        let listed_days = inst.listed_days(as_of);
        if listed_days < config.min_listing_days {
            return Some(DropReason::NewListing { listed_days });
        }
    }

    if config.drop_limit_locked && !is_held {
        if inst.at_up_limit() {
            return Some(DropReason::LimitUp);
        }
        if inst.at_down_limit() {
            return Some(DropReason::LimitDown);
        }
    }

    if config.drop_high_price && !is_held && inst.price > config.max_price {
        return Some(DropReason::AbovePriceCeiling { price: inst.price });
    }

    None
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in code list")]
    EmptyToken,

    #[error("duplicate code: {0}")]
    DuplicateCode(String),
}

/// Parse a comma-separated list of exchange-qualified codes.
pub fn parse_codes(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut codes = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let code = trimmed.to_uppercase();
        if !seen.insert(code.clone()) {
            return Err(UniverseError::DuplicateCode(code));
        }
        codes.push(code);
    }

    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn inst(code: &str) -> Instrument {
        Instrument {
            code: code.to_string(),
            display_name: format!("Name {code}"),
            category: "industrials".into(),
            price: 10.0,
            high_limit: 11.0,
            low_limit: 9.0,
            listing_date: NaiveDate::from_ymd_opt(2015, 1, 5).unwrap(),
            special_treatment: false,
            suspended: false,
        }
    }

    fn run(instruments: &[Instrument], held: &[&str]) -> FilterOutcome {
        let held: HashSet<String> = held.iter().map(|s| s.to_string()).collect();
        filter_universe(instruments, as_of(), &held, &UniverseFilterConfig::default())
    }

    #[test]
    fn keeps_clean_instrument() {
        let outcome = run(&[inst("002001.XSHE")], &[]);
        assert_eq!(outcome.codes(), vec!["002001.XSHE"]);
        assert!(outcome.dropped.is_empty());
    }

    #[test]
    fn drops_suspended() {
        let mut i = inst("002001.XSHE");
        i.suspended = true;
        let outcome = run(&[i], &[]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped[0].reason, DropReason::Suspended);
    }

    #[test]
    fn drops_special_treatment_flag_and_markers() {
        let mut flagged = inst("002001.XSHE");
        flagged.special_treatment = true;
        let mut named = inst("002002.XSHE");
        named.display_name = "*ST Widget".into();
        let mut delisting = inst("002003.XSHE");
        delisting.display_name = "Widget退".into();

        let outcome = run(&[flagged, named, delisting], &[]);
        assert!(outcome.kept.is_empty());
        assert!(
            outcome
                .dropped
                .iter()
                .all(|d| d.reason == DropReason::SpecialTreatment)
        );
    }

    #[test]
    fn drops_excluded_boards() {
        let outcome = run(
            &[inst("688001.XSHG"), inst("430001.BJSE"), inst("600001.XSHG")],
            &[],
        );
        assert_eq!(outcome.codes(), vec!["600001.XSHG"]);
        assert_eq!(
            outcome.dropped[0].reason,
            DropReason::ExcludedBoard {
                prefix: "68".into()
            }
        );
    }

    #[test]
    fn drops_new_listings_below_minimum_age() {
        let mut young = inst("002001.XSHE");
        young.listing_date = as_of() - chrono::Duration::days(374);
        let mut old_enough = inst("002002.XSHE");
        old_enough.listing_date = as_of() - chrono::Duration::days(375);

        let outcome = run(&[young, old_enough], &[]);
        assert_eq!(outcome.codes(), vec!["002002.XSHE"]);
        assert_eq!(
            outcome.dropped[0].reason,
            DropReason::NewListing { listed_days: 374 }
        );
    }

    #[test]
    fn drops_limit_locked_unless_held() {
        let mut up = inst("002001.XSHE");
        up.price = 11.0;
        let mut down = inst("002002.XSHE");
        down.price = 9.0;

        let outcome = run(&[up.clone(), down.clone()], &[]);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped[0].reason, DropReason::LimitUp);
        assert_eq!(outcome.dropped[1].reason, DropReason::LimitDown);

        let held = run(&[up, down], &["002001.XSHE", "002002.XSHE"]);
        assert_eq!(held.kept.len(), 2);
    }

    #[test]
    fn drops_above_price_ceiling_unless_held() {
        let mut pricey = inst("002001.XSHE");
        pricey.price = 150.0;
        pricey.high_limit = 165.0;
        pricey.low_limit = 135.0;

        let outcome = run(&[pricey.clone()], &[]);
        assert_eq!(
            outcome.dropped[0].reason,
            DropReason::AbovePriceCeiling { price: 150.0 }
        );
        assert_eq!(run(&[pricey], &["002001.XSHE"]).kept.len(), 1);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut i = inst("688001.XSHG");
        i.suspended = true;
        let config = UniverseFilterConfig {
            drop_suspended: false,
            drop_excluded_boards: false,
            ..Default::default()
        };
        let outcome = filter_universe(&[i], as_of(), &HashSet::new(), &config);
        assert_eq!(outcome.kept.len(), 1);
    }

    #[test]
    fn test_parse_codes_basic() {
        let result = parse_codes("399101.xshe, 000300.XSHG,000015.XSHG").unwrap();
        assert_eq!(result, vec!["399101.XSHE", "000300.XSHG", "000015.XSHG"]);
    }

    #[test]
    fn test_parse_codes_empty_token() {
        assert!(matches!(
            parse_codes("A,,B"),
            Err(UniverseError::EmptyToken)
        ));
    }

    #[test]
    fn test_parse_codes_duplicate() {
        let result = parse_codes("A,B,a");
        assert!(matches!(result, Err(UniverseError::DuplicateCode(s)) if s == "A"));
    }

    fn arb_instrument() -> impl Strategy<Value = Instrument> {
        (
            prop::sample::select(vec!["00", "30", "60", "68", "43", "83"]),
            0u32..10_000,
            1.0f64..200.0,
            0i64..2_000,
            any::<bool>(),
            any::<bool>(),
            prop::sample::select(vec!["Plain", "ST Plain", "Plain退"]),
        )
            .prop_map(|(prefix, n, price, age, st, suspended, name)| {
                let limit_step = (price * 0.1 * 100.0).round() / 100.0;
                let high = if n % 7 == 0 { price } else { price + limit_step };
                let low = if n % 11 == 0 { price } else { price - limit_step };
                Instrument {
                    code: format!("{prefix}{n:04}.XSHE"),
                    display_name: name.to_string(),
                    category: "c".into(),
                    price,
                    high_limit: high,
                    low_limit: low,
                    listing_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
                        - chrono::Duration::days(age),
                    special_treatment: st,
                    suspended,
                }
            })
    }

    proptest! {
        #[test]
        fn output_is_subset_and_idempotent(
            instruments in prop::collection::vec(arb_instrument(), 0..40),
            held_mask in prop::collection::vec(any::<bool>(), 40),
        ) {
            let held: HashSet<String> = instruments
                .iter()
                .zip(held_mask.iter())
                .filter(|(_, h)| **h)
                .map(|(i, _)| i.code.clone())
                .collect();
            let config = UniverseFilterConfig::default();

            let once = filter_universe(&instruments, as_of(), &held, &config);
            for kept in &once.kept {
                prop_assert!(instruments.contains(kept));
            }
            prop_assert_eq!(once.kept.len() + once.dropped.len(), instruments.len());

            let twice = filter_universe(&once.kept, as_of(), &held, &config);
            prop_assert_eq!(&twice.kept, &once.kept);
            prop_assert!(twice.dropped.is_empty());
        }
    }
}
