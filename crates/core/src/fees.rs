//! Fee and aggregation engine.
//!
//! Everything here is a pure function of its inputs: candidate maps go in, counts and fees come
//! out. Keys outside the fee schedule count toward totals but contribute no fee.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::model::{Candidates, ClassKey, School, SchoolId};

/// Per-class rate in whole Turkish lira.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeSchedule {
    rates: BTreeMap<ClassKey, u64>,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::from_rates([
            (ClassKey::B, 2_500),
            (ClassKey::A1, 1_800),
            (ClassKey::A2, 2_000),
            (ClassKey::C, 3_000),
            (ClassKey::D, 3_500),
            (ClassKey::FarkA1, 1_000),
            (ClassKey::FarkA2, 1_200),
            (ClassKey::BakanlikA1, 750),
        ])
    }
}

impl FeeSchedule {
    /// Classes missing from `rates` are charged nothing.
    pub fn from_rates(rates: impl IntoIterator<Item = (ClassKey, u64)>) -> Self {
        Self {
            rates: rates.into_iter().collect(),
        }
    }

    /// Applies per-class overrides keyed by class name (case-insensitive).
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, u64>) -> Result<Self, SyncError> {
        for (key, rate) in overrides {
            let class: ClassKey = key.parse()?;
            self.rates.insert(class, *rate);
        }
        Ok(self)
    }

    pub fn rate(&self, class: ClassKey) -> u64 {
        self.rates.get(&class).copied().unwrap_or(0)
    }

    /// Rate for a raw stored key. Anything but an exact class key costs nothing.
    pub fn rate_for_key(&self, key: &str) -> u64 {
        ClassKey::from_stored(key)
            .map(|class| self.rate(class))
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total_count: u64,
    pub total_fee: u64,
}

impl Totals {
    fn absorb(&mut self, other: Totals) {
        self.total_count = self.total_count.saturating_add(other.total_count);
        self.total_fee = self.total_fee.saturating_add(other.total_fee);
    }
}

pub fn aggregate(candidates: &Candidates, schedule: &FeeSchedule) -> Totals {
    candidates
        .iter()
        .fold(Totals::default(), |mut acc, (key, count)| {
            acc.total_count = acc.total_count.saturating_add(count);
            acc.total_fee = acc
                .total_fee
                .saturating_add(count.saturating_mul(schedule.rate_for_key(key)));
            acc
        })
}

/// `FARK_A1 + FARK_A2 + BAKANLIK_A1`.
pub fn difference_total(candidates: &Candidates) -> u64 {
    ClassKey::DIFFERENCE
        .iter()
        .fold(0u64, |acc, class| acc.saturating_add(candidates.count(*class)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub school_id: SchoolId,
    pub name: String,
    pub class_counts: BTreeMap<ClassKey, u64>,
    pub difference_total: u64,
    pub totals: Totals,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    pub class_totals: BTreeMap<ClassKey, u64>,
    pub difference_total: u64,
    pub totals: Totals,
}

pub fn report<'a>(schools: impl IntoIterator<Item = &'a School>, schedule: &FeeSchedule) -> Report {
    let mut out = Report {
        class_totals: ClassKey::ALL.iter().map(|class| (*class, 0)).collect(),
        ..Report::default()
    };

    for school in schools {
        let class_counts: BTreeMap<ClassKey, u64> = ClassKey::ALL
            .iter()
            .map(|class| (*class, school.candidates.count(*class)))
            .collect();
        for (class, count) in &class_counts {
            if let Some(total) = out.class_totals.get_mut(class) {
                *total = total.saturating_add(*count);
            }
        }

        let row = ReportRow {
            school_id: school.id.clone(),
            name: school.name.clone(),
            class_counts,
            difference_total: difference_total(&school.candidates),
            totals: aggregate(&school.candidates, schedule),
        };
        out.difference_total = out.difference_total.saturating_add(row.difference_total);
        out.totals.absorb(row.totals);
        out.rows.push(row);
    }

    out
}

/// Drops the common `ÖZEL BİGA ` prefix and ` MTSK` suffix for narrow layouts.
pub fn short_name(name: &str) -> String {
    name.replace("ÖZEL BİGA ", "").replace(" MTSK", "")
}

/// `tr-TR` grouping: `4600` → `4.600 TL`.
pub fn format_lira(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped.push_str(" TL");
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(pairs: &[(&str, u64)]) -> Candidates {
        let mut c = Candidates::new();
        for (k, v) in pairs {
            c.set_raw(*k, *v);
        }
        c
    }

    #[test]
    fn fee_for_b_and_a1_mix() {
        let schedule = FeeSchedule::from_rates([(ClassKey::B, 1000), (ClassKey::A1, 800)]);
        let totals = aggregate(&candidates(&[("B", 3), ("A1", 2)]), &schedule);
        assert_eq!(totals.total_fee, 4600);
        assert_eq!(totals.total_count, 5);
    }

    #[test]
    fn total_count_is_sum_of_values_including_unknown_keys() {
        let c = candidates(&[("B", 4), ("D", 1), ("UNKNOWN", 6)]);
        let totals = aggregate(&c, &FeeSchedule::default());
        assert_eq!(totals.total_count, 11);
        let expected_fee = 4 * FeeSchedule::default().rate(ClassKey::B)
            + FeeSchedule::default().rate(ClassKey::D);
        assert_eq!(totals.total_fee, expected_fee);
    }

    #[test]
    fn classes_missing_from_schedule_cost_nothing() {
        let schedule = FeeSchedule::from_rates([(ClassKey::B, 1000)]);
        let totals = aggregate(&candidates(&[("B", 1), ("C", 9)]), &schedule);
        assert_eq!(totals.total_fee, 1000);
        assert_eq!(totals.total_count, 10);
    }

    #[test]
    fn non_canonical_stored_keys_are_not_charged() {
        let schedule = FeeSchedule::from_rates([(ClassKey::B, 1000)]);
        let c = candidates(&[("b", 2), (" B ", 1)]);
        let totals = aggregate(&c, &schedule);
        assert_eq!(totals.total_count, 3);
        assert_eq!(totals.total_fee, 0);
        assert_eq!(schedule.rate_for_key("B"), 1000);
        assert_eq!(schedule.rate_for_key("fark_a1"), 0);

        let school = School::new("s1", "Merkez", "m@example.com").with_candidates(c);
        let r = report([&school], &schedule);
        assert_eq!(r.rows[0].class_counts[&ClassKey::B], 0);
        assert_eq!(r.rows[0].totals.total_fee, 0);
    }

    #[test]
    fn empty_inputs_yield_zeroes() {
        let schedule = FeeSchedule::default();
        assert_eq!(aggregate(&Candidates::new(), &schedule), Totals::default());
        let r = report(std::iter::empty::<&School>(), &schedule);
        assert!(r.rows.is_empty());
        assert_eq!(r.totals, Totals::default());
        assert_eq!(r.difference_total, 0);
        assert!(r.class_totals.values().all(|v| *v == 0));
    }

    #[test]
    fn report_sums_columns_and_difference_classes() {
        let schedule = FeeSchedule::from_rates([(ClassKey::B, 100), (ClassKey::FarkA1, 10)]);
        let a = School::new("a", "ÖZEL BİGA A MTSK", "a@example.com").with_candidates(
            candidates(&[("B", 2), ("FARK_A1", 1), ("BAKANLIK_A1", 3)]),
        );
        let b = School::new("b", "B Kurs", "b@example.com")
            .with_candidates(candidates(&[("B", 1), ("FARK_A2", 4)]));

        let r = report([&a, &b], &schedule);
        assert_eq!(r.rows.len(), 2);
        assert_eq!(r.rows[0].difference_total, 4);
        assert_eq!(r.rows[1].difference_total, 4);
        assert_eq!(r.difference_total, 8);
        assert_eq!(r.class_totals[&ClassKey::B], 3);
        assert_eq!(r.class_totals[&ClassKey::FarkA2], 4);
        assert_eq!(r.totals.total_count, 11);
        assert_eq!(r.totals.total_fee, 3 * 100 + 10);
        assert_eq!(r.rows[0].totals.total_fee, 210);
    }

    #[test]
    fn overrides_replace_single_rates() {
        let mut overrides = BTreeMap::new();
        overrides.insert("b".to_string(), 1234);
        let schedule = FeeSchedule::default().with_overrides(&overrides).unwrap();
        assert_eq!(schedule.rate(ClassKey::B), 1234);
        assert_eq!(schedule.rate(ClassKey::D), FeeSchedule::default().rate(ClassKey::D));

        overrides.insert("Z".to_string(), 1);
        assert!(FeeSchedule::default().with_overrides(&overrides).is_err());
    }

    #[test]
    fn lira_formatting_groups_thousands() {
        assert_eq!(format_lira(0), "0 TL");
        assert_eq!(format_lira(999), "999 TL");
        assert_eq!(format_lira(4600), "4.600 TL");
        assert_eq!(format_lira(1_234_567), "1.234.567 TL");
    }

    #[test]
    fn short_name_strips_common_affixes() {
        assert_eq!(short_name("ÖZEL BİGA DENİZ MTSK"), "DENİZ");
        assert_eq!(short_name("Yıldız"), "Yıldız");
    }
}
