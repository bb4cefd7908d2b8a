//! Closed status enums that keep their historical bit values.
//!
//! Every instance holds exactly one variant. Queries over several states take
//! a slice of variants or a bit mask built from one.

/// A status enum whose variants each own a distinct bit.
pub trait StatusFlag: Copy + Eq + 'static {
    /// All variants in ascending bit order.
    const ALL: &'static [Self];

    fn bit(self) -> u32;

    fn label(self) -> &'static str;

    /// True if `self` is one of `set`.
    fn matches_any(self, set: &[Self]) -> bool {
        set.contains(&self)
    }

    /// True if the bit of `self` is present in `mask`.
    fn in_mask(self, mask: u32) -> bool {
        mask & self.bit() != 0
    }

    fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|flag| flag.bit() == bit)
    }

    /// Combine variants into a bit mask.
    fn mask(set: &[Self]) -> u32 {
        set.iter().fold(0, |acc, flag| acc | flag.bit())
    }

    /// Mask with every variant set.
    fn all_mask() -> u32 {
        Self::mask(Self::ALL)
    }

    /// Variants present in `mask`, ascending.
    fn flags_in(mask: u32) -> Vec<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|flag| flag.in_mask(mask))
            .collect()
    }

    /// Render a mask as `"A | B"`, or `"UNKNOWN"` when nothing matches.
    fn describe(mask: u32) -> String {
        let labels: Vec<&str> = Self::flags_in(mask).into_iter().map(Self::label).collect();
        if labels.is_empty() {
            "UNKNOWN".to_string()
        } else {
            labels.join(" | ")
        }
    }
}
