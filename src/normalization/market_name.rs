use serde::Serialize;

/// Plain form of the special-variant marker as it appears in market hash names.
pub const SPECIAL_MARKER: &str = "StatTrak";
/// Decorated form of the special-variant marker (with the trademark glyph).
pub const SPECIAL_MARKER_DECORATED: &str = "StatTrak™";
pub const RARE_MARKER: &str = "Souvenir";

/// Fixed wear tiers, in the order they are matched against a name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WearCondition {
    #[serde(rename = "Factory New")]
    FactoryNew,
    #[serde(rename = "Minimal Wear")]
    MinimalWear,
    #[serde(rename = "Field-Tested")]
    FieldTested,
    #[serde(rename = "Well-Worn")]
    WellWorn,
    #[serde(rename = "Battle-Scarred")]
    BattleScarred,
}

impl WearCondition {
    pub const ALL: [WearCondition; 5] = [
        WearCondition::FactoryNew,
        WearCondition::MinimalWear,
        WearCondition::FieldTested,
        WearCondition::WellWorn,
        WearCondition::BattleScarred,
    ];

    pub fn label(self) -> &'static str {
        match self {
            WearCondition::FactoryNew => "Factory New",
            WearCondition::MinimalWear => "Minimal Wear",
            WearCondition::FieldTested => "Field-Tested",
            WearCondition::WellWorn => "Well-Worn",
            WearCondition::BattleScarred => "Battle-Scarred",
        }
    }
}

impl std::fmt::Display for WearCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical attributes parsed out of a market display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NormalizedAttributes {
    pub base_name: String,
    pub is_special_variant: bool,
    pub is_rare_variant: bool,
    pub wear_condition: Option<WearCondition>,
    /// Never derived from the name itself; callers attach it from a separate feed field.
    pub phase: Option<String>,
}

impl NormalizedAttributes {
    /// Parse a market hash name such as `"StatTrak™ AK-47 | Redline (Field-Tested)"`.
    ///
    /// The wear suffix is stripped before the marker tokens because it is always
    /// the outermost trailing component of the name.
    pub fn parse(name: &str) -> Self {
        if name.is_empty() {
            return Self::default();
        }

        let is_special_variant = name.contains(SPECIAL_MARKER);
        let is_rare_variant = name.contains(RARE_MARKER);

        let mut working = name;
        let mut wear_condition = None;
        for wear in WearCondition::ALL {
            if let Some(rest) = strip_wear_suffix(working, wear.label()) {
                working = rest.trim();
                wear_condition = Some(wear);
                break;
            }
        }

        let base_name = working
            .replace(&format!("{SPECIAL_MARKER_DECORATED} "), "")
            .replace(&format!("{SPECIAL_MARKER} "), "")
            .replace(&format!("{RARE_MARKER} "), "")
            .trim()
            .to_string();

        Self {
            base_name,
            is_special_variant,
            is_rare_variant,
            wear_condition,
            phase: None,
        }
    }

    /// Attach a phase (e.g. "Phase 2", "Ruby"). Blank values are ignored, and so
    /// are values that spell a marker or wear label: as a key component they
    /// would be indistinguishable from the flag or wear they name.
    pub fn with_phase(mut self, phase: Option<&str>) -> Self {
        self.phase = phase
            .map(str::trim)
            .filter(|p| !p.is_empty() && !is_reserved_component(p))
            .map(str::to_string);
        self
    }
}

fn is_reserved_component(value: &str) -> bool {
    [SPECIAL_MARKER, SPECIAL_MARKER_DECORATED, RARE_MARKER]
        .into_iter()
        .chain(WearCondition::ALL.map(WearCondition::label))
        .any(|reserved| reserved.eq_ignore_ascii_case(value))
}

fn strip_wear_suffix<'a>(name: &'a str, label: &str) -> Option<&'a str> {
    name.strip_suffix(')')?
        .strip_suffix(label)?
        .strip_suffix('(')
}
