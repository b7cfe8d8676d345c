use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

/// Broad climatic region of a BEC zone. Several coefficient tables key on
/// this rather than on the zone itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Coastal,
    Interior,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Coastal => write!(f, "coastal"),
            Region::Interior => write!(f, "interior"),
        }
    }
}

/// A Biogeoclimatic Ecosystem Classification zone.
///
/// `growth_alias` and `decay_alias` name the zones whose coefficient tables
/// apply for growth and decay estimation; for most zones these are the zone
/// itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BecZone {
    pub alias: &'static str,
    pub name: &'static str,
    pub region: Region,
    pub growth_alias: &'static str,
    pub decay_alias: &'static str,
}

/// The 14 BC BEC zones.
pub const BEC_ZONES: [BecZone; 14] = [
    BecZone { alias: "AT", name: "Alpine Tundra", region: Region::Interior, growth_alias: "ESSF", decay_alias: "AT" },
    BecZone { alias: "BG", name: "Bunchgrass", region: Region::Interior, growth_alias: "ESSF", decay_alias: "BG" },
    BecZone { alias: "BWBS", name: "Boreal White and Black Spruce", region: Region::Interior, growth_alias: "BWBS", decay_alias: "BWBS" },
    BecZone { alias: "CDF", name: "Coastal Douglas Fir", region: Region::Coastal, growth_alias: "CDF", decay_alias: "CDF" },
    BecZone { alias: "CWH", name: "Coastal Western Hemlock", region: Region::Coastal, growth_alias: "CWH", decay_alias: "CWH" },
    BecZone { alias: "ESSF", name: "Engelmann Spruce - Subalpine Fir", region: Region::Interior, growth_alias: "ESSF", decay_alias: "ESSF" },
    BecZone { alias: "ICH", name: "Interior Cedar Hemlock", region: Region::Interior, growth_alias: "ICH", decay_alias: "ICH" },
    BecZone { alias: "IDF", name: "Interior Douglas Fir", region: Region::Interior, growth_alias: "IDF", decay_alias: "IDF" },
    BecZone { alias: "MH", name: "Mountain Hemlock", region: Region::Coastal, growth_alias: "MH", decay_alias: "MH" },
    BecZone { alias: "MS", name: "Montane Spruce", region: Region::Interior, growth_alias: "MS", decay_alias: "MS" },
    BecZone { alias: "PP", name: "Ponderosa Pine", region: Region::Interior, growth_alias: "PP", decay_alias: "PP" },
    BecZone { alias: "SBPS", name: "Sub-Boreal Pine-Spruce", region: Region::Interior, growth_alias: "SBPS", decay_alias: "SBPS" },
    BecZone { alias: "SBS", name: "Sub-Boreal Spruce", region: Region::Interior, growth_alias: "SBS", decay_alias: "SBS" },
    BecZone { alias: "SWB", name: "Spruce - Willow - Birch", region: Region::Interior, growth_alias: "SWB", decay_alias: "SWB" },
];

/// Look up a BEC zone by alias. Unknown aliases are a validation error.
pub fn bec_zone(alias: &str) -> Result<&'static BecZone> {
    BEC_ZONES
        .iter()
        .find(|z| z.alias.eq_ignore_ascii_case(alias))
        .ok_or_else(|| ProjectionError::Validation(format!("Unknown BEC zone: {alias}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bec_zone_lookup() {
        let zone = bec_zone("CWH").unwrap();
        assert_eq!(zone.region, Region::Coastal);
        assert_eq!(zone.growth_alias, "CWH");
    }

    #[test]
    fn test_bec_zone_lookup_is_case_insensitive() {
        assert_eq!(bec_zone("idf").unwrap().alias, "IDF");
    }

    #[test]
    fn test_unknown_bec_zone_is_rejected() {
        let err = bec_zone("XX").unwrap_err();
        assert!(err.to_string().contains("Unknown BEC zone"));
    }

    #[test]
    fn test_coastal_zones() {
        let coastal: Vec<&str> = BEC_ZONES
            .iter()
            .filter(|z| z.region == Region::Coastal)
            .map(|z| z.alias)
            .collect();
        assert_eq!(coastal, vec!["CDF", "CWH", "MH"]);
    }
}
