//! Species ranking: primary and secondary species selection and the
//! inventory type group (ITG) classification of the stand.

use std::collections::HashMap;

use crate::bank::Bank;
use crate::error::{ProjectionError, Result};

/// Deciduous genera, for the hardwood branches of the ITG table.
pub const HARDWOODS: [&str; 5] = ["AC", "AT", "D", "E", "MB"];

/// Pairs whose percentages are pooled before ranking; the larger partner
/// absorbs the smaller.
const PRIMARY_SPECIES_TO_COMBINE: [(&str, &str); 2] = [("PL", "PA"), ("C", "Y")];

/// ITG codes for nearly-pure stands, by genus.
const ITG_PURE: [(&str, u16); 16] = [
    ("AC", 36),
    ("AT", 42),
    ("B", 18),
    ("C", 9),
    ("D", 38),
    ("E", 40),
    ("F", 1),
    ("H", 12),
    ("L", 34),
    ("MB", 39),
    ("PA", 28),
    ("PL", 28),
    ("PW", 27),
    ("PY", 32),
    ("S", 21),
    ("Y", 9),
];

fn is_hardwood(genus: &str) -> bool {
    HARDWOODS.contains(&genus)
}

/// Pool the percentages of species pairs that are treated as one when
/// choosing the primary species. Total mass is conserved.
pub fn combine_percentages(percentages: &mut HashMap<String, f32>) {
    for (first, second) in PRIMARY_SPECIES_TO_COMBINE {
        let p1 = percentages.get(first).copied().unwrap_or(0.0);
        let p2 = percentages.get(second).copied().unwrap_or(0.0);
        if p1 > 0.0 && p2 > 0.0 {
            if p1 >= p2 {
                percentages.insert(first.to_string(), p1 + p2);
                percentages.insert(second.to_string(), 0.0);
            } else {
                percentages.insert(second.to_string(), p1 + p2);
                percentages.insert(first.to_string(), 0.0);
            }
        }
    }
}

/// Inventory type group from the primary species, the secondary species
/// (if any), and the primary's percentage of the stand.
pub fn find_inventory_type_group(
    primary: &str,
    secondary: Option<&str>,
    primary_percentage: f32,
) -> Result<u16> {
    if primary_percentage > 79.999 {
        return ITG_PURE
            .iter()
            .find(|(genus, _)| *genus == primary)
            .map(|(_, itg)| *itg)
            .ok_or_else(|| {
                ProjectionError::UnknownSpecies(format!(
                    "Unrecognized primary species {primary}"
                ))
            });
    }

    let secondary = secondary.unwrap_or("");
    let itg = match primary {
        "F" => match secondary {
            "C" | "Y" => 2,
            "B" | "H" => 3,
            "S" => 4,
            "PL" | "PA" => 5,
            "PY" => 6,
            "L" | "PW" => 7,
            _ => 8,
        },
        "C" | "Y" => match secondary {
            "H" | "B" | "S" => 11,
            _ => 10,
        },
        "B" => match secondary {
            "C" | "Y" | "H" => 19,
            _ => 20,
        },
        "H" => match secondary {
            "C" | "Y" => 14,
            "B" => 15,
            "S" => 16,
            s if is_hardwood(s) => 17,
            _ => 13,
        },
        "S" => match secondary {
            "C" | "Y" | "H" => 23,
            "B" => 24,
            "PL" => 25,
            s if is_hardwood(s) => 26,
            _ => 22,
        },
        "PW" => 27,
        "PL" | "PA" => match secondary {
            "PL" | "PA" => 28,
            "F" | "PW" | "L" | "PY" => 29,
            s if is_hardwood(s) => 31,
            _ => 30,
        },
        "PY" => 32,
        "L" => match secondary {
            "F" => 33,
            _ => 34,
        },
        "AC" => {
            if is_hardwood(secondary) {
                36
            } else {
                35
            }
        }
        "D" => {
            if is_hardwood(secondary) {
                38
            } else {
                37
            }
        }
        "MB" => 39,
        "E" => 40,
        "AT" => {
            if is_hardwood(secondary) {
                42
            } else {
                41
            }
        }
        other => {
            return Err(ProjectionError::UnknownSpecies(format!(
                "Unrecognized primary species {other}"
            )))
        }
    };
    Ok(itg)
}

/// Rank a layer's species: primary and secondary bank indices plus the
/// inventory type group.
pub fn determine_rankings(bank: &Bank) -> Result<(usize, Option<usize>, u16)> {
    let mut percentages: HashMap<String, f32> = HashMap::new();
    let proportions = bank.basal_area_proportions();
    for i in bank.indices() {
        *percentages.entry(bank.species_names[i].clone()).or_insert(0.0) +=
            proportions[i] * 100.0;
    }
    combine_percentages(&mut percentages);

    let mut ranked: Vec<(String, f32)> = percentages.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let (primary_name, primary_percentage) = match ranked.first() {
        Some((name, p)) if *p > 0.0 => (name.clone(), *p),
        _ => {
            return Err(ProjectionError::InvalidState(
                "Layer has no species with basal area".to_string(),
            ))
        }
    };
    let secondary_name = ranked
        .get(1)
        .filter(|(_, p)| *p > 0.0)
        .map(|(name, _)| name.clone());

    let slot_of = |name: &str| bank.indices().find(|i| bank.species_names[*i] == name);
    let primary_index = slot_of(&primary_name).ok_or_else(|| {
        ProjectionError::InvalidState(format!("Primary species {primary_name} not in bank"))
    })?;
    let secondary_index = secondary_name.as_deref().and_then(slot_of);

    let itg =
        find_inventory_type_group(&primary_name, secondary_name.as_deref(), primary_percentage)?;
    Ok((primary_index, secondary_index, itg))
}
