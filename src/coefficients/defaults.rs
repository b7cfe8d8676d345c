//! Built-in coefficient set covering every genus, BEC zone, diameter band,
//! and equation group the projection can reach.
//!
//! Values are calibrated to give plausible coastal and interior stand
//! behavior; per-genus and per-zone variation comes from small deterministic
//! offsets so no two table rows are identical.

use crate::models::{Region, BEC_ZONES, GENERA};

use super::{
    fiat::GrowthFiatDetails, limits::ComponentSizeLimits, site_curve::SiteCurve, basal_area_group,
    CoefficientStore, ModelCoefficients, NonprimaryHeightCoefficients,
};

/// Small deterministic offset derived from an index, in `[-scale, scale]`.
fn spread(index: usize, scale: f32) -> f32 {
    (((index * 5 + 3) % 13) as f32 / 6.0 - 1.0) * scale
}

/// A coefficient store populated with the built-in tables.
pub fn with_defaults() -> CoefficientStore {
    let mut store = CoefficientStore::default();

    load_yield_tables(&mut store);
    load_growth_fiat(&mut store);
    load_empirical_growth(&mut store);
    load_species_growth_models(&mut store);
    load_heights_and_diameters(&mut store);
    load_utilization_splits(&mut store);
    load_volume_tables(&mut store);
    load_small_component(&mut store);
    load_site_curves(&mut store);

    store
}

fn load_yield_tables(store: &mut CoefficientStore) {
    for zone in &BEC_ZONES {
        for (gi, genus) in GENERA.iter().enumerate() {
            let g = gi + 1;
            let coastal = if zone.region == Region::Coastal { 1.0 } else { 0.0 };
            store.basal_area_yield.insert(
                (zone.alias.to_string(), genus.to_string()),
                [
                    2.0 + 0.3 * coastal + spread(g, 0.25),
                    0.8 + spread(g + 3, 0.08),
                    6.0,
                    0.4 + spread(g, 0.04),
                    0.04,
                    -0.010 + spread(g + 1, 0.001),
                    -0.005,
                ],
            );
            store.quad_mean_diameter_yield.insert(
                (zone.decay_alias.to_string(), genus.to_string()),
                [
                    7.6,
                    0.20 + spread(g, 0.03),
                    0.25 + 0.02 * coastal,
                    0.85 + spread(g + 2, 0.03),
                    0.010,
                ],
            );
        }
    }

    // Merchantable basal area and diameter ceilings.
    for stratum in (1..=10).chain(21..=30) {
        store.upper_bounds_by_group.insert(
            stratum,
            (72.0 + spread(stratum, 8.0), 52.0 + spread(stratum + 4, 6.0)),
        );
    }
    for (gi, genus) in GENERA.iter().enumerate() {
        let g = gi + 1;
        for region in [Region::Coastal, Region::Interior] {
            let coastal = if region == Region::Coastal { 1.0 } else { 0.0 };
            store.upper_bounds_by_species.insert(
                (genus.to_string(), region),
                (
                    70.0 + 6.0 * coastal + spread(g, 7.0),
                    50.0 + 4.0 * coastal + spread(g + 2, 5.0),
                ),
            );
        }
    }
}

fn load_growth_fiat(store: &mut CoefficientStore) {
    store.basal_area_growth_fiat.insert(
        Region::Coastal,
        GrowthFiatDetails {
            ages: [0.0, 80.0, 140.0, 200.0],
            coefficients: [0.0, 0.010, 0.025, 0.050],
            mixed_coefficients: [100.0, 150.0, 1.0],
        },
    );
    store.basal_area_growth_fiat.insert(
        Region::Interior,
        GrowthFiatDetails {
            ages: [0.0, 70.0, 130.0, 190.0],
            coefficients: [0.0, 0.012, 0.030, 0.060],
            mixed_coefficients: [90.0, 140.0, 1.0],
        },
    );
    store.quad_mean_diameter_growth_fiat.insert(
        Region::Coastal,
        GrowthFiatDetails {
            ages: [0.0, 80.0, 140.0, 200.0],
            coefficients: [0.0, 0.015, 0.030, 0.060],
            mixed_coefficients: [100.0, 150.0, 1.0],
        },
    );
    store.quad_mean_diameter_growth_fiat.insert(
        Region::Interior,
        GrowthFiatDetails {
            ages: [0.0, 70.0, 130.0, 190.0],
            coefficients: [0.0, 0.018, 0.036, 0.070],
            mixed_coefficients: [90.0, 140.0, 1.0],
        },
    );
}

fn load_empirical_growth(store: &mut CoefficientStore) {
    for zone in &BEC_ZONES {
        for (gi, genus) in GENERA.iter().enumerate() {
            let g = gi + 1;
            store.basal_area_growth_empirical.insert(
                (zone.alias.to_string(), genus.to_string()),
                [
                    7.0 + spread(g, 0.4),
                    -0.05,
                    0.30 + spread(g + 1, 0.05),
                    1.2,
                    0.10,
                    -0.010,
                    0.30,
                    0.80,
                ],
            );
        }
    }
    for stratum in (1..=10).chain(21..=30) {
        store.quad_mean_diameter_growth_empirical.insert(
            stratum,
            [
                -0.50 + spread(stratum, 0.10),
                0.30,
                -0.25,
                -0.010,
                -0.005,
                -0.005,
                0.10,
            ],
        );
        store.quad_mean_diameter_growth_limits.insert(
            stratum,
            [0.02, 0.004, 0.0, 0.60 + spread(stratum, 0.05), 0.02, 0.0, 0.010, 1.0],
        );
    }
}

fn load_species_growth_models(store: &mut CoefficientStore) {
    for stratum in (1..=10).chain(21..=30) {
        // Alternate between the dominant-height and proportion models.
        let mc = if stratum % 2 == 0 {
            ModelCoefficients {
                model: 3,
                coefficients: [0.10 + spread(stratum, 0.02), -0.004, 0.0],
            }
        } else {
            ModelCoefficients {
                model: 9,
                coefficients: [0.05 + spread(stratum, 0.02), -0.010, -0.0010],
            }
        };
        store.primary_basal_area_growth.insert(stratum, mc);
        store.primary_quad_mean_diameter_growth.insert(
            stratum,
            [0.005 + spread(stratum, 0.002), -0.0020, 0.0],
        );
    }
    for (gi, genus) in GENERA.iter().enumerate() {
        let g = gi + 1;
        store.non_primary_basal_area_growth.insert(
            (genus.to_string(), 0),
            [0.10 + spread(g, 0.03), -0.040, -0.020],
        );
        store.non_primary_quad_mean_diameter_growth.insert(
            (genus.to_string(), 0),
            [0.006 + spread(g, 0.002), -0.0025, 0.0010],
        );
        // A few stratum-specific overrides for the common conifers.
        if matches!(*genus, "F" | "H" | "S" | "PL") {
            for region in [Region::Coastal, Region::Interior] {
                let stratum = basal_area_group(g, region);
                store.non_primary_basal_area_growth.insert(
                    (genus.to_string(), stratum),
                    [0.12 + spread(g + stratum, 0.03), -0.045, -0.018],
                );
                store.non_primary_quad_mean_diameter_growth.insert(
                    (genus.to_string(), stratum),
                    [0.007 + spread(g + stratum, 0.002), -0.0028, 0.0012],
                );
            }
        }
    }
}

fn load_heights_and_diameters(store: &mut CoefficientStore) {
    for (gi, genus) in GENERA.iter().enumerate() {
        let g = gi + 1;
        for region in [Region::Coastal, Region::Interior] {
            let coastal = if region == Region::Coastal { 1.0 } else { 0.0 };
            store.primary_lorey_height.insert(
                (genus.to_string(), region),
                [
                    0.95 + 0.01 * coastal + spread(g, 0.015),
                    0.05,
                    -0.0010,
                ],
            );
            store.component_size_limits.insert(
                (genus.to_string(), region),
                ComponentSizeLimits {
                    lorey_height_maximum: 50.0 + 5.0 * coastal + spread(g, 4.0),
                    quad_mean_diameter_maximum: 74.0 + 6.0 * coastal + spread(g + 1, 8.0),
                    min_quad_mean_diameter_lorey_height_ratio: 0.22 + spread(g, 0.03),
                    max_quad_mean_diameter_lorey_height_ratio: 2.4 + spread(g + 2, 0.25),
                },
            );
        }
        store.species_quad_mean_diameter.insert(
            genus.to_string(),
            [spread(g, 0.12), 0.15 + spread(g + 1, 0.04), 0.05],
        );
    }

    // Non-primary Lorey height relations for the frequent companions; other
    // pairings fall back to the identity default.
    let pairings: [(&str, &str, u8, [f32; 2]); 6] = [
        ("B", "H", 1, [0.94, 0.99]),
        ("B", "S", 1, [0.92, 1.00]),
        ("H", "F", 1, [0.96, 0.98]),
        ("S", "F", 1, [0.90, 0.99]),
        ("C", "H", 2, [0.95, 1.01]),
        ("PL", "S", 2, [0.93, 1.00]),
    ];
    for (species, primary, equation_index, coefficients) in pairings {
        for region in [Region::Coastal, Region::Interior] {
            store.non_primary_lorey_height.insert(
                (species.to_string(), primary.to_string(), region),
                NonprimaryHeightCoefficients { equation_index, coefficients },
            );
        }
    }
}

fn load_utilization_splits(store: &mut CoefficientStore) {
    for zone in &BEC_ZONES {
        for (gi, genus) in GENERA.iter().enumerate() {
            let g = gi + 1;
            // Cumulative basal-area logits, one per band boundary.
            let rows: [[f32; 2]; 3] = [
                [-1.0 + spread(g, 0.15), 1.20],
                [-2.5 + spread(g + 1, 0.15), 0.12],
                [-4.0 + spread(g + 2, 0.15), 0.14],
            ];
            for (band, row) in rows.iter().enumerate() {
                store.utilization_basal_area.insert(
                    (band, genus.to_string(), zone.growth_alias.to_string()),
                    *row,
                );
            }
        }
    }
    for (gi, genus) in GENERA.iter().enumerate() {
        let g = gi + 1;
        let rows: [[f32; 4]; 4] = [
            [3.0 + spread(g, 0.2), -0.20, 0.90, 0.0],
            [-2.0 + spread(g + 1, 0.2), 0.70, 1.0, 0.0],
            [-2.6 + spread(g + 2, 0.2), 0.62, 1.0, 0.0],
            [-3.0 + spread(g + 3, 0.3), 0.05, -1.0, 1.0],
        ];
        for (band, row) in rows.iter().enumerate() {
            store
                .utilization_quad_mean_diameter
                .insert((band, genus.to_string()), *row);
        }
    }
}

fn load_volume_tables(store: &mut CoefficientStore) {
    for (gi, genus) in GENERA.iter().enumerate() {
        let g = gi + 1;
        let volume_group = (10 + g) as u16;
        let decay_group = (30 + g) as u16;
        store.volume_equation_groups.insert(genus.to_string(), volume_group);
        store.decay_equation_groups.insert(genus.to_string(), decay_group);

        store.whole_stem_volume.insert(
            volume_group,
            [
                -9.60 + spread(g, 0.20),
                1.80,
                1.00,
                0.0,
                0.0,
                0.004,
                0.0,
                0.0,
                0.0,
            ],
        );
        for band in 0..4 {
            store.whole_stem_utilization.insert(
                (band, volume_group),
                [
                    -1.20 + spread(g + band, 0.10),
                    1.10,
                    0.10,
                    -0.10,
                ],
            );
            store.close_utilization.insert(
                (band, volume_group),
                [
                    -2.8 + 0.4 * band as f32 + spread(g, 0.10),
                    0.10,
                    0.08,
                ],
            );
            store.net_decay.insert(
                (band, decay_group),
                [4.0 + spread(g + band, 0.15), 0.10, -0.50],
            );
        }
        store.net_decay_waste.insert(
            genus.to_string(),
            [2.0 + spread(g, 0.2), -3.0, -5.0, 0.20, 0.10, -0.30],
        );
        for region in [Region::Coastal, Region::Interior] {
            store
                .decay_modifiers
                .insert((genus.to_string(), region), spread(g + region as usize, 0.05));
            store
                .waste_modifiers
                .insert((genus.to_string(), region), spread(g + 5, 0.04));
        }
    }
}

fn load_small_component(store: &mut CoefficientStore) {
    for (gi, genus) in GENERA.iter().enumerate() {
        let g = gi + 1;
        store.small_probability.insert(
            genus.to_string(),
            [2.0 + spread(g, 0.3), 0.20, -0.020, -0.080],
        );
        store.small_basal_area.insert(
            genus.to_string(),
            [0.80 + spread(g, 0.10), 0.0, 0.0050, -0.060],
        );
        store
            .small_quad_mean_diameter
            .insert(genus.to_string(), [-1.5 + spread(g, 0.2), 0.050]);
        store
            .small_lorey_height
            .insert(genus.to_string(), [0.12, 0.80]);
        store.small_whole_stem_volume.insert(
            genus.to_string(),
            [-8.0 + spread(g, 0.3), 1.30, 0.40, 0.050],
        );
    }
}

fn load_site_curves(store: &mut CoefficientStore) {
    // Curve parameters: (number, k, p, ytbh_b0, ytbh_b1, age max coastal,
    // age max interior, extension half-life, extension cutoff).
    let curves: [(u16, f32, f32, f32, f32, f32, f32, f32, f32); 12] = [
        (3, 0.021, 1.35, 4.5, 55.0, 250.0, 300.0, 100.0, 150.0),
        (6, 0.024, 1.40, 4.0, 60.0, 250.0, 300.0, 0.0, 150.0),
        (8, 0.019, 1.30, 5.0, 65.0, 200.0, 250.0, 100.0, 150.0),
        (11, 0.026, 1.45, 3.5, 50.0, 250.0, 300.0, 120.0, 160.0),
        (16, 0.024, 1.40, 4.0, 60.0, 250.0, 300.0, 100.0, 150.0),
        (21, 0.028, 1.50, 3.0, 45.0, 180.0, 220.0, 0.0, 140.0),
        (25, 0.022, 1.38, 4.5, 58.0, 220.0, 260.0, 100.0, 150.0),
        (30, 0.030, 1.55, 3.0, 40.0, 140.0, 160.0, 80.0, 120.0),
        (37, 0.020, 1.32, 5.0, 70.0, 240.0, 280.0, 110.0, 150.0),
        (42, 0.027, 1.48, 3.2, 42.0, 150.0, 170.0, 0.0, 120.0),
        (47, 0.023, 1.42, 4.2, 56.0, 230.0, 270.0, 100.0, 150.0),
        (51, 0.025, 1.44, 3.8, 52.0, 210.0, 250.0, 90.0, 140.0),
    ];
    for (number, k, p, b0, b1, amc, ami, t1, t2) in curves {
        store.site_curves.insert(
            number,
            SiteCurve {
                number,
                shape_k: k,
                shape_p: p,
                ytbh_b0: b0,
                ytbh_b1: b1,
                age_maximum_coastal: amc,
                age_maximum_interior: ami,
                extension_half_life: t1,
                extension_cutoff: t2,
            },
        );
    }

    let defaults: [(&str, u16, u16); 16] = [
        ("AC", 30, 30),
        ("AT", 42, 42),
        ("B", 8, 11),
        ("C", 3, 6),
        ("D", 30, 30),
        ("E", 42, 42),
        ("F", 16, 47),
        ("H", 6, 25),
        ("L", 37, 37),
        ("MB", 30, 30),
        ("PA", 51, 51),
        ("PL", 21, 21),
        ("PW", 47, 47),
        ("PY", 51, 51),
        ("S", 25, 11),
        ("Y", 3, 6),
    ];
    for (genus, coastal_curve, interior_curve) in defaults {
        store
            .default_site_curves
            .insert((genus.to_string(), Region::Coastal), coastal_curve);
        store
            .default_site_curves
            .insert((genus.to_string(), Region::Interior), interior_curve);
    }

    // Site index conversions between the conifers that commonly share
    // stands. Pairs not listed are simply not convertible.
    let conversions: [(&str, &str, f32, f32); 10] = [
        ("F", "H", 1.2, 0.92),
        ("H", "F", -1.3, 1.09),
        ("F", "C", 2.0, 0.78),
        ("C", "F", -2.6, 1.28),
        ("S", "PL", 1.5, 0.88),
        ("PL", "S", -1.7, 1.14),
        ("B", "H", 0.6, 0.96),
        ("H", "B", -0.6, 1.04),
        ("S", "B", 0.9, 0.95),
        ("B", "S", -0.9, 1.05),
    ];
    for (from, to, a, b) in conversions {
        store
            .site_index_conversions
            .insert((from.to_string(), to.to_string()), (a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bec_zone;

    #[test]
    fn test_yield_tables_cover_all_zones_and_genera() {
        let store = with_defaults();
        for zone in &BEC_ZONES {
            for genus in GENERA {
                assert!(
                    store.basal_area_yield(zone.alias, genus).is_ok(),
                    "missing basal area yield for {}/{genus}",
                    zone.alias
                );
                assert!(store
                    .quad_mean_diameter_yield(zone.decay_alias, genus)
                    .is_ok());
            }
        }
    }

    #[test]
    fn test_every_genus_has_groups_and_curves() {
        let store = with_defaults();
        for (gi, genus) in GENERA.iter().enumerate() {
            let vg = store.volume_equation_group(genus).unwrap();
            let dg = store.decay_equation_group(genus).unwrap();
            assert!(store.whole_stem_volume(vg).is_ok());
            assert!(store.net_decay(0, dg).is_ok());
            for region in [Region::Coastal, Region::Interior] {
                let curve = store.default_site_curve(genus, region).unwrap();
                assert!(store.site_curve(curve).is_ok());
                let stratum = basal_area_group(gi + 1, region);
                assert!(store.primary_basal_area_growth(stratum).is_ok());
                assert!(store.upper_bounds_by_group(stratum).is_ok());
            }
        }
    }

    #[test]
    fn test_utilization_splits_cover_growth_zones() {
        let store = with_defaults();
        let growth_alias = bec_zone("AT").unwrap().growth_alias;
        assert!(store.utilization_basal_area(0, "PL", growth_alias).is_ok());
        for band in 0..4 {
            assert!(store.utilization_quad_mean_diameter(band, "S").is_ok());
        }
    }

    #[test]
    fn test_spread_is_bounded_and_varied() {
        let values: Vec<f32> = (0..13).map(|i| spread(i, 1.0)).collect();
        assert!(values.iter().all(|v| v.abs() <= 1.0 + 1e-6));
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }
}
