//! Splitting the merchantable aggregate across the four diameter bands,
//! and the three-mode reconciliation that makes basal area, stem count,
//! and diameter mutually consistent afterwards.

use crate::coefficients::CoefficientStore;
use crate::error::{ProjectionError, Result};
use crate::models::{BecZone, UtilizationClass, UtilizationVector};

use super::density;

/// Mode 1 moves basal area from each of these bands into the band below.
const MODE_1_MOVES: [(UtilizationClass, UtilizationClass); 3] = [
    (UtilizationClass::Over225, UtilizationClass::U175To225),
    (UtilizationClass::U175To225, UtilizationClass::U125To175),
    (UtilizationClass::U125To175, UtilizationClass::U75To125),
];

/// exp(logit), guarded against overflow.
fn safe_exponent(logit: f32) -> Result<f32> {
    if logit > 88.0 {
        return Err(ProjectionError::NonConvergence(format!(
            "Logit {logit} overflows the exponential"
        )));
    }
    Ok(logit.exp())
}

/// exp(logit) / (1 + exp(logit)), guarded against overflow.
fn exponent_ratio(logit: f32) -> Result<f32> {
    let e = safe_exponent(logit)?;
    Ok(e / (1.0 + e))
}

/// Estimate the per-band quadratic mean diameters from the aggregate.
///
/// Writes the four band slots of `quad_mean_diameters`; the aggregate slot
/// is raised to 7.5 when it starts below the merchantable bound.
pub fn quad_mean_diameter_by_utilization(
    store: &CoefficientStore,
    genus: &str,
    quad_mean_diameters: &mut UtilizationVector,
) -> Result<()> {
    let dq_all = quad_mean_diameters.all();

    for (band, uc) in UtilizationClass::BANDS.into_iter().enumerate() {
        let coe = store.utilization_quad_mean_diameter(band, genus)?;
        let [a0, a1, a2, a3] = *coe;

        let value = match uc {
            UtilizationClass::U75To125 => {
                if dq_all < 7.5001 {
                    quad_mean_diameters.set_all(7.5);
                    7.5
                } else {
                    let logit = a1 / a0 * (dq_all - 7.5);
                    (7.5 + a0 * (1.0 - safe_exponent(logit)?).powf(a2)).min(dq_all)
                }
            }
            UtilizationClass::U125To175 | UtilizationClass::U175To225 => {
                let logit = a0 + a1 * (dq_all / 7.5).powf(a2);
                uc.low_bound() + 5.0 * exponent_ratio(logit)?
            }
            UtilizationClass::Over225 => {
                let logit = a2 + a1 * dq_all.powf(a3);
                22.5_f32.max(dq_all + a0 * (1.0 - exponent_ratio(logit)?))
            }
            _ => unreachable!("BANDS never yields the small or aggregate class"),
        };
        quad_mean_diameters.set(uc, value);
    }
    Ok(())
}

/// Estimate per-band basal areas from the aggregate via cumulative logits.
///
/// Needs the band diameters from
/// [`quad_mean_diameter_by_utilization`] for the low-diameter cap.
pub fn basal_area_by_utilization(
    store: &CoefficientStore,
    bec: &BecZone,
    genus: &str,
    quad_mean_diameters: &UtilizationVector,
    basal_areas: &mut UtilizationVector,
) -> Result<()> {
    let dq_all = quad_mean_diameters.all();

    // b[k] is the basal area above the k-th band boundary.
    let mut b = [basal_areas.all(), 0.0, 0.0, 0.0];
    for k in 1..4 {
        let coe = store.utilization_basal_area(k - 1, genus, bec.growth_alias)?;
        let logit = if k == 1 {
            coe[0] + coe[1] * dq_all.powf(0.25)
        } else {
            coe[0] + coe[1] * dq_all
        };
        b[k] = b[k - 1] * exponent_ratio(logit)?;
        if k == 1 && dq_all < 12.5 {
            let first_band_dq = quad_mean_diameters.get(UtilizationClass::U75To125);
            let ba_above_125_max =
                (1.0 - ((first_band_dq - 7.4) / (dq_all - 7.4)).powi(2)) * b[0];
            b[1] = b[1].min(ba_above_125_max);
        }
    }

    basal_areas.set(UtilizationClass::U75To125, basal_areas.all() - b[1]);
    basal_areas.set(UtilizationClass::U125To175, b[1] - b[2]);
    basal_areas.set(UtilizationClass::U175To225, b[2] - b[3]);
    basal_areas.set(UtilizationClass::Over225, b[3]);
    Ok(())
}

/// Make the band basal areas, stem counts, and diameters agree with each
/// other and with the aggregates.
pub fn reconcile_components(
    basal_areas: &mut UtilizationVector,
    trees_per_hectare: &mut UtilizationVector,
    quad_mean_diameters: &mut UtilizationVector,
) -> Result<()> {
    if basal_areas.all() == 0.0 {
        for uc in UtilizationClass::BANDS {
            basal_areas.set(uc, 0.0);
            trees_per_hectare.set(uc, 0.0);
        }
        return Ok(());
    }

    let ba_sum = basal_areas.band_sum();
    if (ba_sum - basal_areas.all()).abs() > 0.00003 * ba_sum {
        return Err(ProjectionError::InvalidState(
            "Band basal areas do not sum to the merchantable total".to_string(),
        ));
    }

    let dq0 = density::quad_mean_diameter(basal_areas.all(), trees_per_hectare.all());
    if dq0 < 7.5 {
        return Err(ProjectionError::InvalidState(format!(
            "Merchantable quadratic mean diameter {dq0} is below 7.5 cm"
        )));
    }

    let tph_sum_high: f32 = UtilizationClass::BANDS
        .iter()
        .map(|uc| density::trees_per_hectare(basal_areas.get(*uc), uc.low_bound()))
        .sum();

    if tph_sum_high < trees_per_hectare.all() {
        reconcile_mode_1(basal_areas, trees_per_hectare, quad_mean_diameters, tph_sum_high);
        Ok(())
    } else {
        reconcile_mode_2_check(basal_areas, trees_per_hectare, quad_mean_diameters)
    }
}

/// Mode 1: even at the band low bounds there are too few stems, so pin the
/// diameters at the low bounds and shift basal area into smaller bands.
fn reconcile_mode_1(
    basal_areas: &mut UtilizationVector,
    trees_per_hectare: &mut UtilizationVector,
    quad_mean_diameters: &mut UtilizationVector,
    tph_sum_high: f32,
) {
    let mut tph_need = trees_per_hectare.all() - tph_sum_high;

    for uc in UtilizationClass::BANDS {
        quad_mean_diameters.set(uc, uc.low_bound());
    }

    for (uc, lower) in MODE_1_MOVES {
        let tph_avail = density::trees_per_hectare(basal_areas.get(uc), lower.low_bound())
            - density::trees_per_hectare(basal_areas.get(uc), uc.low_bound());

        if tph_avail < tph_need {
            let moved = basal_areas.get(uc);
            basal_areas.set(lower, basal_areas.get(lower) + moved);
            basal_areas.set(uc, 0.0);
            tph_need -= tph_avail;
        } else {
            let moved = basal_areas.get(uc) * tph_need / tph_avail;
            basal_areas.set(lower, basal_areas.get(lower) + moved);
            basal_areas.set(uc, basal_areas.get(uc) - moved);
            break;
        }
    }

    for uc in UtilizationClass::BANDS {
        trees_per_hectare.set(
            uc,
            density::trees_per_hectare(basal_areas.get(uc), quad_mean_diameters.get(uc)),
        );
    }
}

/// Skip mode 2 when the bands already agree with the aggregates.
fn reconcile_mode_2_check(
    basal_areas: &mut UtilizationVector,
    trees_per_hectare: &mut UtilizationVector,
    quad_mean_diameters: &mut UtilizationVector,
) -> Result<()> {
    let tph_sum = trees_per_hectare.band_sum();
    if (tph_sum - trees_per_hectare.all()).abs() / tph_sum > 0.00001 {
        return reconcile_mode_2(basal_areas, trees_per_hectare, quad_mean_diameters);
    }
    for uc in UtilizationClass::BANDS {
        if basal_areas.get(uc) > 0.0 {
            if trees_per_hectare.get(uc) <= 0.0 {
                return reconcile_mode_2(basal_areas, trees_per_hectare, quad_mean_diameters);
            }
            let implied =
                density::quad_mean_diameter(basal_areas.get(uc), trees_per_hectare.get(uc));
            let dq = quad_mean_diameters.get(uc);
            if dq >= uc.low_bound() && dq <= uc.high_bound() && (implied - dq).abs() < 0.00001 {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Mode 2: iteratively scale the band diameters, pinning the worst
/// bound violator each pass.
fn reconcile_mode_2(
    basal_areas: &mut UtilizationVector,
    trees_per_hectare: &mut UtilizationVector,
    quad_mean_diameters: &mut UtilizationVector,
) -> Result<()> {
    let mut pass = 0;
    let mut basal_area_fixed = 0.0;
    let mut trees_fixed = 0.0;
    let mut pinned = [false; 4];
    let mut dq_trial = UtilizationVector::zero();

    loop {
        pass += 1;
        if pass > 4 {
            return Err(ProjectionError::NonConvergence(
                "Mode 2 component reconciliation iterations exceeded 4".to_string(),
            ));
        }

        let sum: f32 = UtilizationClass::BANDS
            .iter()
            .enumerate()
            .map(|(band, uc)| {
                let ba = basal_areas.get(*uc);
                let dq = quad_mean_diameters.get(*uc);
                if ba != 0.0 && !pinned[band] {
                    ba / (dq * dq)
                } else {
                    0.0
                }
            })
            .sum();

        let ba_free = basal_areas.all() - basal_area_fixed;
        let tph_free = trees_per_hectare.all() - trees_fixed;

        if ba_free <= 0.0 || tph_free <= 0.0 {
            reconcile_mode_3(basal_areas, trees_per_hectare, quad_mean_diameters);
            return Ok(());
        }

        let dq_free = density::quad_mean_diameter(ba_free, tph_free);
        let k = dq_free * dq_free / ba_free * sum;
        let sqrt_k = k.sqrt();

        for (band, uc) in UtilizationClass::BANDS.into_iter().enumerate() {
            if !pinned[band] && basal_areas.get(uc) > 0.0 {
                dq_trial.set(uc, quad_mean_diameters.get(uc) * sqrt_k);
            }
        }

        let mut violator: Option<(usize, UtilizationClass, bool)> = None;
        let mut violation = 0.0;
        for (band, uc) in UtilizationClass::BANDS.into_iter().enumerate() {
            if basal_areas.get(uc) > 0.0 && dq_trial.get(uc) < uc.low_bound() {
                let v = 1.0 - dq_trial.get(uc) / uc.low_bound();
                if v > violation {
                    violation = v;
                    violator = Some((band, uc, true));
                }
            }
            if dq_trial.get(uc) > uc.high_bound() {
                let v = dq_trial.get(uc) / uc.high_bound() - 1.0;
                if v > violation {
                    violation = v;
                    violator = Some((band, uc, false));
                }
            }
        }

        let Some((band, uc, low)) = violator else { break };
        dq_trial.set(uc, if low { uc.low_bound() } else { uc.high_bound() });
        pinned[band] = true;
        basal_area_fixed += basal_areas.get(uc);
        trees_fixed += density::trees_per_hectare(basal_areas.get(uc), dq_trial.get(uc));
    }

    for uc in UtilizationClass::BANDS {
        quad_mean_diameters.set(uc, dq_trial.get(uc));
        trees_per_hectare.set(
            uc,
            density::trees_per_hectare(basal_areas.get(uc), quad_mean_diameters.get(uc)),
        );
    }

    let ba_sum = basal_areas.band_sum();
    let tph_sum = trees_per_hectare.band_sum();
    if (ba_sum - basal_areas.all()).abs() > 0.0002 * ba_sum {
        return Err(ProjectionError::NonConvergence(
            "Failed to reconcile basal area".to_string(),
        ));
    }
    if (tph_sum - trees_per_hectare.all()).abs() > 0.0002 * tph_sum {
        return Err(ProjectionError::NonConvergence(
            "Failed to reconcile trees per hectare".to_string(),
        ));
    }
    Ok(())
}

/// Mode 3: everything fits a single band, so put it all there.
fn reconcile_mode_3(
    basal_areas: &mut UtilizationVector,
    trees_per_hectare: &mut UtilizationVector,
    quad_mean_diameters: &mut UtilizationVector,
) {
    for uc in UtilizationClass::BANDS {
        basal_areas.set(uc, 0.0);
        trees_per_hectare.set(uc, 0.0);
        quad_mean_diameters.set(uc, uc.low_bound() + 2.5);
    }

    let dq_all = quad_mean_diameters.all();
    let target = UtilizationClass::BANDS
        .into_iter()
        .find(|uc| dq_all < uc.high_bound())
        .unwrap_or(UtilizationClass::Over225);

    basal_areas.set(target, basal_areas.all());
    trees_per_hectare.set(target, trees_per_hectare.all());
    quad_mean_diameters.set(target, dq_all);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficients::with_defaults;
    use crate::models::bec_zone;
    use assert_approx_eq::assert_approx_eq;

    fn split_vectors(dq_all: f32, ba_all: f32) -> (UtilizationVector, UtilizationVector) {
        let store = with_defaults();
        let bec = bec_zone("IDF").unwrap();
        let mut dq = UtilizationVector::zero();
        dq.set_all(dq_all);
        quad_mean_diameter_by_utilization(&store, "PL", &mut dq).unwrap();
        let mut ba = UtilizationVector::zero();
        ba.set_all(ba_all);
        basal_area_by_utilization(&store, bec, "PL", &dq, &mut ba).unwrap();
        (ba, dq)
    }

    #[test]
    fn test_band_diameters_fall_in_their_bands() {
        let (_, dq) = split_vectors(25.0, 40.0);
        assert!(dq.get(UtilizationClass::U75To125) >= 7.5);
        assert!(dq.get(UtilizationClass::U75To125) <= 12.5);
        assert!(dq.get(UtilizationClass::U125To175) >= 12.5);
        assert!(dq.get(UtilizationClass::U125To175) <= 17.5);
        assert!(dq.get(UtilizationClass::U175To225) >= 17.5);
        assert!(dq.get(UtilizationClass::U175To225) <= 22.5);
        assert!(dq.get(UtilizationClass::Over225) >= 22.5);
    }

    #[test]
    fn test_band_basal_areas_conserve_total() {
        let (ba, _) = split_vectors(25.0, 40.0);
        assert_approx_eq!(ba.band_sum(), 40.0, 1e-3);
    }

    #[test]
    fn test_small_stand_dq_floors_at_75() {
        let store = with_defaults();
        let mut dq = UtilizationVector::zero();
        dq.set_all(7.2);
        quad_mean_diameter_by_utilization(&store, "PL", &mut dq).unwrap();
        assert_approx_eq!(dq.all(), 7.5, 1e-6);
        assert_approx_eq!(dq.get(UtilizationClass::U75To125), 7.5, 1e-6);
    }

    #[test]
    fn test_reconcile_zero_stand_clears_bands() {
        let mut ba = UtilizationVector::zero();
        let mut tph = UtilizationVector::zero();
        tph.set(UtilizationClass::Over225, 12.0);
        let mut dq = UtilizationVector::zero();
        reconcile_components(&mut ba, &mut tph, &mut dq).unwrap();
        assert_eq!(tph.get(UtilizationClass::Over225), 0.0);
    }

    #[test]
    fn test_reconcile_rejects_mismatched_band_sum() {
        let mut ba = UtilizationVector::zero();
        ba.set_all(40.0);
        ba.set(UtilizationClass::U125To175, 10.0);
        let mut tph = UtilizationVector::zero();
        tph.set_all(800.0);
        let mut dq = UtilizationVector::zero();
        let result = reconcile_components(&mut ba, &mut tph, &mut dq);
        assert!(matches!(result, Err(ProjectionError::InvalidState(_))));
    }

    #[test]
    fn test_reconcile_preserves_aggregates() {
        let (mut ba, mut dq) = split_vectors(25.0, 40.0);
        let mut tph = UtilizationVector::zero();
        for uc in UtilizationClass::BANDS {
            tph.set(uc, density::trees_per_hectare(ba.get(uc), dq.get(uc)));
        }
        tph.set_all(density::trees_per_hectare(40.0, 25.0));
        reconcile_components(&mut ba, &mut tph, &mut dq).unwrap();
        assert_approx_eq!(ba.band_sum(), ba.all(), 0.01);
        assert_approx_eq!(tph.band_sum(), tph.all(), tph.all() * 0.001);
        for uc in UtilizationClass::BANDS {
            let value = dq.get(uc);
            if ba.get(uc) > 0.0 {
                assert!(
                    value >= uc.low_bound() - 1e-3 && value <= uc.high_bound() + 1e-3,
                    "band {uc} diameter {value} escaped its bounds"
                );
            }
        }
    }

    #[test]
    fn test_reconcile_mode_3_single_class() {
        let mut ba = UtilizationVector::zero();
        let mut tph = UtilizationVector::zero();
        let mut dq = UtilizationVector::zero();
        ba.set_all(12.0);
        tph.set_all(900.0);
        dq.set_all(density::quad_mean_diameter(12.0, 900.0));
        reconcile_mode_3(&mut ba, &mut tph, &mut dq);
        assert_approx_eq!(ba.get(UtilizationClass::U125To175), 12.0, 1e-4);
        assert_approx_eq!(tph.get(UtilizationClass::U125To175), 900.0, 1e-3);
        assert_eq!(ba.get(UtilizationClass::Over225), 0.0);
    }
}
