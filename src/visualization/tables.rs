use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, ContentArrangement, Table};

use crate::engine::{LayerSnapshot, ProjectionResult};
use crate::models::Polygon;

fn fmt1(value: f32) -> String {
    if value.is_finite() {
        format!("{value:.1}")
    } else {
        "-".to_string()
    }
}

/// Format the per-year layer aggregates of a projection as a table.
pub fn format_projection_table(result: &ProjectionResult) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "\n{}\n",
        format!("Projection {}", result.polygon_id).bold().green()
    ));
    output.push_str(&format!(
        "{}\n",
        format!(
            "{} to {}",
            result.reference_year, result.target_year
        )
        .dimmed()
    ));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Year", "DH (m)", "LH (m)", "BA (m²/ha)", "TPH", "QMD (cm)", "WS (m³/ha)",
            "CU (m³/ha)", "ND (m³/ha)", "NDW (m³/ha)",
        ]);

    for snapshot in &result.snapshots {
        let bank = &snapshot.bank;
        table.add_row(vec![
            Cell::new(snapshot.year),
            Cell::new(fmt1(snapshot.dominant_height)),
            Cell::new(fmt1(bank.lorey_heights[0][1])),
            Cell::new(fmt1(bank.basal_areas[0].all())),
            Cell::new(fmt1(bank.trees_per_hectare[0].all())),
            Cell::new(fmt1(bank.quad_mean_diameters[0].all())),
            Cell::new(fmt1(bank.whole_stem_volumes[0].all())),
            Cell::new(fmt1(bank.close_utilization_volumes[0].all())),
            Cell::new(fmt1(bank.cu_volumes_minus_decay[0].all())),
            Cell::new(fmt1(bank.cu_volumes_minus_decay_and_wastage[0].all())),
        ]);
    }

    output.push_str(&format!("{table}"));
    output
}

/// Print the per-year projection table.
pub fn print_projection_table(result: &ProjectionResult) {
    println!("{}", format_projection_table(result));
}

/// Format the species composition of one snapshot as a table.
pub fn format_species_table(snapshot: &LayerSnapshot) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "\n{}\n",
        format!("Species composition, {}", snapshot.year)
            .bold()
            .green()
    ));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Species", "% Cover", "BA (m²/ha)", "TPH", "QMD (cm)", "LH (m)", "WS (m³/ha)",
        ]);

    let bank = &snapshot.bank;
    for i in bank.indices() {
        table.add_row(vec![
            Cell::new(&bank.species_names[i]),
            Cell::new(fmt1(bank.percentages_of_forested_land[i])),
            Cell::new(fmt1(bank.basal_areas[i].all())),
            Cell::new(fmt1(bank.trees_per_hectare[i].all())),
            Cell::new(fmt1(bank.quad_mean_diameters[i].all())),
            Cell::new(fmt1(bank.lorey_heights[i][1])),
            Cell::new(fmt1(bank.whole_stem_volumes[i].all())),
        ]);
    }

    output.push_str(&format!("{table}"));
    output
}

/// Print the species composition table.
pub fn print_species_table(snapshot: &LayerSnapshot) {
    println!("{}", format_species_table(snapshot));
}

/// Format a pre-projection overview of a polygon.
pub fn format_polygon_summary(polygon: &Polygon) -> String {
    let mut output = String::new();
    output.push_str(&format!("\n{}\n", "Polygon Summary".bold().green()));
    output.push_str(&format!("{}\n", "=".repeat(50)));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Field", "Value"]);

    table.add_row(vec![Cell::new("Polygon"), Cell::new(&polygon.id)]);
    table.add_row(vec![Cell::new("BEC zone"), Cell::new(&polygon.bec_zone)]);
    table.add_row(vec![
        Cell::new("Reference year"),
        Cell::new(polygon.reference_year),
    ]);
    table.add_row(vec![
        Cell::new("Target year"),
        Cell::new(
            polygon
                .target_year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Percent forested"),
        Cell::new(fmt1(polygon.percent_forest_land)),
    ]);
    table.add_row(vec![
        Cell::new("Layers"),
        Cell::new(polygon.layers.len()),
    ]);
    if let Ok(primary) = polygon.primary_layer() {
        let species: Vec<String> = primary
            .species
            .iter()
            .map(|s| format!("{} ({:.0}%)", s.genus, s.percent_forested))
            .collect();
        table.add_row(vec![
            Cell::new("Species"),
            Cell::new(species.join(", ")),
        ]);
        table.add_row(vec![
            Cell::new("Basal area (m²/ha)"),
            Cell::new(fmt1(primary.basal_area_all())),
        ]);
    }

    output.push_str(&format!("{table}"));
    output
}

/// Print the polygon overview.
pub fn print_polygon_summary(polygon: &Polygon) {
    println!("{}", format_polygon_summary(polygon));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficients::with_defaults;
    use crate::config::ControlSettings;
    use crate::engine::ForwardProcessingEngine;
    use crate::models::{Layer, LayerType, SpeciesRecord, UtilizationClass, UtilizationRecord};

    fn polygon() -> Polygon {
        Polygon {
            id: "TBL-1".to_string(),
            reference_year: 1985,
            bec_zone: "IDF".to_string(),
            percent_forest_land: 100.0,
            target_year: Some(1987),
            layers: vec![Layer {
                layer_type: LayerType::Primary,
                species: vec![SpeciesRecord {
                    genus: "PL".into(),
                    site_species: None,
                    percent_forested: 100.0,
                    site_index: Some(18.0),
                    dominant_height: Some(25.0),
                    total_age: Some(60.0),
                    years_to_breast_height: Some(8.0),
                    years_at_breast_height: None,
                    site_curve_number: None,
                    utilizations: vec![UtilizationRecord {
                        class: UtilizationClass::All,
                        basal_area: 30.0,
                        trees_per_hectare: crate::estimators::density::trees_per_hectare(
                            30.0, 24.0,
                        ),
                        quad_mean_diameter: 24.0,
                        lorey_height: Some(22.0),
                        whole_stem_volume: 270.0,
                        close_utilization_volume: 240.0,
                        volume_net_decay: 225.0,
                        volume_net_decay_waste: 216.0,
                    }],
                }],
                default_utilization: None,
            }],
        }
    }

    #[test]
    fn test_projection_table_has_one_row_per_year() {
        let store = with_defaults();
        let engine = ForwardProcessingEngine::new(&store, ControlSettings::default());
        let result = engine.process_polygon(&polygon()).unwrap();
        let rendered = format_projection_table(&result);
        assert!(rendered.contains("1985"));
        assert!(rendered.contains("1987"));
        assert!(rendered.contains("BA (m²/ha)"));
    }

    #[test]
    fn test_species_table_lists_every_species() {
        let store = with_defaults();
        let engine = ForwardProcessingEngine::new(&store, ControlSettings::default());
        let result = engine.process_polygon(&polygon()).unwrap();
        let rendered = format_species_table(result.snapshots.last().unwrap());
        assert!(rendered.contains("PL"));
    }

    #[test]
    fn test_polygon_summary_shows_identity() {
        let rendered = format_polygon_summary(&polygon());
        assert!(rendered.contains("TBL-1"));
        assert!(rendered.contains("IDF"));
        assert!(rendered.contains("PL (100%)"));
    }
}
