mod tables;

pub use tables::{
    format_polygon_summary, print_polygon_summary,
    format_projection_table, print_projection_table,
    format_species_table, print_species_table,
};
