pub mod cpu;
pub mod gpu;
pub mod vector;

use super::emitter::Emitter;
use super::substitute::SiteSyntax;
use super::SITE_INDEX;
use crate::analysis::LoopAnalysis;

/// Site and neighbour temporaries read at the top of the loop body.
pub(crate) fn write_site_loads(e: &mut Emitter, analysis: &LoopAnalysis, syntax: &dyn SiteSyntax) {
    for field in &analysis.fields {
        let ty = syntax.value_type(field);
        let object = syntax.field_object(field);
        if !field.has_loop_local_direction() {
            for (index, dir) in field.directions.iter().enumerate() {
                let neighbour = format!("{}neighbours({}, {})", syntax.lattice(), dir.text, SITE_INDEX);
                e.write_indented(&format!(
                    "const {} {} = {};",
                    ty,
                    field.direction_temp(&dir.key, index),
                    syntax.load(&object, field, &neighbour)
                ));
            }
        }
        if field.needs_site_load() {
            let constness = if field.is_written { "" } else { "const " };
            e.write_indented(&format!(
                "{}{} {} = {};",
                constness,
                ty,
                field.temp,
                syntax.load(&object, field, SITE_INDEX)
            ));
        } else if field.is_written {
            e.write_indented(&format!("{} {};", ty, field.temp));
        }
    }
}

/// Written site temporaries go back to their fields at the end of the body.
pub(crate) fn write_site_stores(e: &mut Emitter, analysis: &LoopAnalysis, syntax: &dyn SiteSyntax) {
    for field in analysis.fields.iter().filter(|f| f.is_written) {
        let object = syntax.field_object(field);
        e.write_indented(&syntax.store(&object, field, &field.temp, SITE_INDEX));
    }
}
