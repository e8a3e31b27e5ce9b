//! Built-in transforms

use crate::plugin::{Plugin, Registry};
use std::sync::Arc;

pub mod avram;
pub mod marc2rdf;
pub mod marcids;

pub use avram::Avram;
pub use marc2rdf::Marc2Rdf;
pub use marcids::MarcIds;

pub fn register_builtins(registry: &mut Registry) {
    registry.register("transform/marcids", Plugin::Transform(Arc::new(MarcIds)));
    registry.register("transform/avram", Plugin::Transform(Arc::new(Avram)));
    registry.register("transform/marc2rdf", Plugin::Transform(Arc::new(Marc2Rdf)));
}
