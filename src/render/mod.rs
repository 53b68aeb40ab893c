pub mod axis;
pub mod index_map;
pub mod palette;
pub mod surface;
