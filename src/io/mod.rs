//! I/O modules: SAFE scene discovery, GeoJSON sidecars, engine graph files, GeoTIFF inspection

pub mod safe;
pub mod metadata;
pub mod graph_xml;
pub mod raster;

pub use safe::{SceneDescriptor, SceneLocator};
pub use metadata::SceneMetadata;
pub use raster::RasterInfo;
