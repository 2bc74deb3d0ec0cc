#![allow(dead_code)]

use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use sarprep::core::{OperationKind, ProcessingEngine, ProcessingGraph};
use sarprep::{EngineResult, SarError, SarResult};
use serde_json::json;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

pub const PRODUCT_NAME: &str =
    "S1B_IW_GRDH_1SDV_20190220T050359_20190220T050424_015025_01C12F_4EA4";
pub const SCENE_ID: &str = "a8e7c1d2-5b0f-4e0c-9a43-7d1f2b3c4e5f";

/// Bbox the input data.json advertises; deliberately wider than any test raster
pub const INPUT_BBOX: [f64; 4] = [13.0, 51.0, 16.0, 53.5];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Lay out `input/<scene-id>/<product>.SAFE` with a manifest and one
/// measurement band per polarisation, plus `input/data.json`
pub fn create_input(input_dir: &Path, polarizations: &[&str]) -> PathBuf {
    let safe_dir = input_dir.join(SCENE_ID).join(format!("{}.SAFE", PRODUCT_NAME));
    let measurement = safe_dir.join("measurement");
    std::fs::create_dir_all(&measurement).unwrap();
    std::fs::create_dir_all(safe_dir.join("annotation")).unwrap();
    std::fs::write(safe_dir.join("manifest.safe"), "<xfdu:XFDU/>").unwrap();

    for (index, pol) in polarizations.iter().enumerate() {
        let name = format!(
            "s1b-iw-grd-{}-20190220t050359-20190220t050424-015025-01c12f-{:03}.tiff",
            pol.to_lowercase(),
            index + 1
        );
        std::fs::write(measurement.join(name), b"").unwrap();
    }

    write_input_metadata(input_dir);
    safe_dir
}

pub fn write_input_metadata(input_dir: &Path) {
    let [west, south, east, north] = INPUT_BBOX;
    let document = json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "bbox": INPUT_BBOX,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [west, south], [east, south], [east, north], [west, north], [west, south]
                ]]
            },
            "properties": {
                "up42.data_path": SCENE_ID,
                "sceneId": PRODUCT_NAME,
                "acquisitionDate": "2019-02-20T05:03:59Z"
            }
        }]
    });
    std::fs::create_dir_all(input_dir).unwrap();
    std::fs::write(
        input_dir.join("data.json"),
        serde_json::to_string_pretty(&document).unwrap(),
    )
    .unwrap();
}

/// Single-band Float32 GeoTIFF; `value(col, row)` fills the pixels
pub fn write_geotiff<F>(
    path: &Path,
    size: (usize, usize),
    geo_transform: [f64; 6],
    epsg: u32,
    nodata: Option<f64>,
    value: F,
) where
    F: Fn(usize, usize) -> f32,
{
    let (width, height) = size;
    let driver = DriverManager::get_driver_by_name("GTiff").unwrap();
    let mut dataset = driver
        .create_with_band_type::<f32, _>(path, width as isize, height as isize, 1)
        .unwrap();
    dataset.set_geo_transform(&geo_transform).unwrap();
    dataset
        .set_spatial_ref(&SpatialRef::from_epsg(epsg).unwrap())
        .unwrap();

    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push(value(col, row));
        }
    }

    let mut band = dataset.rasterband(1).unwrap();
    if let Some(nd) = nodata {
        band.set_no_data_value(Some(nd)).unwrap();
    }
    let buffer = Buffer::new((width, height), data);
    band.write((0, 0), (width, height), &buffer).unwrap();
}

/// 100x80 WGS84 raster covering lon 14.0..15.0, lat 52.0..52.8, all valid
pub fn write_wgs84_raster(path: &Path) {
    write_geotiff(
        path,
        (100, 80),
        [14.0, 0.01, 0.0, 52.8, 0.0, -0.01],
        4326,
        None,
        |col, row| -12.5 + (col + row) as f32 * 0.01,
    );
}

/// Engine stand-in that copies a staged raster to the graph's output path
pub struct StagedRasterEngine {
    staged: Option<PathBuf>,
    calls: RefCell<Vec<Vec<OperationKind>>>,
}

impl StagedRasterEngine {
    pub fn new(staged: &Path) -> Self {
        Self {
            staged: Some(staged.to_path_buf()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Never produces a raster; for runs that must fail before execution
    pub fn unused() -> Self {
        Self {
            staged: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn graphs(&self) -> Vec<Vec<OperationKind>> {
        self.calls.borrow().clone()
    }
}

impl ProcessingEngine for StagedRasterEngine {
    fn run(&self, graph: &ProcessingGraph, work_dir: &Path) -> SarResult<EngineResult> {
        self.calls.borrow_mut().push(graph.kinds());

        let staged = self.staged.as_ref().ok_or_else(|| SarError::EngineExecutionFailed {
            exit_code: 1,
            stderr_tail: "no staged raster".to_string(),
        })?;
        std::fs::create_dir_all(work_dir)?;
        let output = graph.output_path(work_dir);
        std::fs::copy(staged, &output)?;

        Ok(EngineResult {
            exit_code: 0,
            raster_output_path: Some(output),
            stderr_tail: String::new(),
        })
    }
}
