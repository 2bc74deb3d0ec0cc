use crate::types::{BoundingBox, GeoTransform, SarError, SarResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DatasetOptions, GdalOpenFlags};
use std::path::{Path, PathBuf};

/// EPSG code of the GeoJSON coordinate reference system
pub const WGS84_EPSG: u32 = 4326;

/// Points sampled per window edge when reprojecting the extent
const EDGE_SAMPLES: usize = 21;

/// Pixel window in raster coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub cols: usize,
    pub rows: usize,
}

/// Georeferencing of a raster produced by the engine
#[derive(Debug, Clone)]
pub struct RasterInfo {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub geo_transform: GeoTransform,
    pub crs_wkt: String,
    pub epsg: Option<i32>,
    /// Window of pixels holding valid (non-nodata) values in any band
    pub valid_window: Option<PixelWindow>,
}

fn corrupt(path: &Path, what: impl std::fmt::Display) -> SarError {
    SarError::CorruptRasterOutput(format!("{}: {}", path.display(), what))
}

impl RasterInfo {
    /// Open a raster and read its georeferencing and valid-pixel window.
    /// Any failure to open or a missing transform/CRS is `CorruptRasterOutput`.
    pub fn inspect<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        log::info!("Inspecting raster output: {}", path.display());

        let dataset = Dataset::open(path).map_err(|e| corrupt(path, e))?;
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count().max(0) as usize;
        if width == 0 || height == 0 || band_count == 0 {
            return Err(corrupt(path, "raster has no pixels"));
        }

        let geo_transform = dataset
            .geo_transform()
            .map(GeoTransform::from_gdal)
            .map_err(|e| corrupt(path, format!("no georeferencing ({})", e)))?;
        if geo_transform.is_degenerate() {
            return Err(corrupt(path, "degenerate geotransform"));
        }

        let crs_wkt = dataset.projection();
        if crs_wkt.trim().is_empty() {
            return Err(corrupt(path, "no coordinate reference system"));
        }
        let epsg = dataset.spatial_ref().ok().and_then(|srs| srs.auth_code().ok());

        log::debug!("Raster size: {}x{} ({} bands)", width, height, band_count);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let valid_window = valid_pixel_window(&dataset, width, height, band_count)
            .map_err(|e| corrupt(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            band_count,
            geo_transform,
            crs_wkt,
            epsg,
            valid_window,
        })
    }

    /// Extent of the valid pixels in WGS84 longitude/latitude
    pub fn valid_extent(&self) -> SarResult<BoundingBox> {
        let window = self
            .valid_window
            .ok_or_else(|| corrupt(&self.path, "raster contains no valid pixels"))?;

        let mut xs = Vec::with_capacity(EDGE_SAMPLES * 4);
        let mut ys = Vec::with_capacity(EDGE_SAMPLES * 4);
        let (c0, r0) = (window.col_off as f64, window.row_off as f64);
        let (c1, r1) = (c0 + window.cols as f64, r0 + window.rows as f64);

        for i in 0..EDGE_SAMPLES {
            let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
            let c = c0 + t * (c1 - c0);
            let r = r0 + t * (r1 - r0);
            for (col, row) in [(c, r0), (c, r1), (c0, r), (c1, r)] {
                let (x, y) = self.geo_transform.apply(col, row);
                xs.push(x);
                ys.push(y);
            }
        }

        if self.epsg != Some(WGS84_EPSG as i32) {
            self.reproject_to_wgs84(&mut xs, &mut ys)?;
        }

        let points: Vec<(f64, f64)> = xs.into_iter().zip(ys).collect();
        BoundingBox::from_points(&points).ok_or_else(|| corrupt(&self.path, "empty extent"))
    }

    fn reproject_to_wgs84(&self, xs: &mut [f64], ys: &mut [f64]) -> SarResult<()> {
        log::debug!("Reprojecting raster extent to EPSG:{}", WGS84_EPSG);

        let source = SpatialRef::from_wkt(&self.crs_wkt).map_err(|e| corrupt(&self.path, e))?;
        let target = SpatialRef::from_epsg(WGS84_EPSG)?;
        source.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        target.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );

        let transform = CoordTransform::new(&source, &target)?;
        let mut zs = vec![0.0; xs.len()];
        transform
            .transform_coords(xs, ys, &mut zs)
            .map_err(|e| corrupt(&self.path, format!("cannot reproject extent ({})", e)))?;
        Ok(())
    }
}

fn is_valid(value: f64, nodata: Option<f64>) -> bool {
    if !value.is_finite() {
        return false;
    }
    match nodata {
        Some(nd) if nd.is_nan() => true,
        Some(nd) => value != nd,
        None => true,
    }
}

/// Scan every band row by row; memory stays bounded to one row per band
fn valid_pixel_window(
    dataset: &Dataset,
    width: usize,
    height: usize,
    band_count: usize,
) -> gdal::errors::Result<Option<PixelWindow>> {
    let mut min_col = usize::MAX;
    let mut max_col = 0;
    let mut min_row = usize::MAX;
    let mut max_row = 0;

    for band_index in 1..=band_count {
        let band = dataset.rasterband(band_index as isize)?;
        let nodata = band.no_data_value();

        for row in 0..height {
            let buffer = band.read_as::<f64>((0, row as isize), (width, 1), (width, 1), None)?;
            let first = buffer.data.iter().position(|&v| is_valid(v, nodata));
            let last = buffer.data.iter().rposition(|&v| is_valid(v, nodata));
            if let (Some(first), Some(last)) = (first, last) {
                min_col = min_col.min(first);
                max_col = max_col.max(last);
                min_row = min_row.min(row);
                max_row = max_row.max(row);
            }
        }
    }

    if min_col == usize::MAX {
        return Ok(None);
    }
    Ok(Some(PixelWindow {
        col_off: min_col,
        row_off: min_row,
        cols: max_col - min_col + 1,
        rows: max_row - min_row + 1,
    }))
}

/// Declare `value` as nodata on every band, in place
pub fn mark_nodata<P: AsRef<Path>>(path: P, value: f64) -> SarResult<()> {
    let path = path.as_ref();
    log::info!("Setting nodata value {} on {}", value, path.display());

    let options = DatasetOptions {
        open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
        ..Default::default()
    };
    let dataset = Dataset::open_ex(path, options).map_err(|e| corrupt(path, e))?;
    for band_index in 1..=dataset.raster_count() {
        let mut band = dataset.rasterband(band_index)?;
        band.set_no_data_value(Some(value))?;
    }
    Ok(())
}
