//! Job parameter validation
//!
//! Turns the platform's JSON job document into an immutable [`JobParameters`]
//! value. Everything here is pure: no filesystem access, no logging side effects
//! beyond debug traces.

use crate::types::{CalibrationBand, MaskType, Polarization, SarError, SarResult};
use serde_json::Value;
use std::collections::BTreeSet;

/// Polarisation used when the job document does not name one
pub const DEFAULT_POLARIZATION: Polarization = Polarization::VV;

/// Validated, immutable processing parameters for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParameters {
    polarizations: BTreeSet<Polarization>,
    mask: Option<MaskType>,
    terrain_correction: bool,
    speckle_filter: bool,
    calibration_band: CalibrationBand,
}

impl JobParameters {
    pub fn polarizations(&self) -> &BTreeSet<Polarization> {
        &self.polarizations
    }

    pub fn mask(&self) -> Option<MaskType> {
        self.mask
    }

    pub fn terrain_correction(&self) -> bool {
        self.terrain_correction
    }

    pub fn speckle_filter(&self) -> bool {
        self.speckle_filter
    }

    pub fn calibration_band(&self) -> CalibrationBand {
        self.calibration_band
    }
}

/// Parse the raw job document as delivered by the platform.
/// Blank input is treated as `{}`; malformed JSON is `InvalidParameter`.
pub fn parse_document(raw: &str) -> SarResult<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
        .map_err(|e| SarError::InvalidParameter(format!("Job parameters are not valid JSON: {}", e)))
}

/// Validate a job configuration document.
///
/// Recognised fields: `polarisations`, `mask`, `tcorrection`, `speckle_filter`,
/// `calibration_band`. Any other field is ignored.
pub fn validate(raw: &Value) -> SarResult<JobParameters> {
    let obj = raw.as_object().ok_or_else(|| {
        SarError::InvalidParameter("Job parameters must be a JSON object".to_string())
    })?;

    let polarizations = parse_polarizations(obj.get("polarisations"))?;
    let mask = parse_mask(obj.get("mask"))?;
    let terrain_correction = parse_flag("tcorrection", obj.get("tcorrection"), true)?;
    let speckle_filter = parse_flag("speckle_filter", obj.get("speckle_filter"), false)?;
    let calibration_band = parse_calibration_band(obj.get("calibration_band"))?;

    let params = JobParameters {
        polarizations,
        mask,
        terrain_correction,
        speckle_filter,
        calibration_band,
    };
    log::debug!("Validated job parameters: {:?}", params);
    Ok(params)
}

fn parse_polarizations(value: Option<&Value>) -> SarResult<BTreeSet<Polarization>> {
    let items = match value {
        None | Some(Value::Null) => return Ok([DEFAULT_POLARIZATION].into_iter().collect()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(SarError::InvalidParameter(format!(
                "polarisations must be an array of strings, got {}",
                other
            )))
        }
    };

    if items.is_empty() {
        return Err(SarError::InvalidParameter(
            "polarisations must not be empty".to_string(),
        ));
    }

    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.parse::<Polarization>(),
            other => Err(SarError::InvalidParameter(format!(
                "polarisations entries must be strings, got {}",
                other
            ))),
        })
        .collect()
}

fn parse_mask(value: Option<&Value>) -> SarResult<Option<MaskType>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(SarError::InvalidParameter(format!(
                "mask must be an array with at most one of land/sea, got {}",
                other
            )))
        }
    };

    match items.as_slice() {
        [] => Ok(None),
        [Value::String(s)] => s.parse::<MaskType>().map(Some),
        [other] => Err(SarError::InvalidParameter(format!(
            "mask entries must be strings, got {}",
            other
        ))),
        _ => Err(SarError::InvalidParameter(format!(
            "mask accepts a single value (land or sea), got {} values",
            items.len()
        ))),
    }
}

fn parse_calibration_band(value: Option<&Value>) -> SarResult<CalibrationBand> {
    match value {
        None | Some(Value::Null) => Ok(CalibrationBand::default()),
        Some(Value::String(s)) => s.parse(),
        Some(Value::Array(items)) => match items.as_slice() {
            [Value::String(s)] => s.parse(),
            _ => Err(SarError::InvalidParameter(format!(
                "calibration_band accepts exactly one of sigma/gamma/beta, got {}",
                Value::Array(items.clone())
            ))),
        },
        Some(other) => Err(SarError::InvalidParameter(format!(
            "calibration_band must be a string or a one-element array, got {}",
            other
        ))),
    }
}

/// Coerce a JSON value to a boolean flag; `null` and absence select the default
fn parse_flag(name: &str, value: Option<&Value>, default: bool) -> SarResult<bool> {
    let invalid = |v: &Value| {
        SarError::InvalidParameter(format!("{} must be boolean-coercible, got {}", name, v))
    };

    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(v @ Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(invalid(v)),
        },
        Some(v @ Value::Number(n)) => match n.as_i64() {
            Some(1) => Ok(true),
            Some(0) => Ok(false),
            _ => Err(invalid(v)),
        },
        Some(other) => Err(invalid(other)),
    }
}
