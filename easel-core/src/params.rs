use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{Error, GenerationRequest, Result};

pub const MIN_STEPS: i64 = 1;
pub const MAX_STEPS: i64 = 100;
pub const DEFAULT_STEPS: usize = 28;

pub const MIN_GUIDANCE: f64 = 0.0;
pub const MAX_GUIDANCE: f64 = 20.0;
pub const DEFAULT_GUIDANCE: f64 = 7.5;

pub const MIN_DIMENSION: i64 = 256;
pub const MAX_DIMENSION: i64 = 1024;
pub const DEFAULT_DIMENSION: usize = 512;
/// Latent space is 1/8 of the pixel space, so both sides must be multiples of 8.
pub const DIMENSION_ALIGNMENT: usize = 8;

pub const DEFAULT_MAX_PROMPT_LENGTH: usize = 500;

/// The body of a generation request before any validation. Every field is kept
/// as a raw JSON value so malformed numbers can be corrected instead of rejected.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawGenerationParams {
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(default)]
    pub num_inference_steps: Option<Value>,
    #[serde(default)]
    pub guidance_scale: Option<Value>,
    #[serde(default)]
    pub height: Option<Value>,
    #[serde(default)]
    pub width: Option<Value>,
    #[serde(default)]
    pub seed: Option<Value>,
}

/// Values substituted for absent or malformed parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub steps: usize,
    pub guidance_scale: f64,
    pub height: usize,
    pub width: usize,
    pub max_prompt_length: usize,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
            height: DEFAULT_DIMENSION,
            width: DEFAULT_DIMENSION,
            max_prompt_length: DEFAULT_MAX_PROMPT_LENGTH,
        }
    }
}

impl GenerationDefaults {
    /// Builds defaults from operator-supplied strings. Anything malformed or out
    /// of range falls back to the built-in value instead of being clamped.
    pub fn sanitized(
        steps: Option<&str>,
        guidance_scale: Option<&str>,
        height: Option<&str>,
        width: Option<&str>,
        max_prompt_length: Option<usize>,
    ) -> Self {
        let steps = steps
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|s| (MIN_STEPS..=MAX_STEPS).contains(s))
            .map_or(DEFAULT_STEPS, |s| s as usize);
        let guidance_scale = guidance_scale
            .and_then(|g| g.trim().parse::<f64>().ok())
            .filter(|g| (MIN_GUIDANCE..=MAX_GUIDANCE).contains(g))
            .unwrap_or(DEFAULT_GUIDANCE);
        let dimension = |value: Option<&str>| {
            value
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|v| {
                    (MIN_DIMENSION..=MAX_DIMENSION).contains(v)
                        && *v as usize % DIMENSION_ALIGNMENT == 0
                })
                .map_or(DEFAULT_DIMENSION, |v| v as usize)
        };
        Self {
            steps,
            guidance_scale,
            height: dimension(height),
            width: dimension(width),
            max_prompt_length: max_prompt_length
                .filter(|len| *len > 0)
                .unwrap_or(DEFAULT_MAX_PROMPT_LENGTH),
        }
    }
}

/// Integer coercion with the same leniency as the HTTP clients expect:
/// numbers (floats truncate), booleans and numeric strings.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u.min(i64::MAX as u64) as i64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

pub fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn normalize_steps(value: Option<&Value>, default: usize) -> usize {
    match value.and_then(coerce_int) {
        Some(steps) => steps.clamp(MIN_STEPS, MAX_STEPS) as usize,
        None => default,
    }
}

pub fn normalize_guidance(value: Option<&Value>, default: f64) -> f64 {
    match value.and_then(coerce_float).filter(|g| g.is_finite()) {
        Some(guidance) => guidance.clamp(MIN_GUIDANCE, MAX_GUIDANCE),
        None => default,
    }
}

/// Clamps into the supported range, then rounds down to the alignment unit.
pub fn normalize_dimension(value: Option<&Value>, default: usize) -> usize {
    let dimension = match value.and_then(coerce_int) {
        Some(dimension) => dimension.clamp(MIN_DIMENSION, MAX_DIMENSION) as usize,
        None => default,
    };
    (dimension / DIMENSION_ALIGNMENT) * DIMENSION_ALIGNMENT
}

/// Full `u64` range first; anything else goes through `coerce_int` and
/// negative values keep their bit pattern.
fn coerce_seed(value: &Value) -> Option<u64> {
    let unsigned = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    unsigned.or_else(|| coerce_int(value).map(|seed| seed as u64))
}

/// A seed that cannot be coerced is dropped with a warning; generation proceeds unseeded.
pub fn normalize_seed(value: Option<&Value>) -> Option<u64> {
    match value {
        None | Some(Value::Null) => None,
        Some(raw) => match coerce_seed(raw) {
            Some(seed) => Some(seed),
            None => {
                warn!(seed = %raw, "invalid seed, using random generation");
                None
            }
        },
    }
}

pub fn normalize_prompt(value: Option<&Value>, max_length: usize) -> Result<String> {
    let prompt = match value {
        None | Some(Value::Null) => "",
        Some(Value::String(prompt)) => prompt.trim(),
        Some(_) => return Err(Error::Validation("Prompt must be a string".to_string())),
    };
    if prompt.is_empty() {
        return Err(Error::Validation(
            "Prompt is required and cannot be empty".to_string(),
        ));
    }
    if prompt.chars().count() > max_length {
        return Err(Error::Validation(format!(
            "Prompt too long. Maximum {max_length} characters allowed."
        )));
    }
    Ok(prompt.to_string())
}

/// Turns a raw request body into a fully valid [`GenerationRequest`].
pub fn validate(raw: &RawGenerationParams, defaults: &GenerationDefaults) -> Result<GenerationRequest> {
    let prompt = normalize_prompt(raw.prompt.as_ref(), defaults.max_prompt_length)?;
    Ok(GenerationRequest {
        prompt,
        steps: normalize_steps(raw.num_inference_steps.as_ref(), defaults.steps),
        guidance_scale: normalize_guidance(raw.guidance_scale.as_ref(), defaults.guidance_scale),
        height: normalize_dimension(raw.height.as_ref(), defaults.height),
        width: normalize_dimension(raw.width.as_ref(), defaults.width),
        seed: normalize_seed(raw.seed.as_ref()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(body: Value) -> RawGenerationParams {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn clamps_out_of_range_steps() {
        assert_eq!(normalize_steps(Some(&json!(1000)), 28), 100);
        assert_eq!(normalize_steps(Some(&json!(0)), 28), 1);
        assert_eq!(normalize_steps(Some(&json!(-5)), 28), 1);
        assert_eq!(normalize_steps(Some(&json!(40)), 28), 40);
    }

    #[test]
    fn malformed_steps_take_default() {
        assert_eq!(normalize_steps(Some(&json!("many")), 28), 28);
        assert_eq!(normalize_steps(Some(&json!([1, 2])), 28), 28);
        assert_eq!(normalize_steps(Some(&Value::Null), 30), 30);
        assert_eq!(normalize_steps(None, 28), 28);
    }

    #[test]
    fn lenient_integer_coercion() {
        assert_eq!(coerce_int(&json!("42")), Some(42));
        assert_eq!(coerce_int(&json!(" 7 ")), Some(7));
        assert_eq!(coerce_int(&json!(12.9)), Some(12));
        assert_eq!(coerce_int(&json!(true)), Some(1));
        assert_eq!(coerce_int(&json!("12.5")), None);
        assert_eq!(coerce_int(&json!({})), None);
    }

    #[test]
    fn guidance_is_clamped_or_defaulted() {
        assert_eq!(normalize_guidance(Some(&json!(25.0)), 7.5), 20.0);
        assert_eq!(normalize_guidance(Some(&json!(-1)), 7.5), 0.0);
        assert_eq!(normalize_guidance(Some(&json!("3.5")), 7.5), 3.5);
        assert_eq!(normalize_guidance(Some(&json!("NaN")), 7.5), 7.5);
        assert_eq!(normalize_guidance(Some(&json!("loud")), 7.5), 7.5);
    }

    #[test]
    fn dimensions_always_in_range_and_aligned() {
        let inputs = [
            json!(0),
            json!(1),
            json!(255),
            json!(257),
            json!(513),
            json!(777),
            json!(1023),
            json!(1024),
            json!(4096),
            json!(-300),
            json!("640"),
            json!("wide"),
            json!(600.7),
        ];
        for input in inputs {
            let dim = normalize_dimension(Some(&input), 512);
            assert!((256..=1024).contains(&dim), "{input} -> {dim}");
            assert_eq!(dim % 8, 0, "{input} -> {dim}");
        }
        assert_eq!(normalize_dimension(Some(&json!(513)), 512), 512);
        assert_eq!(normalize_dimension(Some(&json!(4096)), 512), 1024);
        assert_eq!(normalize_dimension(Some(&json!(100)), 512), 256);
    }

    #[test]
    fn default_dimension_is_also_aligned() {
        assert_eq!(normalize_dimension(None, 516), 512);
    }

    #[test]
    fn empty_prompts_are_rejected() {
        let defaults = GenerationDefaults::default();
        for prompt in [json!(""), json!("   \n\t"), Value::Null] {
            let err = validate(&raw(json!({ "prompt": prompt })), &defaults).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        let err = validate(&RawGenerationParams::default(), &defaults).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn non_string_prompt_is_rejected() {
        let err = normalize_prompt(Some(&json!(12)), 500).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn prompt_length_counts_characters() {
        let prompt = "é".repeat(500);
        assert!(normalize_prompt(Some(&json!(prompt)), 500).is_ok());
        let prompt = "a".repeat(501);
        let err = normalize_prompt(Some(&json!(prompt)), 500).unwrap_err();
        assert_eq!(err.to_string(), "Prompt too long. Maximum 500 characters allowed.");
    }

    #[test]
    fn bad_seed_degrades_to_unseeded() {
        assert_eq!(normalize_seed(Some(&json!("abc"))), None);
        assert_eq!(normalize_seed(Some(&json!(42))), Some(42));
        assert_eq!(normalize_seed(Some(&json!("42"))), Some(42));
        assert_eq!(normalize_seed(Some(&json!(-1))), Some(u64::MAX));
        assert_eq!(normalize_seed(None), None);
    }

    #[test]
    fn seeds_above_i64_stay_distinct() {
        let max = normalize_seed(Some(&json!(18446744073709551615u64)));
        let half = normalize_seed(Some(&json!(9223372036854775808u64)));
        assert_eq!(max, Some(u64::MAX));
        assert_eq!(half, Some(1 << 63));
        assert_ne!(max, half);
        assert_eq!(
            normalize_seed(Some(&json!("18446744073709551615"))),
            Some(u64::MAX)
        );
    }

    #[test]
    fn validates_full_request() {
        let request = validate(
            &raw(json!({
                "prompt": "  a red cube ",
                "num_inference_steps": 1000,
                "guidance_scale": "9",
                "height": 513,
                "width": "oops",
                "seed": 7
            })),
            &GenerationDefaults::default(),
        )
        .unwrap();
        assert_eq!(
            request,
            GenerationRequest {
                prompt: "a red cube".to_string(),
                steps: 100,
                guidance_scale: 9.0,
                height: 512,
                width: 512,
                seed: Some(7),
            }
        );
    }

    #[test]
    fn sanitized_defaults_substitute_instead_of_clamping() {
        let defaults = GenerationDefaults::sanitized(
            Some("1000"),
            Some("abc"),
            Some("520"),
            Some("768"),
            None,
        );
        assert_eq!(defaults.steps, DEFAULT_STEPS);
        assert_eq!(defaults.guidance_scale, DEFAULT_GUIDANCE);
        assert_eq!(defaults.height, 520);
        assert_eq!(defaults.width, 768);
        assert_eq!(defaults.max_prompt_length, DEFAULT_MAX_PROMPT_LENGTH);

        let defaults = GenerationDefaults::sanitized(None, Some("12"), Some("300"), Some("2000"), Some(80));
        assert_eq!(defaults.steps, DEFAULT_STEPS);
        assert_eq!(defaults.guidance_scale, 12.0);
        assert_eq!(defaults.height, DEFAULT_DIMENSION);
        assert_eq!(defaults.width, DEFAULT_DIMENSION);
        assert_eq!(defaults.max_prompt_length, 80);
    }
}
