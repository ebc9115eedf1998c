//! Built-in demo models.
//!
//! They are deliberately cheap image operations; what matters is that they
//! exercise every option kind and both single- and multi-input models.

use dlc_core::{ImageTile, ModelDescriptor, OptionField, OptionKind, OptionSnapshot, OptionValue};

/// A model the server can run.
pub trait ModelHandler: Send + Sync {
    fn descriptor(&self) -> ModelDescriptor;

    /// Inputs are already checked against the descriptor's input count.
    /// The error string is sent back as an error response.
    fn run(&self, options: &OptionSnapshot, inputs: &[ImageTile]) -> Result<Vec<ImageTile>, String>;
}

pub fn builtin_models() -> Vec<Box<dyn ModelHandler>> {
    vec![
        Box::new(EdgeDetect),
        Box::new(Invert),
        Box::new(Blend),
        Box::new(Gain),
    ]
}

fn float_opt(options: &OptionSnapshot, name: &str, default: f32) -> f32 {
    match options.get(OptionKind::Float, name) {
        Some(OptionValue::Float(v)) => v,
        _ => default,
    }
}

fn map_tile(t: &ImageTile, f: impl Fn(f32) -> f32) -> Result<ImageTile, String> {
    let px = t.pixels().iter().map(|&v| f(v)).collect();
    ImageTile::new(t.shape(), px).map_err(|e| e.to_string())
}

/// Thresholded forward-difference gradient magnitude, per channel.
pub struct EdgeDetect;

impl ModelHandler for EdgeDetect {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "edge-detect".to_string(),
            input_names: vec!["src".to_string()],
            option_schema: vec![OptionField::new("threshold", OptionValue::Float(0.5))],
        }
    }

    fn run(&self, options: &OptionSnapshot, inputs: &[ImageTile]) -> Result<Vec<ImageTile>, String> {
        let threshold = float_opt(options, "threshold", 0.5);
        let src = &inputs[0];
        let (w, h, c) = (src.width(), src.height(), src.channels());
        let mut out = Vec::with_capacity(src.pixels().len());
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    let v = src.sample(x, y, ch).unwrap_or(0.0);
                    let dx = src.sample(x + 1, y, ch).map_or(0.0, |r| r - v);
                    let dy = src.sample(x, y + 1, ch).map_or(0.0, |d| d - v);
                    let mag = dx.abs() + dy.abs();
                    out.push(if mag > threshold { 1.0 } else { 0.0 });
                }
            }
        }
        Ok(vec![ImageTile::new(src.shape(), out).map_err(|e| e.to_string())?])
    }
}

pub struct Invert;

impl ModelHandler for Invert {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "invert".to_string(),
            input_names: vec!["src".to_string()],
            option_schema: vec![],
        }
    }

    fn run(&self, _options: &OptionSnapshot, inputs: &[ImageTile]) -> Result<Vec<ImageTile>, String> {
        Ok(vec![map_tile(&inputs[0], |v| 1.0 - v)?])
    }
}

/// `a * (1 - mix) + b * mix`, optionally clamped to `[0, 1]`.
pub struct Blend;

impl ModelHandler for Blend {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "blend".to_string(),
            input_names: vec!["a".to_string(), "b".to_string()],
            option_schema: vec![
                OptionField::new("mix", OptionValue::Float(0.5)),
                OptionField::new("clamp", OptionValue::Bool(true)),
            ],
        }
    }

    fn run(&self, options: &OptionSnapshot, inputs: &[ImageTile]) -> Result<Vec<ImageTile>, String> {
        let (a, b) = (&inputs[0], &inputs[1]);
        if a.shape() != b.shape() {
            return Err(format!(
                "blend inputs differ in shape: {} vs {}",
                a.shape(),
                b.shape()
            ));
        }
        let mix = float_opt(options, "mix", 0.5);
        let clamp = !matches!(
            options.get(OptionKind::Bool, "clamp"),
            Some(OptionValue::Bool(false))
        );
        let px = a
            .pixels()
            .iter()
            .zip(b.pixels())
            .map(|(&x, &y)| {
                let v = x * (1.0 - mix) + y * mix;
                if clamp {
                    v.clamp(0.0, 1.0)
                } else {
                    v
                }
            })
            .collect();
        Ok(vec![ImageTile::new(a.shape(), px).map_err(|e| e.to_string())?])
    }
}

/// Multiplies by `gain`, `passes` times. `label` is accepted and ignored.
pub struct Gain;

impl ModelHandler for Gain {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor {
            name: "gain".to_string(),
            input_names: vec!["src".to_string()],
            option_schema: vec![
                OptionField::new("gain", OptionValue::Float(1.0)),
                OptionField::new("passes", OptionValue::Int(1)),
                OptionField::new("label", OptionValue::String(String::new())),
            ],
        }
    }

    fn run(&self, options: &OptionSnapshot, inputs: &[ImageTile]) -> Result<Vec<ImageTile>, String> {
        let gain = float_opt(options, "gain", 1.0);
        let passes = match options.get(OptionKind::Int, "passes") {
            Some(OptionValue::Int(n)) => n,
            _ => 1,
        };
        if passes < 0 {
            return Err(format!("passes must be >= 0, got {passes}"));
        }
        let k = gain.powi(passes);
        Ok(vec![map_tile(&inputs[0], |v| v * k)?])
    }
}
