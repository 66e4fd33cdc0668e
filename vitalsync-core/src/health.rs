//! Body-mass-index math derived from profile measurements.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute BMI from weight in kilograms and height in centimetres.
///
/// Returns `0.0` when either measurement is not a positive finite number.
/// The result is rounded to one decimal place.
pub fn calculate_bmi(weight_kg: f64, height_cm: f64) -> f64 {
    if !(weight_kg.is_finite() && height_cm.is_finite()) || weight_kg <= 0.0 || height_cm <= 0.0 {
        return 0.0;
    }
    let height_m = height_cm / 100.0;
    let bmi = weight_kg / (height_m * height_m);
    if !bmi.is_finite() {
        return 0.0;
    }
    (bmi * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BmiCategory {
    Invalid,
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            BmiCategory::Invalid => "Invalid",
            BmiCategory::Underweight => "Underweight",
            BmiCategory::Normal => "Normal",
            BmiCategory::Overweight => "Overweight",
            BmiCategory::Obese => "Obese",
        }
    }
}

impl fmt::Display for BmiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a BMI value. Non-positive and NaN values are `Invalid`.
pub fn bmi_category(bmi: f64) -> BmiCategory {
    if bmi.is_nan() || bmi <= 0.0 {
        BmiCategory::Invalid
    } else if bmi < 18.5 {
        BmiCategory::Underweight
    } else if bmi < 25.0 {
        BmiCategory::Normal
    } else if bmi < 30.0 {
        BmiCategory::Overweight
    } else {
        BmiCategory::Obese
    }
}
