use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target transformation failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    /// The value is outside the transformation's domain.
    #[error("{transform} produced a non-finite value from {value}")]
    Domain {
        /// Transformation name.
        transform: &'static str,
        /// Input that failed.
        value: f64,
    },
}

/// Invertible target transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// `ln(v)` / `exp(v)`.
    Log,
    /// `ln(1 + v)` / `exp(v) - 1`.
    Log1p,
    /// `sqrt(v)` / `v^2`.
    Sqrt,
}

impl TransformKind {
    /// Every registered transformation.
    pub const ALL: [Self; 3] = [Self::Log, Self::Log1p, Self::Sqrt];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Log1p => "log1p",
            Self::Sqrt => "sqrt",
        }
    }

    /// Applies the forward function.
    pub fn forward(self, value: f64) -> Result<f64, TransformError> {
        let out = match self {
            Self::Log => value.ln(),
            Self::Log1p => value.ln_1p(),
            Self::Sqrt => value.sqrt(),
        };
        self.finite(value, out)
    }

    /// Applies the inverse function.
    pub fn inverse(self, value: f64) -> Result<f64, TransformError> {
        let out = match self {
            Self::Log => value.exp(),
            Self::Log1p => value.exp_m1(),
            Self::Sqrt => value * value,
        };
        self.finite(value, out)
    }

    fn finite(self, input: f64, out: f64) -> Result<f64, TransformError> {
        if out.is_finite() {
            Ok(out)
        } else {
            Err(TransformError::Domain {
                transform: self.name(),
                value: input,
            })
        }
    }
}

/// Ordered transformation chain: forward in order, inverse in reverse order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformChain(pub Vec<TransformKind>);

impl TransformChain {
    /// Whether the chain is the identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names in forward order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|kind| kind.name()).collect()
    }

    /// Forward transform of a single value.
    pub fn forward(&self, value: f64) -> Result<f64, TransformError> {
        self.0.iter().try_fold(value, |acc, kind| kind.forward(acc))
    }

    /// Inverse transform of a single value.
    pub fn inverse(&self, value: f64) -> Result<f64, TransformError> {
        self.0.iter().rev().try_fold(value, |acc, kind| kind.inverse(acc))
    }

    /// Forward transform of every value.
    pub fn forward_all(&self, values: &[f64]) -> Result<Vec<f64>, TransformError> {
        values.iter().map(|value| self.forward(*value)).collect()
    }

    /// Inverse transform of every value.
    pub fn inverse_all(&self, values: &[f64]) -> Result<Vec<f64>, TransformError> {
        values.iter().map(|value| self.inverse(*value)).collect()
    }
}
