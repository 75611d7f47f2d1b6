// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The single authoritative fan curve.
//!
//! Every replacement is validated first; readers always get a full snapshot
//! of either the old or the new curve, never a mix of both.

use crate::curve::{self, Curve, CurveError};
use std::sync::{PoisonError, RwLock};

/// Outcome of a successful [`CurveStore::try_set_curve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// False when the candidate was identical to the curve already stored.
    pub changed: bool,
}

/// Owner of the authoritative curve. Share it behind an `Arc`.
#[derive(Debug)]
pub struct CurveStore {
    current: RwLock<Curve>,
}

impl CurveStore {
    /// Create a store holding `initial`, which must pass validation.
    pub fn new(initial: Curve) -> Result<Self, CurveError> {
        initial.validate()?;
        Ok(Self {
            current: RwLock::new(initial),
        })
    }

    /// A store holding the stock curve.
    pub fn with_default_curve() -> Self {
        Self {
            current: RwLock::new(curve::default_curve()),
        }
    }

    /// Snapshot of the current curve.
    pub fn curve(&self) -> Curve {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate `candidate` and, if it passes, make it the current curve.
    /// On rejection the stored curve is left untouched.
    pub fn try_set_curve(&self, candidate: Curve) -> Result<Accepted, CurveError> {
        if let Err(e) = candidate.validate() {
            log::warn!("Rejected curve: {e}");
            return Err(e);
        }

        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let changed = *current != candidate;
        *current = candidate;

        if changed {
            log::info!("Applied new curve with {} point(s)", current.len());
        } else {
            log::debug!("Curve unchanged");
        }
        Ok(Accepted { changed })
    }
}

impl Default for CurveStore {
    fn default() -> Self {
        Self::with_default_curve()
    }
}
