// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature-to-fan-speed curve control.
//!
//! A [`store::CurveStore`] holds the active curve, a [`editor::CurveEditor`]
//! reshapes a draft of it from pointer gestures, and a
//! [`control::ControlLoop`] applies it to the fan once per tick.

pub mod config;
pub mod control;
pub mod curve;
pub mod editor;
pub mod hardware;
pub mod hwmon;
pub mod nvidia;
pub mod persist;
pub mod store;
