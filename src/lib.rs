#![deny(dead_code)]
#![deny(unused_imports)]

//! Additive regression with shape-constrained splines.
//!
//! Each [`spline::Spline`] maps one feature to a basis expansion; a
//! [`regressor::Regressor`] sums them and fits every coefficient at once by solving
//! a single convex problem: squared error plus penalties, subject to the union of
//! all attached constraints.

pub mod basis;
pub mod constraints;
pub mod data;
pub mod expr;
pub mod model;
pub mod penalties;
pub mod problem;
pub mod regressor;
pub mod solver;
pub mod spline;
pub mod summary;
