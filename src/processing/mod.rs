//! Processing module - congestion classification over stored counters

mod congestion;

pub use congestion::CongestionClassifier;
