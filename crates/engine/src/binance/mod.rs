pub mod rest;

pub use rest::{interval_duration, parse_klines, BinanceKlines};
