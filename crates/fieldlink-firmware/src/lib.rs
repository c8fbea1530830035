//! Firmware support library: configuration, the device registry and the
//! seams where platform collaborators (GPIO edges, ADC readings, LED
//! rendering) plug into the protocol core.

pub mod config;
pub mod devices;
pub mod sensors;
