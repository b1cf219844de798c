//! Hardware seams for the two physical devices the controller owns: the
//! active-low pump relay and the HC-SR04-style ultrasonic ranger. Both
//! sit behind small traits so the control logic is testable without a
//! Raspberry Pi; the production implementations use `rppal`.

pub mod pump;
pub mod ultrasonic;

pub use pump::{PumpError, PumpSwitch, RelayPump};
pub use ultrasonic::{DistanceSensor, Hcsr04Sensor, SensorError};
