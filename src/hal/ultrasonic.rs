//! Ultrasonic time-of-flight sensing.
//!
//! The HC-SR04 is driven directly: a 10 µs trigger pulse, then a busy
//! wait on the echo pin bounded by a hard deadline. The deadline is the
//! only blocking this module does, and it is the sampling task's single
//! intentional suspension point besides the store lock.

use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, InputPin, OutputPin};
use thiserror::Error;
use tracing::debug;

const TRIGGER_SETTLE: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("ultrasonic pins unavailable: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Distance sensor seam.
///
/// `ping` emits one pulse and reports the echo round-trip time.
/// `Ok(None)` means the echo never arrived within the deadline — that is
/// not an error, it is "no new information" and the caller keeps its
/// previous value.
pub trait DistanceSensor: Send {
    fn ping(&mut self) -> Result<Option<Duration>, SensorError>;
}

/// Trigger/echo pin pair of an HC-SR04 ranger.
pub struct Hcsr04Sensor {
    trigger: OutputPin,
    echo: InputPin,
    echo_timeout: Duration,
}

impl Hcsr04Sensor {
    pub fn open(trigger_pin: u8, echo_pin: u8, echo_timeout: Duration) -> Result<Self, SensorError> {
        let gpio = Gpio::new()?;
        let trigger = gpio.get(trigger_pin)?.into_output_low();
        let echo = gpio.get(echo_pin)?.into_input();
        debug!(
            trigger = trigger.pin(),
            echo = echo.pin(),
            ?echo_timeout,
            "ultrasonic sensor ready"
        );
        Ok(Self {
            trigger,
            echo,
            echo_timeout,
        })
    }
}

impl DistanceSensor for Hcsr04Sensor {
    fn ping(&mut self) -> Result<Option<Duration>, SensorError> {
        self.trigger.set_low();
        thread::sleep(TRIGGER_SETTLE);
        self.trigger.set_high();
        thread::sleep(TRIGGER_PULSE);
        self.trigger.set_low();

        // Single deadline covers both edge waits; a sensor that never
        // raises (or never drops) the echo line cannot hold us past it.
        let deadline = Instant::now() + self.echo_timeout;
        while self.echo.is_low() {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::hint::spin_loop();
        }
        let rise = Instant::now();
        while self.echo.is_high() {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::hint::spin_loop();
        }
        Ok(Some(rise.elapsed()))
    }
}
