//! Pump relay output.

use rppal::gpio::{Gpio, OutputPin};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("relay pin unavailable: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Binary actuator seam. Implementations translate the logical running
/// flag into whatever the wiring requires.
pub trait PumpSwitch: Send {
    fn set_running(&mut self, running: bool);
}

/// Relay on a GPIO output, wired active-low: the pin is driven low to run
/// the pump and high to stop it.
pub struct RelayPump {
    pin: OutputPin,
}

impl RelayPump {
    /// Claims the relay pin and forces the pump OFF before anything else
    /// in the system gets a chance to run.
    pub fn open(gpio: &Gpio, pin: u8) -> Result<Self, PumpError> {
        let pin = gpio.get(pin)?.into_output_high();
        info!(pin = pin.pin(), "pump relay ready, pump off");
        Ok(Self { pin })
    }
}

impl PumpSwitch for RelayPump {
    fn set_running(&mut self, running: bool) {
        // Active low: logical state is the negation of the pin level.
        if running {
            self.pin.set_low();
        } else {
            self.pin.set_high();
        }
        debug!(running, "relay driven");
    }
}
