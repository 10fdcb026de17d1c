//! Power enable lines
//!
//! Both lines are active low.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::transport::{Result, Transport, TrimodeError};

/// USB power enable line
pub struct UsbPower<P: OutputPin> {
    enable: P,
}

impl<P: OutputPin> UsbPower<P> {
    /// Set the line before the USB stack starts
    ///
    /// Power is enabled only when the persisted transport is USB and a cable
    /// is detected. Call before the USB stack starts.
    pub fn init<C: InputPin>(enable: P, cable_detect: &mut C, persisted: Transport) -> Result<Self> {
        let cable = cable_detect.is_high().map_err(|_| TrimodeError::Pin)?;
        let mut power = Self { enable };
        if persisted == Transport::Usb && cable {
            power.connect()?;
        } else {
            power.disconnect()?;
        }
        debug!("USB power init, cable: {}", cable);
        Ok(power)
    }

    pub fn connect(&mut self) -> Result<()> {
        self.enable.set_low().map_err(|_| TrimodeError::Pin)
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.enable.set_high().map_err(|_| TrimodeError::Pin)
    }

    pub fn release(self) -> P {
        self.enable
    }
}

/// LED power enable line of the RGB matrix
///
/// Cut while the host is suspended.
pub struct LedPower<P: OutputPin> {
    enable: P,
}

impl<P: OutputPin> LedPower<P> {
    /// Take the line and power the LEDs
    pub fn new(enable: P) -> Result<Self> {
        let mut power = Self { enable };
        power.enable()?;
        Ok(power)
    }

    pub fn enable(&mut self) -> Result<()> {
        self.enable.set_low().map_err(|_| TrimodeError::Pin)
    }

    pub fn disable(&mut self) -> Result<()> {
        self.enable.set_high().map_err(|_| TrimodeError::Pin)
    }

    pub fn release(self) -> P {
        self.enable
    }
}

/// Stand-in line for boards without an LED power switch
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        Ok(())
    }
}
