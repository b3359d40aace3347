// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Pad / memory-card driver
//!
//! The first byte on a freshly-selected bus addresses the device: 0x01
//! selects the controller, 0x81 the memory card. The driver consumes that
//! byte itself (answering high-impedance) and routes the rest of the
//! transaction to the addressed device until DTR drops.

use super::controller::Controller;
use super::memcard::MemcardDevice;
use super::{Exchange, SioDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectedDevice {
    None,
    Pad,
    Memcard,
}

/// Multiplexes one SIO slot between a controller and a memory card
pub struct PadCardDriver {
    selected: SelectedDevice,
    controller: Option<Box<dyn Controller>>,
    card: Option<Box<dyn MemcardDevice>>,
}

impl PadCardDriver {
    pub fn new() -> Self {
        Self {
            selected: SelectedDevice::None,
            controller: None,
            card: None,
        }
    }

    pub fn connect_controller(&mut self, controller: Box<dyn Controller>) {
        self.controller = Some(controller);
    }

    pub fn connect_card(&mut self, card: Box<dyn MemcardDevice>) {
        self.card = Some(card);
    }

    pub fn controller_mut(&mut self) -> Option<&mut (dyn Controller + 'static)> {
        self.controller.as_deref_mut()
    }

    pub fn card_mut(&mut self) -> Option<&mut (dyn MemcardDevice + 'static)> {
        self.card.as_deref_mut()
    }

    pub fn card(&self) -> Option<&dyn MemcardDevice> {
        self.card.as_deref()
    }
}

impl Default for PadCardDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SioDevice for PadCardDriver {
    fn exchange(&mut self, value: u8) -> Exchange {
        match self.selected {
            SelectedDevice::None => {
                // Address byte: pick the device, answer hi-Z, /ACK only if
                // something is actually attached
                let (selected, attached) = match value {
                    0x01 => (SelectedDevice::Pad, self.controller.is_some()),
                    0x81 => (SelectedDevice::Memcard, self.card.is_some()),
                    _ => (SelectedDevice::None, false),
                };
                self.selected = if attached { selected } else { SelectedDevice::None };
                Exchange {
                    response: 0xFF,
                    ack: attached,
                }
            }
            SelectedDevice::Pad => match self.controller.as_deref_mut() {
                Some(pad) => {
                    let (response, ack) = pad.exchange(value);
                    Exchange { response, ack }
                }
                None => Exchange {
                    response: 0xFF,
                    ack: false,
                },
            },
            SelectedDevice::Memcard => match self.card.as_deref_mut() {
                Some(card) => {
                    let (response, ack) = card.exchange(value);
                    Exchange { response, ack }
                }
                None => Exchange {
                    response: 0xFF,
                    ack: false,
                },
            },
        }
    }

    fn deselect(&mut self) {
        self.selected = SelectedDevice::None;
        if let Some(pad) = self.controller.as_deref_mut() {
            pad.reset();
        }
        if let Some(card) = self.card.as_deref_mut() {
            card.reset();
        }
    }

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::controller::StandardController;
    use super::super::memcard::MemoryCard;
    use super::*;

    #[test]
    fn test_address_byte_selects_pad() {
        let mut driver = PadCardDriver::new();
        driver.connect_controller(Box::new(StandardController::new()));

        let first = driver.exchange(0x01);
        assert_eq!(first.response, 0xFF);
        assert!(first.ack);

        let id = driver.exchange(0x42);
        assert_eq!(id.response, 0x41);
    }

    #[test]
    fn test_address_byte_selects_card() {
        let mut driver = PadCardDriver::new();
        driver.connect_card(Box::new(MemoryCard::new()));

        let first = driver.exchange(0x81);
        assert!(first.ack);

        // Command byte reaches the card, which answers its flag byte
        let flag = driver.exchange(0x52);
        assert_eq!(flag.response, 0x08);
    }

    #[test]
    fn test_missing_device_floats() {
        let mut driver = PadCardDriver::new();
        let first = driver.exchange(0x01);
        assert_eq!(first.response, 0xFF);
        assert!(!first.ack, "nothing attached, no /ACK");
    }

    #[test]
    fn test_deselect_resets_transaction() {
        let mut driver = PadCardDriver::new();
        driver.connect_controller(Box::new(StandardController::new()));

        driver.exchange(0x01);
        driver.exchange(0x42);
        driver.deselect();

        // A fresh transaction needs a fresh address byte
        let first = driver.exchange(0x01);
        assert_eq!(first.response, 0xFF);
        let id = driver.exchange(0x42);
        assert_eq!(id.response, 0x41);
    }
}
