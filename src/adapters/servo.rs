//! PWM servo bank adapter.
//!
//! Implements [`ServoPort`] on top of `embedded-hal` PWM channels.  Hobby
//! servos expect a 544–2400 µs pulse every 20 ms; the angle is mapped
//! linearly into that window and written as a duty cycle.

use embedded_hal::delay::DelayNs;
use embedded_hal::pwm::SetDutyCycle;
use heapless::Vec;
use log::debug;

use crate::app::ports::ServoPort;
use crate::error::ActuatorError;

pub const MAX_SERVOS: usize = 4;

const MIN_PULSE_US: u32 = 544;
const MAX_PULSE_US: u32 = 2400;
const FRAME_US: u32 = 20_000;
/// One sweep step per PWM frame.
const SWEEP_STEP_MS: u32 = FRAME_US / 1000;

/// Duty value for `angle` given the channel's full-scale duty.
pub fn duty_for_angle(angle: u8, max_duty: u16) -> u16 {
    let angle = u32::from(angle.min(180));
    let pulse = MIN_PULSE_US + (MAX_PULSE_US - MIN_PULSE_US) * angle / 180;
    (pulse * u32::from(max_duty) / FRAME_US) as u16
}

struct Channel<P> {
    pwm: P,
    angle: Option<u8>,
}

pub struct PwmServoBank<P: SetDutyCycle, D: DelayNs> {
    channels: Vec<Channel<P>, MAX_SERVOS>,
    delay: D,
}

impl<P: SetDutyCycle, D: DelayNs> PwmServoBank<P, D> {
    pub fn new(delay: D) -> Self {
        Self { channels: Vec::new(), delay }
    }

    /// Register the next channel.  Returns its servo index.
    pub fn attach(&mut self, pwm: P) -> Option<u8> {
        let index = self.channels.len() as u8;
        self.channels.push(Channel { pwm, angle: None }).ok()?;
        Some(index)
    }

    fn write(&mut self, index: u8, angle: u8) -> Result<(), ActuatorError> {
        let ch = self
            .channels
            .get_mut(usize::from(index))
            .ok_or(ActuatorError::PwmWriteFailed)?;
        let duty = duty_for_angle(angle, ch.pwm.max_duty_cycle());
        ch.pwm.set_duty_cycle(duty).map_err(|_| ActuatorError::PwmWriteFailed)?;
        ch.angle = Some(angle);
        Ok(())
    }
}

// ── ServoPort implementation ──────────────────────────────────

impl<P: SetDutyCycle, D: DelayNs> ServoPort for PwmServoBank<P, D> {
    fn set_servo_angle(&mut self, index: u8, angle: u8) -> Result<(), ActuatorError> {
        debug!("SERVO: #{} -> {}°", index, angle);
        self.write(index, angle)
    }

    fn servo_angle(&self, index: u8) -> Option<u8> {
        self.channels.get(usize::from(index))?.angle
    }

    fn sweep_servo(&mut self, index: u8, angle: u8, duration_ms: u32) -> Result<(), ActuatorError> {
        let Some(from) = self.servo_angle(index) else {
            // Unknown start position: nothing to interpolate from.
            return self.write(index, angle);
        };
        let steps = (duration_ms / SWEEP_STEP_MS).max(1);
        let (from, to) = (i32::from(from), i32::from(angle));
        for k in 1..=steps {
            let a = from + (to - from) * k as i32 / steps as i32;
            self.write(index, a as u8)?;
            if k < steps {
                self.delay.delay_ms(SWEEP_STEP_MS);
            }
        }
        debug!("SERVO: #{} swept {}° -> {}° in {} ms", index, from, to, duration_ms);
        Ok(())
    }
}
